pub mod daq_driver;

#[cfg(feature = "sim")]
pub mod sim;

pub use daq_driver::DaqDriver;

#[cfg(feature = "nidaq")]
pub use crate::nidaq::nidaq_sys::NidaqDriver;
#[cfg(feature = "sim")]
pub use sim::SimDriver;
