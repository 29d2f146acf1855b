//! NI-DAQmx backend, linked against the vendor `NIDAQmx` library by `build.rs`

pub mod bindings;
pub mod nidaq_sys;
