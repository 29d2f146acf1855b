//! Session layer over an NI-DAQmx card: sixteen analog inputs, two analog outputs, four
//! digital inputs and four digital outputs, each channel group backed by its own driver task.

pub mod backend;
pub mod channel;
pub mod error;
#[cfg(feature = "nidaq")]
pub mod nidaq;
pub mod session;

pub use channel::{AnalogSnapshot, ChannelGroup, DigitalSnapshot, Reading, Selector};
pub use error::{DaqError, Result};
pub use session::DeviceSession;
