use thiserror::Error;

use crate::channel::ChannelGroup;

pub type Result<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqError {
    #[error("Device '{device}' not found among system devices {available:?}")]
    DeviceNotFound {
        device: String,
        available: Vec<String>,
    },

    #[error("Invalid {group} channel {index}: group has {count} channels")]
    InvalidChannel {
        group: ChannelGroup,
        index: usize,
        count: usize,
    },

    #[error("Invalid value {value} for {group} channel {index}")]
    InvalidValue {
        group: ChannelGroup,
        index: usize,
        value: f64,
    },

    #[error("Device session '{device}' is not open")]
    NotOpen { device: String },

    #[error("Device session '{device}' is already open")]
    AlreadyOpen { device: String },

    /// A name handed to the driver contains an interior nul byte
    #[error("Invalid name {name:?}: contains a nul byte")]
    InvalidName { name: String },

    #[error("Expected {expected} samples per channel but the driver reported {actual}")]
    SampleCount { expected: usize, actual: usize },

    /// Negative status code returned by the driver, with the driver's own description
    #[error("NIDAQmx call failed with error {code}: {message}")]
    Driver { code: i32, message: String },
}
