use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::backend::daq_driver::{LineGrouping, TerminalConfig, VoltageRange, VoltageUnits};
use crate::error::{DaqError, Result};

/// Analog inputs `ai0:15`
pub const ANALOG_INPUT_COUNT: usize = 16;
/// Analog outputs `ao0`, `ao1`
pub const ANALOG_OUTPUT_COUNT: usize = 2;
/// Digital inputs `port0/line0:3`
pub const DIGITAL_INPUT_COUNT: usize = 4;
/// Digital outputs `port1/line0` .. `port1/line3`
pub const DIGITAL_OUTPUT_COUNT: usize = 4;
/// Analog range is `[-MAX_VOLTAGE, MAX_VOLTAGE]` for inputs and outputs
pub const MAX_VOLTAGE: f64 = 10.0;

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ChannelGroup {
    AnalogInput,
    AnalogOutput,
    DigitalInput,
    DigitalOutput,
}

impl ChannelGroup {
    pub const fn count(self) -> usize {
        match self {
            Self::AnalogInput => ANALOG_INPUT_COUNT,
            Self::AnalogOutput => ANALOG_OUTPUT_COUNT,
            Self::DigitalInput => DIGITAL_INPUT_COUNT,
            Self::DigitalOutput => DIGITAL_OUTPUT_COUNT,
        }
    }

    pub fn check_index(self, index: usize) -> Result<()> {
        if index < self.count() {
            Ok(())
        } else {
            Err(DaqError::InvalidChannel {
                group: self,
                index,
                count: self.count(),
            })
        }
    }
}

impl fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnalogInput => write!(f, "analog input"),
            Self::AnalogOutput => write!(f, "analog output"),
            Self::DigitalInput => write!(f, "digital input"),
            Self::DigitalOutput => write!(f, "digital output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Generic Nidaq channel
pub struct Channel {
    pub physical_channel: String,
}

/// All analog inputs, read together by one task
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogInputChannel {
    pub channel: Channel,
    pub terminal: TerminalConfig,
    pub range: VoltageRange,
    pub units: VoltageUnits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalogOutputChannel {
    pub channel: Channel,
    pub range: VoltageRange,
    pub units: VoltageUnits,
}

/// All digital input lines, read together by one task
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalInputChannel {
    pub channel: Channel,
    pub grouping: LineGrouping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DigitalOutputChannel {
    pub channel: Channel,
    pub grouping: LineGrouping,
}

/// Every physical channel a session provisions on one device
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLayout {
    pub analog_input: AnalogInputChannel,
    pub digital_input: DigitalInputChannel,
    pub analog_output: [AnalogOutputChannel; ANALOG_OUTPUT_COUNT],
    pub digital_output: [DigitalOutputChannel; DIGITAL_OUTPUT_COUNT],
}

impl ChannelLayout {
    pub fn for_device(device: &str) -> Self {
        let range = VoltageRange::symmetric(MAX_VOLTAGE);

        Self {
            analog_input: AnalogInputChannel {
                channel: Channel {
                    physical_channel: format!("{device}/ai0:{}", ANALOG_INPUT_COUNT - 1),
                },
                terminal: TerminalConfig::Rse,
                range,
                units: VoltageUnits::Volts,
            },
            digital_input: DigitalInputChannel {
                channel: Channel {
                    physical_channel: format!("{device}/port0/line0:{}", DIGITAL_INPUT_COUNT - 1),
                },
                grouping: LineGrouping::ChanPerLine,
            },
            analog_output: std::array::from_fn(|i| AnalogOutputChannel {
                channel: Channel {
                    physical_channel: format!("{device}/ao{i}"),
                },
                range,
                units: VoltageUnits::Volts,
            }),
            digital_output: std::array::from_fn(|i| DigitalOutputChannel {
                channel: Channel {
                    physical_channel: format!("{device}/port1/line{i}"),
                },
                grouping: LineGrouping::ChanPerLine,
            }),
        }
    }
}

/// Which channels of a group a read should return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Single(usize),
    /// Ordered, indices may repeat
    Subset(Vec<usize>),
}

impl Selector {
    pub fn indices(&self) -> &[usize] {
        match self {
            Self::Single(index) => std::slice::from_ref(index),
            Self::Subset(indices) => indices,
        }
    }

    pub fn validate(&self, group: ChannelGroup) -> Result<()> {
        self.indices()
            .iter()
            .try_for_each(|&index| group.check_index(index))
    }

    /// Pick the selected values out of a full reading of `group`
    pub fn project<T: Copy>(&self, group: ChannelGroup, values: &[T]) -> Result<Reading<T>> {
        self.validate(group)?;

        let pick = |index: usize| {
            values
                .get(index)
                .copied()
                .ok_or_else(|| DaqError::InvalidChannel {
                    group,
                    index,
                    count: values.len(),
                })
        };

        match self {
            Self::Single(index) => pick(*index).map(Reading::Single),
            Self::Subset(indices) => indices
                .iter()
                .map(|&index| pick(index))
                .collect::<Result<Vec<T>>>()
                .map(Reading::Subset),
        }
    }
}

impl From<usize> for Selector {
    fn from(index: usize) -> Self {
        Self::Single(index)
    }
}

impl From<Vec<usize>> for Selector {
    fn from(indices: Vec<usize>) -> Self {
        Self::Subset(indices)
    }
}

impl From<&[usize]> for Selector {
    fn from(indices: &[usize]) -> Self {
        Self::Subset(indices.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Selector {
    fn from(indices: [usize; N]) -> Self {
        Self::Subset(indices.to_vec())
    }
}

/// Result of a selected read: a scalar for [`Selector::Single`], a vector for [`Selector::Subset`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading<T> {
    Single(T),
    Subset(Vec<T>),
}

impl<T> Reading<T> {
    pub fn single(self) -> Option<T> {
        match self {
            Self::Single(value) => Some(value),
            Self::Subset(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Single(value) => vec![value],
            Self::Subset(values) => values,
        }
    }
}

/// All analog inputs, taken by a single driver read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalogSnapshot {
    pub acquired_at: DateTime<Utc>,
    pub volts: [f64; ANALOG_INPUT_COUNT],
}

impl AnalogSnapshot {
    pub fn select(&self, selector: &Selector) -> Result<Reading<f64>> {
        selector.project(ChannelGroup::AnalogInput, &self.volts)
    }
}

/// All digital input lines, taken by a single driver read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigitalSnapshot {
    pub acquired_at: DateTime<Utc>,
    pub lines: [bool; DIGITAL_INPUT_COUNT],
}

impl DigitalSnapshot {
    pub fn select(&self, selector: &Selector) -> Result<Reading<bool>> {
        selector.project(ChannelGroup::DigitalInput, &self.lines)
    }
}
