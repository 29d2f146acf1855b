use chrono::Duration;
use std::fmt::Debug;
use tracing::{error, warn};

use crate::error::{DaqError, Result};

/// Status code returned by every driver entry point, negative means failure
pub type Status = i32;

/// `DAQmx_Val_RSE`: referenced single-ended terminal configuration
pub const DAQMX_VAL_RSE: i32 = 10083;
/// `DAQmx_Val_Volts`
pub const DAQMX_VAL_VOLTS: i32 = 10348;
/// `DAQmx_Val_GroupByChannel`
pub const DAQMX_VAL_GROUP_BY_CHANNEL: u32 = 0;
/// `DAQmx_Val_ChanPerLine`
pub const DAQMX_VAL_CHAN_PER_LINE: i32 = 0;
/// Upper bound on every blocking read or write
pub const READ_WRITE_TIMEOUT: Duration = Duration::milliseconds(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalConfig {
    /// Referenced single-ended
    Rse,
}

impl TerminalConfig {
    pub fn code(self) -> i32 {
        match self {
            Self::Rse => DAQMX_VAL_RSE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageUnits {
    Volts,
}

impl VoltageUnits {
    pub fn code(self) -> i32 {
        match self {
            Self::Volts => DAQMX_VAL_VOLTS,
        }
    }
}

/// Layout of multi-channel sample buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// All samples of one channel stored contiguously
    GroupByChannel,
}

impl FillMode {
    pub fn code(self) -> u32 {
        match self {
            Self::GroupByChannel => DAQMX_VAL_GROUP_BY_CHANNEL,
        }
    }
}

/// How digital lines are mapped onto virtual channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineGrouping {
    /// One virtual channel per line
    ChanPerLine,
}

impl LineGrouping {
    pub fn code(self) -> i32 {
        match self {
            Self::ChanPerLine => DAQMX_VAL_CHAN_PER_LINE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
}

impl VoltageRange {
    /// Range spanning `[-max, max]`
    pub fn symmetric(max: f64) -> Self {
        Self { min: -max, max }
    }
}

/// Capability set over the vendor driver ABI.
///
/// One method per driver entry point. Implementations translate the raw status code of
/// each call through [`DaqDriver::check`], so a negative code always surfaces as
/// [`DaqError::Driver`] carrying the driver's own description of the failure.
pub trait DaqDriver: Debug {
    /// Opaque task token, only meaningful to the driver that created it
    type Task: Copy + Debug;

    fn reset_device(&mut self, device: &str) -> Result<()>;

    /// Comma separated list of every device known to the driver
    fn system_device_names(&mut self) -> Result<String>;

    fn create_task(&mut self) -> Result<Self::Task>;

    fn create_ai_voltage_chan(
        &mut self,
        task: Self::Task,
        physical_channel: &str,
        terminal: TerminalConfig,
        range: VoltageRange,
        units: VoltageUnits,
    ) -> Result<()>;

    fn create_ao_voltage_chan(
        &mut self,
        task: Self::Task,
        physical_channel: &str,
        range: VoltageRange,
        units: VoltageUnits,
    ) -> Result<()>;

    fn create_di_chan(
        &mut self,
        task: Self::Task,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<()>;

    fn create_do_chan(
        &mut self,
        task: Self::Task,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<()>;

    fn start_task(&mut self, task: Self::Task) -> Result<()>;

    fn stop_task(&mut self, task: Self::Task) -> Result<()>;

    /// Release the task, the token must not be used afterwards
    fn clear_task(&mut self, task: Self::Task) -> Result<()>;

    /// Read the available samples of every channel in `task` into `buf`,
    /// returning the number of samples read per channel
    fn read_analog_f64(
        &mut self,
        task: Self::Task,
        timeout: Duration,
        fill_mode: FillMode,
        buf: &mut [f64],
    ) -> Result<usize>;

    /// Read one byte per line into `buf`, returning the number of samples read per channel
    fn read_digital_lines(
        &mut self,
        task: Self::Task,
        timeout: Duration,
        fill_mode: FillMode,
        buf: &mut [u8],
    ) -> Result<usize>;

    /// Returns the number of samples written per channel
    fn write_analog_f64(
        &mut self,
        task: Self::Task,
        timeout: Duration,
        layout: FillMode,
        samples: &[f64],
    ) -> Result<usize>;

    /// Returns the number of samples written per channel
    fn write_digital_lines(
        &mut self,
        task: Self::Task,
        timeout: Duration,
        layout: FillMode,
        samples: &[u8],
    ) -> Result<usize>;

    /// Human readable description of a status code
    fn error_string(&self, code: Status) -> String;

    fn driver_error(&self, code: Status) -> DaqError {
        let message = self.error_string(code);
        error!("driver returns error code: {code} -> {message}");
        DaqError::Driver { code, message }
    }

    /// Turn a driver status code into a result, positive codes are warnings
    fn check(&self, status: Status) -> Result<()> {
        if status < 0 {
            return Err(self.driver_error(status));
        }
        if status > 0 {
            warn!(
                "driver returns warning code: {status} -> {}",
                self.error_string(status)
            );
        }
        Ok(())
    }
}
