use chrono::Duration;
use rand::random_range;
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::backend::daq_driver::{
    DaqDriver, FillMode, LineGrouping, Status, TerminalConfig, VoltageRange, VoltageUnits,
};
use crate::error::Result;

/// `DAQmxErrorInvalidTask`
pub const ERROR_INVALID_TASK: Status = -200088;
/// `DAQmxErrorInvalidDeviceID`
pub const ERROR_INVALID_DEVICE: Status = -200220;
/// `DAQmxErrorPhysicalChanDoesNotExist`
pub const ERROR_PHYSICAL_CHANNEL: Status = -200170;
/// `DAQmxErrorReadBufferTooSmall`
pub const ERROR_BUFFER_TOO_SMALL: Status = -200229;

/// Amplitude of the noise on analog inputs without loopback wiring
const UNWIRED_NOISE_VOLTS: f64 = 0.005;
/// Oldest journal entries are dropped beyond this many calls
pub const CALL_JOURNAL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimTask(pub u32);

/// Driver entry points, used to target fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ResetDevice,
    GetSysDevNames,
    CreateTask,
    CreateAiVoltageChan,
    CreateAoVoltageChan,
    CreateDiChan,
    CreateDoChan,
    StartTask,
    StopTask,
    ClearTask,
    ReadAnalogF64,
    ReadDigitalLines,
    WriteAnalogF64,
    WriteDigitalLines,
}

/// One entry of the simulated driver's call journal
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    ResetDevice {
        device: String,
    },
    GetSysDevNames,
    CreateTask,
    CreateAiVoltageChan {
        task: SimTask,
        physical_channel: String,
        terminal: TerminalConfig,
        range: VoltageRange,
        units: VoltageUnits,
    },
    CreateAoVoltageChan {
        task: SimTask,
        physical_channel: String,
        range: VoltageRange,
        units: VoltageUnits,
    },
    CreateDiChan {
        task: SimTask,
        lines: String,
        grouping: LineGrouping,
    },
    CreateDoChan {
        task: SimTask,
        lines: String,
        grouping: LineGrouping,
    },
    StartTask {
        task: SimTask,
    },
    StopTask {
        task: SimTask,
    },
    ClearTask {
        task: SimTask,
    },
    ReadAnalogF64 {
        task: SimTask,
    },
    ReadDigitalLines {
        task: SimTask,
    },
    WriteAnalogF64 {
        task: SimTask,
        samples: Vec<f64>,
    },
    WriteDigitalLines {
        task: SimTask,
        samples: Vec<u8>,
    },
}

impl DriverCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ResetDevice { .. } => Operation::ResetDevice,
            Self::GetSysDevNames => Operation::GetSysDevNames,
            Self::CreateTask => Operation::CreateTask,
            Self::CreateAiVoltageChan { .. } => Operation::CreateAiVoltageChan,
            Self::CreateAoVoltageChan { .. } => Operation::CreateAoVoltageChan,
            Self::CreateDiChan { .. } => Operation::CreateDiChan,
            Self::CreateDoChan { .. } => Operation::CreateDoChan,
            Self::StartTask { .. } => Operation::StartTask,
            Self::StopTask { .. } => Operation::StopTask,
            Self::ClearTask { .. } => Operation::ClearTask,
            Self::ReadAnalogF64 { .. } => Operation::ReadAnalogF64,
            Self::ReadDigitalLines { .. } => Operation::ReadDigitalLines,
            Self::WriteAnalogF64 { .. } => Operation::WriteAnalogF64,
            Self::WriteDigitalLines { .. } => Operation::WriteDigitalLines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimChannel {
    AnalogInput(u32),
    AnalogOutput(u32),
    DigitalInput(u32),
    DigitalOutput(u32),
}

#[derive(Debug, Default)]
struct SimTaskState {
    channels: Vec<SimChannel>,
    running: bool,
}

/// State of the simulated card, shared by every clone of a [`SimDriver`]
#[derive(Debug, Default)]
struct SimCard {
    devices: Vec<String>,
    next_task: u32,
    tasks: HashMap<SimTask, SimTaskState>,
    /// `aoN` output level, looped back onto `aiN`
    analog_outputs: HashMap<u32, f64>,
    /// `port1/lineN` output level, looped back onto `port0/lineN`
    digital_outputs: HashMap<u32, u8>,
    calls: VecDeque<DriverCall>,
    faults: HashMap<Operation, Status>,
    /// Sample counts reported instead of the real one by the next read or write
    sample_counts: HashMap<Operation, usize>,
}

type SimResult<T> = std::result::Result<T, Status>;

impl SimCard {
    /// Journal the call and fire a pending fault for its operation
    fn record(&mut self, call: DriverCall) -> SimResult<()> {
        let operation = call.operation();
        if self.calls.len() == CALL_JOURNAL_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
        match self.faults.remove(&operation) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn samples(&mut self, operation: Operation, actual: usize) -> usize {
        self.sample_counts.remove(&operation).unwrap_or(actual)
    }

    fn task(&mut self, task: SimTask) -> SimResult<&mut SimTaskState> {
        self.tasks.get_mut(&task).ok_or(ERROR_INVALID_TASK)
    }

    fn reset_device(&mut self, device: &str) -> SimResult<()> {
        self.record(DriverCall::ResetDevice {
            device: device.to_owned(),
        })?;
        self.known_device(device)?;
        self.analog_outputs.clear();
        self.digital_outputs.clear();
        Ok(())
    }

    fn system_device_names(&mut self) -> SimResult<String> {
        self.record(DriverCall::GetSysDevNames)?;
        Ok(self.devices.join(", "))
    }

    fn create_task(&mut self) -> SimResult<SimTask> {
        self.record(DriverCall::CreateTask)?;
        self.next_task += 1;
        let task = SimTask(self.next_task);
        self.tasks.insert(task, SimTaskState::default());
        Ok(task)
    }

    /// Attach the channels named by `channels` (e.g. `Dev1/ai0:15`) to `task`
    fn attach(
        &mut self,
        task: SimTask,
        channels: &str,
        prefix: &str,
        channel: fn(u32) -> SimChannel,
    ) -> SimResult<()> {
        let (device, indices) = parse_physical_channels(channels, prefix)?;
        self.known_device(device)?;
        self.task(task)?.channels.extend(indices.map(channel));
        Ok(())
    }

    fn known_device(&self, device: &str) -> SimResult<()> {
        if self.devices.iter().any(|d| d == device) {
            Ok(())
        } else {
            Err(ERROR_INVALID_DEVICE)
        }
    }

    fn read_analog(&mut self, task: SimTask, buf: &mut [f64]) -> SimResult<usize> {
        self.record(DriverCall::ReadAnalogF64 { task })?;
        let channels = self.task(task)?.channels.clone();
        if buf.len() < channels.len() {
            return Err(ERROR_BUFFER_TOO_SMALL);
        }
        for (slot, channel) in buf.iter_mut().zip(channels) {
            if let SimChannel::AnalogInput(index) = channel {
                *slot = self
                    .analog_outputs
                    .get(&index)
                    .copied()
                    .unwrap_or_else(|| random_range(-UNWIRED_NOISE_VOLTS..=UNWIRED_NOISE_VOLTS));
            }
        }
        Ok(self.samples(Operation::ReadAnalogF64, 1))
    }

    fn read_digital(&mut self, task: SimTask, buf: &mut [u8]) -> SimResult<usize> {
        self.record(DriverCall::ReadDigitalLines { task })?;
        let channels = self.task(task)?.channels.clone();
        if buf.len() < channels.len() {
            return Err(ERROR_BUFFER_TOO_SMALL);
        }
        for (slot, channel) in buf.iter_mut().zip(channels) {
            if let SimChannel::DigitalInput(line) = channel {
                *slot = self.digital_outputs.get(&line).copied().unwrap_or(0);
            }
        }
        Ok(self.samples(Operation::ReadDigitalLines, 1))
    }

    fn write_analog(&mut self, task: SimTask, samples: &[f64]) -> SimResult<usize> {
        self.record(DriverCall::WriteAnalogF64 {
            task,
            samples: samples.to_vec(),
        })?;
        let channels = self.task(task)?.channels.clone();
        for channel in &channels {
            if let (SimChannel::AnalogOutput(index), Some(&value)) = (channel, samples.last()) {
                self.analog_outputs.insert(*index, value);
            }
        }
        let written = samples.len() / channels.len().max(1);
        Ok(self.samples(Operation::WriteAnalogF64, written))
    }

    fn write_digital(&mut self, task: SimTask, samples: &[u8]) -> SimResult<usize> {
        self.record(DriverCall::WriteDigitalLines {
            task,
            samples: samples.to_vec(),
        })?;
        let channels = self.task(task)?.channels.clone();
        for channel in &channels {
            if let (SimChannel::DigitalOutput(line), Some(&value)) = (channel, samples.last()) {
                self.digital_outputs.insert(*line, value);
            }
        }
        let written = samples.len() / channels.len().max(1);
        Ok(self.samples(Operation::WriteDigitalLines, written))
    }
}

/// Split `Dev1/port0/line0:3` into the device name and the line/channel numbers
fn parse_physical_channels<'a>(
    channels: &'a str,
    prefix: &str,
) -> SimResult<(&'a str, RangeInclusive<u32>)> {
    let (device, rest) = channels.split_once('/').ok_or(ERROR_PHYSICAL_CHANNEL)?;
    let leaf = rest.rsplit('/').next().unwrap_or(rest);
    let numbers = leaf.strip_prefix(prefix).ok_or(ERROR_PHYSICAL_CHANNEL)?;

    let parse = |n: &str| n.parse::<u32>().map_err(|_| ERROR_PHYSICAL_CHANNEL);
    let range = match numbers.split_once(':') {
        Some((first, last)) => parse(first)?..=parse(last)?,
        None => {
            let index = parse(numbers)?;
            index..=index
        }
    };

    Ok((device, range))
}

/// In-memory NI card with loopback wiring: `aoN` feeds `aiN` and `port1/lineN` feeds
/// `port0/lineN`. Every driver call is journaled and faults can be injected per operation.
///
/// Clones share the same card, so a test can keep a handle while a session owns another.
#[derive(Debug, Clone)]
pub struct SimDriver {
    card: Arc<Mutex<SimCard>>,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::with_devices(&["Dev1"])
    }
}

impl SimDriver {
    pub fn with_devices(devices: &[&str]) -> Self {
        info!("Simulating NI card(s): {:?}", devices);
        Self {
            card: Arc::new(Mutex::new(SimCard {
                devices: devices.iter().map(|d| d.to_string()).collect(),
                ..SimCard::default()
            })),
        }
    }

    fn card(&self) -> MutexGuard<'_, SimCard> {
        self.card.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Driver calls made so far, oldest first, bounded by [`CALL_JOURNAL_CAPACITY`]
    pub fn calls(&self) -> Vec<DriverCall> {
        self.card().calls.iter().cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.card().calls.clear();
    }

    /// Make the next call of `operation` fail with `code`
    pub fn inject_fault(&self, operation: Operation, code: Status) {
        debug!("Injecting fault {code} on next {:?}", operation);
        self.card().faults.insert(operation, code);
    }

    /// Make the next successful call of `operation` report `samples` samples per channel
    pub fn inject_sample_count(&self, operation: Operation, samples: usize) {
        debug!("Reporting {samples} samples on next {:?}", operation);
        self.card().sample_counts.insert(operation, samples);
    }

    /// Tasks created and not yet cleared
    pub fn live_tasks(&self) -> usize {
        self.card().tasks.len()
    }

    pub fn running_tasks(&self) -> usize {
        self.card().tasks.values().filter(|t| t.running).count()
    }

    /// Last level written to `aoN`
    pub fn analog_output(&self, index: u32) -> Option<f64> {
        self.card().analog_outputs.get(&index).copied()
    }

    /// Last level written to `port1/lineN`
    pub fn digital_output(&self, line: u32) -> Option<u8> {
        self.card().digital_outputs.get(&line).copied()
    }
}

impl DaqDriver for SimDriver {
    type Task = SimTask;

    fn reset_device(&mut self, device: &str) -> Result<()> {
        let outcome = self.card().reset_device(device);
        outcome.map_err(|code| self.driver_error(code))
    }

    fn system_device_names(&mut self) -> Result<String> {
        let outcome = self.card().system_device_names();
        outcome.map_err(|code| self.driver_error(code))
    }

    fn create_task(&mut self) -> Result<SimTask> {
        let outcome = self.card().create_task();
        outcome.map_err(|code| self.driver_error(code))
    }

    fn create_ai_voltage_chan(
        &mut self,
        task: SimTask,
        physical_channel: &str,
        terminal: TerminalConfig,
        range: VoltageRange,
        units: VoltageUnits,
    ) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::CreateAiVoltageChan {
                task,
                physical_channel: physical_channel.to_owned(),
                terminal,
                range,
                units,
            })
            .and_then(|()| card.attach(task, physical_channel, "ai", SimChannel::AnalogInput))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn create_ao_voltage_chan(
        &mut self,
        task: SimTask,
        physical_channel: &str,
        range: VoltageRange,
        units: VoltageUnits,
    ) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::CreateAoVoltageChan {
                task,
                physical_channel: physical_channel.to_owned(),
                range,
                units,
            })
            .and_then(|()| card.attach(task, physical_channel, "ao", SimChannel::AnalogOutput))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn create_di_chan(&mut self, task: SimTask, lines: &str, grouping: LineGrouping) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::CreateDiChan {
                task,
                lines: lines.to_owned(),
                grouping,
            })
            .and_then(|()| card.attach(task, lines, "line", SimChannel::DigitalInput))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn create_do_chan(&mut self, task: SimTask, lines: &str, grouping: LineGrouping) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::CreateDoChan {
                task,
                lines: lines.to_owned(),
                grouping,
            })
            .and_then(|()| card.attach(task, lines, "line", SimChannel::DigitalOutput))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn start_task(&mut self, task: SimTask) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::StartTask { task })
                .and_then(|()| card.task(task).map(|t| t.running = true))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn stop_task(&mut self, task: SimTask) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::StopTask { task })
                .and_then(|()| card.task(task).map(|t| t.running = false))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn clear_task(&mut self, task: SimTask) -> Result<()> {
        let outcome = {
            let mut card = self.card();
            card.record(DriverCall::ClearTask { task })
                .and_then(|()| card.tasks.remove(&task).map(drop).ok_or(ERROR_INVALID_TASK))
        };
        outcome.map_err(|code| self.driver_error(code))
    }

    fn read_analog_f64(
        &mut self,
        task: SimTask,
        _timeout: Duration,
        _fill_mode: FillMode,
        buf: &mut [f64],
    ) -> Result<usize> {
        let outcome = self.card().read_analog(task, buf);
        outcome.map_err(|code| self.driver_error(code))
    }

    fn read_digital_lines(
        &mut self,
        task: SimTask,
        _timeout: Duration,
        _fill_mode: FillMode,
        buf: &mut [u8],
    ) -> Result<usize> {
        let outcome = self.card().read_digital(task, buf);
        outcome.map_err(|code| self.driver_error(code))
    }

    fn write_analog_f64(
        &mut self,
        task: SimTask,
        _timeout: Duration,
        _layout: FillMode,
        samples: &[f64],
    ) -> Result<usize> {
        let outcome = self.card().write_analog(task, samples);
        outcome.map_err(|code| self.driver_error(code))
    }

    fn write_digital_lines(
        &mut self,
        task: SimTask,
        _timeout: Duration,
        _layout: FillMode,
        samples: &[u8],
    ) -> Result<usize> {
        let outcome = self.card().write_digital(task, samples);
        outcome.map_err(|code| self.driver_error(code))
    }

    fn error_string(&self, code: Status) -> String {
        match code {
            ERROR_INVALID_TASK => "Task specified is invalid or does not exist.".to_string(),
            ERROR_INVALID_DEVICE => "Device identifier is invalid.".to_string(),
            ERROR_PHYSICAL_CHANNEL => {
                "Physical channel specified does not exist on this device.".to_string()
            }
            ERROR_BUFFER_TOO_SMALL => "Buffer is too small to fit read data.".to_string(),
            _ => format!("Simulated driver error {code}."),
        }
    }
}
