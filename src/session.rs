use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::backend::daq_driver::{DaqDriver, FillMode, READ_WRITE_TIMEOUT};
use crate::channel::{
    ANALOG_INPUT_COUNT, ANALOG_OUTPUT_COUNT, AnalogOutputChannel, AnalogSnapshot, ChannelGroup,
    ChannelLayout, DIGITAL_INPUT_COUNT, DIGITAL_OUTPUT_COUNT, DigitalOutputChannel,
    DigitalSnapshot, MAX_VOLTAGE, Reading, Selector,
};
use crate::error::{DaqError, Result};

/// Number of driver tasks held by an open session
const TASK_COUNT: usize = 2 + ANALOG_OUTPUT_COUNT + DIGITAL_OUTPUT_COUNT;
/// Every read and write moves exactly one sample per channel
const SAMPLES_PER_CHANNEL: usize = 1;

/// Driver task of every channel group, only ever stored fully populated
#[derive(Debug, Clone, Copy)]
struct TaskSet<T> {
    analog_input: T,
    digital_input: T,
    analog_output: [T; ANALOG_OUTPUT_COUNT],
    digital_output: [T; DIGITAL_OUTPUT_COUNT],
}

impl<T: Copy> TaskSet<T> {
    /// Tasks in creation order
    fn iter(&self) -> impl Iterator<Item = T> {
        [self.analog_input, self.digital_input]
            .into_iter()
            .chain(self.analog_output)
            .chain(self.digital_output)
    }
}

/// Session on one NI card: the four channel groups of the card, each bound to its own
/// driver task while the session is open.
///
/// Closed after construction, [`DeviceSession::open`] provisions and starts every task and
/// [`DeviceSession::close`] (or dropping the session) releases them again.
#[derive(Debug)]
pub struct DeviceSession<D: DaqDriver> {
    name: String,
    layout: ChannelLayout,
    driver: D,
    tasks: Option<TaskSet<D::Task>>,
}

impl<D: DaqDriver> DeviceSession<D> {
    /// Create a closed session for device `name`, the driver is not contacted
    pub fn new(name: impl Into<String>, driver: D) -> Self {
        let name = name.into();
        Self {
            layout: ChannelLayout::for_device(&name),
            name,
            driver,
            tasks: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn is_open(&self) -> bool {
        self.tasks.is_some()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Connect to the device: verify it exists, reset it, then create, configure and start
    /// one task per channel group.
    ///
    /// On failure every task created so far is stopped and cleared before the error is
    /// returned, the session stays closed.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(DaqError::AlreadyOpen {
                device: self.name.clone(),
            });
        }

        info!("Opening device session {}", self.name);
        self.check_device()?;

        info!("Resetting device {}", self.name);
        self.driver.reset_device(&self.name)?;

        let mut acquired = Vec::with_capacity(TASK_COUNT);
        match provision(&mut self.driver, &self.layout, &mut acquired) {
            Ok(tasks) => {
                info!("Device session {} open with {TASK_COUNT} tasks", self.name);
                self.tasks = Some(tasks);
                Ok(())
            }
            Err(err) => {
                error!(
                    "Failed to open device session {}: {err} - releasing {} acquired tasks",
                    self.name,
                    acquired.len()
                );
                self.release(acquired);
                Err(err)
            }
        }
    }

    /// Stop and clear every task, then reset the device.
    ///
    /// Closing a closed session does nothing. Every release step is attempted even when an
    /// earlier one fails, the first failure is returned and the session ends up closed.
    pub fn close(&mut self) -> Result<()> {
        let Some(tasks) = self.tasks.take() else {
            debug!("Device session {} already closed", self.name);
            return Ok(());
        };

        info!("Closing device session {}", self.name);
        let mut outcome = Ok(());
        for task in tasks.iter() {
            let stopped = self.driver.stop_task(task);
            let cleared = self.driver.clear_task(task);
            outcome = outcome.and(stopped).and(cleared);
        }

        info!("Resetting device {}", self.name);
        outcome.and(self.driver.reset_device(&self.name))
    }

    /// Read every analog input in one driver call
    pub fn analog_snapshot(&mut self) -> Result<AnalogSnapshot> {
        let task = self.tasks()?.analog_input;

        let mut volts = [0.0; ANALOG_INPUT_COUNT];
        let read = self.driver.read_analog_f64(
            task,
            READ_WRITE_TIMEOUT,
            FillMode::GroupByChannel,
            &mut volts,
        )?;
        expect_samples(read)?;

        debug!("Read analog inputs of {}: {:?}", self.name, volts);
        Ok(AnalogSnapshot {
            acquired_at: Utc::now(),
            volts,
        })
    }

    /// Read the selected analog inputs, in volts
    pub fn analog_read(&mut self, selector: impl Into<Selector>) -> Result<Reading<f64>> {
        let selector = selector.into();
        selector.validate(ChannelGroup::AnalogInput)?;
        self.analog_snapshot()?.select(&selector)
    }

    /// Read every digital input line in one driver call, any non-zero line byte is high
    pub fn digital_snapshot(&mut self) -> Result<DigitalSnapshot> {
        let task = self.tasks()?.digital_input;

        let mut raw = [0u8; DIGITAL_INPUT_COUNT];
        let read = self.driver.read_digital_lines(
            task,
            READ_WRITE_TIMEOUT,
            FillMode::GroupByChannel,
            &mut raw,
        )?;
        expect_samples(read)?;

        debug!("Read digital inputs of {}: {:?}", self.name, raw);
        Ok(DigitalSnapshot {
            acquired_at: Utc::now(),
            lines: raw.map(|line| line != 0),
        })
    }

    /// Read the selected digital input lines
    pub fn digital_read(&mut self, selector: impl Into<Selector>) -> Result<Reading<bool>> {
        let selector = selector.into();
        selector.validate(ChannelGroup::DigitalInput)?;
        self.digital_snapshot()?.select(&selector)
    }

    /// Drive analog output `index`, saturating `value` to the ±10 V range
    pub fn analog_write(&mut self, index: usize, value: f64) -> Result<()> {
        let group = ChannelGroup::AnalogOutput;
        group.check_index(index)?;
        if value.is_nan() {
            return Err(DaqError::InvalidValue {
                group,
                index,
                value,
            });
        }
        let task = self.tasks()?.analog_output[index];

        let volts = value.clamp(-MAX_VOLTAGE, MAX_VOLTAGE);
        if volts != value {
            warn!(
                "Saturating analog output {index} of {} from {value} V to {volts} V",
                self.name
            );
        }

        debug!("Writing {volts} V to analog output {index} of {}", self.name);
        let written = self.driver.write_analog_f64(
            task,
            READ_WRITE_TIMEOUT,
            FillMode::GroupByChannel,
            &[volts],
        )?;
        expect_samples(written)
    }

    /// Drive digital output line `index`
    pub fn digital_write(&mut self, index: usize, value: bool) -> Result<()> {
        ChannelGroup::DigitalOutput.check_index(index)?;
        let task = self.tasks()?.digital_output[index];

        debug!("Writing {value} to digital output {index} of {}", self.name);
        let written = self.driver.write_digital_lines(
            task,
            READ_WRITE_TIMEOUT,
            FillMode::GroupByChannel,
            &[u8::from(value)],
        )?;
        expect_samples(written)
    }

    fn tasks(&self) -> Result<&TaskSet<D::Task>> {
        self.tasks.as_ref().ok_or_else(|| DaqError::NotOpen {
            device: self.name.clone(),
        })
    }

    fn check_device(&mut self) -> Result<()> {
        let names = self.driver.system_device_names()?;
        let available = parse_device_names(&names);
        info!("System devices: {:?}", available);

        if available.iter().any(|device| *device == self.name) {
            Ok(())
        } else {
            Err(DaqError::DeviceNotFound {
                device: self.name.clone(),
                available,
            })
        }
    }

    /// Best effort release of tasks acquired by a failed open
    fn release(&mut self, acquired: Vec<D::Task>) {
        for task in acquired {
            if let Err(err) = self.driver.stop_task(task) {
                error!("Unable to stop task {:?}: {err}", task);
            }
            if let Err(err) = self.driver.clear_task(task) {
                error!("Unable to clear task {:?}: {err}", task);
            }
        }
    }
}

impl<D: DaqDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.close() {
                error!("Failed to close device session {} on drop: {err}", self.name);
            }
        }
    }
}

/// Split the driver's device list (`"Dev1, Dev2"`, nul terminated) into device names
pub fn parse_device_names(list: &str) -> Vec<String> {
    list.split('\0')
        .next()
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

fn expect_samples(actual: usize) -> Result<()> {
    if actual == SAMPLES_PER_CHANNEL {
        Ok(())
    } else {
        Err(DaqError::SampleCount {
            expected: SAMPLES_PER_CHANNEL,
            actual,
        })
    }
}

/// Create a task, record it in `acquired` and let `configure` add its channels
fn acquire<D: DaqDriver>(
    driver: &mut D,
    acquired: &mut Vec<D::Task>,
    configure: impl FnOnce(&mut D, D::Task) -> Result<()>,
) -> Result<D::Task> {
    let task = driver.create_task()?;
    acquired.push(task);
    configure(driver, task)?;
    Ok(task)
}

fn acquire_analog_output<D: DaqDriver>(
    driver: &mut D,
    acquired: &mut Vec<D::Task>,
    output: &AnalogOutputChannel,
) -> Result<D::Task> {
    acquire(driver, acquired, |driver, task| {
        driver.create_ao_voltage_chan(
            task,
            &output.channel.physical_channel,
            output.range,
            output.units,
        )
    })
}

fn acquire_digital_output<D: DaqDriver>(
    driver: &mut D,
    acquired: &mut Vec<D::Task>,
    output: &DigitalOutputChannel,
) -> Result<D::Task> {
    acquire(driver, acquired, |driver, task| {
        driver.create_do_chan(task, &output.channel.physical_channel, output.grouping)
    })
}

/// Create and configure every task of `layout`, then start them all
fn provision<D: DaqDriver>(
    driver: &mut D,
    layout: &ChannelLayout,
    acquired: &mut Vec<D::Task>,
) -> Result<TaskSet<D::Task>> {
    info!("Creating nidaq tasks");

    let input = &layout.analog_input;
    let analog_input = acquire(driver, acquired, |driver, task| {
        driver.create_ai_voltage_chan(
            task,
            &input.channel.physical_channel,
            input.terminal,
            input.range,
            input.units,
        )
    })?;

    let input = &layout.digital_input;
    let digital_input = acquire(driver, acquired, |driver, task| {
        driver.create_di_chan(task, &input.channel.physical_channel, input.grouping)
    })?;

    let [ao0, ao1] = &layout.analog_output;
    let analog_output = [
        acquire_analog_output(driver, acquired, ao0)?,
        acquire_analog_output(driver, acquired, ao1)?,
    ];

    let [do0, do1, do2, do3] = &layout.digital_output;
    let digital_output = [
        acquire_digital_output(driver, acquired, do0)?,
        acquire_digital_output(driver, acquired, do1)?,
        acquire_digital_output(driver, acquired, do2)?,
        acquire_digital_output(driver, acquired, do3)?,
    ];

    let tasks = TaskSet {
        analog_input,
        digital_input,
        analog_output,
        digital_output,
    };

    info!("Starting nidaq tasks");
    for task in tasks.iter() {
        driver.start_task(task)?;
    }

    Ok(tasks)
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::backend::daq_driver::{LineGrouping, TerminalConfig, VoltageRange, VoltageUnits};
    use crate::backend::sim::{DriverCall, Operation, SimDriver, SimTask};

    fn open_session() -> (DeviceSession<SimDriver>, SimDriver) {
        let driver = SimDriver::default();
        let observer = driver.clone();
        let mut session = DeviceSession::new("Dev1", driver);
        session.open().unwrap();
        observer.clear_calls();
        (session, observer)
    }

    fn analog_writes(driver: &SimDriver) -> Vec<Vec<f64>> {
        driver
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::WriteAnalogF64 { samples, .. } => Some(samples),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn new_session_is_closed_and_silent() {
        let driver = SimDriver::default();
        let session = DeviceSession::new("Dev1", driver.clone());
        assert!(!session.is_open());
        assert_eq!(session.name(), "Dev1");
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn open_provisions_every_group_then_starts_them() {
        let driver = SimDriver::default();
        let mut session = DeviceSession::new("Dev1", driver.clone());
        session.open().unwrap();

        let range = VoltageRange::symmetric(10.0);
        let mut expected = vec![
            DriverCall::GetSysDevNames,
            DriverCall::ResetDevice {
                device: "Dev1".to_string(),
            },
            DriverCall::CreateTask,
            DriverCall::CreateAiVoltageChan {
                task: SimTask(1),
                physical_channel: "Dev1/ai0:15".to_string(),
                terminal: TerminalConfig::Rse,
                range,
                units: VoltageUnits::Volts,
            },
            DriverCall::CreateTask,
            DriverCall::CreateDiChan {
                task: SimTask(2),
                lines: "Dev1/port0/line0:3".to_string(),
                grouping: LineGrouping::ChanPerLine,
            },
        ];
        for i in 0..2 {
            expected.push(DriverCall::CreateTask);
            expected.push(DriverCall::CreateAoVoltageChan {
                task: SimTask(3 + i),
                physical_channel: format!("Dev1/ao{i}"),
                range,
                units: VoltageUnits::Volts,
            });
        }
        for i in 0..4 {
            expected.push(DriverCall::CreateTask);
            expected.push(DriverCall::CreateDoChan {
                task: SimTask(5 + i),
                lines: format!("Dev1/port1/line{i}"),
                grouping: LineGrouping::ChanPerLine,
            });
        }
        for id in 1..=8 {
            expected.push(DriverCall::StartTask {
                task: SimTask(id),
            });
        }

        assert_eq!(driver.calls(), expected);
        assert!(session.is_open());
        assert_eq!(driver.live_tasks(), 8);
        assert_eq!(driver.running_tasks(), 8);
    }

    #[test]
    fn missing_device_fails_without_touching_tasks() {
        let driver = SimDriver::with_devices(&["Dev2", "Dev3"]);
        let mut session = DeviceSession::new("Dev1", driver.clone());

        assert_eq!(
            session.open(),
            Err(DaqError::DeviceNotFound {
                device: "Dev1".to_string(),
                available: vec!["Dev2".to_string(), "Dev3".to_string()],
            })
        );
        assert_eq!(driver.calls(), vec![DriverCall::GetSysDevNames]);
        assert_eq!(driver.live_tasks(), 0);
        assert!(!session.is_open());
    }

    #[test]
    fn failed_channel_creation_releases_acquired_tasks() {
        let driver = SimDriver::default();
        driver.inject_fault(Operation::CreateDoChan, -200170);
        let mut session = DeviceSession::new("Dev1", driver.clone());

        let err = session.open().unwrap_err();
        assert!(matches!(err, DaqError::Driver { code: -200170, .. }));
        assert!(!session.is_open());
        assert_eq!(driver.live_tasks(), 0);

        let cleared = driver
            .calls()
            .iter()
            .filter(|call| matches!(call, DriverCall::ClearTask { .. }))
            .count();
        assert_eq!(cleared, 5);
    }

    #[test]
    fn failed_start_releases_every_task() {
        let driver = SimDriver::default();
        driver.inject_fault(Operation::StartTask, -50103);
        let mut session = DeviceSession::new("Dev1", driver.clone());

        assert!(matches!(
            session.open(),
            Err(DaqError::Driver { code: -50103, .. })
        ));
        assert_eq!(driver.live_tasks(), 0);
        assert_eq!(driver.running_tasks(), 0);
    }

    #[test]
    fn failed_task_creation_leaves_nothing_behind() {
        let driver = SimDriver::default();
        driver.inject_fault(Operation::CreateTask, -50352);
        let mut session = DeviceSession::new("Dev1", driver.clone());

        assert!(session.open().is_err());
        assert_eq!(driver.live_tasks(), 0);
    }

    #[test]
    fn session_can_be_reopened_after_failed_open() {
        let driver = SimDriver::default();
        driver.inject_fault(Operation::CreateAoVoltageChan, -200170);
        let mut session = DeviceSession::new("Dev1", driver.clone());

        assert!(session.open().is_err());
        session.open().unwrap();
        assert_eq!(driver.live_tasks(), 8);
    }

    #[test]
    fn opening_an_open_session_is_rejected() {
        let (mut session, driver) = open_session();
        assert_eq!(
            session.open(),
            Err(DaqError::AlreadyOpen {
                device: "Dev1".to_string()
            })
        );
        assert!(driver.calls().is_empty());
        assert_eq!(driver.live_tasks(), 8);
    }

    #[test]
    fn close_releases_every_task_and_resets_device() {
        let (mut session, driver) = open_session();
        session.close().unwrap();

        assert!(!session.is_open());
        assert_eq!(driver.live_tasks(), 0);
        assert_eq!(
            driver.calls().last(),
            Some(&DriverCall::ResetDevice {
                device: "Dev1".to_string()
            })
        );
        let stops = driver
            .calls()
            .iter()
            .filter(|call| matches!(call, DriverCall::StopTask { .. }))
            .count();
        assert_eq!(stops, 8);
    }

    #[test]
    fn close_of_closed_session_does_nothing() {
        let driver = SimDriver::default();
        let mut session = DeviceSession::new("Dev1", driver.clone());
        session.close().unwrap();
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn close_keeps_releasing_after_a_failure() {
        let (mut session, driver) = open_session();
        driver.inject_fault(Operation::StopTask, -200088);

        assert!(matches!(
            session.close(),
            Err(DaqError::Driver { code: -200088, .. })
        ));
        assert!(!session.is_open());
        assert_eq!(driver.live_tasks(), 0);
    }

    #[test]
    fn reads_and_writes_require_an_open_session() {
        let driver = SimDriver::default();
        let mut session = DeviceSession::new("Dev1", driver.clone());
        let not_open = DaqError::NotOpen {
            device: "Dev1".to_string(),
        };

        assert_eq!(session.analog_read(0usize), Err(not_open.clone()));
        assert_eq!(session.digital_read(0usize), Err(not_open.clone()));
        assert_eq!(session.analog_write(0, 1.0), Err(not_open.clone()));
        assert_eq!(session.digital_write(0, true), Err(not_open));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn analog_write_saturates_to_range() {
        let (mut session, driver) = open_session();

        session.analog_write(0, 15.0).unwrap();
        session.analog_write(1, -12.5).unwrap();
        session.analog_write(1, 4.0).unwrap();

        assert_eq!(analog_writes(&driver), vec![vec![10.0], vec![-10.0], vec![4.0]]);
        assert_eq!(driver.analog_output(0), Some(10.0));
        assert_eq!(driver.analog_output(1), Some(4.0));
    }

    #[test]
    fn out_of_range_write_makes_no_driver_call() {
        let (mut session, driver) = open_session();

        assert_eq!(
            session.analog_write(2, 1.0),
            Err(DaqError::InvalidChannel {
                group: ChannelGroup::AnalogOutput,
                index: 2,
                count: 2
            })
        );
        assert_eq!(
            session.digital_write(4, true),
            Err(DaqError::InvalidChannel {
                group: ChannelGroup::DigitalOutput,
                index: 4,
                count: 4
            })
        );
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn nan_write_is_rejected_before_the_driver() {
        let (mut session, driver) = open_session();
        assert!(matches!(
            session.analog_write(0, f64::NAN),
            Err(DaqError::InvalidValue { index: 0, .. })
        ));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn analog_read_projects_one_snapshot_in_requested_order() {
        let (mut session, driver) = open_session();
        session.analog_write(0, 1.5).unwrap();
        session.analog_write(1, -2.0).unwrap();
        driver.clear_calls();

        assert_eq!(session.analog_read(0usize), Ok(Reading::Single(1.5)));
        assert_eq!(
            session.analog_read(vec![1usize, 0, 1]),
            Ok(Reading::Subset(vec![-2.0, 1.5, -2.0]))
        );

        let reads = driver
            .calls()
            .iter()
            .filter(|call| matches!(call, DriverCall::ReadAnalogF64 { .. }))
            .count();
        assert_eq!(reads, 2);
    }

    #[test]
    fn out_of_range_read_makes_no_driver_call() {
        let (mut session, driver) = open_session();

        assert!(matches!(
            session.analog_read([0usize, 16]),
            Err(DaqError::InvalidChannel { index: 16, .. })
        ));
        assert!(matches!(
            session.digital_read(4usize),
            Err(DaqError::InvalidChannel { index: 4, .. })
        ));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn digital_read_sees_looped_back_outputs() {
        let (mut session, driver) = open_session();
        session.digital_write(1, true).unwrap();
        session.digital_write(3, true).unwrap();

        assert_eq!(driver.digital_output(1), Some(1));
        assert_eq!(session.digital_read(1usize), Ok(Reading::Single(true)));
        assert_eq!(
            session.digital_read([0usize, 1, 2, 3]),
            Ok(Reading::Subset(vec![false, true, false, true]))
        );

        session.digital_write(1, false).unwrap();
        assert_eq!(session.digital_read(1usize), Ok(Reading::Single(false)));
    }

    #[test]
    fn driver_read_failure_is_reported() {
        let (mut session, driver) = open_session();
        driver.inject_fault(Operation::ReadAnalogF64, -200279);

        assert!(matches!(
            session.analog_snapshot(),
            Err(DaqError::Driver { code: -200279, .. })
        ));
        assert!(session.is_open());
    }

    #[test]
    fn short_analog_read_is_a_sample_count_error() {
        let (mut session, driver) = open_session();
        driver.inject_sample_count(Operation::ReadAnalogF64, 0);

        assert_eq!(
            session.analog_read(0usize),
            Err(DaqError::SampleCount {
                expected: 1,
                actual: 0
            })
        );
        assert!(session.is_open());
        assert!(session.analog_read(0usize).is_ok());
    }

    #[test]
    fn short_digital_write_is_a_sample_count_error() {
        let (mut session, driver) = open_session();
        driver.inject_sample_count(Operation::WriteDigitalLines, 0);

        assert_eq!(
            session.digital_write(0, true),
            Err(DaqError::SampleCount {
                expected: 1,
                actual: 0
            })
        );
        assert!(session.is_open());
        assert_eq!(driver.running_tasks(), 8);
    }

    #[test]
    fn failed_reset_on_open_creates_no_tasks() {
        let driver = SimDriver::default();
        driver.inject_fault(Operation::ResetDevice, -200220);
        let mut session = DeviceSession::new("Dev1", driver.clone());

        assert!(matches!(
            session.open(),
            Err(DaqError::Driver { code: -200220, .. })
        ));
        assert!(!session.is_open());
        assert_eq!(driver.live_tasks(), 0);
        assert!(
            !driver
                .calls()
                .iter()
                .any(|call| matches!(call, DriverCall::CreateTask))
        );
    }

    #[test]
    fn dropping_an_open_session_releases_tasks() {
        let (session, driver) = open_session();
        drop(session);

        assert_eq!(driver.live_tasks(), 0);
        assert_eq!(
            driver.calls().last(),
            Some(&DriverCall::ResetDevice {
                device: "Dev1".to_string()
            })
        );
    }

    #[test]
    fn device_list_parsing() {
        assert_eq!(parse_device_names("Dev1, Dev2"), vec!["Dev1", "Dev2"]);
        assert_eq!(parse_device_names("Dev1,Dev2\0Dev3"), vec!["Dev1", "Dev2"]);
        assert_eq!(parse_device_names("\tcDAQ1Mod1\n"), vec!["cDAQ1Mod1"]);
        assert!(parse_device_names("").is_empty());
    }
}
