use chrono::Duration;
use std::ffi::{CStr, CString};
use std::ptr;
use tracing::{debug, info};

use super::bindings::*;
use crate::backend::daq_driver::{
    DaqDriver, FillMode, LineGrouping, Status, TerminalConfig, VoltageRange, VoltageUnits,
};
use crate::error::{DaqError, Result};

/// Size of the buffer receiving driver error descriptions
const ERROR_STRING_LEN: usize = 2048;
/// Size of the buffer receiving the system device list
const DEVICE_NAMES_LEN: usize = 1024;
/// Tasks are started explicitly, writes must not auto start them
const NO_AUTO_START: bool32 = 0;

/// Safety wrapper for the NIDAQ TaskHandle
#[derive(Debug, Clone, Copy)]
pub struct TaskHandleWrapper {
    inner: TaskHandle,
}

unsafe impl Send for TaskHandleWrapper {}

/// Binding of [`DaqDriver`] onto the NI-DAQmx C library
#[derive(Debug, Default)]
pub struct NidaqDriver;

impl NidaqDriver {
    pub fn new() -> Self {
        Self
    }
}

fn c_string(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| DaqError::InvalidName {
        name: name.to_owned(),
    })
}

fn buffer_len(len: usize) -> uInt32 {
    uInt32::try_from(len).unwrap_or(uInt32::MAX)
}

/// Driver sample counts are never negative on success
fn sample_count(count: int32) -> usize {
    usize::try_from(count).unwrap_or(0)
}

/// Decode a nul terminated string written by the driver into `buf`
fn string_from_buffer(buf: &[u8]) -> String {
    CStr::from_bytes_until_nul(buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(buf).into_owned())
}

impl DaqDriver for NidaqDriver {
    type Task = TaskHandleWrapper;

    fn reset_device(&mut self, device: &str) -> Result<()> {
        let c_device = c_string(device)?;
        info!("nidaqmx-sys: resetting device {:?}", c_device);
        let err = unsafe { DAQmxResetDevice(c_device.as_ptr()) };
        self.check(err)
    }

    fn system_device_names(&mut self) -> Result<String> {
        let mut buf = [0u8; DEVICE_NAMES_LEN];
        let err =
            unsafe { DAQmxGetSysDevNames(buf.as_mut_ptr().cast(), buffer_len(buf.len())) };
        self.check(err)?;
        Ok(string_from_buffer(&buf))
    }

    fn create_task(&mut self) -> Result<TaskHandleWrapper> {
        let mut task_handle: TaskHandle = ptr::null_mut();
        let err = unsafe { DAQmxCreateTask(c"".as_ptr(), &mut task_handle) };
        self.check(err)?;
        info!("nidaqmx-sys: created task {:?}", task_handle);
        Ok(TaskHandleWrapper { inner: task_handle })
    }

    fn create_ai_voltage_chan(
        &mut self,
        task: TaskHandleWrapper,
        physical_channel: &str,
        terminal: TerminalConfig,
        range: VoltageRange,
        units: VoltageUnits,
    ) -> Result<()> {
        let c_channel = c_string(physical_channel)?;
        info!("nidaqmx-sys: adding analog input channel: {:?}", c_channel);
        let err = unsafe {
            DAQmxCreateAIVoltageChan(
                task.inner,
                c_channel.as_ptr(),
                c"".as_ptr(),
                terminal.code(),
                range.min,
                range.max,
                units.code(),
                ptr::null(),
            )
        };
        self.check(err)
    }

    fn create_ao_voltage_chan(
        &mut self,
        task: TaskHandleWrapper,
        physical_channel: &str,
        range: VoltageRange,
        units: VoltageUnits,
    ) -> Result<()> {
        let c_channel = c_string(physical_channel)?;
        info!("nidaqmx-sys: adding analog output channel: {:?}", c_channel);
        let err = unsafe {
            DAQmxCreateAOVoltageChan(
                task.inner,
                c_channel.as_ptr(),
                c"".as_ptr(),
                range.min,
                range.max,
                units.code(),
                ptr::null(),
            )
        };
        self.check(err)
    }

    fn create_di_chan(
        &mut self,
        task: TaskHandleWrapper,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<()> {
        let c_lines = c_string(lines)?;
        info!("nidaqmx-sys: adding digital input channel: {:?}", c_lines);
        let err = unsafe {
            DAQmxCreateDIChan(task.inner, c_lines.as_ptr(), c"".as_ptr(), grouping.code())
        };
        self.check(err)
    }

    fn create_do_chan(
        &mut self,
        task: TaskHandleWrapper,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<()> {
        let c_lines = c_string(lines)?;
        info!("nidaqmx-sys: adding digital output channel: {:?}", c_lines);
        let err = unsafe {
            DAQmxCreateDOChan(task.inner, c_lines.as_ptr(), c"".as_ptr(), grouping.code())
        };
        self.check(err)
    }

    fn start_task(&mut self, task: TaskHandleWrapper) -> Result<()> {
        let err = unsafe { DAQmxStartTask(task.inner) };
        self.check(err)
    }

    fn stop_task(&mut self, task: TaskHandleWrapper) -> Result<()> {
        let err = unsafe { DAQmxStopTask(task.inner) };
        self.check(err)
    }

    fn clear_task(&mut self, task: TaskHandleWrapper) -> Result<()> {
        let err = unsafe { DAQmxClearTask(task.inner) };
        self.check(err)
    }

    fn read_analog_f64(
        &mut self,
        task: TaskHandleWrapper,
        timeout: Duration,
        fill_mode: FillMode,
        buf: &mut [f64],
    ) -> Result<usize> {
        let mut read_samples_per_channel: int32 = 0;
        let err = unsafe {
            DAQmxReadAnalogF64(
                task.inner,
                DAQmx_Val_Auto,
                timeout.as_seconds_f64(),
                fill_mode.code(),
                buf.as_mut_ptr(),
                buffer_len(buf.len()),
                &mut read_samples_per_channel,
                ptr::null_mut(),
            )
        };
        self.check(err)?;
        debug!("nidaqmx-sys: read analog {:?}", buf);
        Ok(sample_count(read_samples_per_channel))
    }

    fn read_digital_lines(
        &mut self,
        task: TaskHandleWrapper,
        timeout: Duration,
        fill_mode: FillMode,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut read_samples_per_channel: int32 = 0;
        let mut bytes_per_sample: int32 = 0;
        let err = unsafe {
            DAQmxReadDigitalLines(
                task.inner,
                DAQmx_Val_Auto,
                timeout.as_seconds_f64(),
                fill_mode.code(),
                buf.as_mut_ptr(),
                buffer_len(buf.len()),
                &mut read_samples_per_channel,
                &mut bytes_per_sample,
                ptr::null_mut(),
            )
        };
        self.check(err)?;
        debug!("nidaqmx-sys: read digital lines {:?}", buf);
        Ok(sample_count(read_samples_per_channel))
    }

    fn write_analog_f64(
        &mut self,
        task: TaskHandleWrapper,
        timeout: Duration,
        layout: FillMode,
        samples: &[f64],
    ) -> Result<usize> {
        let samples_per_channel = int32::try_from(samples.len()).unwrap_or(int32::MAX);
        let mut written_samples_per_channel: int32 = 0;
        let err = unsafe {
            DAQmxWriteAnalogF64(
                task.inner,
                samples_per_channel,
                NO_AUTO_START,
                timeout.as_seconds_f64(),
                layout.code(),
                samples.as_ptr(),
                &mut written_samples_per_channel,
                ptr::null_mut(),
            )
        };
        self.check(err)?;
        Ok(sample_count(written_samples_per_channel))
    }

    fn write_digital_lines(
        &mut self,
        task: TaskHandleWrapper,
        timeout: Duration,
        layout: FillMode,
        samples: &[u8],
    ) -> Result<usize> {
        let samples_per_channel = int32::try_from(samples.len()).unwrap_or(int32::MAX);
        let mut written_samples_per_channel: int32 = 0;
        let err = unsafe {
            DAQmxWriteDigitalLines(
                task.inner,
                samples_per_channel,
                NO_AUTO_START,
                timeout.as_seconds_f64(),
                layout.code(),
                samples.as_ptr(),
                &mut written_samples_per_channel,
                ptr::null_mut(),
            )
        };
        self.check(err)?;
        Ok(sample_count(written_samples_per_channel))
    }

    fn error_string(&self, code: Status) -> String {
        // Allocate the error buffer
        let mut buf = [0u8; ERROR_STRING_LEN];
        let err =
            unsafe { DAQmxGetErrorString(code, buf.as_mut_ptr().cast(), buffer_len(buf.len())) };
        if err < 0 {
            return format!("unknown error (error lookup returned {err})");
        }
        string_from_buffer(&buf)
    }
}
