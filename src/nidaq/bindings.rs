//! Raw NI-DAQmx ANSI C entry points, as declared in `NIDAQmx.h`.
//!
//! Only the functions the session needs are declared. Every function returns an `int32`
//! status code: zero on success, positive for warnings and negative for errors.

#![allow(non_snake_case, non_camel_case_types, non_upper_case_globals)]

use std::os::raw::{c_char, c_void};

pub type int32 = i32;
pub type uInt8 = u8;
pub type uInt32 = u32;
pub type float64 = f64;
pub type bool32 = uInt32;
pub type TaskHandle = *mut c_void;

/// `DAQmx_Val_Auto`: read every sample available (one per channel for on-demand tasks)
pub const DAQmx_Val_Auto: int32 = -1;

unsafe extern "C" {
    pub fn DAQmxResetDevice(deviceName: *const c_char) -> int32;

    pub fn DAQmxGetSysDevNames(data: *mut c_char, bufferSize: uInt32) -> int32;

    pub fn DAQmxCreateTask(taskName: *const c_char, taskHandle: *mut TaskHandle) -> int32;

    pub fn DAQmxCreateAIVoltageChan(
        taskHandle: TaskHandle,
        physicalChannel: *const c_char,
        nameToAssignToChannel: *const c_char,
        terminalConfig: int32,
        minVal: float64,
        maxVal: float64,
        units: int32,
        customScaleName: *const c_char,
    ) -> int32;

    pub fn DAQmxCreateAOVoltageChan(
        taskHandle: TaskHandle,
        physicalChannel: *const c_char,
        nameToAssignToChannel: *const c_char,
        minVal: float64,
        maxVal: float64,
        units: int32,
        customScaleName: *const c_char,
    ) -> int32;

    pub fn DAQmxCreateDIChan(
        taskHandle: TaskHandle,
        lines: *const c_char,
        nameToAssignToLines: *const c_char,
        lineGrouping: int32,
    ) -> int32;

    pub fn DAQmxCreateDOChan(
        taskHandle: TaskHandle,
        lines: *const c_char,
        nameToAssignToLines: *const c_char,
        lineGrouping: int32,
    ) -> int32;

    pub fn DAQmxStartTask(taskHandle: TaskHandle) -> int32;

    pub fn DAQmxStopTask(taskHandle: TaskHandle) -> int32;

    pub fn DAQmxClearTask(taskHandle: TaskHandle) -> int32;

    pub fn DAQmxReadAnalogF64(
        taskHandle: TaskHandle,
        numSampsPerChan: int32,
        timeout: float64,
        fillMode: bool32,
        readArray: *mut float64,
        arraySizeInSamps: uInt32,
        sampsPerChanRead: *mut int32,
        reserved: *mut bool32,
    ) -> int32;

    pub fn DAQmxReadDigitalLines(
        taskHandle: TaskHandle,
        numSampsPerChan: int32,
        timeout: float64,
        fillMode: bool32,
        readArray: *mut uInt8,
        arraySizeInBytes: uInt32,
        sampsPerChanRead: *mut int32,
        numBytesPerSamp: *mut int32,
        reserved: *mut bool32,
    ) -> int32;

    pub fn DAQmxWriteAnalogF64(
        taskHandle: TaskHandle,
        numSampsPerChan: int32,
        autoStart: bool32,
        timeout: float64,
        dataLayout: bool32,
        writeArray: *const float64,
        sampsPerChanWritten: *mut int32,
        reserved: *mut bool32,
    ) -> int32;

    pub fn DAQmxWriteDigitalLines(
        taskHandle: TaskHandle,
        numSampsPerChan: int32,
        autoStart: bool32,
        timeout: float64,
        dataLayout: bool32,
        writeArray: *const uInt8,
        sampsPerChanWritten: *mut int32,
        reserved: *mut bool32,
    ) -> int32;

    pub fn DAQmxGetErrorString(
        errorCode: int32,
        errorString: *mut c_char,
        bufferSize: uInt32,
    ) -> int32;
}
