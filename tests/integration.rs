#![cfg(feature = "sim")]

use nidaq_shim::backend::SimDriver;
use nidaq_shim::backend::sim::{DriverCall, Operation};
use nidaq_shim::{DaqError, DeviceSession, Reading};

fn open(driver: &SimDriver) -> DeviceSession<SimDriver> {
    let mut session = DeviceSession::new("Dev1", driver.clone());
    session.open().unwrap();
    session
}

#[test]
fn loopback_round_trip() {
    let driver = SimDriver::default();
    let mut session = open(&driver);

    session.digital_write(1, true).unwrap();
    assert_eq!(session.digital_read(1usize).unwrap(), Reading::Single(true));

    session.analog_write(1, 2.5).unwrap();
    let volts = session.analog_read(vec![1usize]).unwrap().into_vec();
    assert_eq!(volts, vec![2.5]);

    session.close().unwrap();
}

#[test]
fn analog_write_above_range_drives_full_scale() {
    let driver = SimDriver::default();
    let mut session = open(&driver);

    session.analog_write(0, 15.0).unwrap();
    assert_eq!(driver.analog_output(0), Some(10.0));
    assert_eq!(session.analog_read(0usize).unwrap().single(), Some(10.0));
}

#[test]
fn session_reopens_after_close() {
    let driver = SimDriver::default();
    let mut session = open(&driver);

    session.close().unwrap();
    assert!(matches!(
        session.analog_read(0usize),
        Err(DaqError::NotOpen { .. })
    ));
    session.close().unwrap();

    session.open().unwrap();
    assert_eq!(driver.live_tasks(), 8);
    session.digital_write(0, true).unwrap();
    assert_eq!(driver.digital_output(0), Some(1));
}

#[test]
fn unknown_device_is_reported_with_available_devices() {
    let driver = SimDriver::with_devices(&["cDAQ1Mod1"]);
    let mut session = DeviceSession::new("Dev1", driver.clone());

    let err = session.open().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Device 'Dev1' not found among system devices [\"cDAQ1Mod1\"]"
    );
    assert_eq!(driver.calls(), vec![DriverCall::GetSysDevNames]);
}

#[test]
fn failed_open_leaves_no_tasks_behind() {
    let driver = SimDriver::default();
    driver.inject_fault(Operation::StartTask, -200088);
    let mut session = DeviceSession::new("Dev1", driver.clone());

    assert!(session.open().is_err());
    assert!(!session.is_open());
    assert_eq!(driver.live_tasks(), 0);
}

#[test]
fn dropping_session_releases_driver_tasks() {
    let driver = SimDriver::default();
    {
        let _session = open(&driver);
        assert_eq!(driver.running_tasks(), 8);
    }
    assert_eq!(driver.live_tasks(), 0);
}

#[test]
fn snapshots_serialize_to_json() {
    let driver = SimDriver::default();
    let mut session = open(&driver);
    session.analog_write(0, -1.25).unwrap();
    session.digital_write(3, true).unwrap();

    let analog = serde_json::to_value(session.analog_snapshot().unwrap()).unwrap();
    assert_eq!(analog["volts"].as_array().map(Vec::len), Some(16));
    assert_eq!(analog["volts"][0], -1.25);
    assert!(analog["acquired_at"].is_string());

    let digital = serde_json::to_value(session.digital_snapshot().unwrap()).unwrap();
    assert_eq!(
        digital["lines"],
        serde_json::json!([false, false, false, true])
    );

    let subset = serde_json::to_string(&session.digital_read([3usize, 0]).unwrap()).unwrap();
    assert_eq!(subset, "[true,false]");
}
