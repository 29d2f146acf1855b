use anyhow::Context;
use nidaq_shim::DeviceSession;
use nidaq_shim::backend::DaqDriver;
use tracing::*;
use tracing_subscriber::FmtSubscriber;

#[cfg(not(any(feature = "sim", feature = "nidaq")))]
compile_error!("enable the `sim` or the `nidaq` feature to select a driver backend");

const DEFAULT_DEVICE: &str = "Dev1";

#[cfg(feature = "nidaq")]
fn driver(_device: &str) -> nidaq_shim::backend::NidaqDriver {
    nidaq_shim::backend::NidaqDriver::new()
}

#[cfg(all(feature = "sim", not(feature = "nidaq")))]
fn driver(device: &str) -> nidaq_shim::backend::SimDriver {
    nidaq_shim::backend::SimDriver::with_devices(&[device])
}

/// Open the card, exercise one channel of every group, print a full analog snapshot and close
fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber failed")?;

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

    run(DeviceSession::new(device.as_str(), driver(&device)))
}

fn run<D: DaqDriver>(mut session: DeviceSession<D>) -> anyhow::Result<()> {
    session
        .open()
        .with_context(|| format!("unable to open device {}", session.name()))?;

    let ai0 = session.analog_read(0usize)?;
    info!("ai0: {:?} V", ai0);
    let di1 = session.digital_read(1usize)?;
    info!("port0/line1: {:?}", di1);

    session.analog_write(0, 0.5)?;
    session.digital_write(1, false)?;

    let snapshot = session.analog_snapshot()?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    session.close()?;
    Ok(())
}
