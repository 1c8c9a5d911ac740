//! Records canned emulator sessions under `transcripts/`.

use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../engine.rs"]
mod engine;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::Session;

const WARM_UP: &[&str] = &[
    "status",
    "run 2s",
    "status",
    "oil 85",
    "run 8s",
    "status",
    "rpm 4000",
    "run 2s",
    "status",
];

const SENSOR_DROPOUT: &[&str] = &[
    "oil 85",
    "run 9s",
    "drop left 1500ms",
    "run 2s",
    "faults",
    "run 9s",
    "status",
];

const FIXED_BASELINE: &[&str] = &[
    "set baseline fixed",
    "oil 85",
    "phase right 60",
    "run 9s",
    "faults",
    "phase right 41",
    "run 9s",
    "status",
];

fn main() -> io::Result<()> {
    record("transcripts/warm-up.log", WARM_UP)?;
    record("transcripts/sensor-dropout.log", SENSOR_DROPOUT)?;
    record("transcripts/fixed-baseline.log", FIXED_BASELINE)?;
    Ok(())
}

fn record(path: &str, script: &[&str]) -> io::Result<()> {
    let mut session = Session::new(Some(Path::new(path)))?;
    for line in script {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
