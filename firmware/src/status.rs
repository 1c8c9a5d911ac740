#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The oil task publishes temperature samples and the control loop publishes a
//! summary after each tick, so the status logger can read a `StatusSnapshot`
//! without borrowing the controller.

use avcs_core::capture::{CamSide, ShaftId};
use avcs_core::diagnostics::Diagnostics;
use avcs_core::supervisor::Mode;
use portable_atomic::{AtomicU8, AtomicU32, Ordering};

/// Bit pattern marking "no sample yet" (a quiet NaN no conversion produces).
const UNKNOWN_TEMPERATURE: u32 = 0x7FC0_DEAD;

static OIL_TEMPERATURE: AtomicU32 = AtomicU32::new(UNKNOWN_TEMPERATURE);
static MODE: AtomicU8 = AtomicU8::new(0);
static CRANK_RPM: AtomicU32 = AtomicU32::new(0);
/// Cam angles stored as `f32` bits.
static CAM_ANGLE: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];
static CAM_DUTY: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];
static ERROR_COUNT: AtomicU32 = AtomicU32::new(0);
/// Pin bursts the edge tasks dropped as unsettled, per shaft.
static AMBIGUOUS_BURSTS: [AtomicU32; 3] = [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)];

/// Values published by the control loop after its latest tick.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub mode: Mode,
    pub crank_rpm: u32,
    pub oil_temperature_c: Option<f32>,
    pub cam_angle: [f32; 2],
    pub cam_duty: [f32; 2],
    pub error_count: u32,
    /// Unsettled pin bursts, indexed by [`ShaftId::index`].
    pub ambiguous_bursts: [u32; 3],
}

const fn encode_mode(mode: Mode) -> u8 {
    match mode {
        Mode::Calibrating => 0,
        Mode::Warming => 1,
        Mode::Running => 2,
    }
}

const fn decode_mode(raw: u8) -> Mode {
    match raw {
        1 => Mode::Warming,
        2 => Mode::Running,
        _ => Mode::Calibrating,
    }
}

/// Stores the latest oil temperature reading.
pub fn record_oil_temperature(celsius: f32) {
    OIL_TEMPERATURE.store(celsius.to_bits(), Ordering::Relaxed);
}

/// Latest oil temperature, if the sender has been read yet.
pub fn oil_temperature() -> Option<f32> {
    match OIL_TEMPERATURE.load(Ordering::Relaxed) {
        UNKNOWN_TEMPERATURE => None,
        bits => Some(f32::from_bits(bits)),
    }
}

/// Publishes the controller state after a tick.
pub fn record_diagnostics(diagnostics: &Diagnostics<'_>) {
    MODE.store(encode_mode(diagnostics.mode), Ordering::Relaxed);
    CRANK_RPM.store(diagnostics.crank_rpm(), Ordering::Relaxed);
    ERROR_COUNT.store(diagnostics.error_count, Ordering::Relaxed);
    for side in CamSide::BOTH {
        let cam = diagnostics.cam(side);
        CAM_ANGLE[side.index()].store(cam.angle.to_bits(), Ordering::Relaxed);
        CAM_DUTY[side.index()].store(cam.duty.to_bits(), Ordering::Relaxed);
    }
}

/// Publishes how many interrupt bursts on `shaft` never settled on a level.
pub fn record_ambiguous_bursts(shaft: ShaftId, count: u32) {
    AMBIGUOUS_BURSTS[shaft.index()].store(count, Ordering::Relaxed);
}

/// Builds a [`StatusSnapshot`] from the stored values.
pub fn snapshot() -> StatusSnapshot {
    let load_f32 = |cell: &AtomicU32| f32::from_bits(cell.load(Ordering::Relaxed));
    StatusSnapshot {
        mode: decode_mode(MODE.load(Ordering::Relaxed)),
        crank_rpm: CRANK_RPM.load(Ordering::Relaxed),
        oil_temperature_c: oil_temperature(),
        cam_angle: [load_f32(&CAM_ANGLE[0]), load_f32(&CAM_ANGLE[1])],
        cam_duty: [load_f32(&CAM_DUTY[0]), load_f32(&CAM_DUTY[1])],
        error_count: ERROR_COUNT.load(Ordering::Relaxed),
        ambiguous_bursts: ShaftId::ALL.map(|shaft| {
            AMBIGUOUS_BURSTS[shaft.index()].load(Ordering::Relaxed)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_encoding_round_trips() {
        for mode in [Mode::Calibrating, Mode::Warming, Mode::Running] {
            assert_eq!(decode_mode(encode_mode(mode)), mode);
        }
    }

    #[test]
    fn oil_temperature_is_unknown_until_sampled() {
        assert_eq!(oil_temperature(), None);
        record_oil_temperature(74.5);
        assert_eq!(snapshot().oil_temperature_c, Some(74.5));
    }

    #[test]
    fn unsettled_pin_bursts_show_up_per_shaft() {
        record_ambiguous_bursts(ShaftId::RightCam, 3);
        record_ambiguous_bursts(ShaftId::Crank, 1);
        let counts = snapshot().ambiguous_bursts;
        assert_eq!(counts[ShaftId::Crank.index()], 1);
        assert_eq!(counts[ShaftId::LeftCam.index()], 0);
        assert_eq!(counts[ShaftId::RightCam.index()], 3);
    }
}
