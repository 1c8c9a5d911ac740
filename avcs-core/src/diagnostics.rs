//! Read-only snapshot of controller state for status displays.

use crate::capture::{CamSide, ShaftId};
use crate::fault::Fault;
use crate::feedback::{BUCKET_COUNT, FeedbackTerms};
use crate::supervisor::{FaultRecord, Mode};
use crate::timing::{CycleState, TimingSnapshot};

/// Pulse timing for one shaft plus the edges its filter threw away.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShaftDiagnostics {
    pub shaft: ShaftId,
    pub timing: TimingSnapshot,
    pub noise: u32,
}

/// Phase and actuator state for one exhaust cam.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CamDiagnostics {
    pub side: CamSide,
    pub shaft: ShaftDiagnostics,
    pub cycle: CycleState,
    /// Live phase against the baseline, in cam degrees.
    pub angle: f32,
    pub baseline: f32,
    pub measured_angle: f32,
    /// Smoothed ticks from the crank reference to the first cam pulse.
    pub time_since_crank: f32,
    pub target: f32,
    pub duty: f32,
    pub feedback: FeedbackTerms,
    /// Smoothed PID output per 500-RPM bucket.
    pub history: [f32; BUCKET_COUNT],
}

/// Everything an operator display needs after a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostics<'a> {
    pub mode: Mode,
    pub error_count: u32,
    pub initialization_error_count: u32,
    pub current_error: Option<Fault>,
    pub last_error: Option<Fault>,
    /// Faults raised outside calibration, oldest first.
    pub faults: &'a [FaultRecord],
    pub crank: ShaftDiagnostics,
    pub cams: [CamDiagnostics; 2],
}

impl Diagnostics<'_> {
    /// Canonical engine speed.
    #[must_use]
    pub const fn crank_rpm(&self) -> u32 {
        self.crank.timing.rpm
    }

    #[must_use]
    pub const fn cam(&self, side: CamSide) -> &CamDiagnostics {
        &self.cams[side.index()]
    }

    /// Timing for any shaft.
    #[must_use]
    pub const fn shaft(&self, shaft: ShaftId) -> &ShaftDiagnostics {
        match shaft.cam_side() {
            None => &self.crank,
            Some(side) => &self.cams[side.index()].shaft,
        }
    }

    /// Sum of calibration countdowns still outstanding; zero once calibrated.
    #[must_use]
    pub fn calibration_remaining(&self) -> u32 {
        self.crank.timing.countdown
            + self
                .cams
                .iter()
                .map(|cam| cam.shaft.timing.countdown)
                .sum::<u32>()
    }
}
