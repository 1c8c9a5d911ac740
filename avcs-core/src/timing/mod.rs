//! Per-shaft pulse timing trackers.
//!
//! Each tracker turns the intervals between successive pulse edges into an
//! averaged interval, a pulse duration, and an RPM estimate. Cam trackers also
//! derive a phase angle against the crank reference. Trackers only ever see
//! intervals computed by the controller's drain loop; they never touch raw
//! timer state.

mod cam;
mod crank;

pub use cam::{CAM_PULSES_PER_REVOLUTION, CamTracker, CycleState};
pub use crank::CrankTracker;

use crate::capture::CamSide;
use crate::filter::rolling_average;

/// Countdowns above this value can only come from an unsigned wraparound.
pub const COUNTDOWN_SENTINEL: u32 = 10_000;

/// Logic state of the most recent pulse.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PulseState {
    #[default]
    Idle,
    High,
}

/// Revolutions left to observe before a tracker's estimates are trusted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationCountdown {
    initial: u32,
    remaining: u32,
}

impl CalibrationCountdown {
    /// Creates a countdown that starts full.
    #[must_use]
    pub const fn new(initial: u32) -> Self {
        Self {
            initial,
            remaining: initial,
        }
    }

    /// Refills the countdown.
    pub fn restart(&mut self) {
        self.remaining = self.initial;
    }

    /// Changes the fill level used by future restarts and refills now.
    pub fn reseed(&mut self, initial: u32) {
        self.initial = initial;
        self.restart();
    }

    /// Consumes one pulse, never going below zero.
    pub fn advance(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Still within the first fifth of the countdown, where estimates are
    /// seeded outright instead of smoothed.
    #[must_use]
    pub fn in_seeding_window(&self) -> bool {
        u64::from(self.remaining) * 5 > u64::from(self.initial) * 4
    }

    /// Zeroes a countdown that can only have got there through wraparound.
    pub fn clamp(&mut self) {
        if self.remaining > COUNTDOWN_SENTINEL {
            self.remaining = 0;
        }
    }

    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub const fn initial(&self) -> u32 {
        self.initial
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    #[cfg(test)]
    pub(crate) fn force_remaining(&mut self, remaining: u32) {
        self.remaining = remaining;
    }
}

/// Estimates shared by the crank and cam trackers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PulseTiming {
    pub(crate) countdown: CalibrationCountdown,
    pub(crate) average_interval: f32,
    pub(crate) pulse_duration: f32,
    pub(crate) rpm: f32,
    pub(crate) pulse_state: PulseState,
    pub(crate) timeouts: u32,
}

impl PulseTiming {
    pub(crate) const fn new(countdown: u32) -> Self {
        Self {
            countdown: CalibrationCountdown::new(countdown),
            average_interval: 0.0,
            pulse_duration: 0.0,
            rpm: 0.0,
            pulse_state: PulseState::Idle,
            timeouts: 0,
        }
    }

    /// Records a pulse end with the time since its start.
    pub(crate) fn end_pulse(&mut self, duration: u32, weight: f32) {
        self.pulse_state = PulseState::Idle;
        let weight = if self.countdown.in_seeding_window() {
            1.0
        } else {
            weight
        };
        self.pulse_duration =
            rolling_average(self.pulse_duration, ticks_as_f32(duration), weight);
    }

    /// Rounded RPM estimate.
    pub(crate) fn rpm_rounded(&self) -> u32 {
        round_to_u32(self.rpm)
    }
}

/// Timing snapshot exposed through diagnostics.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingSnapshot {
    pub rpm: u32,
    pub average_interval: f32,
    pub pulse_duration: f32,
    pub countdown: u32,
    pub pulse_state: PulseState,
    pub timeouts: u32,
}

impl From<&PulseTiming> for TimingSnapshot {
    fn from(timing: &PulseTiming) -> Self {
        Self {
            rpm: timing.rpm_rounded(),
            average_interval: timing.average_interval,
            pulse_duration: timing.pulse_duration,
            countdown: timing.countdown.remaining(),
            pulse_state: timing.pulse_state,
            timeouts: timing.timeouts,
        }
    }
}

/// Anything whose calibration the supervisor restarts and polls.
pub trait CalibrationSet {
    /// Refills every countdown.
    fn begin_calibration(&mut self);

    /// Returns `true` once every countdown has reached zero.
    fn is_calibrated(&self) -> bool;
}

/// The crank tracker plus one tracker per exhaust cam.
#[derive(Clone, Debug)]
pub struct ShaftTrackers {
    pub crank: CrankTracker,
    pub left: CamTracker,
    pub right: CamTracker,
}

impl ShaftTrackers {
    /// Creates trackers seeded with the given countdowns.
    #[must_use]
    pub const fn new(crank_countdown: u32, cam_countdown: u32) -> Self {
        Self {
            crank: CrankTracker::new(crank_countdown),
            left: CamTracker::new(CamSide::Left, cam_countdown),
            right: CamTracker::new(CamSide::Right, cam_countdown),
        }
    }

    /// Cam tracker for `side`.
    #[must_use]
    pub fn cam(&self, side: CamSide) -> &CamTracker {
        match side {
            CamSide::Left => &self.left,
            CamSide::Right => &self.right,
        }
    }

    /// Mutable cam tracker for `side`.
    pub fn cam_mut(&mut self, side: CamSide) -> &mut CamTracker {
        match side {
            CamSide::Left => &mut self.left,
            CamSide::Right => &mut self.right,
        }
    }

    /// Changes every countdown's fill level and restarts calibration.
    pub fn reseed(&mut self, crank_countdown: u32, cam_countdown: u32) {
        self.crank.timing.countdown.reseed(crank_countdown);
        self.left.timing.countdown.reseed(cam_countdown);
        self.right.timing.countdown.reseed(cam_countdown);
    }

    /// Main-loop housekeeping for every tracker.
    pub fn process(&mut self) {
        self.crank.process();
        self.left.process();
        self.right.process();
    }

    /// Restarts the crank-referenced cycle on both cams.
    pub fn start_cam_cycles(&mut self) {
        self.left.start_cycle();
        self.right.start_cycle();
    }
}

impl CalibrationSet for ShaftTrackers {
    fn begin_calibration(&mut self) {
        self.crank.timing.countdown.restart();
        self.left.timing.countdown.restart();
        self.right.timing.countdown.restart();
    }

    fn is_calibrated(&self) -> bool {
        self.crank.countdown().is_complete()
            && self.left.countdown().is_complete()
            && self.right.countdown().is_complete()
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn ticks_as_f32(ticks: u32) -> f32 {
    ticks as f32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn round_to_u32(value: f32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        (value + 0.5) as u32
    }
}
