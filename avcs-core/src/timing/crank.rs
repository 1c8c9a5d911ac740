use crate::config::ControllerConfig;
use crate::filter::rolling_average;

use super::{CalibrationCountdown, PulseState, PulseTiming, TimingSnapshot, ticks_as_f32};

/// Tracks the crank reference signal and owns the canonical RPM estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct CrankTracker {
    pub(crate) timing: PulseTiming,
}

impl CrankTracker {
    /// Creates a tracker whose calibration countdown starts at `countdown`.
    #[must_use]
    pub const fn new(countdown: u32) -> Self {
        Self {
            timing: PulseTiming::new(countdown),
        }
    }

    /// Handles a pulse start, `elapsed` ticks after the previous one.
    pub fn begin_pulse(&mut self, elapsed: u32, config: &ControllerConfig) {
        let timing = &mut self.timing;
        timing.pulse_state = PulseState::High;

        let seeding = if timing.countdown.is_complete() {
            false
        } else {
            timing.countdown.advance();
            timing.countdown.in_seeding_window()
        };

        let interval_weight = if seeding {
            1.0
        } else {
            config.smoothing.crank_interval
        };
        timing.average_interval =
            rolling_average(timing.average_interval, ticks_as_f32(elapsed), interval_weight);

        if timing.average_interval > 0.0 {
            let measured = config.ticks_per_minute() / timing.average_interval
                * config.crank_revolutions_per_pulse;
            let rpm_weight = if seeding {
                1.0
            } else {
                config.smoothing.crank_rpm.weight_at(timing.rpm)
            };
            timing.rpm = rolling_average(timing.rpm, measured, rpm_weight);
        }
    }

    /// Handles a pulse end, `duration` ticks after its start.
    pub fn end_pulse(&mut self, duration: u32, config: &ControllerConfig) {
        self.timing
            .end_pulse(duration, config.smoothing.pulse_duration);
    }

    /// Main-loop housekeeping.
    pub fn process(&mut self) {
        self.timing.countdown.clamp();
    }

    /// Counts a timeout on this shaft.
    pub fn record_timeout(&mut self) {
        self.timing.timeouts = self.timing.timeouts.saturating_add(1);
    }

    #[must_use]
    pub fn rpm(&self) -> u32 {
        self.timing.rpm_rounded()
    }

    #[must_use]
    pub fn average_interval(&self) -> f32 {
        self.timing.average_interval
    }

    #[must_use]
    pub fn pulse_duration(&self) -> f32 {
        self.timing.pulse_duration
    }

    #[must_use]
    pub fn countdown(&self) -> &CalibrationCountdown {
        &self.timing.countdown
    }

    #[must_use]
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot::from(&self.timing)
    }
}
