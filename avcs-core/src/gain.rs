//! Gain scheduling: a startup ramp multiplied by an RPM-indexed gain curve.

use crate::config::GainScheduleConfig;
use crate::curve::CurveTable;
use crate::timing::ticks_as_f32;

/// Scales PID gains by engine speed and by time since closed-loop control began.
#[derive(Clone, Debug, PartialEq)]
pub struct GainScheduler {
    curve: CurveTable<'static>,
    minimum_rpm: f32,
    ramp_ticks: u32,
    started_at: Option<u32>,
}

impl GainScheduler {
    /// Creates a scheduler whose ramp lasts `ramp_ticks`.
    #[must_use]
    pub const fn new(config: &GainScheduleConfig, ramp_ticks: u32) -> Self {
        Self {
            curve: config.curve,
            minimum_rpm: config.minimum_rpm,
            ramp_ticks,
            started_at: None,
        }
    }

    /// Ramp factor in `[0, 1]`. The first call starts the ramp.
    pub fn ramp_factor(&mut self, now: u32) -> f32 {
        let started_at = *self.started_at.get_or_insert(now);
        if self.ramp_ticks == 0 {
            return 1.0;
        }
        let elapsed = now.wrapping_sub(started_at);
        if elapsed >= self.ramp_ticks {
            1.0
        } else {
            ticks_as_f32(elapsed) / ticks_as_f32(self.ramp_ticks)
        }
    }

    /// Multiplier for every PID term at `rpm`.
    ///
    /// Below the minimum RPM the result is zero and the ramp is left untouched.
    pub fn modifier(&mut self, now: u32, rpm: f32) -> f32 {
        if rpm < self.minimum_rpm {
            return 0.0;
        }
        self.ramp_factor(now) * self.curve.value_at(rpm)
    }

    /// Restarts the ramp on the next call.
    pub fn reset(&mut self) {
        self.started_at = None;
    }

    #[must_use]
    pub const fn is_ramping(&self) -> bool {
        self.started_at.is_some()
    }
}
