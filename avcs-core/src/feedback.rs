//! Closed-loop PID control for one cam solenoid.

use crate::config::PidGains;
use crate::filter::rolling_average;

/// Bound on the accumulated integral term, in either direction.
pub const INTEGRAL_LIMIT: f32 = 10.0;

/// Number of RPM buckets in the output history.
pub const BUCKET_COUNT: usize = 20;

/// Width of each RPM bucket.
pub const BUCKET_WIDTH_RPM: u32 = 500;

/// PID controller state for one actuator.
#[derive(Clone, Debug, PartialEq)]
pub struct Feedback {
    gains: PidGains,
    ticks_per_second: f32,
    history_weight: f32,
    proportional_term: f32,
    integral_term: f32,
    derivative_term: f32,
    previous_error: f32,
    output: f32,
    last_update: Option<u32>,
    history: [f32; BUCKET_COUNT],
}

/// Terms computed by the most recent update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FeedbackTerms {
    pub proportional: f32,
    pub integral: f32,
    pub derivative: f32,
    pub output: f32,
}

impl Feedback {
    /// Creates a controller with zeroed state.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn new(gains: PidGains, ticks_per_second: u32, history_weight: f32) -> Self {
        Self {
            gains,
            ticks_per_second: ticks_per_second as f32,
            history_weight,
            proportional_term: 0.0,
            integral_term: 0.0,
            derivative_term: 0.0,
            previous_error: 0.0,
            output: 0.0,
            last_update: None,
            history: [0.0; BUCKET_COUNT],
        }
    }

    /// Replaces the gains without touching accumulated state.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    /// Changes how strongly new outputs move the per-RPM history.
    pub fn set_history_weight(&mut self, weight: f32) {
        self.history_weight = weight;
    }

    #[must_use]
    pub const fn gains(&self) -> PidGains {
        self.gains
    }

    /// Runs one control step and returns the raw output.
    ///
    /// `now` is in capture ticks and may wrap. The first update after a reset
    /// has no elapsed time, so it contributes no integral or derivative action;
    /// the same holds for any step that arrives in the same tick as the last.
    pub fn update(
        &mut self,
        now: u32,
        rpm: u32,
        actual: f32,
        target: f32,
        gain_modifier: f32,
    ) -> f32 {
        let dt = self.last_update.map_or(0.0, |previous| {
            crate::timing::ticks_as_f32(now.wrapping_sub(previous)) / self.ticks_per_second
        });
        self.last_update = Some(now);

        let error = target - actual;
        let error_change = error - self.previous_error;

        self.proportional_term = error * self.gains.proportional * gain_modifier;
        self.integral_term = (self.integral_term
            + error * dt * self.gains.integral * gain_modifier)
            .clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);
        self.derivative_term = if dt > 0.0 {
            self.gains.derivative * gain_modifier * error_change / dt
        } else {
            0.0
        };

        self.output = self.proportional_term + self.integral_term + self.derivative_term;

        let bucket = bucket_for(rpm);
        self.history[bucket] = rolling_average(self.history[bucket], self.output, self.history_weight);

        self.previous_error = error;
        self.output
    }

    /// Clears control state; the per-RPM history is kept.
    pub fn reset(&mut self) {
        self.proportional_term = 0.0;
        self.integral_term = 0.0;
        self.derivative_term = 0.0;
        self.previous_error = 0.0;
        self.output = 0.0;
        self.last_update = None;
    }

    /// Forgets the last update time so a long pause is not integrated.
    pub fn suspend(&mut self) {
        self.last_update = None;
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    #[must_use]
    pub const fn integral_term(&self) -> f32 {
        self.integral_term
    }

    #[must_use]
    pub const fn terms(&self) -> FeedbackTerms {
        FeedbackTerms {
            proportional: self.proportional_term,
            integral: self.integral_term,
            derivative: self.derivative_term,
            output: self.output,
        }
    }

    /// Smoothed output per 500-RPM bucket.
    #[must_use]
    pub const fn history(&self) -> &[f32; BUCKET_COUNT] {
        &self.history
    }
}

/// History bucket for `rpm`; everything at or above 9500 RPM shares the last one.
#[must_use]
pub fn bucket_for(rpm: u32) -> usize {
    usize::try_from(rpm / BUCKET_WIDTH_RPM).map_or(BUCKET_COUNT - 1, |bucket| {
        bucket.min(BUCKET_COUNT - 1)
    })
}
