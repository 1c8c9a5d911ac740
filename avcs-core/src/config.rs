//! Controller tuning and the defaults the engine was calibrated with.
//!
//! Every struct here has a `const fn new()` returning the production defaults
//! so firmware can build its configuration in a `static`, and the emulator can
//! start from the same values before tweaking them at runtime.

use core::fmt;

use crate::capture::{CamSide, Edge};
use crate::curve::{CurveTable, GAIN_CURVE};
use crate::filter::{WeightPolicy, is_valid_weight};
use crate::timing::COUNTDOWN_SENTINEL;

/// Capture clock rate (microsecond ticks).
pub const DEFAULT_TICKS_PER_SECOND: u32 = 1_000_000;

/// Crank pulses observed before the estimates are trusted.
pub const DEFAULT_CALIBRATION_REVOLUTIONS: u32 = 150;

/// Engine idles near 1000 RPM; solenoids stay off until 500 RPM above that.
pub const DEFAULT_MINIMUM_RPM: u32 = 1_500;

/// Oil temperature that must be exceeded before closed-loop control starts.
pub const DEFAULT_WARM_OIL_TEMPERATURE_C: f32 = 71.0;

/// Supervisor thresholds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    /// Crank RPM below which calibration keeps restarting.
    pub minimum_rpm: u32,
    /// Oil temperature (strictly greater than) that ends warm-up.
    pub warm_oil_temperature_c: f32,
}

impl SupervisorConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            minimum_rpm: DEFAULT_MINIMUM_RPM,
            warm_oil_temperature_c: DEFAULT_WARM_OIL_TEMPERATURE_C,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the cam phase baseline comes from.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BaselineSource {
    /// Smoothed from live measurements while calibrating.
    Measured,
    /// Pre-measured constants, sanity-checked against live measurements.
    Fixed {
        left: f32,
        right: f32,
        tolerance_degrees: f32,
    },
}

impl BaselineSource {
    /// Baselines logged at a steady 2500 RPM with the solenoids off.
    pub const FACTORY: Self = BaselineSource::Fixed {
        left: 131.2145,
        right: 41.0733,
        tolerance_degrees: 5.0,
    };

    /// Fixed baseline and tolerance for `side`, if one is configured.
    #[must_use]
    pub const fn fixed_for(self, side: CamSide) -> Option<(f32, f32)> {
        match self {
            BaselineSource::Measured => None,
            BaselineSource::Fixed {
                left,
                right,
                tolerance_degrees,
            } => match side {
                CamSide::Left => Some((left, tolerance_degrees)),
                CamSide::Right => Some((right, tolerance_degrees)),
            },
        }
    }
}

/// Cam phase measurement options.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CamConfig {
    pub baseline: BaselineSource,
    /// Keep measuring the baseline forever and never report a live angle.
    pub baseline_only: bool,
}

impl CamConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            baseline: BaselineSource::Measured,
            baseline_only: false,
        }
    }
}

impl Default for CamConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Blend weight for every estimator, in the `0 < w <= 1` form.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SmoothingPolicy {
    pub crank_interval: f32,
    pub crank_rpm: WeightPolicy,
    pub cam_interval: f32,
    pub cam_rpm: f32,
    pub pulse_duration: f32,
    /// Time from the crank reference to the first cam pulse.
    pub crank_to_cam: f32,
    pub baseline: f32,
    pub angle: f32,
    /// Per-RPM-bucket output history kept by each PID loop.
    pub feedback_history: f32,
}

impl SmoothingPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            crank_interval: 0.5,
            crank_rpm: WeightPolicy::Fixed(1.0),
            cam_interval: 1.0,
            cam_rpm: 1.0,
            pulse_duration: 0.5,
            crank_to_cam: 0.5,
            baseline: 0.5,
            angle: 0.5,
            feedback_history: 1.0 / 6.0,
        }
    }

    fn fixed_weights(&self) -> [(&'static str, f32); 8] {
        [
            ("crank_interval", self.crank_interval),
            ("cam_interval", self.cam_interval),
            ("cam_rpm", self.cam_rpm),
            ("pulse_duration", self.pulse_duration),
            ("crank_to_cam", self.crank_to_cam),
            ("baseline", self.baseline),
            ("angle", self.angle),
            ("feedback_history", self.feedback_history),
        ]
    }
}

impl Default for SmoothingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Proportional, integral, and derivative gains.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidGains {
    pub proportional: f32,
    pub integral: f32,
    pub derivative: f32,
}

impl PidGains {
    #[must_use]
    pub const fn new(proportional: f32, integral: f32, derivative: f32) -> Self {
        Self {
            proportional,
            integral,
            derivative,
        }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self::new(1.0, 7.5, 0.001)
    }
}

/// What happens to PID state when the controller drops out of `Running`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FeedbackResetPolicy {
    /// Clear the integral, previous error, and output.
    ResetOnExit,
    /// Keep the accumulated terms for faster re-convergence.
    Retain,
}

/// PID loop configuration shared by both banks.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FeedbackConfig {
    pub gains: PidGains,
    pub reset_policy: FeedbackResetPolicy,
}

impl FeedbackConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gains: PidGains::new(1.0, 7.5, 0.001),
            reset_policy: FeedbackResetPolicy::ResetOnExit,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Startup ramp and RPM gain curve.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GainScheduleConfig {
    pub ramp_in_millis: u32,
    /// Gain is forced to zero below this RPM.
    pub minimum_rpm: f32,
    pub curve: CurveTable<'static>,
}

impl GainScheduleConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ramp_in_millis: 2_000,
            minimum_rpm: 500.0,
            curve: GAIN_CURVE,
        }
    }
}

impl Default for GainScheduleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Solenoid duty-cycle range, in percent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DutyLimits {
    pub min: f32,
    pub max: f32,
}

impl DutyLimits {
    #[must_use]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Clamps a raw controller output into the permitted range.
    #[must_use]
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

impl Default for DutyLimits {
    fn default() -> Self {
        Self::new(0.0, 100.0)
    }
}

/// Complete controller configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub ticks_per_second: u32,
    /// Crank pulses per calibration; cams count twice as many.
    pub calibration_revolutions: u32,
    /// The crank reference mark sits on a cam pulley, so one pulse spans two revolutions.
    pub crank_revolutions_per_pulse: f32,
    /// A shaft with no pulse start for this long raises a timeout.
    pub edge_timeout_millis: u32,
    /// Edge that marks the start of a pulse (sensors are active low).
    pub begin_edge: Edge,
    pub supervisor: SupervisorConfig,
    pub cam: CamConfig,
    pub smoothing: SmoothingPolicy,
    pub feedback: FeedbackConfig,
    pub gain_schedule: GainScheduleConfig,
    pub duty_limits: DutyLimits,
}

impl ControllerConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            calibration_revolutions: DEFAULT_CALIBRATION_REVOLUTIONS,
            crank_revolutions_per_pulse: 2.0,
            edge_timeout_millis: 1_000,
            begin_edge: Edge::Falling,
            supervisor: SupervisorConfig::new(),
            cam: CamConfig::new(),
            smoothing: SmoothingPolicy::new(),
            feedback: FeedbackConfig::new(),
            gain_schedule: GainScheduleConfig::new(),
            duty_limits: DutyLimits::new(0.0, 100.0),
        }
    }

    /// Capture ticks in one minute.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ticks_per_minute(&self) -> f32 {
        self.ticks_per_second as f32 * 60.0
    }

    /// Converts milliseconds into capture ticks, saturating at `u32::MAX`.
    #[must_use]
    pub fn ticks_for_millis(&self, millis: u32) -> u32 {
        let ticks = u64::from(self.ticks_per_second) * u64::from(millis) / 1_000;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    /// Timeout window in capture ticks.
    #[must_use]
    pub fn edge_timeout_ticks(&self) -> u32 {
        self.ticks_for_millis(self.edge_timeout_millis)
    }

    /// Countdown seeded into the crank tracker.
    #[must_use]
    pub const fn crank_countdown(&self) -> u32 {
        self.calibration_revolutions
    }

    /// Countdown seeded into each cam tracker (two phase pulses per cycle).
    #[must_use]
    pub const fn cam_countdown(&self) -> u32 {
        self.calibration_revolutions.saturating_mul(2)
    }

    /// Checks the configuration for values the control path cannot work with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.calibration_revolutions == 0 || self.cam_countdown() > COUNTDOWN_SENTINEL {
            return Err(ConfigError::CalibrationLength(
                self.calibration_revolutions,
            ));
        }
        if self.crank_revolutions_per_pulse <= 0.0 {
            return Err(ConfigError::RevolutionsPerPulse);
        }
        if self.edge_timeout_ticks() == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if let Some((name, weight)) = self
            .smoothing
            .fixed_weights()
            .into_iter()
            .find(|(_, weight)| !is_valid_weight(*weight))
        {
            return Err(ConfigError::Weight { name, weight });
        }
        if !self.smoothing.crank_rpm.is_valid() {
            return Err(ConfigError::RpmWeightPolicy);
        }
        if let WeightPolicy::RpmCurve(curve) = self.smoothing.crank_rpm {
            if !curve.is_increasing() {
                return Err(ConfigError::CurveOrder("crank_rpm"));
            }
        }
        if self.gain_schedule.curve.is_empty() || !self.gain_schedule.curve.is_increasing() {
            return Err(ConfigError::CurveOrder("gain_schedule"));
        }
        if let BaselineSource::Fixed {
            tolerance_degrees, ..
        } = self.cam.baseline
        {
            if tolerance_degrees.is_nan() || tolerance_degrees < 0.0 {
                return Err(ConfigError::BaselineTolerance);
            }
        }
        if self.duty_limits.min.is_nan()
            || self.duty_limits.max.is_nan()
            || self.duty_limits.min > self.duty_limits.max
        {
            return Err(ConfigError::DutyLimits);
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejected configuration values.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConfigError {
    ZeroTickRate,
    CalibrationLength(u32),
    RevolutionsPerPulse,
    ZeroTimeout,
    Weight { name: &'static str, weight: f32 },
    RpmWeightPolicy,
    CurveOrder(&'static str),
    BaselineTolerance,
    DutyLimits,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroTickRate => f.write_str("tick rate must be non-zero"),
            ConfigError::CalibrationLength(revolutions) => write!(
                f,
                "calibration length {revolutions} outside 1..={}",
                COUNTDOWN_SENTINEL / 2
            ),
            ConfigError::RevolutionsPerPulse => {
                f.write_str("crank revolutions per pulse must be positive")
            }
            ConfigError::ZeroTimeout => f.write_str("edge timeout rounds to zero ticks"),
            ConfigError::Weight { name, weight } => {
                write!(f, "smoothing weight {name}={weight} outside (0, 1]")
            }
            ConfigError::RpmWeightPolicy => f.write_str("crank rpm weight outside (0, 1]"),
            ConfigError::CurveOrder(name) => {
                write!(f, "{name} curve must be non-empty and strictly increasing")
            }
            ConfigError::BaselineTolerance => {
                f.write_str("baseline tolerance must be non-negative")
            }
            ConfigError::DutyLimits => f.write_str("duty limits must satisfy min <= max"),
        }
    }
}
