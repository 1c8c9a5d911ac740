//! Exponential smoothing shared by every interval, RPM, and angle estimator.
//!
//! Weights are expressed in the canonical `0 < w <= 1` form where `1.0`
//! replaces the running value outright. Older tuning notes describe the same
//! filter through an integer smoothing rate `s` (`0` meaning no smoothing);
//! [`weight_from_smoothing_rate`] converts between the two.

use crate::curve::CurveTable;

/// Blends `new` into `current` with the supplied weight.
///
/// Weights at or above `1.0` return `new` exactly, weights at or below `0.0`
/// return `current` unchanged.
#[must_use]
pub fn rolling_average(current: f32, new: f32, weight: f32) -> f32 {
    if weight >= 1.0 {
        new
    } else if weight <= 0.0 {
        current
    } else {
        current + weight * (new - current)
    }
}

/// Converts a legacy smoothing rate into the equivalent blend weight.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub const fn weight_from_smoothing_rate(rate: u32) -> f32 {
    1.0 / (rate as f32 + 1.0)
}

/// Selects the blend weight for an estimator whose responsiveness depends on engine speed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum WeightPolicy {
    /// Same weight at every RPM.
    Fixed(f32),
    /// Weight looked up from the current RPM estimate.
    RpmCurve(CurveTable<'static>),
}

impl WeightPolicy {
    /// Returns the weight to apply when the current estimate is `rpm`.
    #[must_use]
    pub fn weight_at(&self, rpm: f32) -> f32 {
        match self {
            WeightPolicy::Fixed(weight) => *weight,
            WeightPolicy::RpmCurve(curve) => curve.value_at(rpm),
        }
    }

    /// Returns `true` when every weight the policy can produce lies in `(0, 1]`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            WeightPolicy::Fixed(weight) => is_valid_weight(*weight),
            WeightPolicy::RpmCurve(curve) => {
                !curve.is_empty() && curve.points().iter().all(|(_, w)| is_valid_weight(*w))
            }
        }
    }
}

/// Returns `true` for weights in `(0, 1]`.
#[must_use]
pub fn is_valid_weight(weight: f32) -> bool {
    weight > 0.0 && weight <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::RPM_WEIGHT_CURVE;

    /// Relative comparison; f32 carries about seven significant digits.
    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= 1e-5 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn identical_inputs_are_a_fixed_point() {
        for weight in [0.0, 0.1, 0.5, 0.9, 1.0] {
            assert_close(rolling_average(42.5, 42.5, weight), 42.5);
        }
    }

    #[test]
    fn unit_weight_replaces_current_value() {
        assert_close(rolling_average(0.1, 0.3, 1.0), 0.3);
        assert_close(rolling_average(-7.0, 1234.5, 1.5), 1234.5);
    }

    #[test]
    fn converges_monotonically_without_overshoot() {
        let target = 100.0;
        let mut value = 0.0;
        for _ in 0..200 {
            let next = rolling_average(value, target, 0.25);
            assert!(next >= value, "filter moved away from target");
            assert!(next <= target, "filter overshot target");
            value = next;
        }
        assert_close(value, target);
    }

    #[test]
    fn legacy_rates_map_to_weights() {
        assert_close(weight_from_smoothing_rate(0), 1.0);
        assert_close(weight_from_smoothing_rate(1), 0.5);
        assert_close(weight_from_smoothing_rate(5), 1.0 / 6.0);
    }

    #[test]
    fn rpm_curve_policy_smooths_harder_at_idle() {
        let policy = WeightPolicy::RpmCurve(RPM_WEIGHT_CURVE);
        assert_close(policy.weight_at(800.0), 0.1);
        assert_close(policy.weight_at(1500.0), 0.55);
        assert_close(policy.weight_at(3000.0), 1.0);
        assert!(policy.is_valid());
        assert!(!WeightPolicy::Fixed(0.0).is_valid());
    }
}
