//! Piecewise-linear lookup tables keyed by engine speed.

/// Ordered `(input, output)` control points with linear interpolation between them.
///
/// Inputs must be strictly increasing. That is a construction contract rather
/// than something checked on every lookup; [`CurveTable::is_increasing`] is
/// available for configuration validation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CurveTable<'a> {
    points: &'a [(f32, f32)],
}

impl<'a> CurveTable<'a> {
    /// Wraps a slice of control points.
    #[must_use]
    pub const fn new(points: &'a [(f32, f32)]) -> Self {
        Self { points }
    }

    /// Returns the control points backing this table.
    #[must_use]
    pub const fn points(&self) -> &'a [(f32, f32)] {
        self.points
    }

    /// Returns `true` when the table holds no control points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns `true` when every input is strictly greater than the previous one.
    #[must_use]
    pub fn is_increasing(&self) -> bool {
        self.points.windows(2).all(|pair| pair[0].0 < pair[1].0)
    }

    /// Looks up `x`, clamping outside the table and interpolating inside it.
    ///
    /// An empty table yields `0.0`; a single point yields its output everywhere.
    #[must_use]
    pub fn value_at(&self, x: f32) -> f32 {
        let (Some(&(first_x, first_y)), Some(&(last_x, last_y))) =
            (self.points.first(), self.points.last())
        else {
            return 0.0;
        };

        if x <= first_x {
            return first_y;
        }
        if x >= last_x {
            return last_y;
        }

        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            // x == x0 lands here with a zero offset, so control points come back exactly.
            if x < x1 {
                return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
            }
        }

        last_y
    }
}

/// Exhaust cam advance target, in cam degrees, by crank RPM.
pub const EXHAUST_CAM_TARGET_CURVE: CurveTable<'static> = CurveTable::new(&[
    (1500.0, 0.0),
    (2000.0, 1.0),
    (3000.0, 5.0),
    (4000.0, 15.0),
    (8000.0, 20.0),
]);

/// Gain multiplier applied to the PID terms by crank RPM.
pub const GAIN_CURVE: CurveTable<'static> =
    CurveTable::new(&[(500.0, 0.0), (1500.0, 1.0), (8000.0, 1.0)]);

/// Crank RPM filter weight: heavy smoothing at idle, none above 2000 RPM.
pub const RPM_WEIGHT_CURVE: CurveTable<'static> =
    CurveTable::new(&[(1000.0, 0.1), (2000.0, 1.0)]);

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: CurveTable<'static> = CurveTable::new(&[
        (500.0, 0.0),
        (2000.0, 1.0),
        (3200.0, 1.0),
        (5600.0, 15.0),
        (8000.0, 20.0),
    ]);

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= 1e-4,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn clamps_below_and_above_the_table() {
        assert_close(SAMPLE.value_at(500.0), 0.0);
        assert_close(SAMPLE.value_at(0.0), 0.0);
        assert_close(SAMPLE.value_at(-100.0), 0.0);
        assert_close(SAMPLE.value_at(8000.0), 20.0);
        assert_close(SAMPLE.value_at(8500.0), 20.0);
    }

    #[test]
    fn returns_control_points_exactly() {
        for &(x, y) in SAMPLE.points() {
            assert_close(SAMPLE.value_at(x), y);
        }
        assert_close(SAMPLE.value_at(3200.0), 1.0);
    }

    #[test]
    fn interpolates_between_points() {
        assert_close(SAMPLE.value_at(1250.0), 0.5);
        assert_close(SAMPLE.value_at(4400.0), 8.0);
        assert_close(SAMPLE.value_at(6800.0), 17.5);
    }

    #[test]
    fn degenerate_tables_are_tolerated() {
        let single = CurveTable::new(&[(1000.0, 3.0)]);
        assert_close(single.value_at(0.0), 3.0);
        assert_close(single.value_at(1000.0), 3.0);
        assert_close(single.value_at(9000.0), 3.0);

        let empty = CurveTable::new(&[]);
        assert_close(empty.value_at(1000.0), 0.0);
        assert!(empty.is_empty());
    }

    #[test]
    fn built_in_tables_are_increasing() {
        assert!(EXHAUST_CAM_TARGET_CURVE.is_increasing());
        assert!(GAIN_CURVE.is_increasing());
        assert!(RPM_WEIGHT_CURVE.is_increasing());
        assert!(!CurveTable::new(&[(2.0, 0.0), (1.0, 0.0)]).is_increasing());
    }

    #[test]
    fn gain_curve_matches_half_gain_at_1000_rpm() {
        assert_close(GAIN_CURVE.value_at(1000.0), 0.5);
        assert_close(GAIN_CURVE.value_at(2500.0), 1.0);
    }
}
