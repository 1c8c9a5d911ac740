//! Top-level mode sequencing: Calibrating → Warming → Running.
//!
//! A fault in any mode forces the controller back into calibration. Faults
//! raised while already calibrating are expected (sensors settling, engine
//! cranking) and are only counted. Faults raised later are counted and, up to
//! a fixed cap, kept in an ordered history for display.

use core::fmt;

use heapless::Vec;

use crate::config::SupervisorConfig;
use crate::fault::Fault;
use crate::timing::CalibrationSet;

/// Faults recorded in detail before the history stops growing.
pub const FAULT_HISTORY_CAPACITY: usize = 100;

/// Controller operating mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Calibrating,
    Warming,
    Running,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Calibrating => f.write_str("Calibrating"),
            Mode::Warming => f.write_str("Warming"),
            Mode::Running => f.write_str("Running"),
        }
    }
}

/// A change of mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
}

impl fmt::Display for ModeTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Fault history entry, tagged with the running error count when it was raised.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FaultRecord {
    pub index: u32,
    pub fault: Fault,
}

/// Mode state machine plus fault bookkeeping.
#[derive(Clone, Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    mode: Mode,
    error_count: u32,
    initialization_error_count: u32,
    current_error: Option<Fault>,
    last_error: Option<Fault>,
    history: Vec<FaultRecord, FAULT_HISTORY_CAPACITY>,
}

impl Supervisor {
    /// Creates a supervisor in `Calibrating` with no recorded faults.
    #[must_use]
    pub const fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            mode: Mode::Calibrating,
            error_count: 0,
            initialization_error_count: 0,
            current_error: None,
            last_error: None,
            history: Vec::new(),
        }
    }

    /// Replaces the thresholds; the current mode is unchanged.
    pub fn set_config(&mut self, config: SupervisorConfig) {
        self.config = config;
    }

    /// Evaluates mode transitions once per main-loop pass.
    ///
    /// Must run after every pending edge has been applied to the trackers so
    /// the calibration check sees one consistent set of countdowns.
    pub fn update<C>(
        &mut self,
        crank_rpm: u32,
        oil_temperature_c: f32,
        trackers: &mut C,
    ) -> Option<ModeTransition>
    where
        C: CalibrationSet,
    {
        match self.mode {
            Mode::Calibrating => {
                if crank_rpm < self.config.minimum_rpm {
                    trackers.begin_calibration();
                    None
                } else if trackers.is_calibrated() {
                    self.last_error = self.current_error.take();
                    Some(self.enter(Mode::Warming))
                } else {
                    None
                }
            }
            Mode::Warming => (oil_temperature_c > self.config.warm_oil_temperature_c)
                .then(|| self.enter(Mode::Running)),
            Mode::Running => None,
        }
    }

    /// Reports a fault and restarts calibration. Never fails.
    pub fn fail<C>(&mut self, fault: Fault, trackers: &mut C) -> Option<ModeTransition>
    where
        C: CalibrationSet,
    {
        self.current_error = Some(fault);

        if self.mode == Mode::Calibrating {
            self.initialization_error_count = self.initialization_error_count.saturating_add(1);
            trackers.begin_calibration();
            return None;
        }

        self.error_count = self.error_count.saturating_add(1);
        trackers.begin_calibration();
        let transition = self.enter(Mode::Calibrating);

        // Past the cap the count keeps growing but the detail is dropped.
        let record = FaultRecord {
            index: self.error_count,
            fault,
        };
        if usize::try_from(self.error_count).is_ok_and(|count| count <= FAULT_HISTORY_CAPACITY) {
            let _ = self.history.push(record);
        }

        Some(transition)
    }

    fn enter(&mut self, mode: Mode) -> ModeTransition {
        let transition = ModeTransition {
            from: self.mode,
            to: mode,
        };
        self.mode = mode;
        transition
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn error_count(&self) -> u32 {
        self.error_count
    }

    #[must_use]
    pub const fn initialization_error_count(&self) -> u32 {
        self.initialization_error_count
    }

    /// Fault shown until calibration next completes.
    #[must_use]
    pub const fn current_error(&self) -> Option<Fault> {
        self.current_error
    }

    /// Fault that was showing when calibration last completed.
    #[must_use]
    pub const fn last_error(&self) -> Option<Fault> {
        self.last_error
    }

    /// Recorded faults, oldest first.
    #[must_use]
    pub fn history(&self) -> &[FaultRecord] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CamSide, ShaftId};

    #[derive(Default)]
    struct MockTrackers {
        calibrated: bool,
        restarts: u32,
    }

    impl CalibrationSet for MockTrackers {
        fn begin_calibration(&mut self) {
            self.calibrated = false;
            self.restarts += 1;
        }

        fn is_calibrated(&self) -> bool {
            self.calibrated
        }
    }

    fn running_supervisor(trackers: &mut MockTrackers) -> Supervisor {
        let mut supervisor = Supervisor::new(SupervisorConfig::new());
        trackers.calibrated = true;
        supervisor.update(2_000, 20.0, trackers);
        supervisor.update(2_000, 80.0, trackers);
        assert_eq!(supervisor.mode(), Mode::Running);
        supervisor
    }

    #[test]
    fn low_rpm_keeps_restarting_calibration() {
        let mut supervisor = Supervisor::new(SupervisorConfig::new());
        let mut trackers = MockTrackers {
            calibrated: true,
            restarts: 0,
        };

        assert_eq!(supervisor.update(1_499, 90.0, &mut trackers), None);
        assert_eq!(supervisor.mode(), Mode::Calibrating);
        assert_eq!(trackers.restarts, 1);
        assert!(!trackers.calibrated);
    }

    #[test]
    fn walks_through_warm_up_on_oil_temperature() {
        let mut supervisor = Supervisor::new(SupervisorConfig::new());
        let mut trackers = MockTrackers::default();

        assert_eq!(supervisor.update(2_000, 20.0, &mut trackers), None);
        trackers.calibrated = true;
        assert_eq!(
            supervisor.update(2_000, 20.0, &mut trackers),
            Some(ModeTransition {
                from: Mode::Calibrating,
                to: Mode::Warming
            })
        );

        assert_eq!(supervisor.update(2_000, 71.0, &mut trackers), None);
        assert_eq!(supervisor.mode(), Mode::Warming);
        assert_eq!(
            supervisor.update(2_000, 72.0, &mut trackers),
            Some(ModeTransition {
                from: Mode::Warming,
                to: Mode::Running
            })
        );
        assert_eq!(supervisor.update(0, 0.0, &mut trackers), None);
        assert_eq!(supervisor.mode(), Mode::Running);
    }

    #[test]
    fn faults_while_calibrating_are_only_counted() {
        let mut supervisor = Supervisor::new(SupervisorConfig::new());
        let mut trackers = MockTrackers::default();

        let transition = supervisor.fail(Fault::Timeout(ShaftId::Crank), &mut trackers);
        assert_eq!(transition, None);
        assert_eq!(supervisor.initialization_error_count(), 1);
        assert_eq!(supervisor.error_count(), 0);
        assert!(supervisor.history().is_empty());
        assert_eq!(trackers.restarts, 1);
        assert_eq!(
            supervisor.current_error(),
            Some(Fault::Timeout(ShaftId::Crank))
        );
    }

    #[test]
    fn faults_while_running_force_recalibration() {
        let mut trackers = MockTrackers::default();
        let mut supervisor = running_supervisor(&mut trackers);
        let restarts = trackers.restarts;

        let transition = supervisor.fail(Fault::Baseline(CamSide::Left), &mut trackers);
        assert_eq!(
            transition,
            Some(ModeTransition {
                from: Mode::Running,
                to: Mode::Calibrating
            })
        );
        assert_eq!(supervisor.mode(), Mode::Calibrating);
        assert_eq!(supervisor.error_count(), 1);
        assert_eq!(supervisor.initialization_error_count(), 0);
        assert_eq!(trackers.restarts, restarts + 1);
        assert_eq!(
            supervisor.history(),
            &[FaultRecord {
                index: 1,
                fault: Fault::Baseline(CamSide::Left)
            }]
        );
    }

    #[test]
    fn fault_history_stops_growing_past_the_cap() {
        let mut trackers = MockTrackers::default();
        let mut supervisor = running_supervisor(&mut trackers);

        for _ in 0..150 {
            trackers.calibrated = true;
            supervisor.update(2_000, 90.0, &mut trackers);
            supervisor.update(2_000, 90.0, &mut trackers);
            supervisor.fail(Fault::Timeout(ShaftId::LeftCam), &mut trackers);
        }

        assert_eq!(supervisor.error_count(), 150);
        assert_eq!(supervisor.history().len(), FAULT_HISTORY_CAPACITY);
        assert_eq!(supervisor.history()[99].index, 100);
    }

    #[test]
    fn completed_calibration_moves_the_error_message() {
        let mut trackers = MockTrackers::default();
        let mut supervisor = running_supervisor(&mut trackers);
        supervisor.fail(Fault::Overrun(ShaftId::RightCam), &mut trackers);

        trackers.calibrated = true;
        supervisor.update(2_000, 90.0, &mut trackers);
        assert_eq!(supervisor.mode(), Mode::Warming);
        assert_eq!(supervisor.current_error(), None);
        assert_eq!(
            supervisor.last_error(),
            Some(Fault::Overrun(ShaftId::RightCam))
        );
    }
}
