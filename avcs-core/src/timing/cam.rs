use crate::capture::CamSide;
use crate::config::ControllerConfig;
use crate::fault::Fault;
use crate::filter::rolling_average;

use super::{CalibrationCountdown, PulseState, PulseTiming, TimingSnapshot, ticks_as_f32};

/// Sensor pulses per cam revolution on an exhaust cam.
pub const CAM_PULSES_PER_REVOLUTION: f32 = 2.0;

const CRANK_REVOLUTIONS_PER_CAM_REVOLUTION: f32 = 2.0;
const DEGREES_PER_REVOLUTION: f32 = 360.0;

/// Position within the pulse train that follows each crank reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleState {
    /// Crank reference seen, no cam pulse yet.
    Start,
    /// First cam pulse; the only one that carries phase.
    Pulse1,
    Pulse2,
    /// Waiting for the next crank reference.
    End,
}

/// Tracks one exhaust cam: its own RPM estimate plus phase against the crank.
#[derive(Clone, Debug, PartialEq)]
pub struct CamTracker {
    side: CamSide,
    pub(crate) timing: PulseTiming,
    cycle: CycleState,
    time_since_crank: f32,
    measured_angle: f32,
    baseline: f32,
    angle: f32,
}

impl CamTracker {
    /// Creates a tracker that waits for its first crank reference.
    #[must_use]
    pub const fn new(side: CamSide, countdown: u32) -> Self {
        Self {
            side,
            timing: PulseTiming::new(countdown),
            cycle: CycleState::End,
            time_since_crank: 0.0,
            measured_angle: 0.0,
            baseline: 0.0,
            angle: 0.0,
        }
    }

    /// Restarts the pulse train on a crank reference.
    pub fn start_cycle(&mut self) {
        self.cycle = CycleState::Start;
    }

    /// Handles a cam pulse start.
    ///
    /// `cam_interval` is the time since the previous cam pulse start, `None`
    /// for the first pulse after startup or a timeout, and `crank_interval`
    /// the time since the latest crank reference. The cycle position always
    /// advances; the interval average and countdown only move on a measured
    /// interval.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::CamPattern`] on a third pulse within one crank cycle and
    /// [`Fault::Baseline`] when a fixed baseline disagrees with the measurement.
    pub fn begin_pulse(
        &mut self,
        cam_interval: Option<u32>,
        crank_interval: u32,
        config: &ControllerConfig,
    ) -> Result<(), Fault> {
        self.timing.pulse_state = PulseState::High;

        let previous = self.cycle;
        self.cycle = match previous {
            CycleState::Start => CycleState::Pulse1,
            CycleState::Pulse1 => CycleState::Pulse2,
            CycleState::Pulse2 | CycleState::End => CycleState::End,
        };

        let seeding = match cam_interval {
            _ if self.timing.countdown.is_complete() => false,
            Some(_) => {
                self.timing.countdown.advance();
                self.timing.countdown.in_seeding_window()
            }
            None => self.timing.countdown.in_seeding_window(),
        };

        if let Some(cam_interval) = cam_interval {
            let interval_weight = if seeding {
                1.0
            } else {
                config.smoothing.cam_interval
            };
            self.timing.average_interval = rolling_average(
                self.timing.average_interval,
                ticks_as_f32(cam_interval),
                interval_weight,
            );
        }

        match self.cycle {
            CycleState::Pulse1 => self.update_phase(ticks_as_f32(crank_interval), seeding, config),
            CycleState::End if previous == CycleState::Pulse2 => {
                Err(Fault::CamPattern(self.side))
            }
            _ => Ok(()),
        }
    }

    /// Handles a cam pulse end, `duration` ticks after its start.
    pub fn end_pulse(&mut self, duration: u32, config: &ControllerConfig) {
        self.timing
            .end_pulse(duration, config.smoothing.pulse_duration);
    }

    fn update_phase(
        &mut self,
        crank_interval: f32,
        seeding: bool,
        config: &ControllerConfig,
    ) -> Result<(), Fault> {
        let ticks_per_cam_revolution = self.timing.average_interval * CAM_PULSES_PER_REVOLUTION;
        if ticks_per_cam_revolution <= 0.0 {
            return Ok(());
        }

        let cam_rpm = config.ticks_per_minute() / ticks_per_cam_revolution;
        self.timing.rpm = rolling_average(
            self.timing.rpm,
            cam_rpm * CRANK_REVOLUTIONS_PER_CAM_REVOLUTION,
            config.smoothing.cam_rpm,
        );

        let crank_weight = if seeding {
            1.0
        } else {
            config.smoothing.crank_to_cam
        };
        self.time_since_crank = rolling_average(self.time_since_crank, crank_interval, crank_weight);

        let ticks_per_degree = ticks_per_cam_revolution / DEGREES_PER_REVOLUTION;
        let measured = self.time_since_crank / ticks_per_degree;
        self.measured_angle = measured;

        if self.timing.countdown.is_complete() && !config.cam.baseline_only {
            self.angle = rolling_average(
                self.angle,
                measured - self.baseline,
                config.smoothing.angle,
            );
            return Ok(());
        }

        self.angle = 0.0;
        if let Some((baseline, tolerance)) = config.cam.baseline.fixed_for(self.side) {
            self.baseline = baseline;
            let deviation = measured - baseline;
            if deviation > tolerance || deviation < -tolerance {
                return Err(Fault::Baseline(self.side));
            }
        } else {
            let baseline_weight = if seeding {
                1.0
            } else {
                config.smoothing.baseline
            };
            self.baseline = rolling_average(self.baseline, measured, baseline_weight);
        }
        Ok(())
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
    pub const fn side(&self) -> CamSide {
        self.side
    }

    #[must_use]
    pub const fn cycle_state(&self) -> CycleState {
        self.cycle
    }

    /// Crank-equivalent RPM seen by this cam, for cross-checking.
    #[must_use]
    pub fn rpm(&self) -> u32 {
        self.timing.rpm_rounded()
    }

    /// Live phase relative to the baseline, in cam degrees. Zero while calibrating.
    #[must_use]
    pub const fn angle(&self) -> f32 {
        self.angle
    }

    #[must_use]
    pub const fn baseline(&self) -> f32 {
        self.baseline
    }

    /// Most recent unsmoothed-by-baseline phase measurement.
    #[must_use]
    pub const fn measured_angle(&self) -> f32 {
        self.measured_angle
    }

    #[must_use]
    pub const fn time_since_crank(&self) -> f32 {
        self.time_since_crank
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
