//! The control loop facade.
//!
//! Interrupt handlers push timestamped edges through [`Controller::on_pulse_edge`]
//! (or straight into the inbox). The main loop calls [`Controller::tick`] at a
//! fixed rate with the current capture time, oil temperature, and phase targets,
//! and receives solenoid duty cycles back. Every tick:
//!
//! 1. drains queued edges across all shafts in timestamp order,
//! 2. checks each shaft for a missing signal,
//! 3. lets the supervisor advance the mode against a consistent tracker state,
//! 4. runs the PID loops when `Running`.

use heapless::Vec;

use crate::capture::{
    CamSide, Edge, EdgeFilter, EdgeQueue, EdgeQueueConsumer, EdgeQueueError, EdgeQueueProducer,
    PulseEvent, ShaftId,
};
use crate::config::{ConfigError, ControllerConfig, FeedbackResetPolicy};
use crate::diagnostics::{CamDiagnostics, Diagnostics, ShaftDiagnostics};
use crate::fault::Fault;
use crate::feedback::Feedback;
use crate::gain::GainScheduler;
use crate::supervisor::{Mode, ModeTransition, Supervisor};
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::timing::{ShaftTrackers, ticks_as_f32};

/// Faults reported back from a single tick; later ones are still handled but
/// not listed.
pub const MAX_FAULTS_PER_TICK: usize = 8;

/// Timestamps further apart than this are treated as out of order.
const HALF_RANGE: u32 = 1 << 31;

/// Per-tick inputs sampled by the caller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TickInputs {
    pub oil_temperature_c: f32,
    /// Desired phase for the left cam, in cam degrees from baseline.
    pub target_left: f32,
    pub target_right: f32,
}

impl TickInputs {
    /// Same target on both banks.
    #[must_use]
    pub const fn new(oil_temperature_c: f32, target: f32) -> Self {
        Self {
            oil_temperature_c,
            target_left: target,
            target_right: target,
        }
    }

    #[must_use]
    pub const fn target(&self, side: CamSide) -> f32 {
        match side {
            CamSide::Left => self.target_left,
            CamSide::Right => self.target_right,
        }
    }
}

/// What the caller applies after a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutput {
    /// Solenoid duty in percent; zero outside `Running`.
    pub left_duty: f32,
    pub right_duty: f32,
    pub mode: Mode,
    pub faults: Vec<Fault, MAX_FAULTS_PER_TICK>,
}

impl TickOutput {
    #[must_use]
    pub const fn duty(&self, side: CamSide) -> f32 {
        match side {
            CamSide::Left => self.left_duty,
            CamSide::Right => self.right_duty,
        }
    }
}

/// Edge bookkeeping for one shaft.
#[derive(Copy, Clone, Debug, Default)]
struct ShaftClock {
    /// Timestamp of the last accepted pulse start.
    last_begin: Option<u32>,
    /// Start of the current timeout window.
    reference: Option<u32>,
}

/// Owns every piece of control state and the edge inbox.
pub struct Controller<I = EdgeQueue> {
    config: ControllerConfig,
    inbox: I,
    lookahead: [Option<PulseEvent>; 3],
    filter: EdgeFilter,
    clocks: [ShaftClock; 3],
    trackers: ShaftTrackers,
    supervisor: Supervisor,
    feedback: [Feedback; 2],
    gain: GainScheduler,
    telemetry: TelemetryRecorder,
    targets: [f32; 2],
    duty: [f32; 2],
}

impl Controller<EdgeQueue> {
    /// Creates a controller fed through the built-in lock-free edge queue.
    ///
    /// # Errors
    ///
    /// Returns the first problem [`ControllerConfig::validate`] finds.
    pub fn with_edge_queue(config: ControllerConfig) -> Result<Self, ConfigError> {
        Self::new(config, EdgeQueue::new())
    }
}

impl<I> Controller<I>
where
    I: EdgeQueueConsumer,
{
    /// Creates a controller in `Calibrating` that reads edges from `inbox`.
    ///
    /// # Errors
    ///
    /// Returns the first problem [`ControllerConfig::validate`] finds.
    pub fn new(config: ControllerConfig, inbox: I) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inbox,
            lookahead: [None; 3],
            filter: EdgeFilter::new(),
            clocks: [ShaftClock::default(); 3],
            trackers: ShaftTrackers::new(config.crank_countdown(), config.cam_countdown()),
            supervisor: Supervisor::new(config.supervisor),
            feedback: [Self::new_feedback(&config), Self::new_feedback(&config)],
            gain: Self::new_gain(&config),
            telemetry: TelemetryRecorder::new(),
            targets: [0.0; 2],
            duty: [0.0; 2],
        })
    }

    fn new_feedback(config: &ControllerConfig) -> Feedback {
        Feedback::new(
            config.feedback.gains,
            config.ticks_per_second,
            config.smoothing.feedback_history,
        )
    }

    fn new_gain(config: &ControllerConfig) -> GainScheduler {
        GainScheduler::new(
            &config.gain_schedule,
            config.ticks_for_millis(config.gain_schedule.ramp_in_millis),
        )
    }

    /// Runs one pass of the control loop at capture time `now`.
    pub fn tick(&mut self, now: u32, inputs: TickInputs) -> TickOutput {
        let mut faults = Vec::new();

        self.drain(now, &mut faults);
        self.check_timeouts(now, &mut faults);
        self.trackers.process();

        if let Some(transition) = self.supervisor.update(
            self.trackers.crank.rpm(),
            inputs.oil_temperature_c,
            &mut self.trackers,
        ) {
            self.on_transition(transition, now);
        }

        self.targets = [inputs.target_left, inputs.target_right];
        self.duty = if self.supervisor.mode() == Mode::Running {
            self.run_feedback(now)
        } else {
            [0.0; 2]
        };

        TickOutput {
            left_duty: self.duty[CamSide::Left.index()],
            right_duty: self.duty[CamSide::Right.index()],
            mode: self.supervisor.mode(),
            faults,
        }
    }

    /// Applies queued edges oldest first across every shaft.
    fn drain(&mut self, now: u32, faults: &mut Vec<Fault, MAX_FAULTS_PER_TICK>) {
        // Order relative to half a counter period behind `now` so edges on
        // either side of a wrap still sort correctly.
        let origin = now.wrapping_sub(HALF_RANGE);
        loop {
            for shaft in ShaftId::ALL {
                let slot = &mut self.lookahead[shaft.index()];
                if slot.is_none() {
                    *slot = self.inbox.try_dequeue(shaft);
                }
            }

            let next = self
                .lookahead
                .iter_mut()
                .filter(|slot| slot.is_some())
                .min_by_key(|slot| {
                    slot.map_or(u32::MAX, |event| event.timestamp.wrapping_sub(origin))
                })
                .and_then(Option::take);

            match next {
                Some(event) => self.apply(event, now, faults),
                None => break,
            }
        }
    }

    fn apply(
        &mut self,
        event: PulseEvent,
        now: u32,
        faults: &mut Vec<Fault, MAX_FAULTS_PER_TICK>,
    ) {
        let PulseEvent {
            shaft,
            edge,
            timestamp,
            flags,
        } = event;
        let begin = edge == self.config.begin_edge;

        if flags.is_clear() {
            if !self.filter.accept(shaft, edge) {
                return;
            }
        } else {
            // Edges were lost right before this one; restart the shaft's
            // measurement at the edge itself.
            if flags.overflow {
                self.raise(Fault::Overflow(shaft), now, faults);
            }
            if flags.overrun {
                self.raise(Fault::Overrun(shaft), now, faults);
            }
            self.filter.resync(shaft, edge);
            let clock = &mut self.clocks[shaft.index()];
            clock.last_begin = None;
            clock.reference = Some(timestamp);
        }

        if begin {
            self.begin_pulse(shaft, timestamp, now, faults);
        } else {
            self.end_pulse(shaft, timestamp);
        }
    }

    fn begin_pulse(
        &mut self,
        shaft: ShaftId,
        timestamp: u32,
        now: u32,
        faults: &mut Vec<Fault, MAX_FAULTS_PER_TICK>,
    ) {
        let crank_begin = self.clocks[ShaftId::Crank.index()].last_begin;
        let clock = &mut self.clocks[shaft.index()];
        clock.reference = Some(timestamp);
        let previous = clock.last_begin.replace(timestamp);

        match shaft.cam_side() {
            None => {
                self.trackers.start_cam_cycles();
                if let Some(previous) = previous {
                    self.trackers
                        .crank
                        .begin_pulse(timestamp.wrapping_sub(previous), &self.config);
                }
            }
            Some(side) => {
                let crank_interval = crank_begin.map_or(0, |crank| timestamp.wrapping_sub(crank));
                let result = self.trackers.cam_mut(side).begin_pulse(
                    previous.map(|previous| timestamp.wrapping_sub(previous)),
                    crank_interval,
                    &self.config,
                );
                if let Err(fault) = result {
                    self.raise(fault, now, faults);
                }
            }
        }
    }

    fn end_pulse(&mut self, shaft: ShaftId, timestamp: u32) {
        let Some(begin) = self.clocks[shaft.index()].last_begin else {
            return;
        };
        let duration = timestamp.wrapping_sub(begin);
        match shaft.cam_side() {
            None => self.trackers.crank.end_pulse(duration, &self.config),
            Some(side) => self.trackers.cam_mut(side).end_pulse(duration, &self.config),
        }
    }

    fn check_timeouts(&mut self, now: u32, faults: &mut Vec<Fault, MAX_FAULTS_PER_TICK>) {
        let timeout = self.config.edge_timeout_ticks();
        for shaft in ShaftId::ALL {
            let clock = &mut self.clocks[shaft.index()];
            let reference = *clock.reference.get_or_insert(now);
            let elapsed = now.wrapping_sub(reference);
            if elapsed <= timeout || elapsed >= HALF_RANGE {
                continue;
            }

            clock.reference = Some(now);
            clock.last_begin = None;
            match shaft.cam_side() {
                None => self.trackers.crank.record_timeout(),
                Some(side) => self.trackers.cam_mut(side).record_timeout(),
            }
            self.raise(Fault::Timeout(shaft), now, faults);
        }
    }

    fn raise(&mut self, fault: Fault, now: u32, faults: &mut Vec<Fault, MAX_FAULTS_PER_TICK>) {
        let _ = faults.push(fault);
        self.telemetry
            .record(TelemetryEvent::FaultRaised(fault), now);
        let transition = self.supervisor.fail(fault, &mut self.trackers);
        self.telemetry
            .record(TelemetryEvent::CalibrationRestarted, now);
        if let Some(transition) = transition {
            self.on_transition(transition, now);
        }
    }

    fn on_transition(&mut self, transition: ModeTransition, now: u32) {
        self.telemetry
            .record(TelemetryEvent::ModeChanged(transition), now);
        if transition.from != Mode::Running || transition.to == Mode::Running {
            return;
        }

        let policy = self.config.feedback.reset_policy;
        for feedback in &mut self.feedback {
            match policy {
                FeedbackResetPolicy::ResetOnExit => feedback.reset(),
                FeedbackResetPolicy::Retain => feedback.suspend(),
            }
        }
        self.gain.reset();
        self.telemetry
            .record(TelemetryEvent::FeedbackReset(policy), now);
    }

    fn run_feedback(&mut self, now: u32) -> [f32; 2] {
        let rpm = self.trackers.crank.rpm();
        let modifier = self.gain.modifier(now, ticks_as_f32(rpm));
        let mut duty = [0.0; 2];
        for side in CamSide::BOTH {
            let index = side.index();
            let output = self.feedback[index].update(
                now,
                rpm,
                self.trackers.cam(side).angle(),
                self.targets[index],
                modifier,
            );
            duty[index] = self.config.duty_limits.clamp(output);
        }
        duty
    }

    /// Replaces the configuration in place.
    ///
    /// A new calibration length reseeds every tracker; a new tick rate or gain
    /// schedule rebuilds the PID and ramp state. Everything else carries over.
    ///
    /// # Errors
    ///
    /// Returns the first problem [`ControllerConfig::validate`] finds, leaving the
    /// current configuration untouched.
    pub fn reconfigure(&mut self, config: ControllerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let previous = core::mem::replace(&mut self.config, config);

        if previous.calibration_revolutions != config.calibration_revolutions {
            self.trackers
                .reseed(config.crank_countdown(), config.cam_countdown());
        }
        self.supervisor.set_config(config.supervisor);

        if previous.ticks_per_second == config.ticks_per_second {
            for feedback in &mut self.feedback {
                feedback.set_gains(config.feedback.gains);
                feedback.set_history_weight(config.smoothing.feedback_history);
            }
        } else {
            self.feedback = [Self::new_feedback(&config), Self::new_feedback(&config)];
        }
        if previous.ticks_per_second != config.ticks_per_second
            || previous.gain_schedule != config.gain_schedule
        {
            self.gain = Self::new_gain(&config);
        }
        Ok(())
    }

    /// Snapshot of everything worth showing an operator.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics<'_> {
        let shaft_diagnostics = |shaft: ShaftId, timing| ShaftDiagnostics {
            shaft,
            timing,
            noise: self.filter.rejected(shaft),
        };
        let cam = |side: CamSide| {
            let tracker = self.trackers.cam(side);
            let index = side.index();
            CamDiagnostics {
                side,
                shaft: shaft_diagnostics(side.shaft(), tracker.snapshot()),
                cycle: tracker.cycle_state(),
                angle: tracker.angle(),
                baseline: tracker.baseline(),
                measured_angle: tracker.measured_angle(),
                time_since_crank: tracker.time_since_crank(),
                target: self.targets[index],
                duty: self.duty[index],
                feedback: self.feedback[index].terms(),
                history: *self.feedback[index].history(),
            }
        };

        Diagnostics {
            mode: self.supervisor.mode(),
            error_count: self.supervisor.error_count(),
            initialization_error_count: self.supervisor.initialization_error_count(),
            current_error: self.supervisor.current_error(),
            last_error: self.supervisor.last_error(),
            faults: self.supervisor.history(),
            crank: shaft_diagnostics(ShaftId::Crank, self.trackers.crank.snapshot()),
            cams: [cam(CamSide::Left), cam(CamSide::Right)],
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.supervisor.mode()
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    #[must_use]
    pub const fn trackers(&self) -> &ShaftTrackers {
        &self.trackers
    }

    /// Direct access to the edge inbox, e.g. to hand the producer half to an
    /// interrupt handler.
    pub fn inbox_mut(&mut self) -> &mut I {
        &mut self.inbox
    }
}

impl<I> Controller<I>
where
    I: EdgeQueueConsumer + EdgeQueueProducer,
{
    /// Queues a captured edge for the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeQueueError::Full`] when the shaft's queue is full; the
    /// next edge queued on that shaft then reports an overrun.
    pub fn on_pulse_edge(
        &mut self,
        shaft: ShaftId,
        edge: Edge,
        timestamp: u32,
    ) -> Result<(), EdgeQueueError> {
        self.inbox
            .try_enqueue(PulseEvent::new(shaft, edge, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureFlags;
    use crate::telemetry::TelemetryRecord;
    use std::vec::Vec as StdVec;

    const MS: u32 = 1_000;

    fn controller() -> Controller {
        Controller::with_edge_queue(ControllerConfig::new()).expect("default config is valid")
    }

    fn feed(controller: &mut Controller, shaft: ShaftId, edge: Edge, timestamp: u32) {
        controller
            .on_pulse_edge(shaft, edge, timestamp)
            .expect("queue has room");
    }

    fn events(controller: &Controller) -> StdVec<TelemetryEvent> {
        controller
            .telemetry()
            .oldest_first()
            .map(|record: &TelemetryRecord| record.event)
            .collect()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut config = ControllerConfig::new();
        config.ticks_per_second = 0;
        assert!(matches!(
            Controller::with_edge_queue(config),
            Err(ConfigError::ZeroTickRate)
        ));
    }

    #[test]
    fn edges_are_applied_in_timestamp_order_across_shafts() {
        let mut controller = controller();
        let base = u32::MAX - 5 * MS;
        // Crank references straddle the counter wrap; the cam edge between them
        // is queued last but must see the first reference. The earlier cam
        // pulse gives it an interval to scale against.
        feed(&mut controller, ShaftId::Crank, Edge::Falling, base);
        feed(&mut controller, ShaftId::Crank, Edge::Rising, base.wrapping_add(MS));
        feed(&mut controller, ShaftId::Crank, Edge::Falling, base.wrapping_add(40 * MS));
        feed(&mut controller, ShaftId::LeftCam, Edge::Falling, base.wrapping_sub(8 * MS));
        feed(&mut controller, ShaftId::LeftCam, Edge::Rising, base.wrapping_sub(7 * MS));
        feed(&mut controller, ShaftId::LeftCam, Edge::Falling, base.wrapping_add(12 * MS));
        controller.tick(base.wrapping_add(41 * MS), TickInputs::new(20.0, 0.0));

        let diagnostics = controller.diagnostics();
        assert_eq!(diagnostics.crank_rpm(), 3_000);
        assert_eq!(
            diagnostics.cam(CamSide::Left).cycle,
            crate::timing::CycleState::Start,
            "second crank reference restarted the cam cycle"
        );
        assert!(
            (diagnostics.cam(CamSide::Left).time_since_crank - 12_000.0).abs() < 1.0,
            "cam pulse measured against the preceding crank reference"
        );
    }

    #[test]
    fn duplicate_edges_count_as_noise() {
        let mut controller = controller();
        feed(&mut controller, ShaftId::RightCam, Edge::Falling, 100);
        feed(&mut controller, ShaftId::RightCam, Edge::Falling, 150);
        feed(&mut controller, ShaftId::RightCam, Edge::Rising, 400);
        controller.tick(500, TickInputs::new(20.0, 0.0));

        let diagnostics = controller.diagnostics();
        assert_eq!(diagnostics.shaft(ShaftId::RightCam).noise, 1);
        assert_eq!(diagnostics.shaft(ShaftId::RightCam).timing.pulse_duration, 300.0);
    }

    #[test]
    fn flagged_capture_raises_and_resynchronises() {
        let mut controller = controller();
        feed(&mut controller, ShaftId::Crank, Edge::Falling, 1_000);
        feed(&mut controller, ShaftId::Crank, Edge::Rising, 2_000);
        let flagged = PulseEvent::new(ShaftId::Crank, Edge::Falling, 50_000).with_flags(
            CaptureFlags {
                overflow: true,
                overrun: false,
            },
        );
        controller
            .inbox_mut()
            .try_enqueue(flagged)
            .expect("queue has room");
        feed(&mut controller, ShaftId::Crank, Edge::Rising, 51_000);
        feed(&mut controller, ShaftId::Crank, Edge::Falling, 90_000);

        let output = controller.tick(91_000, TickInputs::new(20.0, 0.0));
        assert_eq!(output.faults.as_slice(), &[Fault::Overflow(ShaftId::Crank)]);
        assert_eq!(controller.diagnostics().initialization_error_count, 1);
        // Only the 40 ms interval after the flagged edge was measured.
        assert_eq!(controller.diagnostics().crank_rpm(), 3_000);
    }

    #[test]
    fn silent_shaft_times_out_once_per_window() {
        let mut controller = controller();
        let inputs = TickInputs::new(20.0, 0.0);
        controller.tick(0, inputs);

        let output = controller.tick(999 * MS, inputs);
        assert!(output.faults.is_empty());

        let output = controller.tick(1_001 * MS, inputs);
        assert_eq!(output.faults.len(), 3);
        assert_eq!(output.faults[0], Fault::Timeout(ShaftId::Crank));

        let output = controller.tick(1_500 * MS, inputs);
        assert!(output.faults.is_empty(), "timeout window restarted");

        let diagnostics = controller.diagnostics();
        assert_eq!(diagnostics.crank.timing.timeouts, 1);
        assert_eq!(diagnostics.cam(CamSide::Right).shaft.timing.timeouts, 1);
        assert_eq!(diagnostics.mode, Mode::Calibrating);
        assert_eq!(diagnostics.initialization_error_count, 3);
        assert!(events(&controller).contains(&TelemetryEvent::CalibrationRestarted));
    }

    #[test]
    fn duty_is_zero_until_running() {
        let mut controller = controller();
        let output = controller.tick(0, TickInputs::new(90.0, 10.0));
        assert_eq!(output.mode, Mode::Calibrating);
        assert_eq!(output.duty(CamSide::Left), 0.0);
        assert_eq!(output.duty(CamSide::Right), 0.0);
    }

    #[test]
    fn reconfigure_validates_and_reseeds() {
        let mut controller = controller();
        let mut config = ControllerConfig::new();
        config.duty_limits.min = 50.0;
        config.duty_limits.max = 10.0;
        assert_eq!(controller.reconfigure(config), Err(ConfigError::DutyLimits));
        assert_eq!(controller.config().duty_limits.max, 100.0);

        let mut config = ControllerConfig::new();
        config.calibration_revolutions = 20;
        controller.reconfigure(config).expect("shorter calibration is valid");
        assert_eq!(controller.trackers().crank.countdown().remaining(), 20);
        assert_eq!(controller.trackers().left.countdown().remaining(), 40);
    }
}
