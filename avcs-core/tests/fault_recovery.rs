#![allow(clippy::float_cmp)]

mod common;

use avcs_core::capture::{
    CamSide, CaptureFlags, Edge, EdgeQueueError, EdgeQueueProducer, PulseEvent, ShaftId,
};
use avcs_core::config::{ControllerConfig, FeedbackResetPolicy};
use avcs_core::controller::{Controller, TickInputs};
use avcs_core::fault::Fault;
use avcs_core::supervisor::{FAULT_HISTORY_CAPACITY, FaultRecord, Mode};
use avcs_core::telemetry::TelemetryEvent;

use common::{Engine, TICKS_PER_MS, controller};

const RUNNING: TickInputs = TickInputs::new(90.0, 5.0);

fn running(engine: &mut Engine, config: ControllerConfig) -> Controller {
    let mut controller = controller(config);
    engine
        .run_until(&mut controller, 10_000, RUNNING, |c| c.mode() == Mode::Running)
        .expect("reaches closed loop");
    controller
}

/// Steps until the controller leaves `Running`; returns the left integral term
/// from the last tick spent in `Running`.
fn run_until_fault(engine: &mut Engine, controller: &mut Controller) -> f32 {
    let mut integral = controller.diagnostics().cam(CamSide::Left).feedback.integral;
    for _ in 0..5_000 {
        let output = engine.step(controller, RUNNING);
        if output.mode != Mode::Running {
            return integral;
        }
        integral = controller.diagnostics().cam(CamSide::Left).feedback.integral;
    }
    panic!("controller never left Running");
}

fn feedback_events(controller: &Controller) -> Vec<FeedbackResetPolicy> {
    controller
        .telemetry()
        .oldest_first()
        .filter_map(|record| match record.event {
            TelemetryEvent::FeedbackReset(policy) => Some(policy),
            _ => None,
        })
        .collect()
}

#[test]
fn lost_crank_signal_forces_recalibration() {
    let mut engine = Engine::new(0, 3_000, 40.0);
    let mut controller = running(&mut engine, ControllerConfig::new());
    engine.run(&mut controller, 1_000, RUNNING);

    // Without references each cam sees a third pulse in the same crank cycle
    // before the crank itself times out.
    engine.silent[ShaftId::Crank.index()] = true;
    let faults = engine.run(&mut controller, 1_500, RUNNING);
    assert_eq!(
        faults,
        [
            Fault::CamPattern(CamSide::Left),
            Fault::CamPattern(CamSide::Right),
            Fault::Timeout(ShaftId::Crank)
        ]
    );

    let diagnostics = controller.diagnostics();
    assert_eq!(diagnostics.mode, Mode::Calibrating);
    assert_eq!(diagnostics.error_count, 1);
    assert_eq!(diagnostics.initialization_error_count, 2);
    assert_eq!(diagnostics.crank.timing.timeouts, 1);
    assert_eq!(diagnostics.cam(CamSide::Left).shaft.timing.timeouts, 0);
    assert_eq!(diagnostics.cam(CamSide::Left).duty, 0.0);
    assert_eq!(
        diagnostics.faults,
        &[FaultRecord {
            index: 1,
            fault: Fault::CamPattern(CamSide::Left)
        }]
    );
    assert_eq!(
        diagnostics.current_error,
        Some(Fault::Timeout(ShaftId::Crank))
    );

    engine.silent[ShaftId::Crank.index()] = false;
    engine
        .run_until(&mut controller, 10_000, RUNNING, |c| c.mode() == Mode::Running)
        .expect("recovers once the signal returns");

    let diagnostics = controller.diagnostics();
    assert_eq!(diagnostics.current_error, None);
    assert_eq!(diagnostics.last_error, Some(Fault::Timeout(ShaftId::Crank)));
    assert_eq!(diagnostics.error_count, 1);
}

#[test]
fn reset_policy_clears_the_integral() {
    let mut engine = Engine::new(0, 3_000, 40.0);
    let mut controller = running(&mut engine, ControllerConfig::new());
    engine.run(&mut controller, 3_000, RUNNING);

    engine.silent[ShaftId::LeftCam.index()] = true;
    let integral = run_until_fault(&mut engine, &mut controller);
    assert!(integral > 0.0);

    let feedback = controller.diagnostics().cam(CamSide::Left).feedback;
    assert_eq!(feedback.integral, 0.0);
    assert_eq!(feedback.output, 0.0);
    assert_eq!(
        feedback_events(&controller),
        [FeedbackResetPolicy::ResetOnExit]
    );
}

#[test]
fn retain_policy_keeps_the_integral() {
    let mut config = ControllerConfig::new();
    config.feedback.reset_policy = FeedbackResetPolicy::Retain;
    let mut engine = Engine::new(0, 3_000, 40.0);
    let mut controller = running(&mut engine, config);
    engine.run(&mut controller, 3_000, RUNNING);

    engine.silent[ShaftId::LeftCam.index()] = true;
    let integral = run_until_fault(&mut engine, &mut controller);
    assert!(integral > 0.0);
    assert_eq!(
        controller.diagnostics().cam(CamSide::Left).feedback.integral,
        integral
    );
    assert_eq!(feedback_events(&controller), [FeedbackResetPolicy::Retain]);
}

#[test]
fn fault_history_is_capped() {
    let mut config = ControllerConfig::new();
    config.calibration_revolutions = 10;
    let mut engine = Engine::new(0, 3_000, 40.0);
    let mut controller = running(&mut engine, config);

    for round in 0..150 {
        let glitch = PulseEvent::new(ShaftId::Crank, Edge::Rising, engine.now()).with_flags(
            CaptureFlags {
                overflow: false,
                overrun: true,
            },
        );
        controller
            .inbox_mut()
            .try_enqueue(glitch)
            .expect("queue has room");
        let output = engine.step(&mut controller, RUNNING);
        assert_eq!(output.faults.as_slice(), &[Fault::Overrun(ShaftId::Crank)]);

        engine
            .run_until(&mut controller, 2_000, RUNNING, |c| c.mode() == Mode::Running)
            .unwrap_or_else(|| panic!("round {round} never recovered"));
    }

    let diagnostics = controller.diagnostics();
    assert_eq!(diagnostics.error_count, 150);
    assert_eq!(diagnostics.faults.len(), FAULT_HISTORY_CAPACITY);
    assert_eq!(diagnostics.faults[0].index, 1);
    assert_eq!(diagnostics.faults[FAULT_HISTORY_CAPACITY - 1].index, 100);
}

#[test]
fn full_edge_queue_flags_the_edge_after_the_gap() {
    let mut controller = controller(ControllerConfig::new());
    let inputs = TickInputs::new(20.0, 0.0);
    let mut timestamp = 1_000;
    let mut edge = Edge::Falling;
    let error = loop {
        if let Err(error) = controller.on_pulse_edge(ShaftId::LeftCam, edge, timestamp) {
            break error;
        }
        edge = edge.opposite();
        timestamp += 5 * TICKS_PER_MS;
        assert!(timestamp < 1_000_000, "queue never filled");
    };
    assert_eq!(error, EdgeQueueError::Full(ShaftId::LeftCam));

    let output = controller.tick(timestamp, inputs);
    assert!(output.faults.is_empty(), "queued edges predate the loss");

    // `edge` was dropped, so the next capture repeats the last delivered level.
    timestamp += 5 * TICKS_PER_MS;
    controller
        .on_pulse_edge(ShaftId::LeftCam, edge.opposite(), timestamp)
        .expect("queue drained by the tick");
    let output = controller.tick(timestamp, inputs);
    assert_eq!(output.faults.as_slice(), &[Fault::Overrun(ShaftId::LeftCam)]);

    let diagnostics = controller.diagnostics();
    assert_eq!(diagnostics.initialization_error_count, 1);
    assert_eq!(diagnostics.shaft(ShaftId::LeftCam).noise, 0);
}
