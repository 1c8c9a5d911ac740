#![allow(
    dead_code,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

//! Pulse-train generator standing in for a running engine.

use avcs_core::capture::{Edge, ShaftId};
use avcs_core::config::ControllerConfig;
use avcs_core::controller::{Controller, TickInputs, TickOutput};

pub const TICKS_PER_MS: u32 = 1_000;

const HALF_RANGE: u32 = 1 << 31;
const PLANT_TIME_CONSTANT_MS: f32 = 50.0;

/// Crank reference once per cam revolution, two cam pulses per revolution,
/// all active low.
pub struct Engine {
    pub rpm: u32,
    /// Mechanical cam timing after the crank reference, in cam degrees.
    pub cam_phase: [f32; 2],
    /// Phase advance per percent of solenoid duty; zero leaves the cams fixed.
    pub plant_gain: f32,
    /// Advance currently produced by each solenoid.
    pub advance: [f32; 2],
    /// Shafts whose sensor output is suppressed.
    pub silent: [bool; 3],
    now: u32,
    next_cycle: u32,
    pending: Vec<(u32, ShaftId, Edge)>,
}

impl Engine {
    pub fn new(start: u32, rpm: u32, cam_phase: f32) -> Self {
        Self {
            rpm,
            cam_phase: [cam_phase; 2],
            plant_gain: 0.0,
            advance: [0.0; 2],
            silent: [false; 3],
            now: start,
            next_cycle: start.wrapping_add(TICKS_PER_MS),
            pending: Vec::new(),
        }
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    /// Ticks per crank reference cycle (two crank revolutions).
    pub fn cycle_ticks(&self) -> u32 {
        120_000_000 / self.rpm
    }

    fn due(&self, timestamp: u32) -> bool {
        self.now.wrapping_sub(timestamp) < HALF_RANGE
    }

    fn schedule_cycle(&mut self) {
        let start = self.next_cycle;
        let cycle = self.cycle_ticks();
        let width = cycle / 36;

        self.pending.push((start, ShaftId::Crank, Edge::Falling));
        self.pending
            .push((start.wrapping_add(width), ShaftId::Crank, Edge::Rising));

        for (index, shaft) in [ShaftId::LeftCam, ShaftId::RightCam].into_iter().enumerate() {
            let degrees = self.cam_phase[index] + self.advance[index];
            let offset = (degrees / 360.0 * cycle as f32) as u32;
            for pulse in [offset, offset + cycle / 2] {
                let begin = start.wrapping_add(pulse);
                self.pending.push((begin, shaft, Edge::Falling));
                self.pending
                    .push((begin.wrapping_add(width), shaft, Edge::Rising));
            }
        }

        self.next_cycle = start.wrapping_add(cycle);
    }

    fn deliver(&mut self, controller: &mut Controller) {
        while self.due(self.next_cycle) {
            self.schedule_cycle();
        }

        let origin = self.now.wrapping_sub(HALF_RANGE);
        self.pending
            .sort_by_key(|(timestamp, _, _)| timestamp.wrapping_sub(origin));
        let due = self
            .pending
            .iter()
            .take_while(|(timestamp, _, _)| self.due(*timestamp))
            .count();

        for (timestamp, shaft, edge) in self.pending.drain(..due) {
            if self.silent[shaft.index()] {
                continue;
            }
            controller
                .on_pulse_edge(shaft, edge, timestamp)
                .expect("edge queue has room");
        }
    }

    /// Advances one millisecond and runs one controller tick.
    pub fn step(&mut self, controller: &mut Controller, inputs: TickInputs) -> TickOutput {
        self.now = self.now.wrapping_add(TICKS_PER_MS);
        self.deliver(controller);
        let output = controller.tick(self.now, inputs);

        for (index, advance) in self.advance.iter_mut().enumerate() {
            let duty = if index == 0 {
                output.left_duty
            } else {
                output.right_duty
            };
            *advance += (self.plant_gain * duty - *advance) / PLANT_TIME_CONSTANT_MS;
        }
        output
    }

    /// Runs for `millis` and returns every fault raised on the way.
    pub fn run(
        &mut self,
        controller: &mut Controller,
        millis: u32,
        inputs: TickInputs,
    ) -> Vec<avcs_core::fault::Fault> {
        let mut faults = Vec::new();
        for _ in 0..millis {
            let output = self.step(controller, inputs);
            faults.extend(output.faults.iter().copied());
        }
        faults
    }

    /// Runs until `done` holds or `limit_ms` passes; returns the elapsed time.
    pub fn run_until<F>(
        &mut self,
        controller: &mut Controller,
        limit_ms: u32,
        inputs: TickInputs,
        mut done: F,
    ) -> Option<u32>
    where
        F: FnMut(&Controller) -> bool,
    {
        for elapsed in 1..=limit_ms {
            self.step(controller, inputs);
            if done(controller) {
                return Some(elapsed);
            }
        }
        None
    }
}

pub fn controller(config: ControllerConfig) -> Controller {
    Controller::with_edge_queue(config).expect("test configuration is valid")
}

pub fn within_percent(actual: f32, expected: f32, percent: f32) -> bool {
    (actual - expected).abs() <= expected.abs() * percent / 100.0
}
