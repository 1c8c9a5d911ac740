//! Simulated engine: crank and exhaust cam sensors plus the solenoid plant.
//!
//! The crank reference fires once per cam revolution (two crank revolutions)
//! and each exhaust cam produces two pulses per revolution. All sensors are
//! active low. Solenoid duty advances the cams through a first-order lag.

use avcs_core::capture::{CamSide, Edge, EdgeQueueError, ShaftId};
use avcs_core::controller::{Controller, TickOutput};

/// Capture ticks per simulated millisecond.
pub const TICKS_PER_MS: u32 = 1_000;

/// Mechanical cam timing with the solenoids off, in cam degrees after the
/// crank reference. Close to the factory baselines.
pub const DEFAULT_CAM_PHASE: [f32; 2] = [131.0, 41.0];

/// Steady-state cam advance per percent of solenoid duty.
pub const PLANT_GAIN: f32 = 0.4;

const PLANT_TIME_CONSTANT_MS: f32 = 50.0;
const HALF_RANGE: u32 = 1 << 31;

#[derive(Copy, Clone, Debug)]
struct ScheduledEdge {
    timestamp: u32,
    shaft: ShaftId,
    edge: Edge,
}

/// Pulse-train generator driving a controller's edge queue.
pub struct SimulatedEngine {
    rpm: u32,
    cam_phase: [f32; 2],
    advance: [f32; 2],
    silent_until: [Option<u32>; 3],
    last_edge: [Option<Edge>; 3],
    now: u32,
    next_cycle: u32,
    pending: Vec<ScheduledEdge>,
}

impl SimulatedEngine {
    pub fn new(start: u32, rpm: u32) -> Self {
        Self {
            rpm,
            cam_phase: DEFAULT_CAM_PHASE,
            advance: [0.0; 2],
            silent_until: [None; 3],
            last_edge: [None; 3],
            now: start,
            next_cycle: start.wrapping_add(TICKS_PER_MS),
            pending: Vec::new(),
        }
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Changes speed from the next crank reference on. Zero stops the engine.
    pub fn set_rpm(&mut self, rpm: u32) {
        if self.rpm == 0 && rpm > 0 {
            self.next_cycle = self.now.wrapping_add(TICKS_PER_MS);
        }
        self.rpm = rpm;
    }

    pub fn cam_phase(&self, side: CamSide) -> f32 {
        self.cam_phase[side.index()]
    }

    pub fn set_cam_phase(&mut self, side: CamSide, degrees: f32) {
        self.cam_phase[side.index()] = degrees;
    }

    /// Advance the solenoid currently holds on `side`.
    pub fn advance(&self, side: CamSide) -> f32 {
        self.advance[side.index()]
    }

    /// Suppresses a sensor's output for `millis`.
    pub fn drop_sensor(&mut self, shaft: ShaftId, millis: u32) {
        let until = self.now.wrapping_add(millis.saturating_mul(TICKS_PER_MS));
        self.silent_until[shaft.index()] = Some(until);
    }

    /// Repeats the last edge a sensor produced, as a bouncing contact would.
    ///
    /// Returns `false` when the sensor has not produced an edge yet.
    pub fn glitch(&mut self, shaft: ShaftId) -> bool {
        let Some(edge) = self.last_edge[shaft.index()] else {
            return false;
        };
        self.pending.push(ScheduledEdge {
            timestamp: self.now.wrapping_add(1),
            shaft,
            edge,
        });
        true
    }

    /// Ticks per crank reference cycle, or `None` while stopped.
    fn cycle_ticks(&self) -> Option<u32> {
        (self.rpm > 0).then(|| 120_000_000 / self.rpm)
    }

    fn due(&self, timestamp: u32) -> bool {
        self.now.wrapping_sub(timestamp) < HALF_RANGE
    }

    fn is_silent(&self, shaft: ShaftId, timestamp: u32) -> bool {
        self.silent_until[shaft.index()].is_some_and(|until| {
            let remaining = until.wrapping_sub(timestamp);
            remaining != 0 && remaining < HALF_RANGE
        })
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn schedule_cycle(&mut self, cycle: u32) {
        let start = self.next_cycle;
        let width = cycle / 36;
        let mut push = |timestamp: u32, shaft: ShaftId| {
            self.pending.push(ScheduledEdge {
                timestamp,
                shaft,
                edge: Edge::Falling,
            });
            self.pending.push(ScheduledEdge {
                timestamp: timestamp.wrapping_add(width),
                shaft,
                edge: Edge::Rising,
            });
        };

        push(start, ShaftId::Crank);
        for side in CamSide::BOTH {
            let degrees = (self.cam_phase[side.index()] + self.advance[side.index()])
                .rem_euclid(180.0);
            let offset = (degrees / 360.0 * cycle as f32) as u32;
            push(start.wrapping_add(offset), side.shaft());
            push(start.wrapping_add(offset + cycle / 2), side.shaft());
        }

        self.next_cycle = start.wrapping_add(cycle);
    }

    /// Advances one millisecond and hands every edge that came due to the
    /// controller. Queue overflows are returned; the controller reports them
    /// as overruns on its own.
    pub fn step(&mut self, controller: &mut Controller) -> Vec<EdgeQueueError> {
        self.now = self.now.wrapping_add(TICKS_PER_MS);
        while let Some(cycle) = self.cycle_ticks() {
            if !self.due(self.next_cycle) {
                break;
            }
            self.schedule_cycle(cycle);
        }

        let origin = self.now.wrapping_sub(HALF_RANGE);
        self.pending
            .sort_by_key(|scheduled| scheduled.timestamp.wrapping_sub(origin));
        let due = self
            .pending
            .iter()
            .take_while(|scheduled| self.due(scheduled.timestamp))
            .count();

        let mut errors = Vec::new();
        let delivered: Vec<ScheduledEdge> = self.pending.drain(..due).collect();
        for scheduled in delivered {
            if self.is_silent(scheduled.shaft, scheduled.timestamp) {
                continue;
            }
            self.last_edge[scheduled.shaft.index()] = Some(scheduled.edge);
            if let Err(error) =
                controller.on_pulse_edge(scheduled.shaft, scheduled.edge, scheduled.timestamp)
            {
                errors.push(error);
            }
        }
        errors
    }

    /// Moves each cam toward the advance its solenoid duty commands.
    pub fn apply_duty(&mut self, output: &TickOutput) {
        for side in CamSide::BOTH {
            let advance = &mut self.advance[side.index()];
            *advance += (PLANT_GAIN * output.duty(side) - *advance) / PLANT_TIME_CONSTANT_MS;
        }
    }
}
