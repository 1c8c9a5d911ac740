#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Forwards controller telemetry to defmt on the target and stdout on the host.
//!
//! The controller keeps its own ring of events; this module only remembers
//! how far it has read so each record is logged once.

use avcs_core::telemetry::{EventId, TelemetryEvent, TelemetryRecord, TelemetryRecorder};

use crate::status::StatusSnapshot;

/// Log severity chosen per event kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warn,
}

/// Severity an event is logged at.
pub const fn severity(event: &TelemetryEvent) -> Severity {
    match event {
        TelemetryEvent::FaultRaised(_) => Severity::Warn,
        TelemetryEvent::ModeChanged(_)
        | TelemetryEvent::CalibrationRestarted
        | TelemetryEvent::FeedbackReset(_) => Severity::Info,
    }
}

/// Read cursor over a [`TelemetryRecorder`].
#[derive(Debug, Default)]
pub struct TelemetryDrain {
    cursor: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Logs every record added since the previous drain and returns how many
    /// were emitted.
    pub fn drain<const N: usize>(&mut self, recorder: &TelemetryRecorder<N>) -> usize {
        let emitted = recorder.since(self.cursor).fold(0, |emitted, record| {
            log_record(record);
            emitted + 1
        });
        self.cursor = recorder.next_event_id();
        emitted
    }
}

fn log_record(record: &TelemetryRecord) {
    emit_log(severity(&record.event), record.timestamp, &record.event);
}

#[cfg(target_os = "none")]
fn emit_log(severity: Severity, timestamp: u32, event: &TelemetryEvent) {
    let event = defmt::Display2Format(event);
    match severity {
        Severity::Info => defmt::info!("telemetry t={}us {}", timestamp, event),
        Severity::Warn => defmt::warn!("telemetry t={}us {}", timestamp, event),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(severity: Severity, timestamp: u32, event: &TelemetryEvent) {
    let level = match severity {
        Severity::Info => "info",
        Severity::Warn => "warn",
    };
    println!("telemetry:{level} t={timestamp}us {event}");
}

/// Periodic one-line status report.
#[cfg(target_os = "none")]
pub fn log_status(status: &StatusSnapshot) {
    defmt::info!(
        "status {} rpm={} oil={} left={}deg/{}% right={}deg/{}% errors={} noise={}/{}/{}",
        defmt::Display2Format(&status.mode),
        status.crank_rpm,
        status.oil_temperature_c,
        status.cam_angle[0],
        status.cam_duty[0],
        status.cam_angle[1],
        status.cam_duty[1],
        status.error_count,
        status.ambiguous_bursts[0],
        status.ambiguous_bursts[1],
        status.ambiguous_bursts[2]
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_status(status: &StatusSnapshot) {
    println!(
        "status {} rpm={} oil={:?} left={:.1}deg/{:.0}% right={:.1}deg/{:.0}% errors={} noise={}/{}/{}",
        status.mode,
        status.crank_rpm,
        status.oil_temperature_c,
        status.cam_angle[0],
        status.cam_duty[0],
        status.cam_angle[1],
        status.cam_duty[1],
        status.error_count,
        status.ambiguous_bursts[0],
        status.ambiguous_bursts[1],
        status.ambiguous_bursts[2]
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use avcs_core::capture::ShaftId;
    use avcs_core::fault::Fault;

    #[test]
    fn drain_emits_each_record_once() {
        let mut recorder = TelemetryRecorder::<8>::new();
        let mut drain = TelemetryDrain::new();

        recorder.record(TelemetryEvent::CalibrationRestarted, 10);
        recorder.record(TelemetryEvent::FaultRaised(Fault::Timeout(ShaftId::Crank)), 20);
        assert_eq!(drain.drain(&recorder), 2);
        assert_eq!(drain.drain(&recorder), 0);

        recorder.record(TelemetryEvent::CalibrationRestarted, 30);
        assert_eq!(drain.drain(&recorder), 1);
    }

    #[test]
    fn faults_log_as_warnings() {
        assert_eq!(
            severity(&TelemetryEvent::FaultRaised(Fault::Timeout(ShaftId::LeftCam))),
            Severity::Warn
        );
        assert_eq!(
            severity(&TelemetryEvent::CalibrationRestarted),
            Severity::Info
        );
    }
}
