//! Controller event log kept in a fixed-size ring buffer.
//!
//! The controller writes a record for every mode change, fault, and feedback
//! reset. Firmware and the emulator drain new records by id after each tick and
//! forward them to defmt or the console; nothing here formats for a specific
//! transport.

use core::fmt;

use heapless::HistoryBuf;

use crate::config::FeedbackResetPolicy;
use crate::fault::Fault;
use crate::supervisor::ModeTransition;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Identifier assigned to each record, wrapping at `u32::MAX`.
pub type EventId = u32;

/// Something worth telling the operator about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEvent {
    ModeChanged(ModeTransition),
    FaultRaised(Fault),
    /// Every tracker countdown was refilled after a fault.
    CalibrationRestarted,
    /// PID state was handled according to the policy on leaving `Running`.
    FeedbackReset(FeedbackResetPolicy),
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::ModeChanged(transition) => write!(f, "mode {transition}"),
            TelemetryEvent::FaultRaised(fault) => write!(f, "fault {fault}"),
            TelemetryEvent::CalibrationRestarted => f.write_str("calibration restarted"),
            TelemetryEvent::FeedbackReset(FeedbackResetPolicy::ResetOnExit) => {
                f.write_str("feedback reset")
            }
            TelemetryEvent::FeedbackReset(FeedbackResetPolicy::Retain) => {
                f.write_str("feedback retained")
            }
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: u32,
    pub event: TelemetryEvent,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Appends an event, evicting the oldest record when full.
    pub fn record(&mut self, event: TelemetryEvent, timestamp: u32) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
        });
        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Records with an id at or after `cursor`, oldest first.
    ///
    /// Pass [`TelemetryRecorder::next_event_id`] from the previous drain as the
    /// cursor to see each record exactly once.
    pub fn since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        let outstanding = self.next_event_id.wrapping_sub(cursor);
        self.oldest_first()
            .filter(move |record| self.next_event_id.wrapping_sub(record.id) <= outstanding)
    }

    /// Id the next record will receive.
    #[must_use]
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
