//! Pulse-edge capture records and the queue seam between interrupt and main-loop context.
//!
//! Capture handlers do nothing but timestamp an edge and push a [`PulseEvent`]
//! through an [`EdgeQueueProducer`]. Every bit of smoothing and state-machine
//! work happens later, when the controller drains the matching
//! [`EdgeQueueConsumer`] from the main loop. Per-shaft FIFO order is the only
//! ordering the queue promises.

use core::fmt;

use heapless::spsc::Queue;

/// Default per-shaft queue depth used by [`EdgeQueue`].
pub const EDGE_QUEUE_DEPTH: usize = 16;

/// Number of pin reads in a classification burst.
pub const PIN_SAMPLE_COUNT: u32 = 50;

/// Monitored shafts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShaftId {
    Crank,
    LeftCam,
    RightCam,
}

impl ShaftId {
    /// Every monitored shaft, in index order.
    pub const ALL: [ShaftId; 3] = [ShaftId::Crank, ShaftId::LeftCam, ShaftId::RightCam];

    /// Stable index used for per-shaft arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            ShaftId::Crank => 0,
            ShaftId::LeftCam => 1,
            ShaftId::RightCam => 2,
        }
    }

    /// Returns the cam side for cam shafts.
    #[must_use]
    pub const fn cam_side(self) -> Option<CamSide> {
        match self {
            ShaftId::Crank => None,
            ShaftId::LeftCam => Some(CamSide::Left),
            ShaftId::RightCam => Some(CamSide::Right),
        }
    }
}

impl fmt::Display for ShaftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaftId::Crank => f.write_str("Crank"),
            ShaftId::LeftCam => f.write_str("Left Cam"),
            ShaftId::RightCam => f.write_str("Right Cam"),
        }
    }
}

/// Exhaust cam bank.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CamSide {
    Left,
    Right,
}

impl CamSide {
    /// Both banks, left first.
    pub const BOTH: [CamSide; 2] = [CamSide::Left, CamSide::Right];

    /// Shaft carrying this bank's cam sensor.
    #[must_use]
    pub const fn shaft(self) -> ShaftId {
        match self {
            CamSide::Left => ShaftId::LeftCam,
            CamSide::Right => ShaftId::RightCam,
        }
    }

    /// Stable index used for per-bank arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            CamSide::Left => 0,
            CamSide::Right => 1,
        }
    }
}

impl fmt::Display for CamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CamSide::Left => f.write_str("Left"),
            CamSide::Right => f.write_str("Right"),
        }
    }
}

/// Signal edge direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    /// The opposite transition.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Edge::Rising => Edge::Falling,
            Edge::Falling => Edge::Rising,
        }
    }
}

/// Status bits latched by the capture timer alongside a timestamp.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CaptureFlags {
    /// The capture counter wrapped between this edge and the previous one.
    pub overflow: bool,
    /// An earlier edge was latched over before it could be consumed.
    pub overrun: bool,
}

impl CaptureFlags {
    /// No status bits set.
    pub const NONE: Self = Self {
        overflow: false,
        overrun: false,
    };

    /// Returns `true` when neither status bit is set.
    #[must_use]
    pub const fn is_clear(self) -> bool {
        !self.overflow && !self.overrun
    }
}

/// One captured edge. Timestamps are free-running ticks that wrap at `2^32`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PulseEvent {
    pub shaft: ShaftId,
    pub edge: Edge,
    pub timestamp: u32,
    pub flags: CaptureFlags,
}

impl PulseEvent {
    /// Builds an event with clear status flags.
    #[must_use]
    pub const fn new(shaft: ShaftId, edge: Edge, timestamp: u32) -> Self {
        Self {
            shaft,
            edge,
            timestamp,
            flags: CaptureFlags::NONE,
        }
    }

    /// Attaches capture status flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: CaptureFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Error surfaced when an edge cannot be queued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeQueueError {
    /// The shaft's queue is at capacity; the edge was dropped.
    Full(ShaftId),
}

impl fmt::Display for EdgeQueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeQueueError::Full(shaft) => write!(f, "{shaft} edge queue full"),
        }
    }
}

/// Interrupt-side half of the edge queue.
pub trait EdgeQueueProducer {
    /// Queues an edge without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeQueueError::Full`] when the shaft's queue has no room.
    /// Implementations must then flag the next event they accept for that
    /// shaft as overrun, so the flag marks the first edge after the gap.
    fn try_enqueue(&mut self, event: PulseEvent) -> Result<(), EdgeQueueError>;
}

/// Main-loop half of the edge queue.
pub trait EdgeQueueConsumer {
    /// Pops the oldest pending edge for `shaft`.
    fn try_dequeue(&mut self, shaft: ShaftId) -> Option<PulseEvent>;
}

/// Three fixed-capacity SPSC rings, one per shaft, with sticky overrun tracking.
pub struct EdgeQueue<const N: usize = EDGE_QUEUE_DEPTH> {
    queues: [Queue<PulseEvent, N>; 3],
    overrun: [bool; 3],
}

impl<const N: usize> EdgeQueue<N> {
    /// Creates an empty queue set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queues: [Queue::new(), Queue::new(), Queue::new()],
            overrun: [false; 3],
        }
    }

    /// Number of edges waiting for `shaft`.
    #[must_use]
    pub fn pending(&self, shaft: ShaftId) -> usize {
        self.queues[shaft.index()].len()
    }
}

impl<const N: usize> Default for EdgeQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EdgeQueueProducer for EdgeQueue<N> {
    fn try_enqueue(&mut self, mut event: PulseEvent) -> Result<(), EdgeQueueError> {
        let index = event.shaft.index();
        event.flags.overrun |= self.overrun[index];
        match self.queues[index].enqueue(event) {
            Ok(()) => {
                self.overrun[index] = false;
                Ok(())
            }
            Err(_) => {
                self.overrun[index] = true;
                Err(EdgeQueueError::Full(event.shaft))
            }
        }
    }
}

impl<const N: usize> EdgeQueueConsumer for EdgeQueue<N> {
    fn try_dequeue(&mut self, shaft: ShaftId) -> Option<PulseEvent> {
        self.queues[shaft.index()].dequeue()
    }
}

/// Logic level decided from a burst of pin reads.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinLevel {
    High,
    Low,
    /// Too many disagreeing reads to trust either level.
    Ambiguous,
}

impl PinLevel {
    /// Edge that produced this level, if the level is trustworthy.
    #[must_use]
    pub const fn edge(self) -> Option<Edge> {
        match self {
            PinLevel::High => Some(Edge::Rising),
            PinLevel::Low => Some(Edge::Falling),
            PinLevel::Ambiguous => None,
        }
    }
}

/// Majority vote over a burst of pin reads.
///
/// With `n` samples the level is `High` when more than `n - n/4` reads were
/// high and `Low` when fewer than `n/4` were; anything in between is noise.
pub fn classify_pin_samples<I>(samples: I) -> PinLevel
where
    I: IntoIterator<Item = bool>,
{
    let (total, high) = samples
        .into_iter()
        .fold((0u32, 0u32), |(total, high), level| {
            (total + 1, high + u32::from(level))
        });
    let tolerance = total / 4;

    if total == 0 {
        PinLevel::Ambiguous
    } else if high > total - tolerance {
        PinLevel::High
    } else if high < tolerance {
        PinLevel::Low
    } else {
        PinLevel::Ambiguous
    }
}

/// Drops edges that repeat the previous level on the same shaft.
///
/// A glitch that bounces back before the handler samples the pin shows up as
/// two consecutive edges in the same direction; only the first is real.
#[derive(Clone, Debug, Default)]
pub struct EdgeFilter {
    last: [Option<Edge>; 3],
    rejected: [u32; 3],
}

impl EdgeFilter {
    /// Creates a filter that accepts the first edge on every shaft.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: [None; 3],
            rejected: [0; 3],
        }
    }

    /// Returns `true` if `edge` differs from the last accepted edge on `shaft`.
    pub fn accept(&mut self, shaft: ShaftId, edge: Edge) -> bool {
        let index = shaft.index();
        if self.last[index] == Some(edge) {
            self.rejected[index] = self.rejected[index].saturating_add(1);
            false
        } else {
            self.last[index] = Some(edge);
            true
        }
    }

    /// Forces the remembered level for `shaft`, e.g. after a flagged capture.
    pub fn resync(&mut self, shaft: ShaftId, edge: Edge) {
        self.last[shaft.index()] = Some(edge);
    }

    /// Number of edges rejected as noise on `shaft`.
    #[must_use]
    pub const fn rejected(&self, shaft: ShaftId) -> u32 {
        self.rejected[shaft.index()]
    }
}
