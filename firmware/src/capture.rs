#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Edge hand-off between the EXTI tasks and the control loop.
//!
//! Each shaft gets its own bounded channel. Edge tasks publish without
//! waiting; when a channel is full the edge is dropped and the shaft is marked
//! so the next edge that fits carries the overrun flag.

use avcs_core::capture::{
    EDGE_QUEUE_DEPTH, EdgeQueueConsumer, EdgeQueueError, PulseEvent, ShaftId, classify_pin_samples,
};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Bounded channel carrying one shaft's edges.
pub type EdgeChannel<M> = Channel<M, PulseEvent, EDGE_QUEUE_DEPTH>;

/// Per-shaft edge channels shared between the edge tasks and the control loop.
pub struct EdgeChannels<M: RawMutex> {
    channels: [EdgeChannel<M>; 3],
    overrun: [AtomicBool; 3],
    ambiguous: [AtomicU32; 3],
}

impl<M: RawMutex> EdgeChannels<M> {
    pub const fn new() -> Self {
        Self {
            channels: [Channel::new(), Channel::new(), Channel::new()],
            overrun: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
            ambiguous: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// Queues an edge for the control loop without waiting.
    ///
    /// Each shaft has a single publishing task, so the overrun mark is only
    /// read and written from that task.
    pub fn publish(&self, mut event: PulseEvent) -> Result<(), EdgeQueueError> {
        let index = event.shaft.index();
        let overrun = &self.overrun[index];
        event.flags.overrun |= overrun.load(Ordering::Acquire);
        match self.channels[index].try_send(event) {
            Ok(()) => {
                overrun.store(false, Ordering::Release);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                overrun.store(true, Ordering::Release);
                Err(EdgeQueueError::Full(event.shaft))
            }
        }
    }

    /// Classifies a burst of pin reads taken right after an interrupt and
    /// publishes the resulting edge.
    ///
    /// Bursts that do not settle on a level are counted and dropped.
    pub fn publish_sampled<I>(
        &self,
        shaft: ShaftId,
        timestamp: u32,
        samples: I,
    ) -> Result<(), EdgeQueueError>
    where
        I: IntoIterator<Item = bool>,
    {
        match classify_pin_samples(samples).edge() {
            Some(edge) => self.publish(PulseEvent::new(shaft, edge, timestamp)),
            None => {
                self.ambiguous[shaft.index()].fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Interrupt bursts dropped because the pin never settled.
    pub fn ambiguous_bursts(&self, shaft: ShaftId) -> u32 {
        self.ambiguous[shaft.index()].load(Ordering::Relaxed)
    }

    /// Consumer view handed to the controller.
    pub const fn inbox(&self) -> ChannelInbox<'_, M> {
        ChannelInbox { channels: self }
    }
}

impl<M: RawMutex> Default for EdgeChannels<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-loop side of [`EdgeChannels`].
pub struct ChannelInbox<'a, M: RawMutex> {
    channels: &'a EdgeChannels<M>,
}

impl<M: RawMutex> EdgeQueueConsumer for ChannelInbox<'_, M> {
    fn try_dequeue(&mut self, shaft: ShaftId) -> Option<PulseEvent> {
        self.channels.channels[shaft.index()].try_receive().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avcs_core::capture::Edge;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn edges_are_delivered_per_shaft_in_order() {
        let channels = EdgeChannels::<NoopRawMutex>::new();
        channels
            .publish(PulseEvent::new(ShaftId::LeftCam, Edge::Falling, 10))
            .unwrap();
        channels
            .publish(PulseEvent::new(ShaftId::LeftCam, Edge::Rising, 20))
            .unwrap();

        let mut inbox = channels.inbox();
        assert!(inbox.try_dequeue(ShaftId::Crank).is_none());
        assert_eq!(inbox.try_dequeue(ShaftId::LeftCam).unwrap().timestamp, 10);
        assert_eq!(inbox.try_dequeue(ShaftId::LeftCam).unwrap().timestamp, 20);
        assert!(inbox.try_dequeue(ShaftId::LeftCam).is_none());
    }

    #[test]
    fn full_channel_flags_the_first_edge_after_the_gap() {
        let channels = EdgeChannels::<NoopRawMutex>::new();
        for tick in 0..16 {
            channels
                .publish(PulseEvent::new(ShaftId::Crank, Edge::Falling, tick))
                .unwrap();
        }
        assert_eq!(
            channels.publish(PulseEvent::new(ShaftId::Crank, Edge::Rising, 99)),
            Err(EdgeQueueError::Full(ShaftId::Crank))
        );

        let mut inbox = channels.inbox();
        let oldest = inbox.try_dequeue(ShaftId::Crank).unwrap();
        assert!(oldest.flags.is_clear());

        channels
            .publish(PulseEvent::new(ShaftId::Crank, Edge::Falling, 100))
            .unwrap();
        let delivered: Vec<_> = core::iter::from_fn(|| inbox.try_dequeue(ShaftId::Crank))
            .filter(|event| event.flags.overrun)
            .map(|event| event.timestamp)
            .collect();
        assert_eq!(delivered, [100]);
    }

    #[test]
    fn unsettled_bursts_are_counted_not_published() {
        let channels = EdgeChannels::<NoopRawMutex>::new();
        let noisy = (0..50).map(|sample| sample % 2 == 0);
        channels
            .publish_sampled(ShaftId::RightCam, 5, noisy)
            .unwrap();
        channels
            .publish_sampled(ShaftId::RightCam, 6, core::iter::repeat_n(true, 50))
            .unwrap();

        assert_eq!(channels.ambiguous_bursts(ShaftId::RightCam), 1);
        let event = channels.inbox().try_dequeue(ShaftId::RightCam).unwrap();
        assert_eq!((event.edge, event.timestamp), (Edge::Rising, 6));
    }
}
