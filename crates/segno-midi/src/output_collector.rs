//! Lock-free event hand-off from the scheduling thread to the transport.

use crate::event::ScheduledEvent;
use crate::sink::EventSink;
use crate::time::RealTime;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

const DEFAULT_CAPACITY: usize = 1024;

/// Producer side -- push scheduled events from the time-critical context.
pub struct EventProducer {
    producer: HeapProd<ScheduledEvent>,
    dropped: u64,
}

impl EventProducer {
    /// Returns `false` if the ring buffer is full.
    #[inline]
    pub fn push(&mut self, event: ScheduledEvent) -> bool {
        if self.producer.try_push(event).is_ok() {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Events refused because the buffer was full.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for EventProducer {
    fn insert(&mut self, _ref_time: RealTime, event: ScheduledEvent) {
        if !self.push(event) {
            tracing::trace!("event ring full, dropped {:?}", event.kind());
        }
    }
}

/// Consumer side -- drain events on the transport thread.
pub struct EventConsumer {
    consumer: HeapCons<ScheduledEvent>,
}

impl EventConsumer {
    #[inline]
    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.consumer.try_pop()
    }

    pub fn drain_all(&mut self) -> Vec<ScheduledEvent> {
        let mut events = Vec::with_capacity(self.consumer.occupied_len());
        while let Some(event) = self.consumer.try_pop() {
            events.push(event);
        }
        events
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.consumer.is_empty()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.consumer.occupied_len()
    }
}

pub fn event_channel() -> (EventProducer, EventConsumer) {
    event_channel_with_capacity(DEFAULT_CAPACITY)
}

pub fn event_channel_with_capacity(capacity: usize) -> (EventProducer, EventConsumer) {
    let rb = HeapRb::new(capacity);
    let (producer, consumer) = rb.split();
    (
        EventProducer {
            producer,
            dropped: 0,
        },
        EventConsumer { consumer },
    )
}

/// Merges several consumers into one drain point for the transport.
pub struct EventAggregator {
    consumers: Mutex<Vec<EventConsumer>>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self {
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn add_consumer(&self, consumer: EventConsumer) {
        self.consumers.lock().push(consumer);
    }

    /// Drained events ordered by timestamp; stable within one producer.
    ///
    /// Uses `try_lock` so a concurrent registration never stalls the caller.
    pub fn drain_sorted(&self) -> Vec<ScheduledEvent> {
        let mut consumers = match self.consumers.try_lock() {
            Some(guard) => guard,
            None => return Vec::new(),
        };
        let mut all_events = Vec::new();
        for consumer in consumers.iter_mut() {
            all_events.extend(consumer.drain_all());
        }
        all_events.sort_by_key(|event| event.time);
        all_events
    }

    pub fn has_pending(&self) -> bool {
        match self.consumers.try_lock() {
            Some(consumers) => consumers.iter().any(|c| c.has_pending()),
            None => false,
        }
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_push_and_drain() {
        let (mut producer, mut consumer) = event_channel();
        producer.insert(
            RealTime::ZERO,
            ScheduledEvent::note_on(RealTime::ZERO, 60, 100).on_channel(0),
        );
        producer.insert(
            RealTime::ZERO,
            ScheduledEvent::note_off(RealTime::from_millis(500), 60).on_channel(0),
        );

        assert_eq!(consumer.pending_count(), 2);
        let events = consumer.drain_all();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_note_on());
        assert!(!consumer.has_pending());
    }

    #[test]
    fn test_capacity_overflow_counts_drops() {
        let (mut producer, _consumer) = event_channel_with_capacity(2);
        let event = ScheduledEvent::note_on(RealTime::ZERO, 60, 100);

        assert!(producer.push(event));
        assert!(producer.push(event));
        assert!(!producer.push(event));
        producer.insert(RealTime::ZERO, event);
        assert_eq!(producer.dropped(), 2);
    }

    #[test]
    fn test_aggregator_orders_by_time() {
        let aggregator = EventAggregator::new();
        let (mut metronome, cons1) = event_channel();
        let (mut segment, cons2) = event_channel();
        aggregator.add_consumer(cons1);
        aggregator.add_consumer(cons2);

        metronome.push(ScheduledEvent::note_on(RealTime::from_millis(20), 37, 100));
        segment.push(ScheduledEvent::note_on(RealTime::from_millis(10), 60, 100));

        assert!(aggregator.has_pending());
        let events = aggregator.drain_sorted();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].note(), Some(60));
        assert_eq!(events[1].note(), Some(37));
    }
}
