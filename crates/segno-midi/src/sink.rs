//! Abstract event sink and the in-memory event list.

use crate::event::ScheduledEvent;
use crate::time::RealTime;

/// Receives a flat, ordered sequence of scheduled events.
///
/// `ref_time` is the logical insertion reference of the producing call. Sinks
/// may use it for relative bookkeeping but must preserve insertion order.
pub trait EventSink {
    fn insert(&mut self, ref_time: RealTime, event: ScheduledEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn insert(&mut self, ref_time: RealTime, event: ScheduledEvent) {
        (**self).insert(ref_time, event)
    }
}

/// Ordered in-memory sink, one entry per inserted event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventList {
    entries: Vec<(RealTime, ScheduledEvent)>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &ScheduledEvent> + '_ {
        self.entries.iter().map(|(_, event)| event)
    }

    /// `(ref_time, event)` pairs in insertion order.
    pub fn entries(&self) -> &[(RealTime, ScheduledEvent)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn into_events(self) -> Vec<ScheduledEvent> {
        self.entries.into_iter().map(|(_, event)| event).collect()
    }

    /// Append another list, keeping both orders.
    pub fn append(&mut self, other: &mut EventList) {
        self.entries.append(&mut other.entries);
    }
}

impl EventSink for EventList {
    fn insert(&mut self, ref_time: RealTime, event: ScheduledEvent) {
        self.entries.push((ref_time, event));
    }
}

impl EventSink for Vec<ScheduledEvent> {
    fn insert(&mut self, _ref_time: RealTime, event: ScheduledEvent) {
        self.push(event);
    }
}
