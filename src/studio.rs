//! Studio output paths.
//!
//! Immediate output (preview notes, channel setup, single controllers) is
//! produced into a flat [`EventList`] and forwarded to the transport over a
//! bounded channel. If the transport falls behind, events are dropped and
//! counted rather than blocking the caller.
//!
//! Playback streams (segment feeders, the metronome) each write into their
//! own lock-free [`EventProducer`]; the transport drains all of them at once,
//! ordered by time.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use segno_channels::{
    insert_channel_setup, insert_controller, preview_filler, ControllerSnapshot, DeviceId,
    Instrument, MidiDevice, PoolConfig,
};
use segno_midi::{
    event_channel_with_capacity, ChannelId, EventAggregator, EventList, EventProducer, RealTime,
    ScheduledEvent,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// Default capacity of the output channel.
const OUTPUT_CAPACITY: usize = 1024;

pub struct StudioBuilder {
    capacity: usize,
    devices: Vec<(String, PoolConfig)>,
}

impl Default for StudioBuilder {
    fn default() -> Self {
        Self {
            capacity: OUTPUT_CAPACITY,
            devices: Vec::new(),
        }
    }
}

impl StudioBuilder {
    /// Events buffered before output starts dropping.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn device(mut self, name: impl Into<String>, config: PoolConfig) -> Self {
        self.devices.push((name.into(), config));
        self
    }

    /// Returns the studio and the receiving end the transport drains.
    pub fn build(self) -> Result<(Studio, Receiver<ScheduledEvent>)> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let studio = Studio {
            devices: RwLock::new(Vec::new()),
            next_device: AtomicU32::new(0),
            tx,
            dropped: AtomicU64::new(0),
            scheduled: EventAggregator::new(),
        };
        for (name, config) in self.devices {
            studio.add_device(name, config)?;
        }
        Ok((studio, rx))
    }
}

pub struct Studio {
    devices: RwLock<Vec<Arc<MidiDevice>>>,
    next_device: AtomicU32,
    tx: Sender<ScheduledEvent>,
    dropped: AtomicU64,
    scheduled: EventAggregator,
}

impl Studio {
    pub fn builder() -> StudioBuilder {
        StudioBuilder::default()
    }

    pub fn add_device(&self, name: impl Into<String>, config: PoolConfig) -> Result<Arc<MidiDevice>> {
        let id = self.next_device.fetch_add(1, Ordering::Relaxed);
        let device = MidiDevice::new(id, name, config)?;
        self.devices.write().push(Arc::clone(&device));
        Ok(device)
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<MidiDevice>> {
        self.devices.read().iter().find(|d| d.id() == id).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<MidiDevice>> {
        self.devices.read().clone()
    }

    /// Destroy a device; managers bound to its instruments become unbound.
    pub fn remove_device(&self, id: DeviceId) -> Result<()> {
        let device = {
            let mut devices = self.devices.write();
            let index = devices
                .iter()
                .position(|d| d.id() == id)
                .ok_or(Error::UnknownDevice(id))?;
            devices.remove(index)
        };
        device.destroy();
        Ok(())
    }

    /// Events dropped because the output channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A lock-free sink for one playback stream. Events pushed while the
    /// ring is full are dropped and counted by the producer.
    pub fn event_producer(&self, capacity: usize) -> EventProducer {
        let (producer, consumer) = event_channel_with_capacity(capacity.max(1));
        self.scheduled.add_consumer(consumer);
        producer
    }

    /// Everything the playback streams produced since the last drain,
    /// ordered by time.
    pub fn drain_scheduled(&self) -> Vec<ScheduledEvent> {
        self.scheduled.drain_sorted()
    }

    /// Forward a list to the transport in insertion order. Returns the number
    /// of events sent.
    pub fn send_events(&self, events: EventList) -> Result<usize> {
        let mut sent = 0;
        for event in events.into_events() {
            match self.tx.try_send(event) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => return Err(Error::Disconnected),
            }
        }
        if sent > 0 {
            tracing::trace!("Studio: sent {} events", sent);
        }
        Ok(sent)
    }

    /// Play a note now on `instrument` through the shared preview channel.
    /// Returns `Ok(false)` if no channel was available.
    pub fn play_preview_note(
        &self,
        instrument: Arc<dyn Instrument>,
        pitch: u8,
        velocity: u8,
        duration: RealTime,
        one_shot: bool,
    ) -> Result<bool> {
        let mut events = EventList::new();
        let played = preview_filler().lock().fill_with_note(
            &mut events,
            instrument,
            pitch,
            velocity,
            duration,
            one_shot,
        )?;
        self.send_events(events)?;
        Ok(played)
    }

    /// Send bank/program, controller reset, the instrument's controllers and
    /// pitch bend on `channel` immediately.
    pub fn send_channel_setup(&self, instrument: &dyn Instrument, channel: ChannelId) -> Result<usize> {
        let mut events = EventList::new();
        let snapshot = ControllerSnapshot::from_instrument(instrument);
        insert_channel_setup(
            &mut events,
            instrument,
            channel,
            RealTime::ZERO,
            RealTime::ZERO,
            &snapshot,
            None,
        );
        tracing::debug!("Sending channel {} setup for instrument {}", channel, instrument.id());
        self.send_events(events)
    }

    /// A single controller, for fixed-channel instruments.
    pub fn send_controller(&self, channel: ChannelId, control: u8, value: u8) -> Result<()> {
        let mut events = EventList::new();
        insert_controller(
            &mut events,
            channel,
            RealTime::ZERO,
            RealTime::ZERO,
            control,
            value,
            None,
        );
        self.send_events(events).map(|_| ())
    }
}

impl std::fmt::Debug for Studio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studio")
            .field("devices", &self.devices.read().len())
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segno_channels::InstrumentSettings;
    use segno_midi::EventKind;

    #[test]
    fn test_send_controller() {
        let (studio, rx) = Studio::builder().build().unwrap();
        studio.send_controller(4, 64, 127).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.channel, Some(4));
        assert_eq!(event.kind(), EventKind::ControlChange { control: 64, value: 127 });
    }

    #[test]
    fn test_full_output_drops() {
        let (studio, rx) = Studio::builder().capacity(2).build().unwrap();
        studio.send_controller(0, 1, 1).unwrap();
        studio.send_controller(0, 1, 2).unwrap();
        studio.send_controller(0, 1, 3).unwrap();
        assert_eq!(studio.dropped_events(), 1);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_playback_streams_drain_in_time_order() {
        let (studio, _rx) = Studio::builder().build().unwrap();
        let mut clicks = studio.event_producer(16);
        let mut notes = studio.event_producer(16);

        clicks.push(ScheduledEvent::note_on(RealTime::from_millis(500), 37, 100).on_channel(1));
        notes.push(ScheduledEvent::note_on(RealTime::from_millis(250), 60, 90).on_channel(0));
        clicks.push(ScheduledEvent::note_on(RealTime::ZERO, 37, 120).on_channel(1));

        let drained = studio.drain_scheduled();
        let times: Vec<_> = drained.iter().map(|e| e.time.as_nanos() / 1_000_000).collect();
        assert_eq!(times, vec![0, 250, 500]);
        assert!(studio.drain_scheduled().is_empty());
    }

    #[test]
    fn test_disconnected() {
        let (studio, rx) = Studio::builder().build().unwrap();
        drop(rx);
        assert_eq!(studio.send_controller(0, 7, 100), Err(Error::Disconnected));
    }

    #[test]
    fn test_channel_setup() {
        let (studio, rx) = Studio::builder()
            .device("Synth", PoolConfig::default())
            .build()
            .unwrap();
        let device = studio.device(0).unwrap();
        let piano = device.add_instrument(InstrumentSettings::default()).unwrap();

        let sent = studio.send_channel_setup(piano.as_ref(), 2).unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(sent, events.len());
        assert_eq!(events[2].kind(), EventKind::ResetAllControllers);
        assert!(events.iter().all(|e| e.channel == Some(2) && e.time == RealTime::ZERO));
    }
}
