//! Channel manager: binds one sound stream to one output channel.
//!
//! A [`ChannelManager`] holds at most one channel lease on behalf of its bound
//! instrument, keeps it valid across a required time interval, and emits the
//! channel setup sequence exactly once before the first dependent event.
//!
//! All state lives behind one mutex. Instrument and pool notifications take
//! the same mutex, so they apply atomically relative to an in-flight
//! [`make_ready`](ChannelManager::make_ready) or
//! [`do_insert`](ChannelManager::do_insert). Notifications from a previous
//! binding or lease are recognised by epoch and ignored.

mod state;

pub use state::{AllocationMode, ChannelState};

use parking_lot::Mutex;
use segno_midi::{ChannelId, EventSink, RealTime, ScheduledEvent, TrackId};
use std::sync::{Arc, Weak};

use crate::dispatch::insert_channel_setup;
use crate::instrument::{Instrument, InstrumentEvent};
use crate::interval::{ChannelInterval, RequiredInterval};
use crate::notify::SubscriptionId;
use crate::pool::Vacated;
use crate::snapshot::ControllerSnapshot;
use state::{Allocation, Lease, LeaseOrigin};

struct Binding {
    instrument: Weak<dyn Instrument>,
    subscription: SubscriptionId,
    epoch: u64,
}

fn same_instrument(a: &Arc<dyn Instrument>, b: &Arc<dyn Instrument>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn mode_of(instrument: &dyn Instrument) -> AllocationMode {
    if instrument.has_fixed_channel() {
        AllocationMode::Fixed
    } else {
        AllocationMode::Pool
    }
}

struct ManagerInner {
    this: Weak<Mutex<ManagerInner>>,
    binding: Option<Binding>,
    mode: AllocationMode,
    allocation: Allocation,
    required: RequiredInterval,
    epoch: u64,
}

impl ManagerInner {
    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// The bound instrument. A binding whose instrument has gone away is
    /// dropped here, together with any lease it held.
    fn live_instrument(&mut self) -> Option<Arc<dyn Instrument>> {
        let binding = self.binding.as_ref()?;
        match binding.instrument.upgrade() {
            Some(instrument) => Some(instrument),
            None => {
                tracing::debug!("Bound instrument is gone, unbinding");
                self.free();
                self.binding = None;
                None
            }
        }
    }

    fn subscribe_instrument(&mut self, instrument: &Arc<dyn Instrument>) {
        let epoch = self.next_epoch();
        let this = self.this.clone();
        let subscription = instrument.subscribe(Arc::new(move |event: InstrumentEvent| {
            if let Some(inner) = this.upgrade() {
                inner.lock().on_instrument_event(epoch, event);
            }
        }));
        self.binding = Some(Binding {
            instrument: Arc::downgrade(instrument),
            subscription,
            epoch,
        });
    }

    fn unsubscribe_instrument(&mut self) {
        if let Some(binding) = self.binding.take() {
            if let Some(instrument) = binding.instrument.upgrade() {
                instrument.unsubscribe(binding.subscription);
            }
        }
    }

    fn bind(&mut self, instrument: Option<Arc<dyn Instrument>>) {
        if let (Some(new), Some(current)) = (&instrument, self.live_instrument()) {
            if same_instrument(new, &current) {
                self.unsubscribe_instrument();
                self.subscribe_instrument(new);
                let mode = mode_of(new.as_ref());
                if mode != self.mode {
                    self.free();
                    self.mode = mode;
                }
                tracing::trace!("Refreshed subscription to instrument {}", new.id());
                return;
            }
        }

        self.free();
        self.unsubscribe_instrument();
        match instrument {
            Some(instrument) => {
                self.mode = mode_of(instrument.as_ref());
                self.subscribe_instrument(&instrument);
                tracing::debug!(
                    "Bound to instrument {} on device {} ({:?})",
                    instrument.id(),
                    instrument.device_id(),
                    self.mode
                );
            }
            None => {
                self.mode = AllocationMode::Pool;
                tracing::debug!("Unbound");
            }
        }
    }

    /// Drop the held lease. Pool leases go back to the pool when
    /// `return_to_pool` is set; fixed leases are simply forgotten.
    fn drop_lease(&mut self, return_to_pool: bool) {
        let previous = std::mem::replace(&mut self.allocation, Allocation::NotAttempted);
        let Allocation::Held { lease, .. } = previous else {
            return;
        };
        if let LeaseOrigin::Pool { pool, vacate, .. } = &lease.origin {
            pool.unsubscribe_vacate(*vacate);
            if return_to_pool {
                pool.release(&lease.interval);
            }
        }
        tracing::debug!(
            "Dropped channel {} (returned: {})",
            lease.channel(),
            return_to_pool && lease.is_pool()
        );
    }

    fn free(&mut self) {
        self.drop_lease(true);
    }

    fn reallocate(&mut self, instrument_changed: bool) -> bool {
        let Some(instrument) = self.live_instrument() else {
            return false;
        };
        let mode = mode_of(instrument.as_ref());
        if mode != self.mode {
            tracing::debug!("Instrument {} switched to {:?}", instrument.id(), mode);
            self.free();
            self.mode = mode;
        }
        let (previous, was_ready) = match &self.allocation {
            Allocation::Held { lease, ready } => (Some(lease.channel()), *ready),
            _ => (None, false),
        };
        // Setup survives only on the same channel with unchanged settings.
        let keep_ready = |channel: ChannelId| {
            !instrument_changed && was_ready && previous == Some(channel)
        };

        match self.mode {
            AllocationMode::Fixed => {
                let channel = instrument.natural_channel();
                let was_fixed = matches!(self.allocation.lease(), Some(lease) if !lease.is_pool());
                self.free();
                self.allocation = Allocation::Held {
                    lease: Lease {
                        interval: ChannelInterval::eternal(channel),
                        origin: LeaseOrigin::Fixed,
                    },
                    ready: was_fixed && keep_ready(channel),
                };
                tracing::trace!("Using fixed channel {}", channel);
                true
            }
            AllocationMode::Pool => {
                let (start, end) = self.required.padded();
                if let Some(lease) = self.allocation.lease() {
                    if !instrument_changed && lease.is_pool() && lease.interval.covers(start, end) {
                        return true;
                    }
                }
                self.free();
                self.request(instrument.as_ref(), start, end, keep_ready)
            }
        }
    }

    fn request(
        &mut self,
        instrument: &dyn Instrument,
        start: RealTime,
        end: RealTime,
        keep_ready: impl Fn(ChannelId) -> bool,
    ) -> bool {
        let Some(pool) = instrument.channel_pool() else {
            tracing::debug!("Instrument {} has no channel pool", instrument.id());
            self.allocation = Allocation::Failed;
            return false;
        };

        // Subscribe first so a vacate racing the grant is not lost; it waits
        // on our lock, and the generation tells whether it predates the grant.
        let epoch = self.next_epoch();
        let this = self.this.clone();
        let vacate = pool.subscribe_vacate(Arc::new(move |notice: Vacated| {
            if let Some(inner) = this.upgrade() {
                inner.lock().on_vacate(epoch, notice);
            }
        }));

        match pool.request(start, end) {
            Some(grant) => {
                let interval = grant.interval;
                tracing::debug!(
                    "Allocated channel {} on device {} for [{}, {}]",
                    interval.channel(),
                    pool.device_id(),
                    interval.start(),
                    interval.end()
                );
                self.allocation = Allocation::Held {
                    ready: keep_ready(interval.channel()),
                    lease: Lease {
                        interval,
                        origin: LeaseOrigin::Pool {
                            pool,
                            vacate,
                            epoch,
                            generation: grant.generation,
                        },
                    },
                };
                true
            }
            None => {
                pool.unsubscribe_vacate(vacate);
                tracing::debug!(
                    "No channel available on device {} for [{}, {}]",
                    pool.device_id(),
                    start,
                    end
                );
                self.allocation = Allocation::Failed;
                false
            }
        }
    }

    fn make_ready<S: EventSink + ?Sized>(
        &mut self,
        sink: &mut S,
        ref_time: RealTime,
        insert_time: RealTime,
        snapshot: &ControllerSnapshot,
        track: Option<TrackId>,
        force_setup: bool,
    ) -> Option<ChannelId> {
        let instrument = self.live_instrument()?;
        if matches!(self.allocation, Allocation::NotAttempted) {
            self.reallocate(false);
        }
        let Allocation::Held { lease, ready } = &mut self.allocation else {
            return None;
        };
        let channel = lease.channel();
        if force_setup {
            *ready = false;
        }
        if !*ready {
            insert_channel_setup(
                sink,
                instrument.as_ref(),
                channel,
                ref_time,
                insert_time,
                snapshot,
                track,
            );
            *ready = true;
        }
        Some(channel)
    }

    fn on_vacate(&mut self, epoch: u64, notice: Vacated) {
        let revoked = matches!(
            self.allocation.lease(),
            Some(Lease {
                interval,
                origin: LeaseOrigin::Pool { epoch: e, generation, .. },
            }) if *e == epoch
                && interval.channel() == notice.channel
                && *generation < notice.generation
        );
        if !revoked {
            return;
        }
        // The pool has already dropped the lease.
        self.drop_lease(false);
        tracing::debug!("Channel {} vacated by the pool", notice.channel);
    }

    fn on_instrument_event(&mut self, epoch: u64, event: InstrumentEvent) {
        if self.binding.as_ref().map(|b| b.epoch) != Some(epoch) {
            tracing::trace!("Ignoring stale {:?} notification", event);
            return;
        }
        tracing::debug!("Instrument notification: {:?}", event);
        match event {
            InstrumentEvent::Changed => {
                if let Allocation::Held { ready, .. } = &mut self.allocation {
                    *ready = false;
                }
            }
            InstrumentEvent::BecameFixed => {
                self.free();
                self.mode = AllocationMode::Fixed;
            }
            InstrumentEvent::BecameUnfixed => {
                self.free();
                self.mode = AllocationMode::Pool;
            }
            InstrumentEvent::Destroyed => {
                self.free();
                self.binding = None;
                self.mode = AllocationMode::Pool;
            }
            InstrumentEvent::DeviceDestroyed => {
                self.drop_lease(false);
                self.binding = None;
                self.mode = AllocationMode::Pool;
            }
        }
    }

    fn state(&self) -> ChannelState {
        match &self.binding {
            Some(binding) if binding.instrument.strong_count() > 0 => self.allocation.state(),
            _ => ChannelState::Unbound,
        }
    }
}

/// Owner of at most one channel lease for one bound instrument.
pub struct ChannelManager {
    inner: Arc<Mutex<ManagerInner>>,
}

impl ChannelManager {
    /// Bound to `instrument`. Only a weak reference is kept; the caller owns
    /// the instrument.
    pub fn new(instrument: Arc<dyn Instrument>) -> Self {
        let manager = Self::unbound();
        manager.rebind(Some(instrument));
        manager
    }

    pub fn unbound() -> Self {
        let inner = Arc::new_cyclic(|this| {
            Mutex::new(ManagerInner {
                this: this.clone(),
                binding: None,
                mode: AllocationMode::Pool,
                allocation: Allocation::NotAttempted,
                required: RequiredInterval::default(),
                epoch: 0,
            })
        });
        Self { inner }
    }

    /// Release any held channel and bind to `instrument` (or to none).
    /// Rebinding the current instrument only refreshes the subscription.
    pub fn rebind(&self, instrument: Option<Arc<dyn Instrument>>) {
        self.inner.lock().bind(instrument);
    }

    /// Set the range the held channel must cover. Takes effect at the next
    /// allocation attempt; a held lease is never shrunk.
    pub fn set_required_interval(
        &self,
        start: RealTime,
        end: RealTime,
        start_margin: RealTime,
        end_margin: RealTime,
    ) {
        self.inner.lock().required = RequiredInterval::new(start, end, start_margin, end_margin);
    }

    pub fn set_eternal_interval(&self) {
        self.inner.lock().required = RequiredInterval::eternal();
    }

    pub fn required_interval(&self) -> RequiredInterval {
        self.inner.lock().required
    }

    /// Make sure a channel covering the required interval is held.
    ///
    /// In fixed mode the channel is derived from the instrument without
    /// contacting the pool. In pool mode a covering lease is kept; otherwise
    /// the pool is asked again, even if the last request was refused. Only
    /// the lazy path in [`make_ready`](Self::make_ready) and
    /// [`do_insert`](Self::do_insert) holds back after a refusal. A new
    /// channel or `instrument_changed` forces setup to be emitted again.
    ///
    /// Returns whether a channel is held.
    pub fn reallocate(&self, instrument_changed: bool) -> bool {
        self.inner.lock().reallocate(instrument_changed)
    }

    /// Allocate lazily if needed and emit channel setup at `time` if the
    /// channel is not set up yet. Dependent events must not be emitted when
    /// this returns `false`.
    pub fn make_ready<S: EventSink + ?Sized>(
        &self,
        sink: &mut S,
        time: RealTime,
        snapshot: &ControllerSnapshot,
        track: Option<TrackId>,
    ) -> bool {
        self.inner
            .lock()
            .make_ready(sink, time, time, snapshot, track, false)
            .is_some()
    }

    /// Forward `event` on the held channel, setting the channel up first.
    ///
    /// `first_output` marks a discontinuity in playback and forces setup to
    /// be emitted again. Without a channel the event is dropped and `false`
    /// is returned.
    pub fn do_insert<S: EventSink + ?Sized>(
        &self,
        sink: &mut S,
        event: ScheduledEvent,
        ref_time: RealTime,
        snapshot: &ControllerSnapshot,
        first_output: bool,
        track: Option<TrackId>,
    ) -> bool {
        self.do_insert_all(sink, [event], ref_time, snapshot, first_output, track)
    }

    /// Forward `events` on one channel under a single lock, so a vacate
    /// cannot separate e.g. a note-on from its note-off. Setup is stamped
    /// with the first event's time. Without a channel nothing is inserted
    /// and `false` is returned.
    pub fn do_insert_all<S, I>(
        &self,
        sink: &mut S,
        events: I,
        ref_time: RealTime,
        snapshot: &ControllerSnapshot,
        first_output: bool,
        track: Option<TrackId>,
    ) -> bool
    where
        S: EventSink + ?Sized,
        I: IntoIterator<Item = ScheduledEvent>,
    {
        let mut events = events.into_iter().peekable();
        let Some(insert_time) = events.peek().map(|event| event.time) else {
            return false;
        };
        let mut inner = self.inner.lock();
        let Some(channel) =
            inner.make_ready(sink, ref_time, insert_time, snapshot, track, first_output)
        else {
            tracing::trace!("No channel, dropping events at {}", insert_time);
            return false;
        };
        for event in events {
            let track = track.or(event.track);
            sink.insert(ref_time, event.on_channel(channel).on_track(track));
        }
        true
    }

    /// Return the held channel, if any. Always safe to call.
    pub fn free_channel_interval(&self) {
        self.inner.lock().free();
    }

    /// Force setup to be emitted again before the next event.
    pub fn mark_dirty(&self) {
        if let Allocation::Held { ready, .. } = &mut self.inner.lock().allocation {
            *ready = false;
        }
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Ready
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.inner.lock().allocation.lease().map(Lease::channel)
    }

    pub fn interval(&self) -> Option<ChannelInterval> {
        self.inner.lock().allocation.lease().map(|lease| lease.interval)
    }

    pub fn mode(&self) -> AllocationMode {
        self.inner.lock().mode
    }

    pub fn uses_pool(&self) -> bool {
        self.mode() == AllocationMode::Pool
    }

    /// Whether an allocation was attempted since the last free or vacate.
    pub fn allocation_attempted(&self) -> bool {
        !matches!(self.inner.lock().allocation, Allocation::NotAttempted)
    }

    pub fn instrument(&self) -> Option<Arc<dyn Instrument>> {
        self.inner
            .lock()
            .binding
            .as_ref()
            .and_then(|binding| binding.instrument.upgrade())
    }

    pub fn log_status(&self) {
        let inner = self.inner.lock();
        let instrument = inner
            .binding
            .as_ref()
            .and_then(|binding| binding.instrument.upgrade())
            .map(|instrument| instrument.id());
        let (start, end) = inner.required.padded();
        match inner.allocation.lease() {
            Some(lease) => tracing::debug!(
                "ChannelManager: instrument {:?}, {:?}, {:?}, channel {} [{}, {}], required [{}, {}]",
                instrument,
                inner.mode,
                inner.state(),
                lease.channel(),
                lease.interval.start(),
                lease.interval.end(),
                start,
                end
            ),
            None => tracing::debug!(
                "ChannelManager: instrument {:?}, {:?}, {:?}, no channel, required [{}, {}]",
                instrument,
                inner.mode,
                inner.state(),
                start,
                end
            ),
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::unbound()
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.free();
        inner.unsubscribe_instrument();
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChannelManager")
            .field("state", &inner.state())
            .field("mode", &inner.mode)
            .field("interval", &inner.allocation.lease().map(|l| l.interval))
            .field("required", &inner.required)
            .finish()
    }
}
