//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use segno_channels::{
    AllocateChannels, ChannelInterval, ChannelPool, DeviceId, Grant, Instrument, InstrumentCallback,
    InstrumentEvent, InstrumentId, ProgramSelect, Bank, SubscriptionId, Subscribers,
    VacateCallback, Vacated,
};
use parking_lot::Mutex;
use segno_midi::{ChannelId, RealTime};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn ms(v: i64) -> RealTime {
    RealTime::from_millis(v)
}

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Delegating pool that counts requests.
pub struct CountingPool {
    pub inner: Arc<AllocateChannels>,
    requests: AtomicUsize,
}

impl CountingPool {
    pub fn new(channels: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: AllocateChannels::builder(1).channels(channels).build().unwrap(),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ChannelPool for CountingPool {
    fn device_id(&self) -> DeviceId {
        self.inner.device_id()
    }

    fn request(&self, start: RealTime, end: RealTime) -> Option<Grant> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.request(start, end)
    }

    fn release(&self, interval: &ChannelInterval) {
        self.inner.release(interval)
    }

    fn subscribe_vacate(&self, callback: VacateCallback) -> SubscriptionId {
        self.inner.subscribe_vacate(callback)
    }

    fn unsubscribe_vacate(&self, id: SubscriptionId) {
        self.inner.unsubscribe_vacate(id)
    }
}

/// Pool that holds vacate notices back until [`deliver`](Self::deliver),
/// to replay a notice arriving after a newer grant.
pub struct DeferredVacatePool {
    pub inner: Arc<AllocateChannels>,
    subscribers: Subscribers<Vacated>,
    pending: Mutex<Vec<Vacated>>,
}

impl DeferredVacatePool {
    pub fn new(channels: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            inner: AllocateChannels::builder(1).channels(channels).build().unwrap(),
            subscribers: Subscribers::new(),
            pending: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&pool);
        pool.inner.subscribe_vacate(Arc::new(move |notice: Vacated| {
            if let Some(pool) = weak.upgrade() {
                pool.pending.lock().push(notice);
            }
        }));
        pool
    }

    /// Hand queued notices to the current subscribers. Returns how many.
    pub fn deliver(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        for notice in &pending {
            self.subscribers.notify(*notice);
        }
        pending.len()
    }
}

impl ChannelPool for DeferredVacatePool {
    fn device_id(&self) -> DeviceId {
        self.inner.device_id()
    }

    fn request(&self, start: RealTime, end: RealTime) -> Option<Grant> {
        self.inner.request(start, end)
    }

    fn release(&self, interval: &ChannelInterval) {
        self.inner.release(interval)
    }

    fn subscribe_vacate(&self, callback: VacateCallback) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    fn unsubscribe_vacate(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }
}

/// Instrument whose flags can be flipped with or without notifying.
pub struct TestInstrument {
    pool: Arc<dyn ChannelPool>,
    fixed: AtomicBool,
    natural: AtomicU8,
    subscribers: Subscribers<InstrumentEvent>,
}

impl TestInstrument {
    pub fn new(pool: Arc<dyn ChannelPool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            fixed: AtomicBool::new(false),
            natural: AtomicU8::new(0),
            subscribers: Subscribers::new(),
        })
    }

    /// Change the fixed channel without telling anyone.
    pub fn set_fixed_silently(&self, channel: Option<ChannelId>) {
        self.fixed.store(channel.is_some(), Ordering::SeqCst);
        if let Some(channel) = channel {
            self.natural.store(channel, Ordering::SeqCst);
        }
    }

    pub fn set_fixed(&self, channel: Option<ChannelId>) {
        self.set_fixed_silently(channel);
        self.notify(if channel.is_some() {
            InstrumentEvent::BecameFixed
        } else {
            InstrumentEvent::BecameUnfixed
        });
        self.notify(InstrumentEvent::Changed);
    }

    pub fn notify(&self, event: InstrumentEvent) -> usize {
        self.subscribers.notify(event)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Instrument for TestInstrument {
    fn id(&self) -> InstrumentId {
        42
    }

    fn device_id(&self) -> DeviceId {
        self.pool.device_id()
    }

    fn has_fixed_channel(&self) -> bool {
        self.fixed.load(Ordering::SeqCst)
    }

    fn natural_channel(&self) -> ChannelId {
        self.natural.load(Ordering::SeqCst)
    }

    fn program(&self) -> ProgramSelect {
        ProgramSelect {
            bank: Some(Bank { msb: 1, lsb: 2 }),
            program: Some(5),
        }
    }

    fn static_controllers(&self) -> Vec<(u8, u8)> {
        vec![(7, 100), (10, 64)]
    }

    fn channel_pool(&self) -> Option<Arc<dyn ChannelPool>> {
        Some(Arc::clone(&self.pool))
    }

    fn subscribe(&self, callback: InstrumentCallback) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }
}
