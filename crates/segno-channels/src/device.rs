//! MIDI output devices: one channel pool plus the instruments playing on it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::instrument::{Instrument, InstrumentId, InstrumentSettings, MidiInstrument};
use crate::pool::{AllocateChannels, ChannelPool, DeviceId, PoolConfig};

pub struct MidiDevice {
    id: DeviceId,
    name: String,
    pool: Arc<AllocateChannels>,
    instruments: RwLock<Vec<Arc<MidiInstrument>>>,
    next_instrument: AtomicU32,
    destroyed: AtomicBool,
}

impl MidiDevice {
    pub fn new(id: DeviceId, name: impl Into<String>, config: PoolConfig) -> Result<Arc<Self>> {
        let pool = AllocateChannels::builder(id).config(config).build()?;
        Ok(Self::with_pool(name, pool))
    }

    /// Device identity follows the pool's device id.
    pub fn with_pool(name: impl Into<String>, pool: Arc<AllocateChannels>) -> Arc<Self> {
        let name = name.into();
        tracing::debug!("Created MIDI device {}: {}", pool.device_id(), name);
        Arc::new(Self {
            id: pool.device_id(),
            name,
            pool,
            instruments: RwLock::new(Vec::new()),
            next_instrument: AtomicU32::new(1),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<AllocateChannels> {
        &self.pool
    }

    /// Fixed instruments reserve their natural channel in the pool.
    pub fn add_instrument(&self, settings: InstrumentSettings) -> Result<Arc<MidiInstrument>> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::InvalidConfig(format!(
                "device {} was destroyed",
                self.id
            )));
        }
        settings.validate()?;
        if settings.natural_channel as usize >= self.pool.channel_count() {
            return Err(Error::ChannelOutOfRange {
                channel: settings.natural_channel,
                count: self.pool.channel_count(),
            });
        }
        if settings.fixed {
            self.pool.reserve_fixed_channel(settings.natural_channel)?;
        }

        let id = self.next_instrument.fetch_add(1, Ordering::Relaxed);
        let instrument = Arc::new(MidiInstrument::new(
            id,
            self.id,
            settings,
            Arc::downgrade(&self.pool),
        ));
        self.instruments.write().push(Arc::clone(&instrument));
        tracing::debug!("Device {}: added instrument {}", self.id, id);
        Ok(instrument)
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<Arc<MidiInstrument>> {
        self.instruments
            .read()
            .iter()
            .find(|instrument| instrument.id() == id)
            .cloned()
    }

    pub fn instruments(&self) -> Vec<Arc<MidiInstrument>> {
        self.instruments.read().clone()
    }

    /// Destroy one instrument; its subscribers are told before it is dropped.
    pub fn remove_instrument(&self, id: InstrumentId) -> bool {
        let removed = {
            let mut instruments = self.instruments.write();
            let index = instruments.iter().position(|i| i.id() == id);
            index.map(|index| instruments.remove(index))
        };
        match removed {
            Some(instrument) => {
                instrument.destroy();
                true
            }
            None => false,
        }
    }

    /// Tear the device down. Instruments deliver `DeviceDestroyed` instead of
    /// `Destroyed`, so holders drop their leases without returning them.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let instruments = std::mem::take(&mut *self.instruments.write());
        tracing::debug!(
            "Destroying device {} ({} instruments)",
            self.id,
            instruments.len()
        );
        for instrument in &instruments {
            instrument.device_destroyed();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MidiDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("instruments", &self.instruments.read().len())
            .field("pool", &self.pool)
            .finish()
    }
}
