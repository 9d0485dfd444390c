//! Instruments: the read-only configuration a channel is set up for.
//!
//! [`Instrument`] is the contract a [`ChannelManager`](crate::ChannelManager)
//! binds to. [`MidiInstrument`] is the in-process implementation owned by a
//! [`MidiDevice`](crate::MidiDevice).

use arc_swap::ArcSwap;
use segno_midi::ChannelId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::notify::{Callback, SubscriptionId, Subscribers};
use crate::pool::{AllocateChannels, ChannelPool, DeviceId};

pub type InstrumentId = u32;

/// Change notifications an instrument delivers to its subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentEvent {
    /// Program, bank or controller settings changed.
    Changed,
    BecameFixed,
    BecameUnfixed,
    Destroyed,
    /// The owning device (and its channel pool) is going away.
    DeviceDestroyed,
}

pub type InstrumentCallback = Callback<InstrumentEvent>;

pub trait Instrument: Send + Sync {
    fn id(&self) -> InstrumentId;

    fn device_id(&self) -> DeviceId;

    fn has_fixed_channel(&self) -> bool;

    /// The instrument's own channel, used when it is fixed.
    fn natural_channel(&self) -> ChannelId;

    fn program(&self) -> ProgramSelect;

    fn static_controllers(&self) -> Vec<(u8, u8)>;

    /// Pool of the owning device, if it still exists.
    fn channel_pool(&self) -> Option<Arc<dyn ChannelPool>>;

    fn subscribe(&self, callback: InstrumentCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub msb: u8,
    pub lsb: u8,
}

/// What to send when setting up a channel. `None` fields are not sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramSelect {
    pub bank: Option<Bank>,
    pub program: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    pub name: String,
    pub fixed: bool,
    pub natural_channel: ChannelId,
    pub program: ProgramSelect,
    /// Controller number -> value, re-sent after every channel setup.
    pub controllers: Vec<(u8, u8)>,
}

impl InstrumentSettings {
    pub fn validate(&self) -> Result<()> {
        if let Some(program) = self.program.program.filter(|&p| p > 127) {
            return Err(Error::InvalidSettings(format!("program {program} > 127")));
        }
        if let Some(bank) = self.program.bank.filter(|b| b.msb > 127 || b.lsb > 127) {
            return Err(Error::InvalidSettings(format!(
                "bank {}:{} out of range",
                bank.msb, bank.lsb
            )));
        }
        if let Some(&(control, value)) = self
            .controllers
            .iter()
            .find(|&&(c, v)| c > 127 || v > 127)
        {
            return Err(Error::InvalidSettings(format!(
                "controller {control} = {value} out of range"
            )));
        }
        Ok(())
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            fixed: false,
            natural_channel: 0,
            program: ProgramSelect {
                bank: Some(Bank::default()),
                program: Some(0),
            },
            controllers: vec![(7, 100), (10, 64)],
        }
    }
}

pub struct MidiInstrument {
    id: InstrumentId,
    device_id: DeviceId,
    settings: ArcSwap<InstrumentSettings>,
    pool: Weak<AllocateChannels>,
    subscribers: Subscribers<InstrumentEvent>,
    destroyed: AtomicBool,
}

impl MidiInstrument {
    pub(crate) fn new(
        id: InstrumentId,
        device_id: DeviceId,
        settings: InstrumentSettings,
        pool: Weak<AllocateChannels>,
    ) -> Self {
        Self {
            id,
            device_id,
            settings: ArcSwap::from_pointee(settings),
            pool,
            subscribers: Subscribers::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Lock-free snapshot of the current settings.
    pub fn settings(&self) -> Arc<InstrumentSettings> {
        self.settings.load_full()
    }

    pub fn name(&self) -> String {
        self.settings.load().name.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Apply `f` to a copy of the settings, validate and publish.
    ///
    /// Fixed-channel transitions reserve or release the channel in the device
    /// pool first (vacating its holders), then notify `BecameFixed` /
    /// `BecameUnfixed`. `Changed` is always delivered last.
    pub fn update(&self, f: impl FnOnce(&mut InstrumentSettings)) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::InvalidSettings(format!(
                "instrument {} was destroyed",
                self.id
            )));
        }
        let old = self.settings.load_full();
        let mut new = (*old).clone();
        f(&mut new);
        if let Err(e) = new.validate() {
            tracing::warn!("Instrument {}: refused settings: {}", self.id, e);
            return Err(e);
        }
        if let Some(pool) = self.pool.upgrade() {
            if new.natural_channel as usize >= pool.channel_count() {
                return Err(Error::ChannelOutOfRange {
                    channel: new.natural_channel,
                    count: pool.channel_count(),
                });
            }
        }

        let was_fixed = old.fixed;
        let is_fixed = new.fixed;
        let moved = was_fixed && is_fixed && old.natural_channel != new.natural_channel;
        let (old_channel, new_channel) = (old.natural_channel, new.natural_channel);
        self.settings.store(Arc::new(new));

        if let Some(pool) = self.pool.upgrade() {
            if was_fixed && (!is_fixed || moved) {
                pool.release_fixed_channel(old_channel)?;
            }
            if is_fixed && (!was_fixed || moved) {
                pool.reserve_fixed_channel(new_channel)?;
            }
        }

        if is_fixed && (!was_fixed || moved) {
            tracing::debug!("Instrument {} fixed on channel {}", self.id, new_channel);
            self.subscribers.notify(InstrumentEvent::BecameFixed);
        } else if was_fixed && !is_fixed {
            tracing::debug!("Instrument {} no longer fixed", self.id);
            self.subscribers.notify(InstrumentEvent::BecameUnfixed);
        }
        self.subscribers.notify(InstrumentEvent::Changed);
        Ok(())
    }

    pub fn set_program(&self, program: Option<u8>) -> Result<()> {
        self.update(|s| s.program.program = program)
    }

    pub fn set_bank(&self, bank: Option<Bank>) -> Result<()> {
        self.update(|s| s.program.bank = bank)
    }

    pub fn set_controller(&self, control: u8, value: u8) -> Result<()> {
        self.update(|s| match s.controllers.iter_mut().find(|(c, _)| *c == control) {
            Some(entry) => entry.1 = value,
            None => s.controllers.push((control, value)),
        })
    }

    /// Pin the instrument to `channel`, or return it to dynamic allocation.
    pub fn set_fixed_channel(&self, channel: Option<ChannelId>) -> Result<()> {
        self.update(|s| match channel {
            Some(ch) => {
                s.fixed = true;
                s.natural_channel = ch;
            }
            None => s.fixed = false,
        })
    }

    /// Release the fixed reservation and tell subscribers to let go.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let settings = self.settings.load();
        if settings.fixed {
            if let Some(pool) = self.pool.upgrade() {
                // natural_channel was range-checked on every update
                let _ = pool.release_fixed_channel(settings.natural_channel);
            }
        }
        tracing::debug!("Instrument {} destroyed", self.id);
        self.subscribers.notify(InstrumentEvent::Destroyed);
        self.subscribers.clear();
    }

    pub(crate) fn device_destroyed(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscribers.notify(InstrumentEvent::DeviceDestroyed);
        self.subscribers.clear();
    }
}

impl Instrument for MidiInstrument {
    fn id(&self) -> InstrumentId {
        self.id
    }

    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn has_fixed_channel(&self) -> bool {
        self.settings.load().fixed
    }

    fn natural_channel(&self) -> ChannelId {
        self.settings.load().natural_channel
    }

    fn program(&self) -> ProgramSelect {
        self.settings.load().program
    }

    fn static_controllers(&self) -> Vec<(u8, u8)> {
        self.settings.load().controllers.clone()
    }

    fn channel_pool(&self) -> Option<Arc<dyn ChannelPool>> {
        if self.is_destroyed() {
            return None;
        }
        self.pool
            .upgrade()
            .map(|pool| pool as Arc<dyn ChannelPool>)
    }

    fn subscribe(&self, callback: InstrumentCallback) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }
}

impl std::fmt::Debug for MidiInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiInstrument")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("settings", &*self.settings.load())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
