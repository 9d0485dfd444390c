//! Per-device channel pool.
//!
//! [`ChannelPool`] is the contract a [`ChannelManager`](crate::ChannelManager)
//! consumes. [`AllocateChannels`] is the in-process implementation: it hands
//! out non-overlapping time intervals per channel and may revoke ("vacate")
//! them when a channel gets pinned to a fixed instrument.
//!
//! Leases on one channel conflict only when they share more than an
//! endpoint: a requirement ending at `t` and one starting at `t` fit on the
//! same channel.

use parking_lot::Mutex;
use segno_midi::{ChannelId, RealTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interval::ChannelInterval;
use crate::notify::{Callback, SubscriptionId, Subscribers};

pub type DeviceId = u32;

/// A granted interval, tagged with its channel's vacate generation at the
/// time of the grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grant {
    pub interval: ChannelInterval,
    pub generation: u64,
}

impl Grant {
    #[inline]
    pub fn channel(&self) -> ChannelId {
        self.interval.channel()
    }
}

/// Leases on `channel` granted before `generation` were revoked.
///
/// Notices are delivered after the pool's table is unlocked, so a grant made
/// in between carries the new generation and is not affected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vacated {
    pub channel: ChannelId,
    pub generation: u64,
}

impl Vacated {
    #[inline]
    pub fn revokes(&self, grant: &Grant) -> bool {
        grant.channel() == self.channel && grant.generation < self.generation
    }
}

pub type VacateCallback = Callback<Vacated>;

pub trait ChannelPool: Send + Sync {
    fn device_id(&self) -> DeviceId;

    /// Grant a channel covering `[start, end]`, or `None` without blocking
    /// for longer than the pool's request timeout.
    fn request(&self, start: RealTime, end: RealTime) -> Option<Grant>;

    /// Return a granted interval. Unknown intervals are ignored.
    fn release(&self, interval: &ChannelInterval);

    fn subscribe_vacate(&self, callback: VacateCallback) -> SubscriptionId;

    fn unsubscribe_vacate(&self, id: SubscriptionId);
}

/// Channels addressable on one MIDI port.
pub const MIDI_CHANNELS: usize = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of channels on the device.
    pub channels: usize,
    /// Granted bounds are rounded outward to this step. Zero grants exactly.
    pub granularity: RealTime,
    /// Longest wait for the allocation table during `request`.
    pub request_timeout_us: u64,
    /// Channels reserved for fixed instruments from the start.
    pub reserved: Vec<ChannelId>,
}

impl PoolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_micros(self.request_timeout_us)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > MIDI_CHANNELS {
            return Err(Error::InvalidConfig(format!(
                "channel count must be 1..={MIDI_CHANNELS}, got {}",
                self.channels
            )));
        }
        if self.granularity < RealTime::ZERO || self.granularity.is_unbounded() {
            return Err(Error::InvalidConfig(format!(
                "granularity must be a finite non-negative time, got {}",
                self.granularity
            )));
        }
        if let Some(&channel) = self
            .reserved
            .iter()
            .find(|&&ch| ch as usize >= self.channels)
        {
            return Err(Error::ChannelOutOfRange {
                channel,
                count: self.channels,
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            channels: 16,
            granularity: RealTime::ZERO,
            request_timeout_us: 500,
            reserved: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct ChannelSlot {
    /// Reservation count from fixed instruments.
    fixed: u32,
    /// Bumped on every vacate.
    generation: u64,
    /// start -> end, pairwise sharing at most an endpoint.
    leases: BTreeMap<RealTime, RealTime>,
}

impl ChannelSlot {
    fn is_free(&self, start: RealTime, end: RealTime) -> bool {
        // Leases are disjoint and sorted, so only the last one starting
        // before `end` can reach past `start`.
        match self.leases.range(..end).next_back() {
            Some((_, &lease_end)) => lease_end <= start,
            None => true,
        }
    }

    fn revoke_all(&mut self) -> (usize, u64) {
        self.generation += 1;
        (std::mem::take(&mut self.leases).len(), self.generation)
    }
}

pub struct AllocateChannels {
    device_id: DeviceId,
    config: PoolConfig,
    table: Mutex<Vec<ChannelSlot>>,
    vacate: Subscribers<Vacated>,
}

impl AllocateChannels {
    pub fn builder(device_id: DeviceId) -> PoolBuilder {
        PoolBuilder {
            device_id,
            config: PoolConfig::default(),
        }
    }

    pub fn new(device_id: DeviceId, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let mut slots: Vec<ChannelSlot> = (0..config.channels).map(|_| ChannelSlot::default()).collect();
        for &channel in &config.reserved {
            slots[channel as usize].fixed += 1;
        }
        tracing::debug!(
            "Created channel pool for device {} ({} channels, {} reserved)",
            device_id,
            config.channels,
            config.reserved.len()
        );
        Ok(Self {
            device_id,
            config,
            table: Mutex::new(slots),
            vacate: Subscribers::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.config.channels
    }

    fn check_channel(&self, channel: ChannelId) -> Result<()> {
        if channel as usize >= self.config.channels {
            return Err(Error::ChannelOutOfRange {
                channel,
                count: self.config.channels,
            });
        }
        Ok(())
    }

    /// Pin `channel` to a fixed instrument. Current holders are vacated and
    /// notified before this returns. Returns the number of revoked leases.
    pub fn reserve_fixed_channel(&self, channel: ChannelId) -> Result<usize> {
        self.check_channel(channel)?;
        let (evicted, generation) = {
            let mut table = self.table.lock();
            let slot = &mut table[channel as usize];
            slot.fixed += 1;
            slot.revoke_all()
        };
        tracing::debug!(
            "Device {}: channel {} reserved as fixed ({} leases revoked)",
            self.device_id,
            channel,
            evicted
        );
        if evicted > 0 {
            self.vacate.notify(Vacated {
                channel,
                generation,
            });
        }
        Ok(evicted)
    }

    /// Drop one fixed reservation; the channel returns to the pool when none remain.
    pub fn release_fixed_channel(&self, channel: ChannelId) -> Result<()> {
        self.check_channel(channel)?;
        let mut table = self.table.lock();
        let slot = &mut table[channel as usize];
        slot.fixed = slot.fixed.saturating_sub(1);
        tracing::debug!(
            "Device {}: fixed reservation on channel {} released ({} left)",
            self.device_id,
            channel,
            slot.fixed
        );
        Ok(())
    }

    /// Revoke every lease on `channel` without reserving it.
    pub fn vacate_channel(&self, channel: ChannelId) -> Result<usize> {
        self.check_channel(channel)?;
        let (evicted, generation) = self.table.lock()[channel as usize].revoke_all();
        if evicted > 0 {
            tracing::debug!(
                "Device {}: vacated channel {} ({} leases)",
                self.device_id,
                channel,
                evicted
            );
            self.vacate.notify(Vacated {
                channel,
                generation,
            });
        }
        Ok(evicted)
    }

    pub fn is_fixed(&self, channel: ChannelId) -> bool {
        self.table
            .lock()
            .get(channel as usize)
            .map(|slot| slot.fixed > 0)
            .unwrap_or(false)
    }

    /// Total outstanding leases across all channels.
    pub fn lease_count(&self) -> usize {
        self.table.lock().iter().map(|slot| slot.leases.len()).sum()
    }

    pub fn leases_on(&self, channel: ChannelId) -> Vec<ChannelInterval> {
        let table = self.table.lock();
        table
            .get(channel as usize)
            .map(|slot| {
                slot.leases
                    .iter()
                    .filter_map(|(&start, &end)| ChannelInterval::new(channel, start, end))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn vacate_subscriber_count(&self) -> usize {
        self.vacate.len()
    }
}

impl ChannelPool for AllocateChannels {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn request(&self, start: RealTime, end: RealTime) -> Option<Grant> {
        let granularity = self.config.granularity;
        let start = start.floor_to(granularity);
        let end = end.ceil_to(granularity);
        if start > end {
            return None;
        }
        // An empty requirement still occupies its instant.
        let end = if start == end {
            end.saturating_add(RealTime::from_nanos(1))
        } else {
            end
        };

        let Some(mut table) = self.table.try_lock_for(self.config.request_timeout()) else {
            tracing::trace!("Device {}: allocation table busy", self.device_id);
            return None;
        };

        let granted = table
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.fixed == 0 && slot.is_free(start, end))
            .map(|(channel, slot)| {
                slot.leases.insert(start, end);
                (channel as ChannelId, slot.generation)
            });
        drop(table);

        match granted {
            Some((channel, generation)) => {
                tracing::debug!(
                    "Device {}: granted channel {} for [{}, {}]",
                    self.device_id,
                    channel,
                    start,
                    end
                );
                ChannelInterval::new(channel, start, end).map(|interval| Grant {
                    interval,
                    generation,
                })
            }
            None => {
                tracing::debug!(
                    "Device {}: no channel free for [{}, {}]",
                    self.device_id,
                    start,
                    end
                );
                None
            }
        }
    }

    fn release(&self, interval: &ChannelInterval) {
        let mut table = self.table.lock();
        let Some(slot) = table.get_mut(interval.channel() as usize) else {
            return;
        };
        if slot.leases.get(&interval.start()) == Some(&interval.end()) {
            slot.leases.remove(&interval.start());
            tracing::debug!(
                "Device {}: released channel {} [{}, {}]",
                self.device_id,
                interval.channel(),
                interval.start(),
                interval.end()
            );
        } else {
            tracing::trace!(
                "Device {}: ignoring release of unknown lease on channel {}",
                self.device_id,
                interval.channel()
            );
        }
    }

    fn subscribe_vacate(&self, callback: VacateCallback) -> SubscriptionId {
        self.vacate.subscribe(callback)
    }

    fn unsubscribe_vacate(&self, id: SubscriptionId) {
        self.vacate.unsubscribe(id);
    }
}

impl std::fmt::Debug for AllocateChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocateChannels")
            .field("device_id", &self.device_id)
            .field("channels", &self.config.channels)
            .field("leases", &self.lease_count())
            .field("vacate_subscribers", &self.vacate.len())
            .finish()
    }
}

pub struct PoolBuilder {
    device_id: DeviceId,
    config: PoolConfig,
}

impl PoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn channels(mut self, channels: usize) -> Self {
        self.config.channels = channels;
        self
    }

    pub fn granularity(mut self, granularity: RealTime) -> Self {
        self.config.granularity = granularity;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_us = timeout.as_micros().min(u64::MAX as u128) as u64;
        self
    }

    /// Reserve a channel for fixed instruments from the start.
    pub fn reserve(mut self, channel: ChannelId) -> Self {
        self.config.reserved.push(channel);
        self
    }

    pub fn build(self) -> Result<Arc<AllocateChannels>> {
        AllocateChannels::new(self.device_id, self.config).map(Arc::new)
    }
}
