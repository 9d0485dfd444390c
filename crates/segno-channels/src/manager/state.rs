//! Allocation state of a channel manager.

use segno_midi::ChannelId;
use std::sync::Arc;

use crate::interval::ChannelInterval;
use crate::notify::SubscriptionId;
use crate::pool::ChannelPool;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Unbound,
    /// Bound; no allocation attempted since the last free or vacate.
    NoChannel,
    /// Bound; the pool refused the last request.
    AllocationFailed,
    /// Channel held, setup not yet emitted.
    Uninitialized,
    /// Channel held and set up.
    Ready,
}

impl ChannelState {
    #[inline]
    pub fn holds_channel(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    #[default]
    Pool,
    /// Channel derived from the instrument's natural channel.
    Fixed,
}

pub(crate) enum LeaseOrigin {
    Fixed,
    Pool {
        pool: Arc<dyn ChannelPool>,
        vacate: SubscriptionId,
        epoch: u64,
        /// Vacate generation of the channel when granted.
        generation: u64,
    },
}

pub(crate) struct Lease {
    pub interval: ChannelInterval,
    pub origin: LeaseOrigin,
}

impl Lease {
    #[inline]
    pub fn channel(&self) -> ChannelId {
        self.interval.channel()
    }

    #[inline]
    pub fn is_pool(&self) -> bool {
        matches!(self.origin, LeaseOrigin::Pool { .. })
    }
}

pub(crate) enum Allocation {
    NotAttempted,
    Failed,
    Held { lease: Lease, ready: bool },
}

impl Allocation {
    pub fn state(&self) -> ChannelState {
        match self {
            Self::NotAttempted => ChannelState::NoChannel,
            Self::Failed => ChannelState::AllocationFailed,
            Self::Held { ready: false, .. } => ChannelState::Uninitialized,
            Self::Held { ready: true, .. } => ChannelState::Ready,
        }
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            Self::Held { lease, .. } => Some(lease),
            _ => None,
        }
    }
}
