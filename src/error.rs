//! Centralized error type for the segno umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("MIDI: {0}")]
    Midi(#[from] segno_midi::Error),

    #[error("Channels: {0}")]
    Channels(#[from] segno_channels::Error),

    #[error("Output receiver disconnected")]
    Disconnected,

    #[error("Unknown device {0}")]
    UnknownDevice(segno_channels::DeviceId),
}

pub type Result<T> = std::result::Result<T, Error>;
