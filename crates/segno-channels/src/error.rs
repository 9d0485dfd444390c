//! Error types for channel pools and instrument configuration.
//!
//! Running out of channels is not an error: managers report "not ready".

use segno_midi::ChannelId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("Channel {channel} out of range (device has {count} channels)")]
    ChannelOutOfRange { channel: ChannelId, count: usize },

    #[error("Invalid instrument settings: {0}")]
    InvalidSettings(String),

    #[error("Pitch {0} out of range (0..=127)")]
    InvalidPitch(u8),

    #[error("Invalid metronome settings: {0}")]
    InvalidMetronome(String),

    #[error("MIDI: {0}")]
    Midi(#[from] segno_midi::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
