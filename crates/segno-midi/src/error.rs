//! Error types for scheduled MIDI events.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    Parse(String),

    #[error("Not a channel voice or channel mode message")]
    NotChannelMessage,
}

pub type Result<T> = std::result::Result<T, Error>;
