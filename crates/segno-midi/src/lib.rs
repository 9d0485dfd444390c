//! Scheduled MIDI events for the segno sequencer core.
//!
//! - [`RealTime`]: signed nanosecond axis with unbounded sentinels
//! - [`ScheduledEvent`]: channel-scoped message with timestamp, track and an
//!   optional (not yet assigned) output channel
//! - [`EventSink`]: where producers insert events; [`EventList`] collects them
//!   in memory, [`EventProducer`] hands them to another thread lock-free

pub mod error;
pub use error::{Error, Result};

pub mod time;
pub use time::RealTime;

pub(crate) mod event;
pub use event::{ChannelId, EventKind, MidiMessage, ScheduledEvent, TrackId};

pub(crate) mod sink;
pub use sink::{EventList, EventSink};

pub mod output_collector;
pub use output_collector::{
    event_channel, event_channel_with_capacity, EventAggregator, EventConsumer, EventProducer,
};

// Re-export upstream message types so callers don't need midi-msg directly
pub use midi_msg::{ChannelModeMsg, ChannelVoiceMsg, ControlChange, MidiMsg};
