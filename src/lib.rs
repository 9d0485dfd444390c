//! # Segno - MIDI sequencer core
//!
//! Channel lifecycle and output scheduling for a MIDI sequencer.
//!
//! ## Architecture
//!
//! Segno is an umbrella crate over:
//! - **segno-midi** - Time axis, scheduled MIDI events, event sinks
//! - **segno-channels** - Channel pools, channel managers, setup dispatch,
//!   preview notes, metronome and segment feeders
//!
//! ## Quick Start
//!
//! ```ignore
//! use segno::prelude::*;
//!
//! let (studio, output) = Studio::builder()
//!     .device("Synth", PoolConfig::default())
//!     .build()?;
//! let device = studio.device(0).unwrap();
//! let piano = device.add_instrument(InstrumentSettings::default())?;
//!
//! // One manager per sound stream
//! let manager = ChannelManager::new(piano.clone());
//! manager.set_required_interval(start, end, margin, margin);
//!
//! let mut events = EventList::new();
//! let snapshot = ControllerSnapshot::from_instrument(piano.as_ref());
//! manager.do_insert(&mut events, ScheduledEvent::note_on(start, 60, 100), start, &snapshot, true, None);
//! ```
//!
//! ## Feature Flags
//!
//! - `studio` (default) - immediate-output facade over a bounded channel

pub use segno_channels as channels;
pub use segno_midi as midi;

pub use segno_midi::{
    ChannelId, EventKind, EventList, EventProducer, EventSink, MidiMessage, RealTime,
    ScheduledEvent, TrackId,
};

pub use segno_channels::{
    AllocateChannels, AllocationMode, ChannelInterval, ChannelManager, ChannelPool, ChannelState,
    ControllerSnapshot, Instrument, InstrumentEvent, InstrumentSettings, Metronome,
    MetronomeSettings, MidiDevice, MidiInstrument, PoolConfig, PreviewNoteFiller, SegmentFeeder,
};

mod error;
pub use error::{Error, Result};

#[cfg(feature = "studio")]
mod studio;
#[cfg(feature = "studio")]
pub use studio::{Studio, StudioBuilder};

pub mod prelude {
    pub use crate::{
        ChannelManager, ChannelState, ControllerSnapshot, EventList, EventSink, Instrument,
        InstrumentSettings, MidiDevice, PoolConfig, RealTime, ScheduledEvent,
    };
    pub use crate::{Error, Result};

    #[cfg(feature = "studio")]
    pub use crate::Studio;
}
