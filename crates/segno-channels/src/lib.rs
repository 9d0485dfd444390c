//! Channel lifecycle for the segno sequencer core.
//!
//! A sound stream (segment, metronome, preview note) owns a
//! [`ChannelManager`] which leases an output channel from its device's
//! [`ChannelPool`], keeps the lease valid over a required time interval and
//! emits channel setup before the first dependent note.
//!
//! Running out of channels is never an error: managers report "not ready"
//! and dependent events are dropped.

pub mod error;
pub use error::{Error, Result};

mod interval;
pub use interval::{ChannelInterval, RequiredInterval};

mod snapshot;
pub use snapshot::ControllerSnapshot;

pub mod notify;
pub use notify::{Callback, SubscriptionId, Subscribers};

pub mod pool;
pub use pool::{
    AllocateChannels, ChannelPool, DeviceId, Grant, PoolBuilder, PoolConfig, VacateCallback, Vacated,
    MIDI_CHANNELS,
};

mod instrument;
pub use instrument::{
    Bank, Instrument, InstrumentCallback, InstrumentEvent, InstrumentId, InstrumentSettings,
    MidiInstrument, ProgramSelect,
};

mod device;
pub use device::MidiDevice;

pub mod dispatch;
pub use dispatch::{
    insert_bank_and_program, insert_channel_setup, insert_controller, insert_controllers,
};

mod manager;
pub use manager::{AllocationMode, ChannelManager, ChannelState};

mod preview;
pub use preview::{preview_filler, PreviewNoteFiller};

mod metronome;
pub use metronome::{ClickKind, Metronome, MetronomeSettings};

mod segment;
pub use segment::SegmentFeeder;

pub use segno_midi::{ChannelId, EventSink, RealTime, ScheduledEvent, TrackId};
