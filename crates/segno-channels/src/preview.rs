//! Immediate preview notes, e.g. when a key on an on-screen keyboard is hit.

use parking_lot::Mutex;
use segno_midi::{EventSink, RealTime, ScheduledEvent};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::manager::ChannelManager;
use crate::snapshot::ControllerSnapshot;

/// Fills event lists with single notes played "now" (time zero).
///
/// One channel manager is shared by every preview; it is rebound to whatever
/// instrument the next note is for.
#[derive(Debug, Default)]
pub struct PreviewNoteFiller {
    manager: ChannelManager,
}

impl PreviewNoteFiller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    /// Insert a note-on at zero and a note-off at `duration`.
    ///
    /// A `one_shot` note leases a channel for exactly its own span; otherwise
    /// the preview channel is held indefinitely. Returns `Ok(false)` when no
    /// channel is available and nothing was inserted.
    pub fn fill_with_note<S: EventSink + ?Sized>(
        &mut self,
        sink: &mut S,
        instrument: Arc<dyn Instrument>,
        pitch: u8,
        velocity: u8,
        duration: RealTime,
        one_shot: bool,
    ) -> Result<bool> {
        if pitch > 127 {
            return Err(Error::InvalidPitch(pitch));
        }
        let duration = duration.non_negative();
        let snapshot = ControllerSnapshot::from_instrument(instrument.as_ref());

        self.manager.rebind(Some(instrument));
        if one_shot {
            self.manager
                .set_required_interval(RealTime::ZERO, duration, RealTime::ZERO, RealTime::ZERO);
        } else {
            self.manager.set_eternal_interval();
        }
        // An explicit reallocate asks the pool again after a refusal.
        self.manager.reallocate(false);

        let on = ScheduledEvent::note_on(RealTime::ZERO, pitch, velocity.min(127));
        let off = ScheduledEvent::note_off(duration, pitch);
        if !self
            .manager
            .do_insert_all(sink, [on, off], RealTime::ZERO, &snapshot, false, None)
        {
            tracing::debug!("No channel for preview note {}", pitch);
            return Ok(false);
        }
        Ok(true)
    }
}

static FILLER: OnceLock<Mutex<PreviewNoteFiller>> = OnceLock::new();

/// The process-wide preview filler, created on first use.
pub fn preview_filler() -> &'static Mutex<PreviewNoteFiller> {
    FILLER.get_or_init(|| Mutex::new(PreviewNoteFiller::new()))
}
