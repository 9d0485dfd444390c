//! Feeds the notes of one segment through its own channel manager.

use segno_midi::{EventSink, RealTime, ScheduledEvent, TrackId};
use std::sync::Arc;

use crate::instrument::Instrument;
use crate::manager::ChannelManager;
use crate::snapshot::ControllerSnapshot;

/// A segment's note stream: holds a channel for the segment's span, padded
/// by margins, and re-sends setup after every locate.
pub struct SegmentFeeder {
    manager: ChannelManager,
    track: Option<TrackId>,
    start: RealTime,
    end: RealTime,
    start_margin: RealTime,
    end_margin: RealTime,
    discontinuity: bool,
}

impl SegmentFeeder {
    pub fn new(instrument: Arc<dyn Instrument>, track: Option<TrackId>) -> Self {
        Self {
            manager: ChannelManager::new(instrument),
            track,
            start: RealTime::ZERO,
            end: RealTime::ZERO,
            start_margin: RealTime::ZERO,
            end_margin: RealTime::ZERO,
            discontinuity: true,
        }
    }

    pub fn with_margins(mut self, start_margin: RealTime, end_margin: RealTime) -> Self {
        self.start_margin = start_margin.non_negative();
        self.end_margin = end_margin.non_negative();
        self.update_required();
        self
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    pub fn track(&self) -> Option<TrackId> {
        self.track
    }

    /// Set the segment's span. The channel is re-requested only if the held
    /// one no longer covers it.
    pub fn set_span(&mut self, start: RealTime, end: RealTime) -> bool {
        self.start = start;
        self.end = end;
        self.update_required();
        self.manager.reallocate(false)
    }

    pub fn set_instrument(&mut self, instrument: Arc<dyn Instrument>) {
        self.manager.rebind(Some(instrument));
        self.update_required();
        self.discontinuity = true;
    }

    /// Playback jumped; the next note re-sends channel setup.
    pub fn locate(&mut self) {
        self.discontinuity = true;
    }

    fn update_required(&self) {
        self.manager
            .set_required_interval(self.start, self.end, self.start_margin, self.end_margin);
    }

    /// Note-on at `time`, note-off at `time + duration`. Returns `false` and
    /// inserts nothing when no channel is available.
    pub fn insert_note<S: EventSink + ?Sized>(
        &mut self,
        sink: &mut S,
        time: RealTime,
        pitch: u8,
        velocity: u8,
        duration: RealTime,
        snapshot: &ControllerSnapshot,
    ) -> bool {
        let on = ScheduledEvent::note_on(time, pitch & 0x7F, velocity & 0x7F);
        let off = ScheduledEvent::note_off(time + duration.non_negative(), pitch & 0x7F);
        let inserted = self.manager.do_insert_all(
            sink,
            [on, off],
            time,
            snapshot,
            self.discontinuity,
            self.track,
        );
        if inserted {
            self.discontinuity = false;
        }
        inserted
    }
}

impl std::fmt::Debug for SegmentFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFeeder")
            .field("track", &self.track)
            .field("span", &(self.start, self.end))
            .field("manager", &self.manager)
            .finish()
    }
}
