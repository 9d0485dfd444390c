//! Metronome click stream on an eternally held channel.

use segno_midi::{EventSink, RealTime, ScheduledEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::manager::ChannelManager;
use crate::snapshot::ControllerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Bar,
    Beat,
    SubBeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    pub bar_pitch: u8,
    pub beat_pitch: u8,
    pub sub_beat_pitch: u8,
    pub bar_velocity: u8,
    pub beat_velocity: u8,
    pub sub_beat_velocity: u8,
    pub click_duration_ms: u32,
    pub beats_per_bar: u32,
    /// Clicks per beat; 0 and 1 both mean no sub-beats.
    pub sub_beats: u32,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            bar_pitch: 37,
            beat_pitch: 37,
            sub_beat_pitch: 37,
            bar_velocity: 120,
            beat_velocity: 100,
            sub_beat_velocity: 80,
            click_duration_ms: 10,
            beats_per_bar: 4,
            sub_beats: 0,
        }
    }
}

impl MetronomeSettings {
    pub fn validate(&self) -> Result<()> {
        let notes = [
            self.bar_pitch,
            self.beat_pitch,
            self.sub_beat_pitch,
            self.bar_velocity,
            self.beat_velocity,
            self.sub_beat_velocity,
        ];
        if notes.iter().any(|&b| b > 127) {
            return Err(Error::InvalidMetronome(
                "pitches and velocities must be 0..=127".to_string(),
            ));
        }
        if self.beats_per_bar == 0 {
            return Err(Error::InvalidMetronome("beats_per_bar must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn pitch(&self, kind: ClickKind) -> u8 {
        match kind {
            ClickKind::Bar => self.bar_pitch,
            ClickKind::Beat => self.beat_pitch,
            ClickKind::SubBeat => self.sub_beat_pitch,
        }
    }

    pub fn velocity(&self, kind: ClickKind) -> u8 {
        match kind {
            ClickKind::Bar => self.bar_velocity,
            ClickKind::Beat => self.beat_velocity,
            ClickKind::SubBeat => self.sub_beat_velocity,
        }
    }

    fn click_duration(&self) -> RealTime {
        RealTime::from_millis(self.click_duration_ms as i64)
    }
}

pub struct Metronome {
    manager: ChannelManager,
    settings: MetronomeSettings,
}

impl Metronome {
    pub fn new(instrument: Arc<dyn Instrument>, settings: MetronomeSettings) -> Result<Self> {
        settings.validate()?;
        let manager = ChannelManager::new(instrument);
        manager.set_eternal_interval();
        Ok(Self { manager, settings })
    }

    pub fn settings(&self) -> &MetronomeSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: MetronomeSettings) -> Result<()> {
        if let Err(e) = settings.validate() {
            tracing::warn!("Metronome: keeping previous settings: {}", e);
            return Err(e);
        }
        self.settings = settings;
        Ok(())
    }

    pub fn set_instrument(&self, instrument: Arc<dyn Instrument>) {
        self.manager.rebind(Some(instrument));
        self.manager.set_eternal_interval();
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    /// One click: note-on at `time`, note-off after the click duration.
    pub fn insert_click<S: EventSink + ?Sized>(
        &self,
        sink: &mut S,
        time: RealTime,
        kind: ClickKind,
        first_output: bool,
    ) -> bool {
        let Some(instrument) = self.manager.instrument() else {
            return false;
        };
        let snapshot = ControllerSnapshot::from_instrument(instrument.as_ref());
        let pitch = self.settings.pitch(kind);
        let on = ScheduledEvent::note_on(time, pitch, self.settings.velocity(kind));
        let off = ScheduledEvent::note_off(time + self.settings.click_duration(), pitch);
        self.manager
            .do_insert_all(sink, [on, off], time, &snapshot, first_output, None)
    }

    /// All clicks of one bar starting at `bar_start`. Returns the number of
    /// clicks inserted.
    pub fn insert_bar<S: EventSink + ?Sized>(
        &self,
        sink: &mut S,
        bar_start: RealTime,
        beat_length: RealTime,
        first_output: bool,
    ) -> usize {
        let subdivisions = self.settings.sub_beats.max(1) as i64;
        let step = beat_length.as_nanos() / subdivisions;
        let mut inserted = 0;
        let mut first = first_output;

        for beat in 0..self.settings.beats_per_bar as i64 {
            for sub in 0..subdivisions {
                let kind = match (beat, sub) {
                    (0, 0) => ClickKind::Bar,
                    (_, 0) => ClickKind::Beat,
                    _ => ClickKind::SubBeat,
                };
                let offset = beat
                    .saturating_mul(beat_length.as_nanos())
                    .saturating_add(sub.saturating_mul(step));
                let time = bar_start + RealTime::from_nanos(offset);
                if self.insert_click(sink, time, kind, first) {
                    inserted += 1;
                }
                first = false;
            }
        }
        tracing::trace!("Metronome: {} clicks for bar at {}", inserted, bar_start);
        inserted
    }
}

impl std::fmt::Debug for Metronome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metronome")
            .field("settings", &self.settings)
            .field("manager", &self.manager)
            .finish()
    }
}
