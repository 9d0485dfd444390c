//! Scheduled MIDI events on the real-time axis.
//!
//! Events are produced without a channel and get one assigned by whoever owns
//! the output channel. An event with `channel == None` is not yet routable.

use midi_msg::{Channel, ChannelModeMsg, ChannelVoiceMsg, ControlChange, MidiMsg};

use crate::error::{Error, Result};
use crate::time::RealTime;

/// Output channel within one device.
pub type ChannelId = u8;

/// Track the event was generated for (bookkeeping only).
pub type TrackId = u32;

/// Channel-scoped message payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MidiMessage {
    Voice(ChannelVoiceMsg),
    Mode(ChannelModeMsg),
}

/// Coarse classification of a message, convenient for ordering checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    BankSelect { msb: u8, lsb: u8 },
    ProgramChange(u8),
    ResetAllControllers,
    ControlChange { control: u8, value: u8 },
    PitchBend(u16),
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledEvent {
    pub time: RealTime,
    pub track: Option<TrackId>,
    pub channel: Option<ChannelId>,
    pub message: MidiMessage,
}

impl ScheduledEvent {
    #[inline]
    pub fn new(time: RealTime, message: MidiMessage) -> Self {
        Self {
            time,
            track: None,
            channel: None,
            message,
        }
    }

    #[inline]
    pub fn voice(time: RealTime, msg: ChannelVoiceMsg) -> Self {
        Self::new(time, MidiMessage::Voice(msg))
    }

    #[inline]
    pub fn note_on(time: RealTime, note: u8, velocity: u8) -> Self {
        Self::voice(time, ChannelVoiceMsg::NoteOn { note, velocity })
    }

    #[inline]
    pub fn note_off(time: RealTime, note: u8) -> Self {
        Self::voice(time, ChannelVoiceMsg::NoteOff { note, velocity: 0 })
    }

    #[inline]
    pub fn control_change(time: RealTime, control: u8, value: u8) -> Self {
        Self::voice(
            time,
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            },
        )
    }

    /// Bank select MSB/LSB pair (CC 0 + CC 32 on the wire).
    #[inline]
    pub fn bank_select(time: RealTime, msb: u8, lsb: u8) -> Self {
        let bank = ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F);
        Self::voice(
            time,
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::BankSelect(bank),
            },
        )
    }

    #[inline]
    pub fn program_change(time: RealTime, program: u8) -> Self {
        Self::voice(time, ChannelVoiceMsg::ProgramChange { program })
    }

    #[inline]
    pub fn reset_all_controllers(time: RealTime) -> Self {
        Self::new(time, MidiMessage::Mode(ChannelModeMsg::ResetAllControllers))
    }

    #[inline]
    pub fn pitch_bend(time: RealTime, bend: u16) -> Self {
        Self::voice(time, ChannelVoiceMsg::PitchBend { bend })
    }

    #[inline]
    pub fn on_channel(mut self, channel: ChannelId) -> Self {
        self.channel = Some(channel);
        self
    }

    #[inline]
    pub fn on_track(mut self, track: Option<TrackId>) -> Self {
        self.track = track;
        self
    }

    #[inline]
    pub fn at(mut self, time: RealTime) -> Self {
        self.time = time;
        self
    }

    pub fn kind(&self) -> EventKind {
        match self.message {
            MidiMessage::Mode(ChannelModeMsg::ResetAllControllers) => {
                EventKind::ResetAllControllers
            }
            MidiMessage::Mode(_) => EventKind::Other,
            MidiMessage::Voice(msg) => match msg {
                ChannelVoiceMsg::NoteOn { note, velocity: 0 }
                | ChannelVoiceMsg::NoteOff { note, .. } => EventKind::NoteOff { note },
                ChannelVoiceMsg::NoteOn { note, velocity } => EventKind::NoteOn { note, velocity },
                ChannelVoiceMsg::ProgramChange { program } => EventKind::ProgramChange(program),
                ChannelVoiceMsg::PitchBend { bend } => EventKind::PitchBend(bend),
                ChannelVoiceMsg::ControlChange { control } => match control {
                    ControlChange::BankSelect(bank) => EventKind::BankSelect {
                        msb: ((bank >> 7) & 0x7F) as u8,
                        lsb: (bank & 0x7F) as u8,
                    },
                    ControlChange::CC { control, value } => {
                        EventKind::ControlChange { control, value }
                    }
                    _ => EventKind::Other,
                },
                _ => EventKind::Other,
            },
        }
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.kind(), EventKind::NoteOn { .. })
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        matches!(self.kind(), EventKind::NoteOff { .. })
    }

    /// Bank, program, controller and pitch-bend messages that prepare a channel.
    pub fn is_setup(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::BankSelect { .. }
                | EventKind::ProgramChange(_)
                | EventKind::ResetAllControllers
                | EventKind::ControlChange { .. }
                | EventKind::PitchBend(_)
        )
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.kind() {
            EventKind::NoteOn { note, .. } | EventKind::NoteOff { note } => Some(note),
            _ => None,
        }
    }

    /// `None` until a channel has been assigned, or if the channel does not
    /// fit on one MIDI port.
    pub fn to_midi_msg(&self) -> Option<MidiMsg> {
        let channel = self.channel.filter(|&ch| ch < 16).map(Channel::from_u8)?;
        Some(match self.message {
            MidiMessage::Voice(msg) => MidiMsg::ChannelVoice { channel, msg },
            MidiMessage::Mode(msg) => MidiMsg::ChannelMode { channel, msg },
        })
    }

    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        self.to_midi_msg().map(|msg| msg.to_midi())
    }

    pub fn from_bytes(bytes: &[u8], time: RealTime) -> Result<Self> {
        let (msg, _len) = MidiMsg::from_midi(bytes).map_err(|e| Error::Parse(format!("{e:?}")))?;
        match msg {
            MidiMsg::ChannelVoice { channel, msg } => {
                Ok(Self::voice(time, msg).on_channel(channel as u8))
            }
            MidiMsg::ChannelMode { channel, msg } => {
                Ok(Self::new(time, MidiMessage::Mode(msg)).on_channel(channel as u8))
            }
            _ => Err(Error::NotChannelMessage),
        }
    }
}
