//! Channel setup dispatch.
//!
//! Synthesizers interpret controllers and pitch bend relative to the selected
//! program, so setup is always emitted as:
//!
//! 1. bank select + program change (each only if the instrument sends one)
//! 2. reset all controllers
//! 3. one control change per snapshot entry, in snapshot order
//! 4. pitch bend, if pending
//!
//! Every event is stamped with `insert_time` and inserted with `ref_time`.

use segno_midi::{ChannelId, EventSink, RealTime, ScheduledEvent, TrackId};

use crate::instrument::Instrument;
use crate::snapshot::ControllerSnapshot;

#[inline]
fn emit<S: EventSink + ?Sized>(
    sink: &mut S,
    ref_time: RealTime,
    event: ScheduledEvent,
    channel: ChannelId,
    track: Option<TrackId>,
) {
    sink.insert(ref_time, event.on_channel(channel).on_track(track));
}

/// Full setup sequence for `instrument` on `channel`. Returns the number of
/// events inserted.
pub fn insert_channel_setup<S: EventSink + ?Sized>(
    sink: &mut S,
    instrument: &dyn Instrument,
    channel: ChannelId,
    ref_time: RealTime,
    insert_time: RealTime,
    snapshot: &ControllerSnapshot,
    track: Option<TrackId>,
) -> usize {
    let mut count =
        insert_bank_and_program(sink, instrument, channel, ref_time, insert_time, track);

    emit(
        sink,
        ref_time,
        ScheduledEvent::reset_all_controllers(insert_time),
        channel,
        track,
    );
    count += 1;

    count += insert_controllers(sink, channel, ref_time, insert_time, snapshot, track);

    if let Some(bend) = snapshot.pitch_bend() {
        emit(
            sink,
            ref_time,
            ScheduledEvent::pitch_bend(insert_time, bend),
            channel,
            track,
        );
        count += 1;
    }

    tracing::trace!(
        "Channel {} setup for instrument {}: {} events at {}",
        channel,
        instrument.id(),
        count,
        insert_time
    );
    count
}

/// Bank select and program change, skipping whichever the instrument does
/// not send.
pub fn insert_bank_and_program<S: EventSink + ?Sized>(
    sink: &mut S,
    instrument: &dyn Instrument,
    channel: ChannelId,
    ref_time: RealTime,
    insert_time: RealTime,
    track: Option<TrackId>,
) -> usize {
    let select = instrument.program();
    let mut count = 0;
    if let Some(bank) = select.bank {
        emit(
            sink,
            ref_time,
            ScheduledEvent::bank_select(insert_time, bank.msb, bank.lsb),
            channel,
            track,
        );
        count += 1;
    }
    if let Some(program) = select.program {
        emit(
            sink,
            ref_time,
            ScheduledEvent::program_change(insert_time, program),
            channel,
            track,
        );
        count += 1;
    }
    count
}

pub fn insert_controllers<S: EventSink + ?Sized>(
    sink: &mut S,
    channel: ChannelId,
    ref_time: RealTime,
    insert_time: RealTime,
    snapshot: &ControllerSnapshot,
    track: Option<TrackId>,
) -> usize {
    for (control, value) in snapshot.iter() {
        insert_controller(sink, channel, ref_time, insert_time, control, value, track);
    }
    snapshot.len()
}

/// A single control change, e.g. for a fixed-channel instrument whose
/// channel needs no setup.
pub fn insert_controller<S: EventSink + ?Sized>(
    sink: &mut S,
    channel: ChannelId,
    ref_time: RealTime,
    insert_time: RealTime,
    control: u8,
    value: u8,
    track: Option<TrackId>,
) {
    emit(
        sink,
        ref_time,
        ScheduledEvent::control_change(insert_time, control & 0x7F, value & 0x7F),
        channel,
        track,
    );
}
