//! Channel manager lifecycle scenarios against a real pool.

mod common;

use common::{init_tracing, ms, CountingPool, DeferredVacatePool, TestInstrument};
use segno_channels::{
    AllocationMode, ChannelManager, ChannelPool, ChannelState, ControllerSnapshot, InstrumentEvent,
    MidiDevice, InstrumentSettings, PoolConfig,
};
use segno_midi::{EventKind, EventList, RealTime, ScheduledEvent};

fn occupy(pool: &CountingPool, channels: usize) -> Vec<segno_channels::ChannelInterval> {
    (0..channels)
        .map(|_| pool.inner.request(ms(0), ms(1000)).unwrap().interval)
        .collect()
}

// ---------------------------------------------------------------------------
// Setup emission
// ---------------------------------------------------------------------------

#[test]
fn test_make_ready_emits_setup_on_granted_channel() {
    init_tracing();
    let pool = CountingPool::new(16);
    occupy(&pool, 3);
    let instrument = TestInstrument::new(pool.clone());

    let manager = ChannelManager::new(instrument.clone());
    manager.set_required_interval(ms(0), ms(1000), RealTime::ZERO, RealTime::ZERO);

    let snapshot = ControllerSnapshot::from_instrument(instrument.as_ref()).with_pitch_bend(0x1000);
    let mut sink = EventList::new();
    assert!(manager.make_ready(&mut sink, ms(0), &snapshot, Some(7)));
    assert_eq!(manager.channel(), Some(3));
    assert_eq!(manager.state(), ChannelState::Ready);

    let kinds: Vec<_> = sink.events().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::BankSelect { msb: 1, lsb: 2 },
            EventKind::ProgramChange(5),
            EventKind::ResetAllControllers,
            EventKind::ControlChange { control: 7, value: 100 },
            EventKind::ControlChange { control: 10, value: 64 },
            EventKind::PitchBend(0x1000),
        ]
    );
    assert!(sink.events().all(|e| e.channel == Some(3)));

    // second call: no further setup
    assert!(manager.make_ready(&mut sink, ms(10), &snapshot, Some(7)));
    assert_eq!(sink.len(), 6);
}

#[test]
fn test_changed_notification_forces_setup_again() {
    let pool = CountingPool::new(16);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    let snapshot = ControllerSnapshot::new();
    let mut sink = EventList::new();

    // from every reachable state
    instrument.notify(InstrumentEvent::Changed);
    assert_eq!(manager.state(), ChannelState::NoChannel);

    assert!(manager.make_ready(&mut sink, ms(0), &snapshot, None));
    instrument.notify(InstrumentEvent::Changed);
    assert_eq!(manager.state(), ChannelState::Uninitialized);

    sink.clear();
    let note = ScheduledEvent::note_on(ms(1), 60, 90);
    assert!(manager.do_insert(&mut sink, note, ms(1), &snapshot, false, None));
    let kinds: Vec<_> = sink.events().map(|e| e.kind()).collect();
    assert_eq!(kinds.first(), Some(&EventKind::BankSelect { msb: 1, lsb: 2 }));
    assert_eq!(kinds.last(), Some(&EventKind::NoteOn { note: 60, velocity: 90 }));
}

// ---------------------------------------------------------------------------
// Allocation failure and retry suppression
// ---------------------------------------------------------------------------

#[test]
fn test_failed_allocation_suppresses_lazy_retry() {
    init_tracing();
    let pool = CountingPool::new(1);
    let held = occupy(&pool, 1);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    manager.set_required_interval(ms(0), ms(1000), RealTime::ZERO, RealTime::ZERO);

    let mut sink = EventList::new();
    assert!(!manager.make_ready(&mut sink, ms(0), &ControllerSnapshot::new(), None));
    assert!(sink.is_empty());
    assert_eq!(manager.state(), ChannelState::AllocationFailed);
    assert!(manager.allocation_attempted());
    assert_eq!(pool.requests(), 1);

    // insertion calls do not hammer the pool
    let note = ScheduledEvent::note_on(ms(0), 60, 100);
    for _ in 0..3 {
        assert!(!manager.do_insert(&mut sink, note, ms(0), &ControllerSnapshot::new(), false, None));
        assert!(!manager.make_ready(&mut sink, ms(0), &ControllerSnapshot::new(), None));
    }
    assert_eq!(pool.requests(), 1);
    assert!(sink.is_empty());

    // an explicit reallocate asks again
    assert!(!manager.reallocate(false));
    assert_eq!(pool.requests(), 2);

    pool.release(&held[0]);
    assert!(manager.reallocate(false));
    assert_eq!(pool.requests(), 3);
    assert_eq!(manager.channel(), Some(0));
    assert!(manager.do_insert(&mut sink, note, ms(0), &ControllerSnapshot::new(), false, None));
}

#[test]
fn test_reallocate_after_failure_finds_moved_range() {
    let pool = CountingPool::new(1);
    occupy(&pool, 1);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    manager.set_required_interval(ms(0), ms(1000), RealTime::ZERO, RealTime::ZERO);
    assert!(!manager.reallocate(false));
    assert_eq!(manager.state(), ChannelState::AllocationFailed);

    manager.set_required_interval(ms(5000), ms(6000), RealTime::ZERO, RealTime::ZERO);
    assert!(manager.reallocate(false));
    assert_eq!(pool.requests(), 2);
    assert_eq!(manager.channel(), Some(0));
    assert_eq!(manager.state(), ChannelState::Uninitialized);
}

#[test]
fn test_back_to_back_requirements_share_channel() {
    let pool = CountingPool::new(1);
    let instrument = TestInstrument::new(pool.clone());
    let first = ChannelManager::new(instrument.clone());
    let second = ChannelManager::new(instrument.clone());
    first.set_required_interval(ms(0), ms(1000), RealTime::ZERO, RealTime::ZERO);
    second.set_required_interval(ms(1000), ms(2000), RealTime::ZERO, RealTime::ZERO);

    assert!(first.reallocate(false));
    assert!(second.reallocate(false));
    assert_eq!((first.channel(), second.channel()), (Some(0), Some(0)));
    assert_eq!(pool.inner.lease_count(), 2);
}

#[test]
fn test_free_allows_retry() {
    let pool = CountingPool::new(1);
    let held = occupy(&pool, 1);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    assert!(!manager.reallocate(false));

    pool.release(&held[0]);
    manager.free_channel_interval();
    assert!(!manager.allocation_attempted());

    let mut sink = EventList::new();
    assert!(manager.make_ready(&mut sink, ms(0), &ControllerSnapshot::new(), None));
    assert_eq!(pool.requests(), 2);
}

// ---------------------------------------------------------------------------
// Vacate
// ---------------------------------------------------------------------------

#[test]
fn test_vacate_drops_channel_until_reallocated() {
    init_tracing();
    let pool = CountingPool::new(4);
    let held = occupy(&pool, 3);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    manager.set_required_interval(ms(0), ms(1000), RealTime::ZERO, RealTime::ZERO);

    let snapshot = ControllerSnapshot::new();
    let mut sink = EventList::new();
    assert!(manager.make_ready(&mut sink, ms(0), &snapshot, None));
    assert_eq!(manager.channel(), Some(3));

    assert_eq!(pool.inner.reserve_fixed_channel(3).unwrap(), 1);
    assert_eq!(manager.state(), ChannelState::NoChannel);
    assert_eq!(manager.channel(), None);

    sink.clear();
    let note = ScheduledEvent::note_on(ms(500), 64, 100);
    assert!(!manager.do_insert(&mut sink, note, ms(500), &snapshot, false, None));
    assert!(sink.is_empty());

    pool.release(&held[1]);
    assert!(manager.reallocate(true));
    assert_eq!(manager.channel(), Some(1));
    assert!(manager.do_insert(&mut sink, note, ms(500), &snapshot, false, None));
    assert_eq!(sink.events().filter(|e| e.is_setup()).count(), 3);
    assert!(sink.events().all(|e| e.channel == Some(1)));
}

#[test]
fn test_late_vacate_notice_spares_newer_grant() {
    init_tracing();
    let pool = DeferredVacatePool::new(1);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    manager.set_required_interval(ms(0), ms(1000), RealTime::ZERO, RealTime::ZERO);
    assert!(manager.reallocate(false));
    let first = manager.interval();

    // revoked in the pool; the notice is still on its way
    assert_eq!(pool.inner.vacate_channel(0).unwrap(), 1);
    assert_eq!(pool.inner.lease_count(), 0);
    assert!(manager.reallocate(true));
    assert_eq!(manager.interval(), first);
    assert_eq!(pool.inner.lease_count(), 1);

    assert_eq!(pool.deliver(), 1);
    assert_eq!(manager.channel(), Some(0));
    assert_eq!(manager.state(), ChannelState::Uninitialized);

    manager.free_channel_interval();
    assert_eq!(pool.inner.lease_count(), 0);
}

#[test]
fn test_delivered_vacate_notice_drops_revoked_lease() {
    let pool = DeferredVacatePool::new(1);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    assert!(manager.reallocate(false));

    pool.inner.vacate_channel(0).unwrap();
    assert_eq!(manager.channel(), Some(0));
    assert_eq!(pool.deliver(), 1);
    assert_eq!(manager.state(), ChannelState::NoChannel);

    let mut sink = EventList::new();
    assert!(manager.make_ready(&mut sink, ms(0), &ControllerSnapshot::new(), None));
    assert_eq!(pool.inner.lease_count(), 1);
}

#[test]
fn test_vacate_of_other_channel_is_ignored() {
    let pool = CountingPool::new(4);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    assert!(manager.reallocate(false));
    assert_eq!(manager.channel(), Some(0));

    let other = pool.inner.request(ms(0), ms(10)).unwrap();
    assert_eq!(other.channel(), 1);
    pool.inner.vacate_channel(1).unwrap();
    assert_eq!(manager.channel(), Some(0));
}

// ---------------------------------------------------------------------------
// Fixed channels
// ---------------------------------------------------------------------------

#[test]
fn test_becoming_fixed_releases_pool_channel() {
    let pool = CountingPool::new(16);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    assert!(manager.reallocate(false));
    assert_eq!(pool.inner.lease_count(), 1);
    let requests = pool.requests();

    instrument.set_fixed(Some(9));
    assert_eq!(manager.mode(), AllocationMode::Fixed);
    assert_eq!(pool.inner.lease_count(), 0);

    assert!(manager.reallocate(false));
    assert_eq!(manager.channel(), Some(9));
    assert_eq!(pool.requests(), requests);

    instrument.set_fixed(None);
    assert!(manager.uses_pool());
    assert_eq!(manager.state(), ChannelState::NoChannel);
}

#[test]
fn test_reallocate_follows_silent_fixed_flip() {
    let pool = CountingPool::new(16);
    let instrument = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(instrument.clone());
    assert!(manager.reallocate(false));
    let requests = pool.requests();

    instrument.set_fixed_silently(Some(9));
    assert!(manager.reallocate(false));
    assert_eq!(manager.channel(), Some(9));
    assert!(!manager.uses_pool());
    assert_eq!(pool.inner.lease_count(), 0);
    assert_eq!(pool.requests(), requests);
}

#[test]
fn test_device_instrument_pinned_mid_playback() {
    let device = MidiDevice::new(2, "Synth", PoolConfig::default()).unwrap();
    let lead = device.add_instrument(InstrumentSettings::default()).unwrap();
    let pad = device.add_instrument(InstrumentSettings::default()).unwrap();

    let lead_manager = ChannelManager::new(lead.clone());
    let pad_manager = ChannelManager::new(pad.clone());
    assert!(lead_manager.reallocate(false));
    assert!(pad_manager.reallocate(false));
    assert_eq!(pad_manager.channel(), Some(1));

    // the lead takes channel 1 away from the pad
    lead.set_fixed_channel(Some(1)).unwrap();
    assert_eq!(pad_manager.state(), ChannelState::NoChannel);
    assert!(lead_manager.reallocate(false));
    assert_eq!(lead_manager.channel(), Some(1));

    let mut sink = EventList::new();
    assert!(pad_manager.make_ready(&mut sink, ms(0), &ControllerSnapshot::new(), None));
    assert_eq!(pad_manager.channel(), Some(0));
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[test]
fn test_device_destroyed_does_not_return_lease() {
    let device = MidiDevice::new(2, "Synth", PoolConfig::default()).unwrap();
    let piano = device.add_instrument(InstrumentSettings::default()).unwrap();
    let manager = ChannelManager::new(piano.clone());
    assert!(manager.reallocate(false));

    device.destroy();
    assert_eq!(manager.state(), ChannelState::Unbound);
    assert_eq!(manager.channel(), None);
    assert_eq!(device.pool().lease_count(), 1);
    assert_eq!(device.pool().vacate_subscriber_count(), 0);
}

#[test]
fn test_stale_notifications_after_rebind_are_ignored() {
    let pool = CountingPool::new(16);
    let first = TestInstrument::new(pool.clone());
    let second = TestInstrument::new(pool.clone());
    let manager = ChannelManager::new(first.clone());

    manager.rebind(Some(second.clone()));
    assert_eq!(first.subscriber_count(), 0);
    assert!(manager.reallocate(false));

    assert_eq!(first.notify(InstrumentEvent::Destroyed), 0);
    assert!(manager.channel().is_some());

    second.notify(InstrumentEvent::Destroyed);
    assert_eq!(manager.state(), ChannelState::Unbound);
    assert_eq!(pool.inner.lease_count(), 0);
}
