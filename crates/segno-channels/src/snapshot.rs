//! Controller state that has to be reasserted on a freshly set-up channel.

use smallvec::SmallVec;

use crate::instrument::Instrument;

/// Controller number -> last value, plus an optional pending pitch bend.
///
/// Iteration follows the order controllers were first set. Setting an
/// existing controller replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerSnapshot {
    controllers: SmallVec<[(u8, u8); 8]>,
    pitch_bend: Option<u16>,
}

impl ControllerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instrument's static controllers, no pending pitch bend.
    pub fn from_instrument(instrument: &dyn Instrument) -> Self {
        let mut snapshot = Self::new();
        for (control, value) in instrument.static_controllers() {
            snapshot.set(control, value);
        }
        snapshot
    }

    pub fn with_controller(mut self, control: u8, value: u8) -> Self {
        self.set(control, value);
        self
    }

    pub fn with_pitch_bend(mut self, bend: u16) -> Self {
        self.pitch_bend = Some(bend & 0x3FFF);
        self
    }

    pub fn set(&mut self, control: u8, value: u8) {
        let value = value & 0x7F;
        match self.controllers.iter_mut().find(|(c, _)| *c == control) {
            Some(entry) => entry.1 = value,
            None => self.controllers.push((control, value)),
        }
    }

    pub fn get(&self, control: u8) -> Option<u8> {
        self.controllers
            .iter()
            .find(|(c, _)| *c == control)
            .map(|&(_, v)| v)
    }

    pub fn set_pitch_bend(&mut self, bend: Option<u16>) {
        self.pitch_bend = bend.map(|b| b & 0x3FFF);
    }

    #[inline]
    pub fn pitch_bend(&self) -> Option<u16> {
        self.pitch_bend
    }

    #[inline]
    pub fn has_pitch_bend(&self) -> bool {
        self.pitch_bend.is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.controllers.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

impl FromIterator<(u8, u8)> for ControllerSnapshot {
    fn from_iter<I: IntoIterator<Item = (u8, u8)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (control, value) in iter {
            snapshot.set(control, value);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut snapshot = ControllerSnapshot::new()
            .with_controller(7, 100)
            .with_controller(10, 64);
        snapshot.set(7, 90);

        let entries: Vec<_> = snapshot.iter().collect();
        assert_eq!(entries, vec![(7, 90), (10, 64)]);
        assert_eq!(snapshot.get(10), Some(64));
        assert_eq!(snapshot.get(11), None);
    }

    #[test]
    fn test_pitch_bend_pending() {
        let snapshot = ControllerSnapshot::new();
        assert!(!snapshot.has_pitch_bend());

        let bent = snapshot.with_pitch_bend(0x2100);
        assert_eq!(bent.pitch_bend(), Some(0x2100));
    }

    #[test]
    fn test_collect() {
        let snapshot: ControllerSnapshot = [(1, 0), (91, 40), (1, 5)].into_iter().collect();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(1), Some(5));
    }
}
