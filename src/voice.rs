//! Round-robin voice allocation for polyphonic nodes.
//!
//! Note-ons rotate through the active slots and unconditionally steal whatever
//! the chosen slot held. There is no oldest-note or released-first priority: a
//! slot whose note already ended is not preferred over one still sounding. Fast
//! legato playing can therefore cut a held note while a free slot exists.

use tracing::trace;

/// One lane of a polyphonic node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceSlot {
    /// Note currently sounding in this slot, if any
    pub note: Option<u8>,
}

/// Fixed-size set of voice slots with a rotating note-on index.
///
/// ```
/// use tonegraph::voice::RoundRobin;
///
/// let mut voices = RoundRobin::new(4, 2);
/// assert_eq!(voices.note_on(60), 0);
/// assert_eq!(voices.note_on(64), 1);
/// assert_eq!(voices.note_on(67), 0); // steals 60
/// assert_eq!(voices.note_off(60), None);
/// assert_eq!(voices.note_off(67), Some(0));
/// ```
#[derive(Clone, Debug)]
pub struct RoundRobin {
    slots: Vec<VoiceSlot>,
    active: usize,
    next: usize,
}

impl RoundRobin {
    /// `max_voices` slots are allocated up front; `active` of them take notes.
    pub fn new(max_voices: usize, active: usize) -> Self {
        let max_voices = max_voices.max(1);
        Self {
            slots: vec![VoiceSlot::default(); max_voices],
            active: active.clamp(1, max_voices),
            next: 0,
        }
    }

    pub fn max_voices(&self) -> usize {
        self.slots.len()
    }

    pub fn voice_count(&self) -> usize {
        self.active
    }

    pub fn slots(&self) -> &[VoiceSlot] {
        &self.slots
    }

    pub fn note_in(&self, slot: usize) -> Option<u8> {
        self.slots.get(slot).and_then(|s| s.note)
    }

    /// Assign `note` to the next slot in rotation and return that slot.
    pub fn note_on(&mut self, note: u8) -> usize {
        let slot = self.next % self.active;
        if let Some(stolen) = self.slots[slot].note {
            trace!(slot, stolen, note, "voice stolen");
        }
        self.slots[slot].note = Some(note);
        self.next = (slot + 1) % self.active;
        slot
    }

    /// The slot currently sounding `note`, cleared. `None` if nothing holds it.
    pub fn note_off(&mut self, note: u8) -> Option<usize> {
        let slot = self.slots[..self.active]
            .iter()
            .position(|s| s.note == Some(note))?;
        self.slots[slot].note = None;
        Some(slot)
    }

    /// Change how many slots take notes (clamped to `1..=max_voices`).
    ///
    /// Returns the slots that were silenced because they fell outside the new
    /// count. Callers must mute those immediately.
    pub fn set_voice_count(&mut self, count: usize) -> Vec<usize> {
        let count = count.clamp(1, self.slots.len());
        let mut muted = Vec::new();
        if count < self.active {
            for (i, slot) in self.slots.iter_mut().enumerate().skip(count) {
                if slot.note.take().is_some() {
                    muted.push(i);
                }
            }
        }
        self.active = count;
        self.next %= count;
        muted
    }

    /// Forget every note and restart the rotation.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| s.note = None);
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ith_note_on_uses_slot_i_mod_k() {
        for k in 1..=4 {
            let mut voices = RoundRobin::new(4, k);
            for i in 0..20u8 {
                assert_eq!(voices.note_on(i), i as usize % k);
            }
        }
    }

    #[test]
    fn stolen_notes_have_no_slot() {
        let mut voices = RoundRobin::new(4, 2);
        assert_eq!(voices.note_on(60), 0);
        assert_eq!(voices.note_on(64), 1);
        assert_eq!(voices.note_on(67), 0);
        assert_eq!(voices.note_off(60), None);
        assert_eq!(voices.note_off(67), Some(0));
        assert_eq!(voices.note_off(64), Some(1));
        assert_eq!(voices.note_off(64), None);
    }

    #[test]
    fn shrinking_mutes_slots_beyond_count() {
        let mut voices = RoundRobin::new(4, 4);
        for note in [60, 62, 64, 65] {
            voices.note_on(note);
        }
        assert_eq!(voices.set_voice_count(2), vec![2, 3]);
        assert_eq!(voices.note_in(2), None);
        assert_eq!(voices.note_in(3), None);
        for note in 70..80 {
            assert!(voices.note_on(note) < 2);
        }
    }

    #[test]
    fn growing_makes_new_slots_eligible() {
        let mut voices = RoundRobin::new(4, 1);
        voices.note_on(60);
        assert!(voices.set_voice_count(3).is_empty());
        let slots: Vec<_> = (0..3).map(|n| voices.note_on(n)).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn voice_count_is_clamped() {
        let mut voices = RoundRobin::new(4, 9);
        assert_eq!(voices.voice_count(), 4);
        voices.set_voice_count(0);
        assert_eq!(voices.voice_count(), 1);
    }
}
