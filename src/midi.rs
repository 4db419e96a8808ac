//! MIDI actions passed between nodes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MidiActionKind {
    /// Note gate change. A note-on may name a note to release first.
    #[serde(rename_all = "camelCase")]
    Note {
        gate: bool,
        note: u8,
        #[serde(default = "default_velocity")]
        velocity: u8,
        #[serde(default)]
        off_note: Option<u8>,
    },
    /// Gate change without pitch information.
    Gate { gate: bool },
}

fn default_velocity() -> u8 {
    100
}

/// A MIDI action scheduled at `time` on the audio clock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiAction {
    pub time: f64,
    #[serde(flatten)]
    pub kind: MidiActionKind,
    /// Voice slot, set once a polyphonic node has allocated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<usize>,
}

impl MidiAction {
    pub fn note_on(time: f64, note: u8, velocity: u8) -> Self {
        Self {
            time,
            kind: MidiActionKind::Note {
                gate: true,
                note,
                velocity,
                off_note: None,
            },
            voice: None,
        }
    }

    pub fn note_off(time: f64, note: u8) -> Self {
        Self {
            time,
            kind: MidiActionKind::Note {
                gate: false,
                note,
                velocity: 0,
                off_note: None,
            },
            voice: None,
        }
    }

    pub fn gate(time: f64, gate: bool) -> Self {
        Self {
            time,
            kind: MidiActionKind::Gate { gate },
            voice: None,
        }
    }

    pub fn at(self, time: f64) -> Self {
        Self { time, ..self }
    }

    pub fn on_voice(self, voice: usize) -> Self {
        Self {
            voice: Some(voice),
            ..self
        }
    }

    pub fn gate_state(&self) -> bool {
        match self.kind {
            MidiActionKind::Note { gate, .. } | MidiActionKind::Gate { gate } => gate,
        }
    }

    pub fn note(&self) -> Option<u8> {
        match self.kind {
            MidiActionKind::Note { note, .. } => Some(note),
            MidiActionKind::Gate { .. } => None,
        }
    }
}

/// Shift `note` by whole octaves, clamped to the MIDI range.
pub fn apply_octave(note: u8, octave: i32) -> u8 {
    (note as i32 + 12 * octave).clamp(0, 127) as u8
}

/// Equal-tempered frequency of a MIDI note, A4 = 440 Hz.
pub fn note_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octave_shift_clamps() {
        assert_eq!(apply_octave(0, 4), 48);
        assert_eq!(apply_octave(120, 2), 127);
        assert_eq!(apply_octave(5, -1), 0);
    }

    #[test]
    fn actions_deserialize_from_tagged_json() {
        let action: MidiAction =
            serde_json::from_str(r#"{"time": 1.5, "type": "note", "gate": true, "note": 60, "offNote": 55}"#).unwrap();
        assert_eq!(action.note(), Some(60));
        assert!(action.gate_state());
        assert!(matches!(action.kind, MidiActionKind::Note { off_note: Some(55), velocity: 100, .. }));

        let gate: MidiAction = serde_json::from_str(r#"{"time": 0, "type": "gate", "gate": false}"#).unwrap();
        assert_eq!(gate, MidiAction::gate(0.0, false));
    }

    #[test]
    fn a4_is_440() {
        assert_eq!(note_to_frequency(69), 440.0);
    }
}
