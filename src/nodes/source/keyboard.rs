use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::midi::{apply_octave, MidiAction};
use crate::node::{NodeCore, NodeKind, NodeSnapshot, NumberParam, SignalNode};
use crate::port::{Port, PortSide, PortType};
use crate::shared::{SharedKind, SharedSnapshot};
use crate::signal::SignalContext;
use crate::Id;

const OCTAVE: &str = "octave";
const KEYBOARD_STATE: &str = "keyboardState";

/// Turns a shared keyboard state into notes on "output".
///
/// Key changes become note-ons and note-offs. Keys already held when the graph
/// finishes loading are replayed once, so a late joiner hears them too.
/// Note-offs use the note a key was pressed with, whatever the octave is now.
pub struct Keyboard {
    core: NodeCore,
    held: BTreeSet<u8>,
    /// key -> note currently sounding for it
    sounding: BTreeMap<u8, u8>,
    loaded: bool,
}

impl Keyboard {
    pub fn new(snapshot: &NodeSnapshot, _ctx: &mut SignalContext, config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::Keyboard);
        core.add_port(Port::event("output", PortType::Midi, PortSide::Output, config.outbox_capacity));
        core.add_number(OCTAVE, NumberParam::new(4.0, -1.0, 12.0));
        core.add_reference(KEYBOARD_STATE, SharedKind::KeyboardState);

        Self {
            core,
            held: BTreeSet::new(),
            sounding: BTreeMap::new(),
            loaded: false,
        }
    }

    pub fn held_keys(&self) -> &BTreeSet<u8> {
        &self.held
    }

    fn note(&self, key: u8) -> u8 {
        apply_octave(key, self.core.number(OCTAVE).round() as i32)
    }

    pub fn sounding_notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.sounding.values().copied()
    }

    fn press(&mut self, key: u8, time: f64) {
        let note = self.note(key);
        if let Some(previous) = self.sounding.insert(key, note) {
            self.core.emit("output", MidiAction::note_off(time, previous));
        }
        self.core.emit("output", MidiAction::note_on(time, note, 100));
    }

    fn release(&mut self, key: u8, time: f64) {
        if let Some(note) = self.sounding.remove(&key) {
            self.core.emit("output", MidiAction::note_off(time, note));
        }
    }
}

impl SignalNode for Keyboard {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn on_reference_changed(&mut self, ctx: &mut SignalContext, param_id: &Id, snapshot: &SharedSnapshot) {
        if param_id.as_str() != KEYBOARD_STATE {
            return;
        }
        let SharedSnapshot::KeyboardState(state) = snapshot else {
            warn!(node_id = %self.core.id(), kind = ?snapshot.kind(), "keyboard given a non keyboard reference");
            return;
        };

        let previous = std::mem::replace(&mut self.held, state.pressed_keys.clone());
        if !self.loaded || !self.core.is_enabled() {
            return;
        }

        let now = ctx.current_time();
        for &key in previous.difference(&state.pressed_keys) {
            self.release(key, now);
        }
        for &key in state.pressed_keys.difference(&previous) {
            self.press(key, now);
        }
    }

    fn on_main_graph_loaded(&mut self, ctx: &mut SignalContext) {
        self.loaded = true;
        if !self.core.is_enabled() {
            return;
        }
        let now = ctx.current_time();
        let held: Vec<u8> = self.held.iter().copied().collect();
        debug!(node_id = %self.core.id(), keys = held.len(), "replaying held keys");
        for key in held {
            self.press(key, now);
        }
    }

    fn on_node_to_node(&mut self, ctx: &mut SignalContext, action: MidiAction) {
        if !self.core.is_enabled() {
            return;
        }
        let now = ctx.current_time();
        self.core.emit("output", action.at(now));
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let now = ctx.current_time();
        let keys: Vec<u8> = self.sounding.keys().copied().collect();
        for key in keys {
            self.release(key, now);
        }
    }

    fn name(&self) -> &'static str {
        "Keyboard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::KeyboardState;

    fn keyboard(ctx: &mut SignalContext) -> Keyboard {
        Keyboard::new(&NodeSnapshot::new("kb", NodeKind::Keyboard), ctx, &EngineConfig::default())
    }

    fn state(keys: &[u8]) -> SharedSnapshot {
        SharedSnapshot::KeyboardState(KeyboardState {
            id: "state".into(),
            pressed_keys: keys.iter().copied().collect(),
        })
    }

    fn drain(kb: &mut Keyboard) -> Vec<MidiAction> {
        kb.core.ports_mut().get_mut(&Id::from("output")).unwrap().drain()
    }

    #[test]
    fn held_keys_replay_after_load() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut kb = keyboard(&mut ctx);
        kb.on_reference_changed(&mut ctx, &Id::from(KEYBOARD_STATE), &state(&[0, 4]));
        assert!(drain(&mut kb).is_empty());

        kb.on_main_graph_loaded(&mut ctx);
        let notes: Vec<_> = drain(&mut kb).iter().filter_map(MidiAction::note).collect();
        assert_eq!(notes, vec![48, 52]);
    }

    #[test]
    fn key_changes_become_notes() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut kb = keyboard(&mut ctx);
        kb.on_main_graph_loaded(&mut ctx);
        let param = Id::from(KEYBOARD_STATE);

        kb.on_reference_changed(&mut ctx, &param, &state(&[0]));
        kb.on_reference_changed(&mut ctx, &param, &state(&[7]));
        let actions = drain(&mut kb);
        let summary: Vec<_> = actions.iter().map(|a| (a.note(), a.gate_state())).collect();
        assert_eq!(summary, vec![(Some(48), true), (Some(48), false), (Some(55), true)]);
    }

    #[test]
    fn relays_node_to_node_at_current_time() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        ctx.set_current_time(3.0);
        let mut kb = keyboard(&mut ctx);
        kb.on_node_to_node(&mut ctx, MidiAction::note_on(0.0, 61, 90));
        let actions = drain(&mut kb);
        assert_eq!(actions[0].time, 3.0);
        assert_eq!(actions[0].note(), Some(61));
    }

    #[test]
    fn disabled_keyboard_does_not_relay() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut kb = keyboard(&mut ctx);
        kb.core.enabled = false;
        kb.on_node_to_node(&mut ctx, MidiAction::note_on(0.0, 61, 90));
        assert!(drain(&mut kb).is_empty());
    }

    #[test]
    fn note_off_uses_the_note_that_was_pressed() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut kb = keyboard(&mut ctx);
        kb.on_main_graph_loaded(&mut ctx);
        let param = Id::from(KEYBOARD_STATE);

        kb.on_reference_changed(&mut ctx, &param, &state(&[0]));
        kb.core.params.numbers.get_mut(&Id::from(OCTAVE)).unwrap().value = 5.0;
        kb.on_reference_changed(&mut ctx, &param, &state(&[]));

        let summary: Vec<_> = drain(&mut kb).iter().map(|a| (a.note(), a.gate_state())).collect();
        assert_eq!(summary, vec![(Some(48), true), (Some(48), false)]);
        assert_eq!(kb.sounding_notes().count(), 0);
    }
}
