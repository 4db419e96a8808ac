use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::midi::{note_to_frequency, MidiAction, MidiActionKind};
use crate::node::{NodeCore, NodeKind, NodeSnapshot, NumberParam, SignalNode};
use crate::port::{Port, PortSide, PortType};
use crate::signal::{Automation, ResourceId, ResourceKind, SignalContext};
use crate::voice::RoundRobin;
use crate::Id;

/// Pitch sources carry frequency normalized against this ceiling.
const MAX_PITCH_FREQUENCY: f64 = 18_000.0;

const PORTAMENTO: &str = "portamento";
const VOICE_COUNT: &str = "voiceCount";

/// Spreads incoming notes over voice slots.
///
/// Slot `i` has its own MIDI gate output `gate{i}` and pitch output `pitch{i}`.
/// The combined, voice-tagged stream also goes out on "poly".
pub struct PolyphonicMidiConverter {
    core: NodeCore,
    voices: RoundRobin,
    pitch_sources: Vec<ResourceId>,
}

fn gate_port(slot: usize) -> String {
    format!("gate{slot}")
}

fn pitch_port(slot: usize) -> String {
    format!("pitch{slot}")
}

impl PolyphonicMidiConverter {
    pub fn new(snapshot: &NodeSnapshot, ctx: &mut SignalContext, config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::PolyphonicMidiConverter);
        let max_voices = config.max_voices.max(1);

        core.add_port(Port::event("input", PortType::Midi, PortSide::Input, config.outbox_capacity));

        let mut pitch_sources = Vec::with_capacity(max_voices);
        for slot in 0..max_voices {
            let source = core.own(ctx.create(ResourceKind::ConstantSource));
            let shaper = ctx.create(ResourceKind::WaveShaper);
            let _ = ctx.connect(source, shaper);
            pitch_sources.push(source);

            core.add_port(Port::event(gate_port(slot), PortType::Midi, PortSide::Output, config.outbox_capacity));
            core.add_port(Port::audio(pitch_port(slot), PortSide::Output, shaper));
        }
        core.add_port(Port::event("poly", PortType::Polyphonic, PortSide::Output, config.outbox_capacity));

        core.add_number(PORTAMENTO, NumberParam::new(0.0, 0.0, 8.0));
        core.add_number(VOICE_COUNT, NumberParam::new(max_voices as f64, 1.0, max_voices as f64));

        Self {
            core,
            voices: RoundRobin::new(max_voices, max_voices),
            pitch_sources,
        }
    }

    pub fn voices(&self) -> &RoundRobin {
        &self.voices
    }

    fn send(&mut self, slot: usize, action: MidiAction) {
        let action = action.on_voice(slot);
        self.core.emit(&gate_port(slot), action);
        self.core.emit("poly", action);
    }

    fn note_on(&mut self, ctx: &mut SignalContext, action: MidiAction, note: u8) {
        let slot = self.voices.note_on(note);
        let value = note_to_frequency(note) / MAX_PITCH_FREQUENCY;
        let automation = Automation {
            time: action.time,
            value,
            time_constant: self.core.number(PORTAMENTO),
        };
        let _ = ctx.schedule(self.pitch_sources[slot], automation);
        trace!(node_id = %self.core.id(), note, slot, "note on");
        self.send(slot, action);
    }

    fn note_off(&mut self, action: MidiAction, note: u8) {
        let Some(slot) = self.voices.note_off(note) else {
            return;
        };
        self.send(slot, action);
    }

    fn set_voice_count(&mut self, ctx: &mut SignalContext, count: f64) {
        let count = count.round().max(1.0) as usize;
        let now = ctx.current_time();
        for slot in self.voices.set_voice_count(count) {
            self.send(slot, MidiAction::gate(now, false));
        }
        let active = self.voices.voice_count();
        for slot in 0..self.voices.max_voices() {
            let enabled = slot < active;
            for port in [gate_port(slot), pitch_port(slot)] {
                if let Some(port) = self.core.ports_mut().get_mut(&Id::from(port)) {
                    port.set_enabled(enabled);
                }
            }
            if !enabled {
                let _ = ctx.set_value(self.pitch_sources[slot], 0.0);
            }
        }
        debug!(node_id = %self.core.id(), active, "voice count changed");
    }
}

impl SignalNode for PolyphonicMidiConverter {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn on_midi(&mut self, ctx: &mut SignalContext, _port_id: &Id, action: MidiAction) {
        if !self.core.is_enabled() {
            return;
        }
        if let MidiActionKind::Note { gate, note, off_note, .. } = action.kind {
            if gate {
                if let Some(off) = off_note {
                    self.note_off(MidiAction::note_off(action.time, off), off);
                }
                self.note_on(ctx, action, note);
            } else {
                self.note_off(action, note);
            }
        }
    }

    fn on_number_param(&mut self, ctx: &mut SignalContext, param_id: &Id, value: f64) {
        if param_id.as_str() == VOICE_COUNT {
            self.set_voice_count(ctx, value);
        }
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let now = ctx.current_time();
        let sounding: Vec<usize> = (0..self.voices.max_voices())
            .filter(|&slot| self.voices.note_in(slot).is_some())
            .collect();
        for slot in sounding {
            self.send(slot, MidiAction::gate(now, false));
        }
        self.voices.reset();
    }

    fn name(&self) -> &'static str {
        "Polyphonic MIDI Converter"
    }
}
