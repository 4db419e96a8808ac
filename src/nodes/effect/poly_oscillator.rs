use tracing::warn;

use crate::config::EngineConfig;
use crate::midi::{note_to_frequency, MidiAction, MidiActionKind};
use crate::node::{EnumParam, NodeCore, NodeKind, NodeSnapshot, SignalNode};
use crate::port::{Port, PortSide, PortType};
use crate::signal::{Automation, ResourceId, ResourceKind, SignalContext};
use crate::Id;

const GATE_RAMP: f64 = 0.005;

struct Voice {
    oscillator: ResourceId,
    gate: ResourceId,
}

/// One oscillator and gate per voice slot, driven by a polyphonic input.
pub struct PolyphonicOscillator {
    core: NodeCore,
    voices: Vec<Voice>,
}

impl PolyphonicOscillator {
    pub fn new(snapshot: &NodeSnapshot, ctx: &mut SignalContext, config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::PolyphonicOscillator);

        let output = ctx.create_with_value(ResourceKind::Gain, 1.0);
        let voices = (0..config.max_voices.max(1))
            .map(|_| {
                let oscillator = core.own(ctx.create(ResourceKind::Oscillator));
                let gate = core.own(ctx.create_with_value(ResourceKind::Gain, 0.0));
                let _ = ctx.connect(oscillator, gate);
                let _ = ctx.connect(gate, output);
                Voice { oscillator, gate }
            })
            .collect();

        core.add_port(Port::event("input", PortType::Polyphonic, PortSide::Input, config.outbox_capacity));
        core.add_port(Port::audio("output", PortSide::Output, output));
        core.add_enum("type", EnumParam::new("sine", &["sine", "square", "sawtooth", "triangle"]));

        Self { core, voices }
    }

    fn gate(ctx: &mut SignalContext, voice: &Voice, time: f64, open: bool) {
        let value = if open { 1.0 } else { 0.0 };
        let _ = ctx.schedule(voice.gate, Automation { time, value, time_constant: GATE_RAMP });
    }
}

impl SignalNode for PolyphonicOscillator {
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
        let Some(slot) = action.voice else {
            warn!(node_id = %self.core.id(), "polyphonic action without a voice");
            return;
        };
        let Some(voice) = self.voices.get(slot) else {
            warn!(node_id = %self.core.id(), slot, "voice out of range");
            return;
        };

        match action.kind {
            MidiActionKind::Note { gate: true, note, .. } => {
                let frequency = Automation { time: action.time, value: note_to_frequency(note), time_constant: 0.0 };
                let _ = ctx.schedule(voice.oscillator, frequency);
                Self::gate(ctx, voice, action.time, true);
            }
            MidiActionKind::Note { gate: false, .. } => Self::gate(ctx, voice, action.time, false),
            MidiActionKind::Gate { gate } => Self::gate(ctx, voice, action.time, gate),
        }
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let now = ctx.current_time();
        for voice in &self.voices {
            Self::gate(ctx, voice, now, false);
        }
    }

    fn name(&self) -> &'static str {
        "Polyphonic Oscillator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gates_follow_voice_tagged_notes() {
        let config = EngineConfig::default();
        let mut ctx = SignalContext::new(&config);
        let mut node = PolyphonicOscillator::new(
            &NodeSnapshot::new("osc", NodeKind::PolyphonicOscillator),
            &mut ctx,
            &config,
        );
        let input = Id::from("input");

        node.on_midi(&mut ctx, &input, MidiAction::note_on(0.0, 69, 100).on_voice(2));
        assert_eq!(ctx.value(node.voices[2].oscillator), Some(440.0));
        assert_eq!(ctx.value(node.voices[2].gate), Some(1.0));

        node.on_midi(&mut ctx, &input, MidiAction::note_off(0.5, 69).on_voice(2));
        assert_eq!(ctx.value(node.voices[2].gate), Some(0.0));

        // Untagged or out-of-range actions are ignored.
        node.on_midi(&mut ctx, &input, MidiAction::note_on(0.0, 60, 100));
        node.on_midi(&mut ctx, &input, MidiAction::note_on(0.0, 60, 100).on_voice(9));
        assert!(node.voices.iter().all(|v| ctx.value(v.gate) == Some(0.0)));
    }

    #[test]
    fn disabled_oscillator_keeps_gates_closed() {
        let config = EngineConfig::default();
        let mut ctx = SignalContext::new(&config);
        let mut node = PolyphonicOscillator::new(
            &NodeSnapshot::new("osc", NodeKind::PolyphonicOscillator),
            &mut ctx,
            &config,
        );
        node.core.enabled = false;
        node.on_disable(&mut ctx);

        node.on_midi(&mut ctx, &Id::from("input"), MidiAction::note_on(0.0, 69, 100).on_voice(0));
        assert_eq!(ctx.value(node.voices[0].gate), Some(0.0));
    }
}
