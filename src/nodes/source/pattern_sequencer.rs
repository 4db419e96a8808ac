use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::event_stream::{EventStreamReader, LoopingEventStream, SequencerEvent};
use crate::midi::MidiAction;
use crate::node::{NodeCore, NodeKind, NodeSnapshot, NumberParam, SignalNode, Tick};
use crate::port::{Port, PortSide, PortType};
use crate::shared::{ResolvedPatternView, SharedKind, SharedSnapshot};
use crate::signal::SignalContext;
use crate::time::round_to;
use crate::Id;

use super::sequencer::{schedule, Transport, TEMPO};

const RATE: &str = "rate";
const PATTERN_VIEW: &str = "patternView";

/// Plays the loop window of a shared pattern view on "output".
///
/// `rate` scales the tempo. When the pattern changes mid-playback the reader
/// is rebased at its current beat, so playback continues without a jump.
pub struct PatternSequencer {
    core: NodeCore,
    transport: Transport,
    reader: Option<EventStreamReader<LoopingEventStream>>,
    precision: f64,
}

/// Note-on/note-off pairs for every note starting inside the view's loop window,
/// relative to the window start.
fn pattern_events(view: &ResolvedPatternView, precision: f64) -> LoopingEventStream {
    let start = view.view.loop_start_beat;
    let length = view.loop_length();
    let last = round_to(length - 1.0 / precision, precision);

    let mut events = Vec::with_capacity(view.pattern.events.len() * 2);
    for note in &view.pattern.events {
        if note.start_beat < start || note.start_beat >= view.view.loop_end_beat {
            continue;
        }
        let on = round_to(note.start_beat - start, precision);
        let off = round_to(on + note.duration_beats, precision).min(last).max(on);
        events.push(SequencerEvent::note(on, note.note));
        events.push(SequencerEvent::note_off(off, note.note));
    }
    LoopingEventStream::looping(events, length)
}

impl PatternSequencer {
    pub fn new(snapshot: &NodeSnapshot, _ctx: &mut SignalContext, config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::PatternSequencer);
        core.add_port(Port::event("output", PortType::Midi, PortSide::Output, config.outbox_capacity));
        core.add_number(TEMPO, NumberParam::new(120.0, 0.001, 999.99));
        core.add_number(RATE, NumberParam::new(1.0, 0.0625, 16.0));
        core.add_reference(PATTERN_VIEW, SharedKind::MidiPatternView);

        Self {
            core,
            transport: Transport::new(config),
            reader: None,
            precision: config.beat_precision,
        }
    }

    pub fn beat_cursor(&self) -> Option<f64> {
        self.reader.as_ref().map(EventStreamReader::cursor)
    }
}

impl SignalNode for PatternSequencer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn on_tick(&mut self, _ctx: &mut SignalContext, tick: Tick) {
        if !self.core.is_enabled() {
            return;
        }
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        let bpm = self.core.number(TEMPO) * self.core.number(RATE);
        schedule(&mut self.core, &mut self.transport, reader, tick, bpm);
    }

    fn on_reference_changed(&mut self, _ctx: &mut SignalContext, param_id: &Id, snapshot: &SharedSnapshot) {
        if param_id.as_str() != PATTERN_VIEW {
            return;
        }
        let SharedSnapshot::MidiPatternView(view) = snapshot else {
            warn!(node_id = %self.core.id(), kind = ?snapshot.kind(), "pattern sequencer given a non pattern view");
            return;
        };

        let stream = pattern_events(view, self.precision);
        debug!(node_id = %self.core.id(), view_id = %view.view.id, events = stream.len(), "pattern view updated");
        match self.reader.as_mut() {
            Some(reader) => reader.rebase(stream),
            None => self.reader = Some(EventStreamReader::with_precision(stream, self.precision)),
        }
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let at = self.transport.stop(ctx.current_time());
        self.core.emit("output", MidiAction::gate(at, false));
        if let Some(reader) = self.reader.as_mut() {
            reader.reset();
        }
    }

    fn name(&self) -> &'static str {
        "Pattern Sequencer"
    }
}
