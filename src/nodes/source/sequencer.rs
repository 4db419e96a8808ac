use tracing::trace;

use crate::config::EngineConfig;
use crate::event_stream::{EventStreamReader, LoopingEventStream, SequencerEvent};
use crate::midi::{MidiAction, MidiActionKind};
use crate::node::{NodeCore, NodeKind, NodeSnapshot, NumberParam, SignalNode, Tick};
use crate::port::{Port, PortSide, PortType};
use crate::signal::SignalContext;
use crate::time::{ceil_to, from_beats, round_to, to_beats};

pub(super) const TEMPO: &str = "tempo";

/// Song-time bookkeeping shared by the sequencer kinds.
///
/// The song start is anchored on the first tick after (re)enable, rounded up to
/// the next quantum so the first scheduled event is never in the past. `cursor`
/// is how many seconds of song time have been scheduled so far.
#[derive(Clone, Debug)]
pub struct Transport {
    song_start: Option<f64>,
    cursor: f64,
    precision: f64,
    quantum: f64,
}

/// A span of song time to schedule this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    /// Audio-clock time of the window's first instant
    pub origin: f64,
    pub seconds: f64,
}

impl Transport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            song_start: None,
            cursor: 0.0,
            precision: config.beat_precision,
            quantum: config.song_start_quantum,
        }
    }

    pub fn song_start(&self) -> Option<f64> {
        self.song_start
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    fn anchor(&self, now: f64) -> f64 {
        if self.quantum > 0.0 {
            ceil_to(now + self.quantum, 1.0 / self.quantum)
        } else {
            now
        }
    }

    /// The next unscheduled span up to `current_time + max_read_ahead`, if any.
    pub fn window(&mut self, tick: Tick) -> Option<Window> {
        let p = self.precision;
        let start = match self.song_start {
            Some(start) => start,
            None => *self.song_start.insert(self.anchor(tick.current_time)),
        };
        let song_time = round_to(tick.current_time - start, p);
        let target = ceil_to(song_time + tick.max_read_ahead, p);
        let distance = round_to(target - self.cursor, p);
        if distance <= 0.0 {
            return None;
        }

        let window = Window {
            origin: round_to(start + self.cursor, p),
            seconds: distance,
        };
        self.cursor = target;
        Some(window)
    }

    /// Audio-clock time of an event `beats` into `window` at `bpm`.
    pub fn time_at(&self, window: Window, beats: f64, bpm: f64) -> f64 {
        round_to(window.origin + from_beats(beats, bpm), self.precision)
    }

    /// Stop and forget the anchor. Returns the time a closing gate-off belongs at.
    pub fn stop(&mut self, now: f64) -> f64 {
        let at = match self.song_start {
            Some(start) => round_to(start + self.cursor, self.precision).max(now),
            None => now,
        };
        self.song_start = None;
        self.cursor = 0.0;
        at
    }
}

pub(super) fn to_action(event: &SequencerEvent, time: f64) -> MidiAction {
    match event.note {
        Some(note) => MidiAction {
            time,
            kind: MidiActionKind::Note {
                gate: event.gate,
                note,
                velocity: if event.gate { 100 } else { 0 },
                off_note: None,
            },
            voice: None,
        },
        None => MidiAction::gate(time, event.gate),
    }
}

/// Read one tick's worth of events from `reader` and queue them on `port`.
pub(super) fn schedule(
    core: &mut NodeCore,
    transport: &mut Transport,
    reader: &mut EventStreamReader<LoopingEventStream>,
    tick: Tick,
    bpm: f64,
) {
    if bpm <= 0.0 {
        return;
    }
    let Some(window) = transport.window(tick) else {
        return;
    };
    let beats = to_beats(window.seconds, bpm);
    for next in reader.read(beats) {
        let time = transport.time_at(window, next.distance_from_cursor, bpm);
        trace!(node_id = %core.id(), beat = next.event.beat, time, "scheduling event");
        core.emit("output", to_action(&next.event, time));
    }
}

/// Fixed-tempo sequencer playing the built-in 16-beat loop on "output".
pub struct Sequencer {
    core: NodeCore,
    transport: Transport,
    reader: EventStreamReader<LoopingEventStream>,
}

impl Sequencer {
    pub fn new(snapshot: &NodeSnapshot, _ctx: &mut SignalContext, config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::Sequencer);
        core.add_port(Port::event("output", PortType::Midi, PortSide::Output, config.outbox_capacity));
        core.add_number(TEMPO, NumberParam::new(240.0, 0.001, 999.99));

        Self {
            core,
            transport: Transport::new(config),
            reader: EventStreamReader::with_precision(LoopingEventStream::demo(), config.beat_precision),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn beat_cursor(&self) -> f64 {
        self.reader.cursor()
    }
}

impl SignalNode for Sequencer {
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
        let bpm = self.core.number(TEMPO);
        schedule(&mut self.core, &mut self.transport, &mut self.reader, tick, bpm);
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let at = self.transport.stop(ctx.current_time());
        self.core.emit("output", MidiAction::gate(at, false));
        self.reader.reset();
    }

    fn name(&self) -> &'static str {
        "Sequencer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Id;

    fn tick(current_time: f64) -> Tick {
        Tick {
            current_time,
            max_read_ahead: 0.1,
        }
    }

    fn sequencer(ctx: &mut SignalContext) -> Sequencer {
        Sequencer::new(&NodeSnapshot::new("seq", NodeKind::Sequencer), ctx, &EngineConfig::default())
    }

    fn drain(seq: &mut Sequencer) -> Vec<MidiAction> {
        seq.core.ports_mut().get_mut(&Id::from("output")).unwrap().drain()
    }

    #[test]
    fn song_start_rounds_up_to_next_quantum() {
        let mut transport = Transport::new(&EngineConfig::default());
        assert_eq!(transport.window(tick(0.03)), None);
        assert_eq!(transport.song_start(), Some(0.2));

        let window = transport.window(tick(0.15)).unwrap();
        assert_eq!(window.origin, 0.2);
        assert_eq!(window.seconds, 0.05);
        assert_eq!(transport.cursor(), 0.05);
    }

    #[test]
    fn repeated_tick_at_same_time_schedules_nothing_new() {
        let mut transport = Transport::new(&EngineConfig::default());
        transport.window(tick(0.0));
        assert!(transport.window(tick(0.2)).is_some());
        assert_eq!(transport.window(tick(0.2)), None);
    }

    #[test]
    fn first_note_lands_on_song_start() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut seq = sequencer(&mut ctx);

        seq.on_tick(&mut ctx, tick(0.0));
        assert!(drain(&mut seq).is_empty());

        seq.on_tick(&mut ctx, tick(0.1));
        let actions = drain(&mut seq);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].time, 0.1);
        assert_eq!(actions[0].note(), Some(60));
    }

    #[test]
    fn events_are_spaced_by_tempo() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut seq = sequencer(&mut ctx);

        let mut actions = Vec::new();
        let mut t = 0.0;
        while t < 1.2 {
            seq.on_tick(&mut ctx, tick(t));
            actions.extend(drain(&mut seq));
            t = round_to(t + 0.016, 1000.0);
        }
        // 240 bpm: beats 0, 2, 3 land 0.5s and 0.75s after the first.
        let times: Vec<f64> = actions.iter().map(|a| a.time).take(3).collect();
        assert_eq!(times, vec![0.1, 0.6, 0.85]);
    }

    #[test]
    fn disable_sends_gate_off_and_resets() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let mut seq = sequencer(&mut ctx);
        seq.on_tick(&mut ctx, tick(0.0));
        seq.on_tick(&mut ctx, tick(0.5));
        drain(&mut seq);

        seq.on_disable(&mut ctx);
        let actions = drain(&mut seq);
        assert_eq!(actions.len(), 1);
        assert!(!actions[0].gate_state());
        assert_eq!(seq.transport().song_start(), None);
        assert_eq!(seq.beat_cursor(), 0.0);
    }
}
