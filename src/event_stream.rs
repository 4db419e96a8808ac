//! Beat-indexed event streams and the windowed reader sequencers pull from.
//!
//! An [`EventSource`] hands out events one at a time in non-decreasing beat order,
//! already offset by however many times it has looped. The [`EventStreamReader`]
//! keeps a monotonic beat cursor and, on each [`read`](EventStreamReader::read),
//! returns exactly the events that fall inside the next window.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::time::{check_precision, round_to, DEFAULT_PRECISION};

/// A single scheduled gate change, optionally carrying a note.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequencerEvent {
    pub beat: f64,
    pub gate: bool,
    #[serde(default)]
    pub note: Option<u8>,
}

impl SequencerEvent {
    pub const fn note(beat: f64, note: u8) -> Self {
        Self { beat, gate: true, note: Some(note) }
    }

    pub const fn note_off(beat: f64, note: u8) -> Self {
        Self { beat, gate: false, note: Some(note) }
    }

    pub const fn gate_off(beat: f64) -> Self {
        Self { beat, gate: false, note: None }
    }
}

/// An event returned by a read, positioned relative to the cursor at the start of that read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NextEvent {
    pub event: SequencerEvent,
    pub distance_from_cursor: f64,
}

/// Ordered supply of events. Beats must never decrease between calls.
pub trait EventSource {
    /// `None` once the source is exhausted (looping sources never are, unless empty).
    fn next_event(&mut self) -> Option<SequencerEvent>;

    /// Position the source so the next event returned is the first at or after `beat`.
    fn seek(&mut self, beat: f64);
}

/// A fixed list of events, played once or looped every `loop_length` beats.
#[derive(Clone, Debug)]
pub struct LoopingEventStream {
    events: Vec<SequencerEvent>,
    loop_length: Option<f64>,
    next_index: usize,
    loops: u64,
}

impl LoopingEventStream {
    /// Events are sorted by beat on construction. Events at or past
    /// `loop_length` are dropped since they could never play in order.
    pub fn looping(mut events: Vec<SequencerEvent>, loop_length: f64) -> Self {
        events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        let loop_length = if loop_length > 0.0 {
            events.retain(|e| e.beat >= 0.0 && e.beat < loop_length);
            Some(loop_length)
        } else {
            warn!(loop_length, "non-positive loop length, stream will play once");
            None
        };
        Self {
            events,
            loop_length,
            next_index: 0,
            loops: 0,
        }
    }

    /// A stream that ends after its last event.
    pub fn once(mut events: Vec<SequencerEvent>) -> Self {
        events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        Self {
            events,
            loop_length: None,
            next_index: 0,
            loops: 0,
        }
    }

    /// The hard-coded reference loop: 17 events over 16 beats.
    pub fn demo() -> Self {
        const DEMO: [SequencerEvent; 17] = [
            SequencerEvent::note(0.0, 60),
            SequencerEvent::note(2.0, 63),
            SequencerEvent::note(3.0, 67),
            SequencerEvent::note(4.0, 60),
            SequencerEvent::note(6.0, 63),
            SequencerEvent::note(7.0, 67),
            SequencerEvent::note(7.5, 70),
            SequencerEvent::note(8.0, 69),
            SequencerEvent::note(9.0, 65),
            SequencerEvent::note(10.0, 63),
            SequencerEvent::note(10.5, 65),
            SequencerEvent::note(11.0, 67),
            SequencerEvent::note(12.0, 60),
            SequencerEvent::note(13.0, 58),
            SequencerEvent::note(13.5, 62),
            SequencerEvent::note(14.0, 60),
            SequencerEvent::gate_off(15.5),
        ];
        Self::looping(DEMO.to_vec(), 16.0)
    }

    pub fn loop_length(&self) -> Option<f64> {
        self.loop_length
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSource for LoopingEventStream {
    fn next_event(&mut self) -> Option<SequencerEvent> {
        if self.next_index >= self.events.len() {
            if self.loop_length.is_none() || self.events.is_empty() {
                return None;
            }
            self.loops += 1;
            self.next_index = 0;
        }

        let event = self.events[self.next_index];
        self.next_index += 1;

        let offset = self.loop_length.map_or(0.0, |len| self.loops as f64 * len);
        Some(SequencerEvent {
            beat: round_to(event.beat + offset, DEFAULT_PRECISION),
            ..event
        })
    }

    fn seek(&mut self, beat: f64) {
        let beat = beat.max(0.0);
        let local = match self.loop_length {
            Some(len) => {
                self.loops = (beat / len).floor() as u64;
                beat - self.loops as f64 * len
            }
            None => {
                self.loops = 0;
                beat
            }
        };
        self.next_index = self
            .events
            .iter()
            .position(|e| e.beat >= local)
            .unwrap_or(self.events.len());
    }
}

/// Reads an [`EventSource`] in forward windows measured in beats.
///
/// The cursor advances by exactly the requested window on every non-empty read,
/// regardless of how many events were found.
///
/// ```
/// use tonegraph::event_stream::{EventStreamReader, LoopingEventStream, SequencerEvent};
///
/// let events = vec![
///     SequencerEvent::note(0.0, 60),
///     SequencerEvent::note(2.0, 62),
///     SequencerEvent::note(3.0, 64),
/// ];
/// let mut reader = EventStreamReader::new(LoopingEventStream::once(events));
///
/// let first = reader.read(2.5);
/// assert_eq!(first.len(), 2);
/// assert_eq!(first[1].distance_from_cursor, 2.0);
///
/// let second = reader.read(1.0);
/// assert_eq!(second[0].distance_from_cursor, 0.5);
/// assert_eq!(reader.cursor(), 3.5);
/// ```
#[derive(Clone, Debug)]
pub struct EventStreamReader<S: EventSource> {
    source: S,
    beat_cursor: f64,
    current: Option<SequencerEvent>,
    precision: f64,
}

impl<S: EventSource> EventStreamReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_precision(source, DEFAULT_PRECISION)
    }

    pub fn with_precision(mut source: S, precision: f64) -> Self {
        let current = source.next_event();
        Self {
            source,
            beat_cursor: 0.0,
            current,
            precision,
        }
    }

    /// Current beat position.
    pub fn cursor(&self) -> f64 {
        self.beat_cursor
    }

    /// Next event that has not been handed out yet.
    pub fn peek(&self) -> Option<&SequencerEvent> {
        self.current.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn distance(&self, event: &SequencerEvent) -> f64 {
        let distance = round_to(event.beat - self.beat_cursor, self.precision);
        check_precision("event distance", distance, self.precision);
        distance
    }

    /// Take every pending event closer to the cursor than `beats_to_read`, then
    /// advance the cursor by `beats_to_read`.
    pub fn read(&mut self, beats_to_read: f64) -> Vec<NextEvent> {
        if !(beats_to_read > 0.0) {
            return Vec::new();
        }

        let mut read = Vec::new();

        while let Some(event) = self.current {
            let distance_from_cursor = self.distance(&event);
            if distance_from_cursor >= beats_to_read {
                break;
            }
            read.push(NextEvent {
                event,
                distance_from_cursor,
            });
            self.current = self.source.next_event();
        }

        self.beat_cursor = round_to(self.beat_cursor + beats_to_read, self.precision);
        check_precision("beat cursor", self.beat_cursor, self.precision);

        read
    }

    /// Swap in a new source, positioned at the current cursor. The cursor itself never moves back.
    pub fn rebase(&mut self, mut source: S) {
        source.seek(self.beat_cursor);
        self.current = source.next_event();
        self.source = source;
    }

    /// Back to beat zero with the source rewound. Only owners that are being reset call this.
    pub fn reset(&mut self) {
        self.beat_cursor = 0.0;
        self.source.seek(0.0);
        self.current = self.source.next_event();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beats(events: &[NextEvent]) -> Vec<f64> {
        events.iter().map(|e| e.event.beat).collect()
    }

    #[test]
    fn reads_window_relative_to_cursor() {
        let source = LoopingEventStream::looping(
            vec![
                SequencerEvent::note(0.0, 60),
                SequencerEvent::note(2.0, 62),
                SequencerEvent::note(3.0, 64),
            ],
            4.0,
        );
        let mut reader = EventStreamReader::new(source);

        let first = reader.read(2.5);
        assert_eq!(beats(&first), vec![0.0, 2.0]);
        assert_eq!(first[0].distance_from_cursor, 0.0);
        assert_eq!(first[1].distance_from_cursor, 2.0);
        assert_eq!(reader.cursor(), 2.5);

        let second = reader.read(1.0);
        assert_eq!(beats(&second), vec![3.0]);
        assert_eq!(second[0].distance_from_cursor, 0.5);
    }

    #[test]
    fn zero_or_negative_window_reads_nothing() {
        let mut reader = EventStreamReader::new(LoopingEventStream::demo());
        assert!(reader.read(0.0).is_empty());
        assert!(reader.read(-1.0).is_empty());
        assert!(reader.read(f64::NAN).is_empty());
        assert_eq!(reader.cursor(), 0.0);
    }

    #[test]
    fn demo_loop_offsets_after_wrap() {
        let mut reader = EventStreamReader::new(LoopingEventStream::demo());
        let first_loop = reader.read(16.0);
        assert_eq!(first_loop.len(), 17);
        assert!(!first_loop.last().unwrap().event.gate);

        let second = reader.read(0.5);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event.beat, 16.0);
        assert_eq!(second[0].distance_from_cursor, 0.0);
        assert_eq!(reader.source().loops(), 1);
    }

    #[test]
    fn exhausted_stream_stops_emitting() {
        let mut reader = EventStreamReader::new(LoopingEventStream::once(vec![SequencerEvent::note(1.0, 60)]));
        assert_eq!(reader.read(10.0).len(), 1);
        assert!(reader.read(10.0).is_empty());
        assert_eq!(reader.cursor(), 20.0);
    }

    #[test]
    fn empty_looping_stream_never_spins() {
        let mut reader = EventStreamReader::new(LoopingEventStream::looping(Vec::new(), 4.0));
        assert!(reader.read(100.0).is_empty());
    }

    #[test]
    fn rebase_skips_events_behind_cursor() {
        let mut reader = EventStreamReader::new(LoopingEventStream::looping(vec![SequencerEvent::note(0.0, 60)], 4.0));
        reader.read(5.0);
        reader.rebase(LoopingEventStream::looping(
            vec![SequencerEvent::note(0.5, 70), SequencerEvent::note(2.0, 72)],
            4.0,
        ));
        let events = reader.read(4.0);
        assert_eq!(beats(&events), vec![6.0, 8.5]);
        assert_eq!(events[0].distance_from_cursor, 1.0);
    }

    #[test]
    fn reset_rewinds_cursor_and_source() {
        let mut reader = EventStreamReader::new(LoopingEventStream::demo());
        reader.read(20.0);
        reader.reset();
        assert_eq!(reader.cursor(), 0.0);
        assert_eq!(reader.peek().map(|e| e.beat), Some(0.0));
    }
}
