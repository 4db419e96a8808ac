//! Externally owned objects that nodes observe by reference.
//!
//! Patterns, pattern views, timeline clips and tracks, and keyboard states live in
//! id-keyed arenas here. Nodes only ever hold an id plus the last resolved
//! snapshot; they never own or mutate these objects.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::GraphError;
use crate::Id;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SharedKind {
    MidiPattern,
    MidiPatternView,
    TimelineClip,
    TimelineTrack,
    KeyboardState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiEvent {
    pub id: Id,
    pub start_beat: f64,
    pub duration_beats: f64,
    pub note: u8,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

fn default_velocity() -> u8 {
    100
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiPattern {
    pub id: Id,
    #[serde(default)]
    pub events: Vec<MidiEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiPatternView {
    pub id: Id,
    pub pattern_id: Id,
    pub loop_start_beat: f64,
    pub loop_end_beat: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineClip {
    pub id: Id,
    pub pattern_view_id: Id,
    pub start_beat: f64,
    pub beat_length: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTrack {
    pub id: Id,
    #[serde(default)]
    pub clip_ids: Vec<Id>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardState {
    pub id: Id,
    #[serde(default)]
    pub pressed_keys: BTreeSet<u8>,
}

/// A stored object plus the number of times it has been replaced.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    fn new(value: T) -> Self {
        Self { version: 0, value }
    }

    fn replace(&mut self, value: T) {
        self.version += 1;
        self.value = value;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPatternView {
    pub view: MidiPatternView,
    pub pattern: MidiPattern,
    pub version: u64,
}

impl ResolvedPatternView {
    pub fn loop_length(&self) -> f64 {
        self.view.loop_end_beat - self.view.loop_start_beat
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedClip {
    pub clip: TimelineClip,
    pub pattern_view: ResolvedPatternView,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTrack {
    pub track: TimelineTrack,
    pub clips: Vec<ResolvedClip>,
}

/// What a node receives when it resolves, or is told about a change to, a reference.
#[derive(Clone, Debug, PartialEq)]
pub enum SharedSnapshot {
    MidiPattern(MidiPattern),
    MidiPatternView(ResolvedPatternView),
    TimelineClip(ResolvedClip),
    TimelineTrack(ResolvedTrack),
    KeyboardState(KeyboardState),
}

impl SharedSnapshot {
    pub fn kind(&self) -> SharedKind {
        match self {
            SharedSnapshot::MidiPattern(_) => SharedKind::MidiPattern,
            SharedSnapshot::MidiPatternView(_) => SharedKind::MidiPatternView,
            SharedSnapshot::TimelineClip(_) => SharedKind::TimelineClip,
            SharedSnapshot::TimelineTrack(_) => SharedKind::TimelineTrack,
            SharedSnapshot::KeyboardState(_) => SharedKind::KeyboardState,
        }
    }
}

/// A node parameter observing a shared object.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Subscriber {
    pub node_id: Id,
    pub param_id: Id,
}

/// One upsert, as delivered by the state layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SharedObject {
    MidiPattern(MidiPattern),
    MidiPatternView(MidiPatternView),
    TimelineClip(TimelineClip),
    TimelineTrack(TimelineTrack),
    KeyboardState(KeyboardState),
}

impl SharedObject {
    pub fn kind(&self) -> SharedKind {
        match self {
            SharedObject::MidiPattern(_) => SharedKind::MidiPattern,
            SharedObject::MidiPatternView(_) => SharedKind::MidiPatternView,
            SharedObject::TimelineClip(_) => SharedKind::TimelineClip,
            SharedObject::TimelineTrack(_) => SharedKind::TimelineTrack,
            SharedObject::KeyboardState(_) => SharedKind::KeyboardState,
        }
    }

    pub fn id(&self) -> &Id {
        match self {
            SharedObject::MidiPattern(o) => &o.id,
            SharedObject::MidiPatternView(o) => &o.id,
            SharedObject::TimelineClip(o) => &o.id,
            SharedObject::TimelineTrack(o) => &o.id,
            SharedObject::KeyboardState(o) => &o.id,
        }
    }
}

/// The five arenas plus who is watching what.
#[derive(Default)]
pub struct SharedStore {
    patterns: HashMap<Id, Versioned<MidiPattern>>,
    pattern_views: HashMap<Id, Versioned<MidiPatternView>>,
    clips: HashMap<Id, Versioned<TimelineClip>>,
    tracks: HashMap<Id, Versioned<TimelineTrack>>,
    keyboards: HashMap<Id, Versioned<KeyboardState>>,

    subscriptions: HashMap<(SharedKind, Id), HashSet<Subscriber>>,
}

fn not_found(kind: SharedKind, id: &Id) -> GraphError {
    GraphError::ReferenceNotFound { kind, id: id.clone() }
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: SharedKind, id: &Id) -> bool {
        match kind {
            SharedKind::MidiPattern => self.patterns.contains_key(id),
            SharedKind::MidiPatternView => self.pattern_views.contains_key(id),
            SharedKind::TimelineClip => self.clips.contains_key(id),
            SharedKind::TimelineTrack => self.tracks.contains_key(id),
            SharedKind::KeyboardState => self.keyboards.contains_key(id),
        }
    }

    pub fn version(&self, kind: SharedKind, id: &Id) -> Option<u64> {
        match kind {
            SharedKind::MidiPattern => self.patterns.get(id).map(|v| v.version),
            SharedKind::MidiPatternView => self.pattern_views.get(id).map(|v| v.version),
            SharedKind::TimelineClip => self.clips.get(id).map(|v| v.version),
            SharedKind::TimelineTrack => self.tracks.get(id).map(|v| v.version),
            SharedKind::KeyboardState => self.keyboards.get(id).map(|v| v.version),
        }
    }

    pub fn len(&self, kind: SharedKind) -> usize {
        match kind {
            SharedKind::MidiPattern => self.patterns.len(),
            SharedKind::MidiPatternView => self.pattern_views.len(),
            SharedKind::TimelineClip => self.clips.len(),
            SharedKind::TimelineTrack => self.tracks.len(),
            SharedKind::KeyboardState => self.keyboards.len(),
        }
    }

    fn resolve_pattern_view(&self, id: &Id) -> Result<ResolvedPatternView, GraphError> {
        let view = self
            .pattern_views
            .get(id)
            .ok_or_else(|| not_found(SharedKind::MidiPatternView, id))?;
        let pattern = self
            .patterns
            .get(&view.value.pattern_id)
            .ok_or_else(|| not_found(SharedKind::MidiPattern, &view.value.pattern_id))?;
        Ok(ResolvedPatternView {
            view: view.value.clone(),
            pattern: pattern.value.clone(),
            version: view.version + pattern.version,
        })
    }

    fn resolve_clip(&self, id: &Id) -> Result<ResolvedClip, GraphError> {
        let clip = self.clips.get(id).ok_or_else(|| not_found(SharedKind::TimelineClip, id))?;
        Ok(ResolvedClip {
            clip: clip.value.clone(),
            pattern_view: self.resolve_pattern_view(&clip.value.pattern_view_id)?,
        })
    }

    fn resolve_track(&self, id: &Id) -> Result<ResolvedTrack, GraphError> {
        let track = self.tracks.get(id).ok_or_else(|| not_found(SharedKind::TimelineTrack, id))?;
        let clips = track
            .value
            .clip_ids
            .iter()
            .filter_map(|clip_id| match self.resolve_clip(clip_id) {
                Ok(clip) => Some(clip),
                Err(err) => {
                    warn!(track_id = %id, %clip_id, %err, "skipping unresolved clip");
                    None
                }
            })
            .collect();
        Ok(ResolvedTrack {
            track: track.value.clone(),
            clips,
        })
    }

    /// Resolve `(kind, id)` into a snapshot, pulling in whatever it depends on.
    pub fn resolve(&self, kind: SharedKind, id: &Id) -> Result<SharedSnapshot, GraphError> {
        Ok(match kind {
            SharedKind::MidiPattern => SharedSnapshot::MidiPattern(
                self.patterns
                    .get(id)
                    .ok_or_else(|| not_found(kind, id))?
                    .value
                    .clone(),
            ),
            SharedKind::MidiPatternView => SharedSnapshot::MidiPatternView(self.resolve_pattern_view(id)?),
            SharedKind::TimelineClip => SharedSnapshot::TimelineClip(self.resolve_clip(id)?),
            SharedKind::TimelineTrack => SharedSnapshot::TimelineTrack(self.resolve_track(id)?),
            SharedKind::KeyboardState => SharedSnapshot::KeyboardState(
                self.keyboards
                    .get(id)
                    .ok_or_else(|| not_found(kind, id))?
                    .value
                    .clone(),
            ),
        })
    }

    /// Insert or replace an object.
    ///
    /// A pattern view must point at a known pattern and a clip at a known pattern
    /// view, otherwise the upsert is rejected and the previous value kept. Returns
    /// every `(kind, id)` whose resolved snapshot may have changed, the object itself first.
    pub fn upsert(&mut self, object: SharedObject) -> Result<Vec<(SharedKind, Id)>, GraphError> {
        let kind = object.kind();
        let id = object.id().clone();

        match object {
            SharedObject::MidiPattern(pattern) => upsert_into(&mut self.patterns, pattern.id.clone(), pattern),
            SharedObject::MidiPatternView(view) => {
                if !self.patterns.contains_key(&view.pattern_id) {
                    error!(view_id = %view.id, pattern_id = %view.pattern_id, "pattern view references a missing pattern");
                    return Err(not_found(SharedKind::MidiPattern, &view.pattern_id));
                }
                upsert_into(&mut self.pattern_views, view.id.clone(), view)
            }
            SharedObject::TimelineClip(clip) => {
                if !self.pattern_views.contains_key(&clip.pattern_view_id) {
                    error!(clip_id = %clip.id, pattern_view_id = %clip.pattern_view_id, "clip references a missing pattern view");
                    return Err(not_found(SharedKind::MidiPatternView, &clip.pattern_view_id));
                }
                upsert_into(&mut self.clips, clip.id.clone(), clip)
            }
            SharedObject::TimelineTrack(track) => {
                for clip_id in track.clip_ids.iter().filter(|c| !self.clips.contains_key(*c)) {
                    warn!(track_id = %track.id, %clip_id, "track lists a clip that does not exist yet");
                }
                upsert_into(&mut self.tracks, track.id.clone(), track)
            }
            SharedObject::KeyboardState(keyboard) => upsert_into(&mut self.keyboards, keyboard.id.clone(), keyboard),
        }

        Ok(self.affected(kind, &id))
    }

    /// Remove an object. Nodes observing it keep their last snapshot.
    pub fn delete(&mut self, kind: SharedKind, id: &Id) -> Result<(), GraphError> {
        let removed = match kind {
            SharedKind::MidiPattern => self.patterns.remove(id).is_some(),
            SharedKind::MidiPatternView => self.pattern_views.remove(id).is_some(),
            SharedKind::TimelineClip => self.clips.remove(id).is_some(),
            SharedKind::TimelineTrack => self.tracks.remove(id).is_some(),
            SharedKind::KeyboardState => self.keyboards.remove(id).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(not_found(kind, id))
        }
    }

    pub fn track_add_clip(&mut self, track_id: &Id, clip_id: Id) -> Result<Vec<(SharedKind, Id)>, GraphError> {
        if !self.clips.contains_key(&clip_id) {
            return Err(not_found(SharedKind::TimelineClip, &clip_id));
        }
        let track = self
            .tracks
            .get_mut(track_id)
            .ok_or_else(|| not_found(SharedKind::TimelineTrack, track_id))?;
        if !track.value.clip_ids.contains(&clip_id) {
            let mut value = track.value.clone();
            value.clip_ids.push(clip_id);
            track.replace(value);
        }
        Ok(self.affected(SharedKind::TimelineTrack, track_id))
    }

    pub fn track_remove_clip(&mut self, track_id: &Id, clip_id: &Id) -> Result<Vec<(SharedKind, Id)>, GraphError> {
        let track = self
            .tracks
            .get_mut(track_id)
            .ok_or_else(|| not_found(SharedKind::TimelineTrack, track_id))?;
        let mut value = track.value.clone();
        value.clip_ids.retain(|c| c != clip_id);
        track.replace(value);
        Ok(self.affected(SharedKind::TimelineTrack, track_id))
    }

    /// `(kind, id)` followed by everything whose resolution passes through it.
    fn affected(&self, kind: SharedKind, id: &Id) -> Vec<(SharedKind, Id)> {
        let mut out = vec![(kind, id.clone())];
        let mut i = 0;
        while i < out.len() {
            let (kind, id) = out[i].clone();
            match kind {
                SharedKind::MidiPattern => out.extend(
                    self.pattern_views
                        .values()
                        .filter(|v| v.value.pattern_id == id)
                        .map(|v| (SharedKind::MidiPatternView, v.value.id.clone())),
                ),
                SharedKind::MidiPatternView => out.extend(
                    self.clips
                        .values()
                        .filter(|c| c.value.pattern_view_id == id)
                        .map(|c| (SharedKind::TimelineClip, c.value.id.clone())),
                ),
                SharedKind::TimelineClip => {
                    for track in self.tracks.values().filter(|t| t.value.clip_ids.contains(&id)) {
                        let entry = (SharedKind::TimelineTrack, track.value.id.clone());
                        if !out.contains(&entry) {
                            out.push(entry);
                        }
                    }
                }
                SharedKind::TimelineTrack | SharedKind::KeyboardState => {}
            }
            i += 1;
        }
        out
    }

    /// Register interest in `(kind, id)` and return its current snapshot.
    pub fn subscribe(&mut self, kind: SharedKind, id: &Id, subscriber: Subscriber) -> Result<SharedSnapshot, GraphError> {
        let snapshot = self.resolve(kind, id)?;
        self.subscriptions.entry((kind, id.clone())).or_default().insert(subscriber);
        Ok(snapshot)
    }

    pub fn unsubscribe(&mut self, kind: SharedKind, id: &Id, subscriber: &Subscriber) -> bool {
        let key = (kind, id.clone());
        let Some(set) = self.subscriptions.get_mut(&key) else {
            return false;
        };
        let removed = set.remove(subscriber);
        if set.is_empty() {
            self.subscriptions.remove(&key);
        }
        removed
    }

    /// Drop every subscription held by `node_id`.
    pub fn unsubscribe_node(&mut self, node_id: &Id) {
        self.subscriptions.retain(|_, set| {
            set.retain(|s| &s.node_id != node_id);
            !set.is_empty()
        });
    }

    pub fn subscribers(&self, kind: SharedKind, id: &Id) -> Vec<Subscriber> {
        self.subscriptions
            .get(&(kind, id.clone()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn upsert_into<T>(arena: &mut HashMap<Id, Versioned<T>>, id: Id, value: T) {
    match arena.get_mut(&id) {
        Some(existing) => existing.replace(value),
        None => {
            arena.insert(id, Versioned::new(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &str, notes: &[(f64, u8)]) -> SharedObject {
        SharedObject::MidiPattern(MidiPattern {
            id: id.into(),
            events: notes
                .iter()
                .enumerate()
                .map(|(i, &(start_beat, note))| MidiEvent {
                    id: Id::new(format!("{id}-{i}")),
                    start_beat,
                    duration_beats: 0.5,
                    note,
                    velocity: 100,
                })
                .collect(),
        })
    }

    fn view(id: &str, pattern_id: &str) -> SharedObject {
        SharedObject::MidiPatternView(MidiPatternView {
            id: id.into(),
            pattern_id: pattern_id.into(),
            loop_start_beat: 0.0,
            loop_end_beat: 4.0,
        })
    }

    fn clip(id: &str, view_id: &str) -> SharedObject {
        SharedObject::TimelineClip(TimelineClip {
            id: id.into(),
            pattern_view_id: view_id.into(),
            start_beat: 0.0,
            beat_length: 4.0,
        })
    }

    #[test]
    fn view_requires_pattern() {
        let mut store = SharedStore::new();
        assert!(store.upsert(view("v", "p")).unwrap_err().is_not_found());
        store.upsert(pattern("p", &[(0.0, 60)])).unwrap();
        store.upsert(view("v", "p")).unwrap();

        match store.resolve(SharedKind::MidiPatternView, &"v".into()).unwrap() {
            SharedSnapshot::MidiPatternView(resolved) => {
                assert_eq!(resolved.pattern.events.len(), 1);
                assert_eq!(resolved.loop_length(), 4.0);
            }
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[test]
    fn clip_requires_view() {
        let mut store = SharedStore::new();
        assert!(store.upsert(clip("c", "v")).is_err());
        assert_eq!(store.len(SharedKind::TimelineClip), 0);
    }

    #[test]
    fn pattern_change_reaches_views_clips_and_tracks() {
        let mut store = SharedStore::new();
        store.upsert(pattern("p", &[])).unwrap();
        store.upsert(view("v", "p")).unwrap();
        store.upsert(clip("c", "v")).unwrap();
        store
            .upsert(SharedObject::TimelineTrack(TimelineTrack {
                id: "t".into(),
                clip_ids: vec!["c".into()],
            }))
            .unwrap();

        let affected = store.upsert(pattern("p", &[(1.0, 64)])).unwrap();
        assert_eq!(
            affected,
            vec![
                (SharedKind::MidiPattern, Id::from("p")),
                (SharedKind::MidiPatternView, Id::from("v")),
                (SharedKind::TimelineClip, Id::from("c")),
                (SharedKind::TimelineTrack, Id::from("t")),
            ]
        );
        assert_eq!(store.version(SharedKind::MidiPattern, &"p".into()), Some(1));
    }

    #[test]
    fn track_skips_missing_clips_and_edits_list() {
        let mut store = SharedStore::new();
        store.upsert(pattern("p", &[])).unwrap();
        store.upsert(view("v", "p")).unwrap();
        store.upsert(clip("c1", "v")).unwrap();
        store
            .upsert(SharedObject::TimelineTrack(TimelineTrack {
                id: "t".into(),
                clip_ids: vec!["c1".into(), "ghost".into()],
            }))
            .unwrap();

        let SharedSnapshot::TimelineTrack(track) = store.resolve(SharedKind::TimelineTrack, &"t".into()).unwrap() else {
            panic!("expected a track");
        };
        assert_eq!(track.clips.len(), 1);

        store.upsert(clip("c2", "v")).unwrap();
        store.track_add_clip(&"t".into(), "c2".into()).unwrap();
        store.track_remove_clip(&"t".into(), &"c1".into()).unwrap();
        assert!(store.track_add_clip(&"t".into(), "nope".into()).is_err());

        let SharedSnapshot::TimelineTrack(track) = store.resolve(SharedKind::TimelineTrack, &"t".into()).unwrap() else {
            panic!("expected a track");
        };
        let ids: Vec<_> = track.clips.iter().map(|c| c.clip.id.clone()).collect();
        assert_eq!(ids, vec![Id::from("c2")]);
    }

    #[test]
    fn subscriptions_track_nodes() {
        let mut store = SharedStore::new();
        let sub = Subscriber {
            node_id: "kb-node".into(),
            param_id: "keyboardState".into(),
        };
        let kb = SharedObject::KeyboardState(KeyboardState {
            id: "kb".into(),
            pressed_keys: [1, 5].into_iter().collect(),
        });
        assert!(store.subscribe(SharedKind::KeyboardState, &"kb".into(), sub.clone()).is_err());
        store.upsert(kb).unwrap();

        let snapshot = store.subscribe(SharedKind::KeyboardState, &"kb".into(), sub.clone()).unwrap();
        assert_eq!(snapshot.kind(), SharedKind::KeyboardState);
        assert_eq!(store.subscribers(SharedKind::KeyboardState, &"kb".into()), vec![sub.clone()]);

        store.unsubscribe_node(&"kb-node".into());
        assert!(store.subscribers(SharedKind::KeyboardState, &"kb".into()).is_empty());
        assert!(!store.unsubscribe(SharedKind::KeyboardState, &"kb".into(), &sub));
    }

    #[test]
    fn delete_unknown_is_not_found() {
        let mut store = SharedStore::new();
        store.upsert(pattern("p", &[])).unwrap();
        assert!(store.delete(SharedKind::MidiPattern, &"p".into()).is_ok());
        assert!(store.delete(SharedKind::MidiPattern, &"p".into()).unwrap_err().is_not_found());
    }
}
