//! Core node trait, shared node state and snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::id::GroupId;
use crate::midi::MidiAction;
use crate::port::{Port, PortSpec, Ports};
use crate::shared::{SharedKind, SharedSnapshot};
use crate::signal::{ResourceId, SignalContext};
use crate::Id;

/// The closed set of node kinds the engine can build.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    AudioOutput,
    Group,
    Sequencer,
    PatternSequencer,
    PolyphonicMidiConverter,
    PolyphonicOscillator,
    Keyboard,
    Oscillator,
    Gain,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::AudioOutput,
        NodeKind::Group,
        NodeKind::Sequencer,
        NodeKind::PatternSequencer,
        NodeKind::PolyphonicMidiConverter,
        NodeKind::PolyphonicOscillator,
        NodeKind::Keyboard,
        NodeKind::Oscillator,
        NodeKind::Gain,
    ];
}

/// Timing information passed to every [`SignalNode::on_tick`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    /// Audio clock at the start of this tick, in seconds
    pub current_time: f64,
    /// Furthest a node may schedule past `current_time`, in seconds
    pub max_read_ahead: f64,
}

/// A number parameter. When `resource` is set it drives a native value (an
/// "audio param"), otherwise it is node-side state only.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberParam {
    pub value: f64,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub resource: Option<ResourceId>,
}

impl NumberParam {
    pub fn new(default: f64, min: f64, max: f64) -> Self {
        Self {
            value: default,
            default,
            min,
            max,
            resource: None,
        }
    }

    pub fn audio(resource: ResourceId, default: f64, min: f64, max: f64) -> Self {
        Self {
            resource: Some(resource),
            ..Self::new(default, min, max)
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumParam {
    pub value: String,
    pub options: Vec<String>,
}

impl EnumParam {
    pub fn new(default: &str, options: &[&str]) -> Self {
        Self {
            value: default.to_owned(),
            options: options.iter().map(|o| (*o).to_owned()).collect(),
        }
    }
}

/// Points at a shared object of a fixed kind. `target` is `None` until resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceParam {
    pub kind: SharedKind,
    pub target: Option<Id>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    pub numbers: BTreeMap<Id, NumberParam>,
    pub enums: BTreeMap<Id, EnumParam>,
    pub strings: BTreeMap<Id, String>,
    pub sets: BTreeMap<Id, BTreeSet<String>>,
    pub references: BTreeMap<Id, ReferenceParam>,
}

impl Params {
    pub fn number(&self, id: &str) -> Option<f64> {
        self.numbers.get(&Id::from(id)).map(|p| p.value)
    }
}

/// State every node kind carries, regardless of what it does.
#[derive(Debug)]
pub struct NodeCore {
    pub(crate) id: Id,
    pub(crate) owner_id: Id,
    pub(crate) group: GroupId,
    pub(crate) kind: NodeKind,
    pub(crate) enabled: bool,
    pub(crate) disposed: bool,
    pub(crate) ports: Ports,
    pub(crate) params: Params,
    resources: Vec<ResourceId>,
}

impl NodeCore {
    pub fn new(id: Id, kind: NodeKind) -> Self {
        Self {
            id,
            owner_id: Id::new(""),
            group: GroupId::Top,
            kind,
            enabled: true,
            disposed: false,
            ports: Ports::new(),
            params: Params::default(),
            resources: Vec::new(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn owner_id(&self) -> &Id {
        &self.owner_id
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    pub fn port(&self, id: &Id) -> Option<&Port> {
        self.ports.get(id)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn add_port(&mut self, port: Port) {
        self.ports.add(port);
    }

    /// Record a resource this node owns outside of its ports; released on dispose.
    pub fn own(&mut self, resource: ResourceId) -> ResourceId {
        self.resources.push(resource);
        resource
    }

    pub fn add_number(&mut self, id: &str, param: NumberParam) {
        self.params.numbers.insert(id.into(), param);
    }

    pub fn add_enum(&mut self, id: &str, param: EnumParam) {
        self.params.enums.insert(id.into(), param);
    }

    pub fn add_string(&mut self, id: &str, value: &str) {
        self.params.strings.insert(id.into(), value.to_owned());
    }

    pub fn add_set(&mut self, id: &str) {
        self.params.sets.insert(id.into(), BTreeSet::new());
    }

    pub fn add_reference(&mut self, id: &str, kind: SharedKind) {
        self.params.references.insert(id.into(), ReferenceParam { kind, target: None });
    }

    pub fn number(&self, id: &str) -> f64 {
        self.params.number(id).unwrap_or_default()
    }

    /// Queue `action` on the output port `port_id`.
    pub fn emit(&mut self, port_id: &str, action: MidiAction) {
        match self.ports.get_mut(&Id::from(port_id)) {
            Some(port) => port.emit(action),
            None => warn!(node_id = %self.id, port_id, "emit on unknown port"),
        }
    }

    /// Release every port and owned resource.
    pub(crate) fn release_all(&mut self, ctx: &mut SignalContext) {
        self.ports.dispose(ctx);
        for resource in self.resources.drain(..) {
            if let Err(err) = ctx.release(resource) {
                warn!(node_id = %self.id, %err, "node resource already released");
            }
        }
    }
}

/// Behaviour shared by every node kind.
///
/// Only [`core`](Self::core) and [`core_mut`](Self::core_mut) are required. The
/// hooks default to doing nothing; kinds override the ones they care about. Hooks
/// are only called while the node is registered and not disposed.
pub trait SignalNode {
    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// Advance by one host tick. Called every tick, enabled or not.
    fn on_tick(&mut self, ctx: &mut SignalContext, tick: Tick) {
        let _ = (ctx, tick);
    }

    fn on_enable(&mut self, ctx: &mut SignalContext) {
        let _ = ctx;
    }

    /// Must leave no output stuck on.
    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let _ = ctx;
    }

    /// Release kind-specific state. Ports and owned resources are released afterwards.
    fn on_dispose(&mut self, ctx: &mut SignalContext) {
        let _ = ctx;
    }

    /// A MIDI or polyphonic action arriving on input `port_id`.
    fn on_midi(&mut self, ctx: &mut SignalContext, port_id: &Id, action: MidiAction) {
        let _ = (ctx, port_id, action);
    }

    /// A number parameter changed. The stored value is already updated and clamped.
    fn on_number_param(&mut self, ctx: &mut SignalContext, param_id: &Id, value: f64) {
        let _ = (ctx, param_id, value);
    }

    fn on_enum_param(&mut self, ctx: &mut SignalContext, param_id: &Id, value: &str) {
        let _ = (ctx, param_id, value);
    }

    fn on_string_param(&mut self, param_id: &Id, value: &str) {
        let _ = (param_id, value);
    }

    fn on_set_param(&mut self, param_id: &Id, value: &BTreeSet<String>) {
        let _ = (param_id, value);
    }

    /// A reference parameter resolved, or the object it points at changed.
    fn on_reference_changed(&mut self, ctx: &mut SignalContext, param_id: &Id, snapshot: &SharedSnapshot) {
        let _ = (ctx, param_id, snapshot);
    }

    /// Called once, after an initial graph load has added every node and connection.
    fn on_main_graph_loaded(&mut self, ctx: &mut SignalContext) {
        let _ = ctx;
    }

    /// A MIDI action sent directly to this node rather than through a port.
    fn on_node_to_node(&mut self, ctx: &mut SignalContext, action: MidiAction) {
        let _ = (ctx, action);
    }

    fn name(&self) -> &'static str;
}

/// A node as described by the state layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: Id,
    #[serde(default = "unowned")]
    pub owner_id: Id,
    #[serde(default)]
    pub group_id: GroupId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Only meaningful for kinds whose ports are user-defined
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub audio_params: BTreeMap<Id, f64>,
    #[serde(default)]
    pub custom_number_params: BTreeMap<Id, f64>,
    #[serde(default)]
    pub custom_enum_params: BTreeMap<Id, String>,
    #[serde(default)]
    pub custom_string_params: BTreeMap<Id, String>,
    #[serde(default)]
    pub custom_set_params: BTreeMap<Id, BTreeSet<String>>,
    #[serde(default)]
    pub reference_params: BTreeMap<Id, Id>,
}

fn unowned() -> Id {
    Id::new("")
}

fn enabled_by_default() -> bool {
    true
}

impl NodeSnapshot {
    pub fn new(id: impl Into<Id>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            owner_id: unowned(),
            group_id: GroupId::Top,
            kind,
            enabled: true,
            ports: Vec::new(),
            audio_params: BTreeMap::new(),
            custom_number_params: BTreeMap::new(),
            custom_enum_params: BTreeMap::new(),
            custom_string_params: BTreeMap::new(),
            custom_set_params: BTreeMap::new(),
            reference_params: BTreeMap::new(),
        }
    }

    pub fn in_group(mut self, group: impl Into<GroupId>) -> Self {
        self.group_id = group.into();
        self
    }

    pub fn with_port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_number(mut self, id: &str, value: f64) -> Self {
        self.custom_number_params.insert(id.into(), value);
        self
    }

    pub fn with_reference(mut self, id: &str, target: &str) -> Self {
        self.reference_params.insert(id.into(), target.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Read-only description of a node handed to the rendering layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: Id,
    pub name: &'static str,
    pub kind: NodeKind,
    pub group_id: GroupId,
    pub enabled: bool,
    pub ports: Vec<PortSpec>,
    pub numbers: BTreeMap<Id, f64>,
    pub enums: BTreeMap<Id, String>,
    pub strings: BTreeMap<Id, String>,
    pub references: BTreeMap<Id, Option<Id>>,
}

impl NodeView {
    pub(crate) fn of<N: SignalNode + ?Sized>(node: &N) -> Self {
        let core = node.core();
        Self {
            id: core.id.clone(),
            name: node.name(),
            kind: core.kind,
            group_id: core.group.clone(),
            enabled: core.enabled,
            ports: core.ports.iter().map(Port::spec).collect(),
            numbers: core.params.numbers.iter().map(|(k, p)| (k.clone(), p.value)).collect(),
            enums: core.params.enums.iter().map(|(k, p)| (k.clone(), p.value.clone())).collect(),
            strings: core.params.strings.clone(),
            references: core
                .params
                .references
                .iter()
                .map(|(k, r)| (k.clone(), r.target.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_defaults() {
        let snapshot: NodeSnapshot = serde_json::from_str(r#"{"id": "n1", "type": "sequencer"}"#).unwrap();
        assert_eq!(snapshot.kind, NodeKind::Sequencer);
        assert_eq!(snapshot.group_id, GroupId::Top);
        assert!(snapshot.enabled);

        let nested: NodeSnapshot =
            serde_json::from_str(r#"{"id": "n2", "type": "gain", "groupId": "n1", "enabled": false}"#).unwrap();
        assert_eq!(nested.group_id.parent(), Some(&Id::from("n1")));
        assert!(!nested.enabled);
    }

    #[test]
    fn number_params_clamp() {
        let tempo = NumberParam::new(240.0, 0.001, 999.99);
        assert_eq!(tempo.clamp(5000.0), 999.99);
        assert_eq!(tempo.clamp(-1.0), 0.001);
    }
}
