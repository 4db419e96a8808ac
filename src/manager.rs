//! The graph manager: sole owner of nodes, connections and shared state.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use itertools::Itertools;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::connection::{attach_audio, validate_endpoint, Connection, ConnectionSnapshot, Endpoint, Wire};
use crate::error::{GraphError, SignalError};
use crate::id::GroupId;
use crate::midi::MidiAction;
use crate::node::{NodeSnapshot, NodeView, SignalNode, Tick};
use crate::nodes::{self, Node};
use crate::port::{Centering, Port, PortSide, PortType};
use crate::shared::{SharedKind, SharedObject, SharedSnapshot, SharedStore, Subscriber};
use crate::signal::{ResourceId, SignalContext};
use crate::Id;

/// Everything needed to (re)build a session's graph in one go.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub connections: Vec<ConnectionSnapshot>,
    #[serde(default)]
    pub shared: Vec<SharedObject>,
}

/// Outcome of [`GraphManager::load_graph`]. Failed items were logged and skipped.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub shared: usize,
    pub nodes: usize,
    pub connections: usize,
    pub failures: Vec<GraphError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A connection being dragged in the UI but not yet committed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostConnection {
    /// The end that is already attached to a port
    pub node_id: Id,
    pub port_id: Id,
    pub port_type: PortType,
    pub side: PortSide,
}

/// Handle returned by [`GraphManager::subscribe_to_tick`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TickSubscription(u64);

type TickCallback = Box<dyn FnMut(f64)>;

/// Which number parameters an update may touch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NumberClass {
    /// Backed by a native value
    Audio,
    /// Node-side state only
    Custom,
}

/// Owns every node and connection, applies topology and parameter changes, and
/// drives the tick.
///
/// All mutation goes through `&mut self`, so a tick can never observe a half
/// applied operation. Operations return `Result` for callers that care, and every
/// failure is also logged here with the ids involved; a failed operation leaves
/// the graph as it was.
///
/// ```
/// # use tonegraph::{GraphManager, EngineConfig};
/// # use tonegraph::node::{NodeKind, NodeSnapshot};
/// # use tonegraph::connection::ConnectionSnapshot;
/// # use tonegraph::port::PortType;
/// let mut graph = GraphManager::new(EngineConfig::default());
/// graph.add_node(NodeSnapshot::new("osc", NodeKind::Oscillator)).unwrap();
/// graph.add_node(NodeSnapshot::new("out", NodeKind::AudioOutput)).unwrap();
/// graph
///     .add_connection(ConnectionSnapshot::new("c1", PortType::Audio, ("osc", "output"), ("out", "input")))
///     .unwrap();
///
/// graph.on_tick(0.0);
/// assert_eq!(graph.connection_count(), 1);
/// ```
pub struct GraphManager {
    config: EngineConfig,
    ctx: SignalContext,

    nodes: HashMap<Id, Node>,
    /// Registration order; ticks and routing walk nodes in this order
    order: Vec<Id>,
    connections: HashMap<Id, Connection>,
    shared: SharedStore,

    tick_subscribers: HashMap<TickSubscription, TickCallback>,
    next_subscription: u64,
    ghost: Option<GhostConnection>,
    graph_loaded: bool,
}

impl GraphManager {
    pub fn new(config: EngineConfig) -> Self {
        let ctx = SignalContext::new(&config);
        Self {
            config,
            ctx,
            nodes: HashMap::new(),
            order: Vec::new(),
            connections: HashMap::new(),
            shared: SharedStore::new(),
            tick_subscribers: HashMap::new(),
            next_subscription: 0,
            ghost: None,
            graph_loaded: false,
        }
    }

    /// Build a whole graph: shared state first so references resolve, then nodes
    /// with parents before children, then connections. Each node is then told the
    /// load is complete.
    ///
    /// A malformed item is logged and skipped; it never stops the rest from
    /// loading. Anything already loaded is disposed first.
    pub fn load_graph(&mut self, snapshot: GraphSnapshot) -> LoadReport {
        if !self.nodes.is_empty() || !self.connections.is_empty() {
            info!(nodes = self.nodes.len(), "replacing the loaded graph");
            self.clear_graph();
        }

        let GraphSnapshot {
            nodes,
            connections,
            shared,
        } = snapshot;
        let mut report = LoadReport::default();

        for object in shared.into_iter().sorted_by_key(|o| dependency_rank(o.kind())) {
            match self.upsert_shared(object) {
                Ok(()) => report.shared += 1,
                Err(err) => report.failures.push(err),
            }
        }

        for node in load_order(nodes) {
            match self.add_node(node) {
                Ok(()) => report.nodes += 1,
                Err(err) => report.failures.push(err),
            }
        }

        for connection in connections {
            match self.add_connection(connection) {
                Ok(()) => report.connections += 1,
                Err(err) => report.failures.push(err),
            }
        }

        self.graph_loaded = true;
        for id in &self.order {
            if let Some(node) = self.nodes.get_mut(id) {
                node.on_main_graph_loaded(&mut self.ctx);
            }
        }
        self.route_events();

        info!(
            shared = report.shared,
            nodes = report.nodes,
            connections = report.connections,
            failures = report.failures.len(),
            "graph loaded"
        );
        report
    }

    /// Construct, configure and register a node. On failure nothing is registered.
    ///
    /// A parent group that is not in the graph yet is logged and the node is
    /// placed at the root instead.
    pub fn add_node(&mut self, snapshot: NodeSnapshot) -> Result<(), GraphError> {
        let node_id = snapshot.id.clone();
        self.try_add_node(snapshot)
            .inspect_err(|err| log_failure("add_node", &node_id, err))
    }

    fn try_add_node(&mut self, mut snapshot: NodeSnapshot) -> Result<(), GraphError> {
        if self.nodes.contains_key(&snapshot.id) {
            return Err(GraphError::InvariantViolation(format!("node {} already exists", snapshot.id)));
        }

        let orphaned = snapshot
            .group_id
            .parent()
            .filter(|parent| !self.nodes.contains_key(*parent))
            .cloned();
        if let Some(parent_id) = orphaned {
            error!(node_id = %snapshot.id, %parent_id, "parent group not in graph, adding at root");
            snapshot.group_id = GroupId::Top;
        }

        let mut node = nodes::build(&snapshot, &mut self.ctx, &self.config)?;
        apply_params(&mut node, &mut self.ctx, &snapshot);
        if !snapshot.enabled {
            node.set_enabled(&mut self.ctx, false);
        }

        let id = snapshot.id.clone();
        self.nodes.insert(id.clone(), node);
        self.order.push(id.clone());
        debug!(node_id = %id, kind = ?snapshot.kind, group = ?snapshot.group_id, "node registered");

        for (param_id, target) in &snapshot.reference_params {
            // Logged inside; the node keeps an unresolved reference.
            let _ = self.on_reference_param_change(&id, param_id, target.clone());
        }
        if self.graph_loaded {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.on_main_graph_loaded(&mut self.ctx);
            }
        }
        self.route_events();
        Ok(())
    }

    /// Disable, dispose and forget a node. Connections still pointing at it are
    /// left for the caller to delete; their lookups simply miss from now on.
    pub fn delete_node(&mut self, id: &Id) -> Result<(), GraphError> {
        self.try_delete_node(id)
            .inspect_err(|err| log_failure("delete_node", id, err))
    }

    fn try_delete_node(&mut self, id: &Id) -> Result<(), GraphError> {
        node_mut(&mut self.nodes, id)?.set_enabled(&mut self.ctx, false);
        // Deliver the gate-offs from disabling before the outboxes go away.
        self.route_events();

        let mut node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        self.order.retain(|n| n != id);
        self.shared.unsubscribe_node(id);
        node.dispose(&mut self.ctx)?;
        debug!(node_id = %id, "node deleted");
        Ok(())
    }

    pub fn enable_node(&mut self, id: &Id, enabled: bool) -> Result<(), GraphError> {
        let result = node_mut(&mut self.nodes, id).map(|node| node.set_enabled(&mut self.ctx, enabled));
        self.route_events();
        result.inspect_err(|err| log_failure("enable_node", id, err))
    }

    /// Re-apply a snapshot's parameters, enabled flag and references to an existing node.
    pub fn load_node_preset(&mut self, snapshot: &NodeSnapshot) -> Result<(), GraphError> {
        self.try_load_node_preset(snapshot)
            .inspect_err(|err| log_failure("load_node_preset", &snapshot.id, err))
    }

    fn try_load_node_preset(&mut self, snapshot: &NodeSnapshot) -> Result<(), GraphError> {
        let node = node_mut(&mut self.nodes, &snapshot.id)?;
        if node.kind() != snapshot.kind {
            return Err(GraphError::InvariantViolation(format!(
                "{:?} preset applied to a {:?} node",
                snapshot.kind,
                node.kind()
            )));
        }
        apply_params(node, &mut self.ctx, snapshot);
        node.set_enabled(&mut self.ctx, snapshot.enabled);

        for (param_id, target) in &snapshot.reference_params {
            let _ = self.on_reference_param_change(&snapshot.id, param_id, target.clone());
        }
        self.route_events();
        Ok(())
    }

    /// Validate both endpoints against the declared type and wire them up.
    /// Rejected connections leave the connection map untouched.
    pub fn add_connection(&mut self, snapshot: ConnectionSnapshot) -> Result<(), GraphError> {
        let id = snapshot.id.clone();
        self.try_add_connection(snapshot)
            .inspect_err(|err| log_failure("add_connection", &id, err))
    }

    fn try_add_connection(&mut self, snapshot: ConnectionSnapshot) -> Result<(), GraphError> {
        let ConnectionSnapshot {
            id,
            source_id,
            source_port,
            target_id,
            target_port,
            port_type,
        } = snapshot;

        if self.connections.contains_key(&id) {
            return Err(GraphError::InvariantViolation(format!("connection {id} already exists")));
        }
        if port_type == PortType::Dummy {
            return Err(GraphError::DummyConnection(id));
        }

        let source = find_port(&self.nodes, &source_id, &source_port)?;
        validate_endpoint(port_type, source, PortSide::Output)?;
        let from = source.resource();

        let target = Endpoint {
            node_id: target_id,
            port_id: target_port,
        };
        validate_endpoint(
            port_type,
            find_port(&self.nodes, &target.node_id, &target.port_id)?,
            PortSide::Input,
        )?;
        let wire = attach(&mut self.nodes, &mut self.ctx, port_type, &id, from, &target)?;

        let source = Endpoint {
            node_id: source_id,
            port_id: source_port,
        };
        debug!(connection_id = %id, ?port_type, source = ?source, target = ?target, "connection registered");
        self.connections
            .insert(id.clone(), Connection::new(id, port_type, source, target, wire));
        Ok(())
    }

    /// Move a connection's source. The new port is validated before anything is
    /// unwired; on failure the connection keeps its old source.
    pub fn change_connection_source(&mut self, id: &Id, node_id: Id, port_id: Id) -> Result<(), GraphError> {
        self.try_change_source(id, node_id, port_id)
            .inspect_err(|err| log_failure("change_connection_source", id, err))
    }

    fn try_change_source(&mut self, id: &Id, node_id: Id, port_id: Id) -> Result<(), GraphError> {
        let connection = self
            .connections
            .get_mut(id)
            .ok_or_else(|| GraphError::ConnectionNotFound(id.clone()))?;
        let source = find_port(&self.nodes, &node_id, &port_id)?;
        validate_endpoint(connection.port_type(), source, PortSide::Output)?;

        let endpoint = Endpoint { node_id, port_id };
        if connection.source() == &endpoint {
            return Ok(());
        }
        connection.rewire_source(&mut self.ctx, endpoint, source.resource())?;
        debug!(connection_id = %id, source = ?connection.source(), "connection source changed");
        Ok(())
    }

    /// Move a connection's target. The old target is detached before the new one
    /// is attached; if attaching fails the old target is wired back.
    pub fn change_connection_target(&mut self, id: &Id, node_id: Id, port_id: Id) -> Result<(), GraphError> {
        self.try_change_target(id, node_id, port_id)
            .inspect_err(|err| log_failure("change_connection_target", id, err))
    }

    fn try_change_target(&mut self, id: &Id, node_id: Id, port_id: Id) -> Result<(), GraphError> {
        let connection = self
            .connections
            .get_mut(id)
            .ok_or_else(|| GraphError::ConnectionNotFound(id.clone()))?;
        let port_type = connection.port_type();
        validate_endpoint(port_type, find_port(&self.nodes, &node_id, &port_id)?, PortSide::Input)?;

        let endpoint = Endpoint { node_id, port_id };
        let previous = connection.target().clone();
        if previous == endpoint {
            return Ok(());
        }

        // An audio retarget must be wireable before the old wire is detached.
        let from = connection.wired_from();
        if port_type == PortType::Audio {
            let from = from.ok_or(SignalError::Unbacked)?;
            if !self.ctx.is_live(from) {
                return Err(SignalError::UnknownResource(from.raw()).into());
            }
            let port = find_port(&self.nodes, &endpoint.node_id, &endpoint.port_id)?;
            if let (false, Some(to)) = (port.is_param_input(), port.resource()) {
                if self.ctx.is_wired(from, to) {
                    return Err(SignalError::AlreadyWired { from: from.raw(), to: to.raw() }.into());
                }
            }
        }

        connection.detach(
            &mut self.ctx,
            port_mut(&mut self.nodes, &previous.node_id, &previous.port_id).ok(),
        );

        match attach(&mut self.nodes, &mut self.ctx, port_type, id, from, &endpoint) {
            Ok(wire) => {
                connection.set_target(endpoint, wire);
                debug!(connection_id = %id, target = ?connection.target(), "connection target changed");
                Ok(())
            }
            Err(err) => {
                match attach(&mut self.nodes, &mut self.ctx, port_type, id, from, &previous) {
                    Ok(wire) => connection.set_target(previous, wire),
                    Err(restore) => {
                        error!(connection_id = %id, %restore, "could not restore previous target, dropping connection");
                        self.connections.remove(id);
                    }
                }
                Err(err)
            }
        }
    }

    pub fn delete_connection(&mut self, id: &Id) -> Result<(), GraphError> {
        self.try_delete_connection(id)
            .inspect_err(|err| log_failure("delete_connection", id, err))
    }

    fn try_delete_connection(&mut self, id: &Id) -> Result<(), GraphError> {
        let mut connection = self
            .connections
            .remove(id)
            .ok_or_else(|| GraphError::ConnectionNotFound(id.clone()))?;
        let target = connection.target();
        let port = port_mut(&mut self.nodes, &target.node_id, &target.port_id).ok();
        connection.detach(&mut self.ctx, port);
        debug!(connection_id = %id, "connection deleted");
        Ok(())
    }

    pub fn delete_all_connections(&mut self) {
        let ids: Vec<Id> = self.connections.keys().cloned().collect();
        for id in ids {
            let _ = self.delete_connection(&id);
        }
    }

    /// Set a number parameter that drives a native value.
    pub fn on_audio_param_change(&mut self, node_id: &Id, param_id: &Id, value: f64) -> Result<(), GraphError> {
        let result = node_mut(&mut self.nodes, node_id)
            .and_then(|node| set_number(node, &mut self.ctx, param_id, value, NumberClass::Audio));
        self.route_events();
        result.inspect_err(|err| log_failure("on_audio_param_change", node_id, err))
    }

    pub fn on_custom_number_param_change(&mut self, node_id: &Id, param_id: &Id, value: f64) -> Result<(), GraphError> {
        let result = node_mut(&mut self.nodes, node_id)
            .and_then(|node| set_number(node, &mut self.ctx, param_id, value, NumberClass::Custom));
        self.route_events();
        result.inspect_err(|err| log_failure("on_custom_number_param_change", node_id, err))
    }

    pub fn on_custom_enum_param_change(&mut self, node_id: &Id, param_id: &Id, value: &str) -> Result<(), GraphError> {
        let result =
            node_mut(&mut self.nodes, node_id).and_then(|node| set_enum(node, &mut self.ctx, param_id, value));
        self.route_events();
        result.inspect_err(|err| log_failure("on_custom_enum_param_change", node_id, err))
    }

    pub fn on_custom_string_param_change(&mut self, node_id: &Id, param_id: &Id, value: &str) -> Result<(), GraphError> {
        node_mut(&mut self.nodes, node_id)
            .and_then(|node| set_string(node, param_id, value))
            .inspect_err(|err| log_failure("on_custom_string_param_change", node_id, err))
    }

    pub fn on_custom_set_param_change(
        &mut self,
        node_id: &Id,
        param_id: &Id,
        value: BTreeSet<String>,
    ) -> Result<(), GraphError> {
        node_mut(&mut self.nodes, node_id)
            .and_then(|node| set_set(node, param_id, value))
            .inspect_err(|err| log_failure("on_custom_set_param_change", node_id, err))
    }

    /// Point a reference parameter at another shared object.
    ///
    /// The new target is subscribed to first; if it does not resolve the node
    /// keeps its previous reference and nothing else changes.
    pub fn on_reference_param_change(&mut self, node_id: &Id, param_id: &Id, target: Id) -> Result<(), GraphError> {
        self.try_change_reference(node_id, param_id, target)
            .inspect_err(|err| log_failure("on_reference_param_change", node_id, err))
    }

    fn try_change_reference(&mut self, node_id: &Id, param_id: &Id, target: Id) -> Result<(), GraphError> {
        let node = node_mut(&mut self.nodes, node_id)?;
        let param = node
            .core()
            .params
            .references
            .get(param_id)
            .ok_or_else(|| GraphError::ParamNotFound {
                node_id: node_id.clone(),
                param_id: param_id.clone(),
            })?;
        let (kind, previous) = (param.kind, param.target.clone());

        let subscriber = Subscriber {
            node_id: node_id.clone(),
            param_id: param_id.clone(),
        };
        let snapshot = self.shared.subscribe(kind, &target, subscriber.clone())?;
        if let Some(previous) = previous.filter(|p| p != &target) {
            self.shared.unsubscribe(kind, &previous, &subscriber);
        }

        if let Some(param) = node.core_mut().params.references.get_mut(param_id) {
            param.target = Some(target);
        }
        node.on_reference_changed(&mut self.ctx, param_id, &snapshot);
        self.route_events();
        Ok(())
    }

    /// Mix gain of one connection into a param input.
    pub fn on_audio_param_input_gain_change(&mut self, connection_id: &Id, gain: f64) -> Result<(), GraphError> {
        self.chain_target(connection_id)
            .and_then(|target| {
                port_mut(&mut self.nodes, &target.node_id, &target.port_id)?.set_gain(
                    &mut self.ctx,
                    &target.node_id,
                    connection_id,
                    gain,
                )
            })
            .inspect_err(|err| log_failure("on_audio_param_input_gain_change", connection_id, err))
    }

    pub fn on_audio_param_input_centering_change(
        &mut self,
        connection_id: &Id,
        centering: Centering,
    ) -> Result<(), GraphError> {
        self.chain_target(connection_id)
            .and_then(|target| {
                port_mut(&mut self.nodes, &target.node_id, &target.port_id)?.set_centering(
                    &mut self.ctx,
                    &target.node_id,
                    connection_id,
                    centering,
                )
            })
            .inspect_err(|err| log_failure("on_audio_param_input_centering_change", connection_id, err))
    }

    fn chain_target(&self, connection_id: &Id) -> Result<Endpoint, GraphError> {
        self.connections
            .get(connection_id)
            .map(|c| c.target().clone())
            .ok_or_else(|| GraphError::ConnectionNotFound(connection_id.clone()))
    }

    /// Hand a MIDI action straight to a node, bypassing its ports.
    pub fn on_node_to_node(&mut self, node_id: &Id, action: MidiAction) -> Result<(), GraphError> {
        let result = node_mut(&mut self.nodes, node_id).map(|node| node.on_node_to_node(&mut self.ctx, action));
        self.route_events();
        result.inspect_err(|err| log_failure("on_node_to_node", node_id, err))
    }

    /// Insert or replace a shared object, then tell every node observing it, or
    /// anything that resolves through it, about the change.
    pub fn upsert_shared(&mut self, object: SharedObject) -> Result<(), GraphError> {
        let id = object.id().clone();
        let affected = self
            .shared
            .upsert(object)
            .inspect_err(|err| log_failure("upsert_shared", &id, err))?;
        self.notify_observers(affected);
        Ok(())
    }

    /// Observers keep the last snapshot they were given.
    pub fn delete_shared(&mut self, kind: SharedKind, id: &Id) -> Result<(), GraphError> {
        self.shared
            .delete(kind, id)
            .inspect_err(|err| log_failure("delete_shared", id, err))
    }

    pub fn timeline_track_add_clip(&mut self, track_id: &Id, clip_id: Id) -> Result<(), GraphError> {
        let affected = self
            .shared
            .track_add_clip(track_id, clip_id)
            .inspect_err(|err| log_failure("timeline_track_add_clip", track_id, err))?;
        self.notify_observers(affected);
        Ok(())
    }

    pub fn timeline_track_remove_clip(&mut self, track_id: &Id, clip_id: &Id) -> Result<(), GraphError> {
        let affected = self
            .shared
            .track_remove_clip(track_id, clip_id)
            .inspect_err(|err| log_failure("timeline_track_remove_clip", track_id, err))?;
        self.notify_observers(affected);
        Ok(())
    }

    fn notify_observers(&mut self, affected: Vec<(SharedKind, Id)>) {
        for (kind, id) in affected {
            let subscribers = self.shared.subscribers(kind, &id);
            if subscribers.is_empty() {
                continue;
            }
            let snapshot = match self.shared.resolve(kind, &id) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(?kind, %id, %err, "observed object no longer resolves");
                    continue;
                }
            };
            for Subscriber { node_id, param_id } in subscribers {
                match self.nodes.get_mut(&node_id) {
                    Some(node) => node.on_reference_changed(&mut self.ctx, &param_id, &snapshot),
                    None => debug!(%node_id, %param_id, "skipping subscriber of a deleted node"),
                }
            }
        }
        self.route_events();
    }

    /// Look up a shared object by kind and id.
    pub fn resolve_reference(&self, kind: SharedKind, id: &Id) -> Result<SharedSnapshot, GraphError> {
        self.shared
            .resolve(kind, id)
            .inspect_err(|err| log_failure("resolve_reference", id, err))
    }

    /// Advance every node to `current_time`, carry the MIDI they emitted along
    /// connections, then call tick subscribers.
    ///
    /// Each node may schedule at most `max_read_ahead` seconds past `current_time`.
    pub fn on_tick(&mut self, current_time: f64) {
        self.ctx.set_current_time(current_time);
        let tick = Tick {
            current_time: self.ctx.current_time(),
            max_read_ahead: self.config.max_read_ahead,
        };
        trace!(current_time = tick.current_time, "tick");

        for id in &self.order {
            if let Some(node) = self.nodes.get_mut(id) {
                node.on_tick(&mut self.ctx, tick);
            }
        }
        self.route_events();

        for callback in self.tick_subscribers.values_mut() {
            callback(tick.current_time);
        }
    }

    /// Carry queued MIDI and polyphonic actions along connections until every
    /// outbox is empty or the pass limit is hit.
    fn route_events(&mut self) {
        let routes = self
            .connections
            .values()
            .filter(|c| c.port_type() != PortType::Audio)
            .map(|c| (c.source().clone(), c.target().clone()))
            .into_group_map();

        for _ in 0..self.config.max_routing_passes {
            let deliveries = self.drain_outboxes(&routes);
            if deliveries.is_empty() {
                return;
            }
            for (target, action) in deliveries {
                match self.nodes.get_mut(&target.node_id) {
                    Some(node) => node.on_midi(&mut self.ctx, &target.port_id, action),
                    None => trace!(node_id = %target.node_id, "dropping action for a missing node"),
                }
            }
        }

        let pending: usize = self
            .nodes
            .values()
            .flat_map(|node| node.core().ports().iter())
            .map(Port::pending)
            .sum();
        if pending > 0 {
            warn!(
                pending,
                passes = self.config.max_routing_passes,
                "routing pass limit reached, actions stay queued"
            );
        }
    }

    fn drain_outboxes(
        &mut self,
        routes: &std::collections::HashMap<Endpoint, Vec<Endpoint>>,
    ) -> Vec<(Endpoint, MidiAction)> {
        let mut deliveries = Vec::new();
        for id in &self.order {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            for port in node.core_mut().ports_mut().iter_mut().filter(|p| p.pending() > 0) {
                let source = Endpoint {
                    node_id: id.clone(),
                    port_id: port.id().clone(),
                };
                let actions = port.drain();
                let Some(targets) = routes.get(&source) else {
                    trace!(node_id = %id, port_id = %source.port_id, dropped = actions.len(), "output not connected");
                    continue;
                };
                deliveries.extend(
                    actions
                        .into_iter()
                        .cartesian_product(targets)
                        .map(|(action, target)| (target.clone(), action)),
                );
            }
        }
        deliveries
    }

    pub fn subscribe_to_tick(&mut self, callback: impl FnMut(f64) + 'static) -> TickSubscription {
        let subscription = TickSubscription(self.next_subscription);
        self.next_subscription += 1;
        self.tick_subscribers.insert(subscription, Box::new(callback));
        subscription
    }

    pub fn unsubscribe_from_tick(&mut self, subscription: TickSubscription) -> bool {
        self.tick_subscribers.remove(&subscription).is_some()
    }

    pub fn update_ghost_connection(&mut self, ghost: Option<GhostConnection>) {
        self.ghost = ghost;
    }

    pub fn ghost_connection(&self) -> Option<&GhostConnection> {
        self.ghost.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn signal(&self) -> &SignalContext {
        &self.ctx
    }

    pub fn shared(&self) -> &SharedStore {
        &self.shared
    }

    pub fn is_graph_loaded(&self) -> bool {
        self.graph_loaded
    }

    pub fn node(&self, id: &Id) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Registered node ids, oldest first.
    pub fn node_ids(&self) -> &[Id] {
        &self.order
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection(&self, id: &Id) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn port(&self, node_id: &Id, port_id: &Id) -> Option<&Port> {
        find_port(&self.nodes, node_id, port_id).ok()
    }

    /// A port's type and whether it is a param input. Unresolved ports report
    /// [`PortType::Dummy`].
    pub fn port_type(&self, node_id: &Id, port_id: &Id) -> (PortType, bool) {
        self.port(node_id, port_id)
            .map_or((PortType::Dummy, false), |p| (p.port_type(), p.is_param_input()))
    }

    /// Immutable description of a node for the rendering layer.
    pub fn render_node(&self, id: &Id) -> Option<NodeView> {
        self.nodes.get(id).map(Node::view)
    }

    /// Dispose every node and connection, drop shared state and subscribers, and
    /// tear down the signal context. A fresh context is put in place so the
    /// manager can load another graph.
    pub fn cleanup(&mut self) {
        self.clear_graph();
        self.tick_subscribers.clear();
        self.ghost = None;
        self.ctx.teardown();
        self.ctx = SignalContext::new(&self.config);
        info!("graph manager cleaned up");
    }

    fn clear_graph(&mut self) {
        self.delete_all_connections();
        // Newest first, so children go before their groups.
        let ids: Vec<Id> = self.order.iter().rev().cloned().collect();
        for id in ids {
            let _ = self.delete_node(&id);
        }
        self.shared.clear();
        self.graph_loaded = false;
    }
}

fn log_failure(operation: &'static str, subject: &Id, err: &GraphError) {
    if err.is_not_found() {
        warn!(operation, %subject, %err, "operation abandoned");
    } else {
        error!(operation, %subject, %err, "operation abandoned");
    }
}

fn node_mut<'a>(nodes: &'a mut HashMap<Id, Node>, id: &Id) -> Result<&'a mut Node, GraphError> {
    nodes.get_mut(id).ok_or_else(|| GraphError::NodeNotFound(id.clone()))
}

fn find_port<'a>(nodes: &'a HashMap<Id, Node>, node_id: &Id, port_id: &Id) -> Result<&'a Port, GraphError> {
    nodes
        .get(node_id)
        .ok_or_else(|| GraphError::NodeNotFound(node_id.clone()))?
        .port(port_id)
        .ok_or_else(|| GraphError::PortNotFound {
            node_id: node_id.clone(),
            port_id: port_id.clone(),
        })
}

fn port_mut<'a>(nodes: &'a mut HashMap<Id, Node>, node_id: &Id, port_id: &Id) -> Result<&'a mut Port, GraphError> {
    node_mut(nodes, node_id)?
        .core_mut()
        .ports_mut()
        .get_mut(port_id)
        .ok_or_else(|| GraphError::PortNotFound {
            node_id: node_id.clone(),
            port_id: port_id.clone(),
        })
}

/// Wire a connection into `target`. Event connections own nothing to wire.
fn attach(
    nodes: &mut HashMap<Id, Node>,
    ctx: &mut SignalContext,
    port_type: PortType,
    connection_id: &Id,
    from: Option<ResourceId>,
    target: &Endpoint,
) -> Result<Wire, GraphError> {
    match port_type {
        PortType::Audio => {
            let from = from.ok_or(SignalError::Unbacked)?;
            let port = port_mut(nodes, &target.node_id, &target.port_id)?;
            attach_audio(ctx, connection_id, from, port)
        }
        PortType::Midi | PortType::Polyphonic => Ok(Wire::Event),
        PortType::Dummy => Err(GraphError::DummyConnection(connection_id.clone())),
    }
}

fn param_not_found(node: &Node, param_id: &Id) -> GraphError {
    GraphError::ParamNotFound {
        node_id: node.id().clone(),
        param_id: param_id.clone(),
    }
}

fn set_number(
    node: &mut Node,
    ctx: &mut SignalContext,
    param_id: &Id,
    value: f64,
    class: NumberClass,
) -> Result<(), GraphError> {
    if !value.is_finite() {
        return Err(GraphError::InvariantViolation(format!("{param_id} set to {value}")));
    }
    let missing = param_not_found(node, param_id);
    let param = node
        .core_mut()
        .params
        .numbers
        .get_mut(param_id)
        .filter(|p| p.resource.is_some() == (class == NumberClass::Audio))
        .ok_or(missing)?;
    let value = param.clamp(value);
    param.value = value;
    if let Some(resource) = param.resource {
        ctx.set_value(resource, value)?;
    }
    node.on_number_param(ctx, param_id, value);
    Ok(())
}

fn set_enum(node: &mut Node, ctx: &mut SignalContext, param_id: &Id, value: &str) -> Result<(), GraphError> {
    let missing = param_not_found(node, param_id);
    let param = node.core_mut().params.enums.get_mut(param_id).ok_or(missing)?;
    if !param.options.iter().any(|o| o == value) {
        return Err(GraphError::InvariantViolation(format!(
            "{value:?} is not an option of {param_id}"
        )));
    }
    param.value = value.to_owned();
    node.on_enum_param(ctx, param_id, value);
    Ok(())
}

fn set_string(node: &mut Node, param_id: &Id, value: &str) -> Result<(), GraphError> {
    let missing = param_not_found(node, param_id);
    let param = node.core_mut().params.strings.get_mut(param_id).ok_or(missing)?;
    value.clone_into(param);
    node.on_string_param(param_id, value);
    Ok(())
}

fn set_set(node: &mut Node, param_id: &Id, value: BTreeSet<String>) -> Result<(), GraphError> {
    let missing = param_not_found(node, param_id);
    let param = node.core_mut().params.sets.get_mut(param_id).ok_or(missing)?;
    param.clone_from(&value);
    node.on_set_param(param_id, &value);
    Ok(())
}

/// Apply every parameter a snapshot carries. A bad entry is logged and skipped.
fn apply_params(node: &mut Node, ctx: &mut SignalContext, snapshot: &NodeSnapshot) {
    let mut failures = Vec::new();
    for (param_id, value) in &snapshot.audio_params {
        failures.extend(set_number(node, ctx, param_id, *value, NumberClass::Audio).err());
    }
    for (param_id, value) in &snapshot.custom_number_params {
        failures.extend(set_number(node, ctx, param_id, *value, NumberClass::Custom).err());
    }
    for (param_id, value) in &snapshot.custom_enum_params {
        failures.extend(set_enum(node, ctx, param_id, value).err());
    }
    for (param_id, value) in &snapshot.custom_string_params {
        failures.extend(set_string(node, param_id, value).err());
    }
    for (param_id, value) in &snapshot.custom_set_params {
        failures.extend(set_set(node, param_id, value.clone()).err());
    }
    for err in failures {
        warn!(node_id = %snapshot.id, %err, "skipping snapshot parameter");
    }
}

/// Shared objects must be upserted after whatever they point at.
fn dependency_rank(kind: SharedKind) -> u8 {
    match kind {
        SharedKind::MidiPattern | SharedKind::KeyboardState => 0,
        SharedKind::MidiPatternView => 1,
        SharedKind::TimelineClip => 2,
        SharedKind::TimelineTrack => 3,
    }
}

/// Order snapshots so every node comes after its parent group.
///
/// Group chains that loop back on themselves have no valid order; their members
/// are logged and loaded at the root.
pub(crate) fn load_order(snapshots: Vec<NodeSnapshot>) -> Vec<NodeSnapshot> {
    let mut nesting = DiGraph::<usize, ()>::with_capacity(snapshots.len(), snapshots.len());
    let indices: HashMap<Id, NodeIndex> = snapshots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.clone(), nesting.add_node(i)))
        .collect();
    for (i, snapshot) in snapshots.iter().enumerate() {
        if let Some(parent) = snapshot.group_id.parent().and_then(|p| indices.get(p)) {
            nesting.add_edge(*parent, NodeIndex::new(i), ());
        }
    }

    let mut slots: Vec<Option<NodeSnapshot>> = snapshots.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());

    // Components come out children first.
    for component in tarjan_scc(&nesting).into_iter().rev() {
        let cyclic = component.len() > 1 || nesting.contains_edge(component[0], component[0]);
        for idx in component.into_iter().sorted() {
            let Some(mut snapshot) = slots[nesting[idx]].take() else {
                continue;
            };
            if cyclic {
                error!(node_id = %snapshot.id, group = ?snapshot.group_id, "group nesting forms a cycle, loading at root");
                snapshot.group_id = GroupId::Top;
            }
            ordered.push(snapshot);
        }
    }
    ordered
}
