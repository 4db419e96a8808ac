//! Native signal resources and their wiring.
//!
//! The engine never touches DSP itself. Everything that would make sound
//! (gain stages, constant sources, oscillators, analysers) is a resource in the
//! [`SignalContext`], and nodes only create, wire, automate and release them.

use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::error::SignalError;

/// Handle to a native resource. Only meaningful for the context that created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceKind {
    Gain,
    ConstantSource,
    Oscillator,
    WaveShaper,
    Analyser,
    Destination,
    Monitor,
}

/// A `set_target_at_time` style ramp: approach `value` from `time` with the given time constant.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Automation {
    pub time: f64,
    pub value: f64,
    pub time_constant: f64,
}

#[derive(Debug)]
struct Resource {
    kind: ResourceKind,
    value: f64,
    automation: Vec<Automation>,
}

/// Owner of every native resource plus the audio clock.
///
/// One context exists per [`GraphManager`](crate::GraphManager) and is passed
/// explicitly to whatever needs it; there is no ambient global.
pub struct SignalContext {
    graph: StableGraph<Resource, ()>,
    indices: HashMap<ResourceId, NodeIndex>,
    next_id: u64,

    current_time: f64,
    sample_rate: u32,

    destination: Option<ResourceId>,
    monitor: Option<ResourceId>,
    monitor_enabled: bool,
}

impl SignalContext {
    /// Create a context with a master destination and, if enabled, a monitor tap.
    pub fn new(config: &EngineConfig) -> Self {
        let mut ctx = Self {
            graph: StableGraph::with_capacity(64, 64),
            indices: HashMap::new(),
            next_id: 0,
            current_time: 0.0,
            sample_rate: config.sample_rate,
            destination: None,
            monitor: None,
            monitor_enabled: config.monitor_enabled,
        };
        ctx.destination = Some(ctx.create(ResourceKind::Destination));
        if ctx.monitor_enabled {
            ctx.monitor = Some(ctx.create(ResourceKind::Monitor));
        }
        ctx
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Host audio clock, in seconds.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Move the clock forward. The clock never runs backwards.
    pub fn set_current_time(&mut self, time: f64) {
        if time < self.current_time {
            warn!(current = self.current_time, requested = time, "ignoring backwards clock update");
            return;
        }
        self.current_time = time;
    }

    pub fn advance(&mut self, seconds: f64) {
        self.set_current_time(self.current_time + seconds.max(0.0));
    }

    pub fn destination(&self) -> Option<ResourceId> {
        self.destination
    }

    pub fn monitor(&self) -> Option<ResourceId> {
        self.monitor
    }

    pub fn create(&mut self, kind: ResourceKind) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;

        let value = match kind {
            ResourceKind::Gain => 1.0,
            _ => 0.0,
        };
        let idx = self.graph.add_node(Resource {
            kind,
            value,
            automation: Vec::new(),
        });
        self.indices.insert(id, idx);
        id
    }

    /// Like [`create`](Self::create), with an initial value.
    pub fn create_with_value(&mut self, kind: ResourceKind, value: f64) -> ResourceId {
        let id = self.create(kind);
        if let Some(&idx) = self.indices.get(&id) {
            self.graph[idx].value = value;
        }
        id
    }

    fn index(&self, id: ResourceId) -> Result<NodeIndex, SignalError> {
        self.indices.get(&id).copied().ok_or(SignalError::UnknownResource(id.0))
    }

    /// Drop a resource and every wire touching it. Releasing twice is an error.
    pub fn release(&mut self, id: ResourceId) -> Result<(), SignalError> {
        let idx = self.indices.remove(&id).ok_or(SignalError::UnknownResource(id.0))?;
        self.graph.remove_node(idx);
        if self.monitor == Some(id) {
            self.monitor = None;
        }
        if self.destination == Some(id) {
            self.destination = None;
        }
        Ok(())
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.indices.contains_key(&id)
    }

    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.indices.get(&id).map(|&idx| self.graph[idx].kind)
    }

    pub fn live_resources(&self) -> usize {
        self.indices.len()
    }

    pub fn connect(&mut self, from: ResourceId, to: ResourceId) -> Result<(), SignalError> {
        let a = self.index(from)?;
        let b = self.index(to)?;
        if self.graph.find_edge(a, b).is_some() {
            return Err(SignalError::AlreadyWired { from: from.0, to: to.0 });
        }
        self.graph.add_edge(a, b, ());
        Ok(())
    }

    pub fn disconnect(&mut self, from: ResourceId, to: ResourceId) -> Result<(), SignalError> {
        let a = self.index(from)?;
        let b = self.index(to)?;
        let edge = self
            .graph
            .find_edge(a, b)
            .ok_or(SignalError::NotWired { from: from.0, to: to.0 })?;
        self.graph.remove_edge(edge);
        Ok(())
    }

    pub fn is_wired(&self, from: ResourceId, to: ResourceId) -> bool {
        match (self.indices.get(&from), self.indices.get(&to)) {
            (Some(&a), Some(&b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Number of resources feeding into `id`.
    pub fn inputs_of(&self, id: ResourceId) -> usize {
        self.indices
            .get(&id)
            .map_or(0, |&idx| self.graph.edges_directed(idx, Direction::Incoming).count())
    }

    /// Resources `id` feeds into.
    pub fn outputs_of(&self, id: ResourceId) -> Vec<ResourceId> {
        let Some(&idx) = self.indices.get(&id) else {
            return Vec::new();
        };
        let targets: Vec<NodeIndex> = self.graph.edges(idx).map(|e| e.target()).collect();
        self.indices
            .iter()
            .filter(|(_, idx)| targets.contains(idx))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Set a value immediately, dropping any pending automation.
    pub fn set_value(&mut self, id: ResourceId, value: f64) -> Result<(), SignalError> {
        let idx = self.index(id)?;
        let resource = &mut self.graph[idx];
        resource.value = value;
        resource.automation.clear();
        Ok(())
    }

    pub fn value(&self, id: ResourceId) -> Option<f64> {
        self.indices.get(&id).map(|&idx| self.graph[idx].value)
    }

    /// Queue a ramp towards `value` starting at `time`.
    ///
    /// Ramps that started before the clock are dropped, except the latest one,
    /// which still describes where the value is heading.
    pub fn schedule(&mut self, id: ResourceId, automation: Automation) -> Result<(), SignalError> {
        let idx = self.index(id)?;
        let now = self.current_time;
        let resource = &mut self.graph[idx];
        prune_settled(&mut resource.automation, now);
        resource.automation.push(automation);
        // Target value is what the resource settles on; consumers read `value` as the latest target.
        resource.value = automation.value;
        Ok(())
    }

    pub fn automation(&self, id: ResourceId) -> &[Automation] {
        match self.indices.get(&id) {
            Some(&idx) => &self.graph[idx].automation,
            None => &[],
        }
    }

    /// Drop the monitor tap (if any) and create a fresh one.
    pub fn reset_monitor(&mut self) -> Result<ResourceId, SignalError> {
        if !self.monitor_enabled {
            return Err(SignalError::MonitorUnavailable);
        }
        if let Some(old) = self.monitor.take() {
            let _ = self.release(old);
        }
        let monitor = self.create(ResourceKind::Monitor);
        self.monitor = Some(monitor);
        debug!(resource = monitor.0, "monitor tap reset");
        Ok(monitor)
    }

    fn try_connect_monitor(&mut self, from: ResourceId) -> Result<(), SignalError> {
        let monitor = self.monitor.ok_or(SignalError::MonitorUnavailable)?;
        self.connect(from, monitor)
    }

    /// Wire `from` into the monitor tap. On failure the tap is reset and the wire
    /// retried once; a second failure is logged and the tap is skipped.
    pub fn connect_to_monitor(&mut self, from: ResourceId) -> bool {
        match self.try_connect_monitor(from) {
            Ok(()) => return true,
            Err(err) => warn!(resource = from.0, %err, "monitor tap connect failed, resetting"),
        }

        let retried = self.reset_monitor().and_then(|_| self.try_connect_monitor(from));
        match retried {
            Ok(()) => true,
            Err(err) => {
                error!(resource = from.0, %err, "monitor tap unavailable after reset");
                false
            }
        }
    }

    /// Release every resource, destination and monitor included.
    pub fn teardown(&mut self) {
        debug!(resources = self.indices.len(), "tearing down signal context");
        self.graph.clear();
        self.indices.clear();
        self.destination = None;
        self.monitor = None;
    }
}

fn prune_settled(automation: &mut Vec<Automation>, now: f64) {
    let latest = automation
        .iter()
        .enumerate()
        .filter(|(_, a)| a.time <= now)
        .max_by(|(_, a), (_, b)| a.time.total_cmp(&b.time))
        .map(|(i, _)| i);
    let Some(latest) = latest else {
        return;
    };
    let mut index = 0;
    automation.retain(|a| {
        let keep = index == latest || a.time > now;
        index += 1;
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SignalContext {
        SignalContext::new(&EngineConfig::default())
    }

    #[test]
    fn new_context_has_destination_and_monitor() {
        let ctx = ctx();
        assert_eq!(ctx.live_resources(), 2);
        assert!(ctx.destination().is_some());
        assert!(ctx.monitor().is_some());

        let quiet = SignalContext::new(&EngineConfig::default().without_monitor());
        assert_eq!(quiet.live_resources(), 1);
        assert!(quiet.monitor().is_none());
    }

    #[test]
    fn double_release_is_rejected() {
        let mut ctx = ctx();
        let gain = ctx.create(ResourceKind::Gain);
        assert!(ctx.release(gain).is_ok());
        assert_eq!(ctx.release(gain), Err(SignalError::UnknownResource(gain.raw())));
    }

    #[test]
    fn release_drops_wires() {
        let mut ctx = ctx();
        let osc = ctx.create(ResourceKind::Oscillator);
        let gain = ctx.create(ResourceKind::Gain);
        ctx.connect(osc, gain).unwrap();
        assert_eq!(ctx.inputs_of(gain), 1);
        ctx.release(osc).unwrap();
        assert_eq!(ctx.inputs_of(gain), 0);
    }

    #[test]
    fn duplicate_and_missing_wires() {
        let mut ctx = ctx();
        let a = ctx.create(ResourceKind::ConstantSource);
        let b = ctx.create(ResourceKind::Gain);
        ctx.connect(a, b).unwrap();
        assert!(matches!(ctx.connect(a, b), Err(SignalError::AlreadyWired { .. })));
        ctx.disconnect(a, b).unwrap();
        assert!(matches!(ctx.disconnect(a, b), Err(SignalError::NotWired { .. })));
        assert_eq!(ctx.outputs_of(a), Vec::new());
    }

    #[test]
    fn monitor_reconnects_after_reset() {
        let mut ctx = ctx();
        let osc = ctx.create(ResourceKind::Oscillator);
        let old = ctx.monitor().unwrap();
        ctx.release(old).unwrap();

        assert!(ctx.connect_to_monitor(osc));
        let fresh = ctx.monitor().unwrap();
        assert_ne!(fresh, old);
        assert!(ctx.is_wired(osc, fresh));
    }

    #[test]
    fn monitor_degrades_when_disabled() {
        let mut ctx = SignalContext::new(&EngineConfig::default().without_monitor());
        let osc = ctx.create(ResourceKind::Oscillator);
        assert!(!ctx.connect_to_monitor(osc));
        assert_eq!(ctx.reset_monitor(), Err(SignalError::MonitorUnavailable));
    }

    #[test]
    fn scheduling_records_ramps() {
        let mut ctx = ctx();
        let pitch = ctx.create(ResourceKind::ConstantSource);
        ctx.schedule(pitch, Automation { time: 0.5, value: 60.0, time_constant: 0.01 }).unwrap();
        assert_eq!(ctx.automation(pitch).len(), 1);
        assert_eq!(ctx.value(pitch), Some(60.0));
        ctx.set_value(pitch, 0.0).unwrap();
        assert!(ctx.automation(pitch).is_empty());
    }

    #[test]
    fn settled_ramps_are_dropped() {
        let mut ctx = ctx();
        let gate = ctx.create(ResourceKind::Gain);
        for step in 0..10_000 {
            let now = step as f64 * 0.01;
            ctx.set_current_time(now);
            let value = (step % 2) as f64;
            ctx.schedule(gate, Automation { time: now + 0.005, value, time_constant: 0.005 }).unwrap();
        }
        assert_eq!(ctx.automation(gate).len(), 2);
        assert_eq!(ctx.value(gate), Some(1.0));

        // Future ramps survive until the clock passes them.
        ctx.schedule(gate, Automation { time: 500.0, value: 0.0, time_constant: 0.005 }).unwrap();
        ctx.schedule(gate, Automation { time: 501.0, value: 1.0, time_constant: 0.005 }).unwrap();
        assert_eq!(ctx.automation(gate).len(), 4);
        ctx.set_current_time(500.5);
        ctx.schedule(gate, Automation { time: 502.0, value: 0.0, time_constant: 0.005 }).unwrap();
        let times: Vec<f64> = ctx.automation(gate).iter().map(|a| a.time).collect();
        assert_eq!(times, vec![500.0, 501.0, 502.0]);
    }

    #[test]
    fn clock_only_moves_forward() {
        let mut ctx = ctx();
        ctx.set_current_time(1.0);
        ctx.set_current_time(0.5);
        assert_eq!(ctx.current_time(), 1.0);
        ctx.advance(0.25);
        assert_eq!(ctx.current_time(), 1.25);
    }

    #[test]
    fn teardown_releases_everything() {
        let mut ctx = ctx();
        ctx.create(ResourceKind::Gain);
        ctx.teardown();
        assert_eq!(ctx.live_resources(), 0);
        assert!(ctx.destination().is_none());
    }
}
