//! Typed connection endpoints.
//!
//! Audio ports are backed by a native resource in the [`SignalContext`]. MIDI and
//! polyphonic outputs instead carry an outbox: a ring buffer the owning node
//! pushes actions into and the graph manager drains along connections.

use core::fmt;

use hashbrown::HashMap;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GraphError, SignalError};
use crate::midi::MidiAction;
use crate::signal::{ResourceId, ResourceKind, SignalContext};
use crate::Id;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    Audio,
    Midi,
    Polyphonic,
    /// Placeholder returned for unresolved lookups. Never wired.
    Dummy,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortSide {
    Input,
    Output,
}

/// How a modulating signal is mapped before being mixed into a parameter.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Centering {
    /// Passed through unchanged, `-1..1`
    #[default]
    Bipolar,
    /// Remapped to `0..1`
    Unipolar,
}

impl Centering {
    fn shaper_value(self) -> f64 {
        match self {
            Centering::Bipolar => 0.0,
            Centering::Unipolar => 1.0,
        }
    }
}

/// Per-connection mix settings on a param input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChainMix {
    pub gain: f64,
    pub centering: Centering,
    shaper: ResourceId,
    stage: ResourceId,
}

impl ChainMix {
    /// Resource a source is wired into.
    pub fn entry(&self) -> ResourceId {
        self.shaper
    }
}

/// State carried by audio inputs that modulate a parameter.
///
/// Each incoming connection gets its own shaper → gain chain, keyed by
/// connection id, so many sources can be mixed with independent settings.
#[derive(Debug, Default)]
pub struct ParamInput {
    chains: HashMap<Id, ChainMix>,
}

impl ParamInput {
    pub fn chain(&self, connection_id: &Id) -> Option<&ChainMix> {
        self.chains.get(connection_id)
    }

    pub fn chains(&self) -> impl Iterator<Item = (&Id, &ChainMix)> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Queue of actions emitted on a MIDI or polyphonic output.
pub struct Outbox {
    producer: Producer<MidiAction>,
    consumer: Consumer<MidiAction>,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        Self { producer, consumer }
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.consumer.slots())
            .finish()
    }
}

/// Declarative description of a port, as found in node snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub id: Id,
    #[serde(rename = "type")]
    pub port_type: PortType,
    pub side: PortSide,
    #[serde(default)]
    pub is_audio_param_input: bool,
}

#[derive(Debug)]
pub struct Port {
    id: Id,
    port_type: PortType,
    side: PortSide,
    enabled: bool,
    resource: Option<ResourceId>,
    param_input: Option<ParamInput>,
    outbox: Option<Outbox>,
}

impl Port {
    /// An audio port backed by `resource`.
    pub fn audio(id: impl Into<Id>, side: PortSide, resource: ResourceId) -> Self {
        Self {
            id: id.into(),
            port_type: PortType::Audio,
            side,
            enabled: true,
            resource: Some(resource),
            param_input: None,
            outbox: None,
        }
    }

    /// An audio input that modulates the parameter held by `target`.
    pub fn param_input(id: impl Into<Id>, target: ResourceId) -> Self {
        Self {
            param_input: Some(ParamInput::default()),
            ..Self::audio(id, PortSide::Input, target)
        }
    }

    /// A MIDI or polyphonic port. Outputs get an outbox of `capacity` actions.
    pub fn event(id: impl Into<Id>, port_type: PortType, side: PortSide, capacity: usize) -> Self {
        let outbox = (side == PortSide::Output).then(|| Outbox::new(capacity));
        Self {
            id: id.into(),
            port_type,
            side,
            enabled: true,
            resource: None,
            param_input: None,
            outbox,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn side(&self) -> PortSide {
        self.side
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    pub fn is_param_input(&self) -> bool {
        self.param_input.is_some()
    }

    pub fn param(&self) -> Option<&ParamInput> {
        self.param_input.as_ref()
    }

    pub fn spec(&self) -> PortSpec {
        PortSpec {
            id: self.id.clone(),
            port_type: self.port_type,
            side: self.side,
            is_audio_param_input: self.is_param_input(),
        }
    }

    /// Queue an action on this output. Disabled ports drop it silently.
    pub fn emit(&mut self, action: MidiAction) {
        if !self.enabled {
            return;
        }
        let Some(outbox) = self.outbox.as_mut() else {
            warn!(port_id = %self.id, "emit on a port without an outbox");
            return;
        };
        if outbox.producer.push(action).is_err() {
            warn!(port_id = %self.id, "outbox full, dropping action");
        }
    }

    /// Take every queued action.
    pub fn drain(&mut self) -> Vec<MidiAction> {
        match self.outbox.as_mut() {
            Some(outbox) => core::iter::from_fn(|| outbox.consumer.pop().ok()).collect(),
            None => Vec::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.outbox.as_ref().map_or(0, |o| o.consumer.slots())
    }

    /// Build the mix chain for `connection_id` and return the resource its source
    /// should be wired into.
    pub(crate) fn add_chain(&mut self, ctx: &mut SignalContext, connection_id: &Id) -> Result<ResourceId, SignalError> {
        let target = self.resource.ok_or(SignalError::Unbacked)?;
        let Some(param) = self.param_input.as_mut() else {
            return Ok(target);
        };

        if let Some(existing) = param.chains.get(connection_id) {
            return Ok(existing.shaper);
        }

        let centering = Centering::default();
        let shaper = ctx.create_with_value(ResourceKind::WaveShaper, centering.shaper_value());
        let stage = ctx.create_with_value(ResourceKind::Gain, 1.0);
        if let Err(err) = ctx.connect(shaper, stage).and_then(|()| ctx.connect(stage, target)) {
            let _ = ctx.release(shaper);
            let _ = ctx.release(stage);
            return Err(err);
        }
        param.chains.insert(
            connection_id.clone(),
            ChainMix {
                gain: 1.0,
                centering,
                shaper,
                stage,
            },
        );
        Ok(shaper)
    }

    pub(crate) fn remove_chain(&mut self, ctx: &mut SignalContext, connection_id: &Id) {
        let Some(chain) = self.param_input.as_mut().and_then(|p| p.chains.remove(connection_id)) else {
            return;
        };
        for resource in [chain.shaper, chain.stage] {
            if let Err(err) = ctx.release(resource) {
                warn!(port_id = %self.id, %connection_id, %err, "mix chain already released");
            }
        }
    }

    fn chain_mut(&mut self, node_id: &Id, connection_id: &Id) -> Result<&mut ChainMix, GraphError> {
        let param = self.param_input.as_mut().ok_or_else(|| GraphError::NotParamInput {
            node_id: node_id.clone(),
            port_id: self.id.clone(),
        })?;
        param
            .chains
            .get_mut(connection_id)
            .ok_or_else(|| GraphError::ConnectionNotFound(connection_id.clone()))
    }

    pub(crate) fn set_gain(
        &mut self,
        ctx: &mut SignalContext,
        node_id: &Id,
        connection_id: &Id,
        gain: f64,
    ) -> Result<(), GraphError> {
        let chain = self.chain_mut(node_id, connection_id)?;
        ctx.set_value(chain.stage, gain)?;
        chain.gain = gain;
        Ok(())
    }

    pub(crate) fn set_centering(
        &mut self,
        ctx: &mut SignalContext,
        node_id: &Id,
        connection_id: &Id,
        centering: Centering,
    ) -> Result<(), GraphError> {
        let chain = self.chain_mut(node_id, connection_id)?;
        ctx.set_value(chain.shaper, centering.shaper_value())?;
        chain.centering = centering;
        Ok(())
    }

    /// Release the backing resource and every mix chain.
    pub(crate) fn dispose(&mut self, ctx: &mut SignalContext) {
        if let Some(param) = self.param_input.as_mut() {
            for (_, chain) in param.chains.drain() {
                let _ = ctx.release(chain.shaper);
                let _ = ctx.release(chain.stage);
            }
        }
        if let Some(resource) = self.resource.take() {
            if let Err(err) = ctx.release(resource) {
                warn!(port_id = %self.id, %err, "port resource already released");
            }
        }
        self.outbox = None;
        self.enabled = false;
    }
}

/// A node's ports, keyed by id, in declaration order.
#[derive(Debug, Default)]
pub struct Ports {
    ports: Vec<Port>,
}

impl Ports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, port: Port) {
        if let Some(existing) = self.get_mut(port.id()) {
            *existing = port;
        } else {
            self.ports.push(port);
        }
    }

    pub fn get(&self, id: &Id) -> Option<&Port> {
        self.ports.iter().find(|p| &p.id == id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn dispose(&mut self, ctx: &mut SignalContext) {
        self.ports.iter_mut().for_each(|p| p.dispose(ctx));
    }
}
