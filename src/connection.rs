//! Typed edges between an output port and an input port.
//!
//! Audio connections own a wire in the [`SignalContext`]. When the target is a
//! param input, the wire goes through that connection's own mix chain on the
//! port. MIDI and polyphonic connections own no resources; the graph manager
//! routes outbox contents along them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, SignalError};
use crate::port::{Port, PortSide, PortType};
use crate::signal::{ResourceId, SignalContext};
use crate::Id;

/// A connection as described by the state layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub id: Id,
    pub source_id: Id,
    pub source_port: Id,
    pub target_id: Id,
    pub target_port: Id,
    #[serde(rename = "type")]
    pub port_type: PortType,
}

impl ConnectionSnapshot {
    pub fn new(
        id: impl Into<Id>,
        port_type: PortType,
        (source_id, source_port): (&str, &str),
        (target_id, target_port): (&str, &str),
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            source_port: source_port.into(),
            target_id: target_id.into(),
            target_port: target_port.into(),
            port_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub node_id: Id,
    pub port_id: Id,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Wire {
    Audio { from: ResourceId, to: ResourceId },
    Event,
}

/// Check that `port` can sit at the `side` end of a `port_type` connection.
pub fn validate_endpoint(port_type: PortType, port: &Port, side: PortSide) -> Result<(), GraphError> {
    if port.port_type() != port_type {
        return Err(GraphError::TypeMismatch {
            expected: port_type,
            got: port.port_type(),
        });
    }
    if port.side() != side {
        return Err(GraphError::DirectionMismatch {
            port_id: port.id().clone(),
            expected: side,
            got: port.side(),
        });
    }
    Ok(())
}

#[derive(Debug)]
pub struct Connection {
    id: Id,
    port_type: PortType,
    source: Endpoint,
    target: Endpoint,
    wire: Option<Wire>,
}

impl Connection {
    pub(crate) fn new(id: Id, port_type: PortType, source: Endpoint, target: Endpoint, wire: Wire) -> Self {
        Self {
            id,
            port_type,
            source,
            target,
            wire: Some(wire),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    pub fn is_attached(&self) -> bool {
        self.wire.is_some()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id.clone(),
            source_id: self.source.node_id.clone(),
            source_port: self.source.port_id.clone(),
            target_id: self.target.node_id.clone(),
            target_port: self.target.port_id.clone(),
            port_type: self.port_type,
        }
    }

    /// Resource the audio wire starts from, if this is an attached audio connection.
    pub(crate) fn wired_from(&self) -> Option<ResourceId> {
        match self.wire {
            Some(Wire::Audio { from, .. }) => Some(from),
            _ => None,
        }
    }

    /// Swap the source end. Audio wires keep their target and mix chain; the old
    /// source is unwired before the new one is wired, and wired back on failure.
    pub(crate) fn rewire_source(
        &mut self,
        ctx: &mut SignalContext,
        source: Endpoint,
        from: Option<ResourceId>,
    ) -> Result<(), GraphError> {
        if let Some(Wire::Audio { from: old, to }) = self.wire {
            let from = from.ok_or(SignalError::Unbacked)?;
            if let Err(err) = ctx.disconnect(old, to) {
                debug!(connection_id = %self.id, %err, "previous source already unwired");
            }
            if let Err(err) = ctx.connect(from, to) {
                let _ = ctx.connect(old, to);
                return Err(err.into());
            }
            self.wire = Some(Wire::Audio { from, to });
        }
        self.source = source;
        Ok(())
    }

    pub(crate) fn set_target(&mut self, target: Endpoint, wire: Wire) {
        self.target = target;
        self.wire = Some(wire);
    }

    /// Remove this connection's signal path. `target` is the current target
    /// port, if it still exists, so its mix chain can be dropped.
    pub(crate) fn detach(&mut self, ctx: &mut SignalContext, target: Option<&mut Port>) {
        let Some(wire) = self.wire.take() else {
            return;
        };
        if let Wire::Audio { from, to } = wire {
            if let Err(err) = ctx.disconnect(from, to) {
                debug!(connection_id = %self.id, %err, "audio wire already gone");
            }
            if let Some(port) = target {
                port.remove_chain(ctx, &self.id);
            }
        }
    }
}

/// Wire `from` into `target`, through a fresh mix chain if `target` is a param
/// input. Nothing is left behind on failure.
pub(crate) fn attach_audio(
    ctx: &mut SignalContext,
    connection_id: &Id,
    from: ResourceId,
    target: &mut Port,
) -> Result<Wire, GraphError> {
    let to = target.add_chain(ctx, connection_id)?;
    if let Err(err) = ctx.connect(from, to) {
        target.remove_chain(ctx, connection_id);
        return Err(err.into());
    }
    Ok(Wire::Audio { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ResourceKind;
    use crate::EngineConfig;

    #[test]
    fn endpoint_validation() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let audio_out = Port::audio("out", PortSide::Output, ctx.create(ResourceKind::Gain));
        let midi_out = Port::event("out", PortType::Midi, PortSide::Output, 4);

        assert!(validate_endpoint(PortType::Audio, &audio_out, PortSide::Output).is_ok());
        assert_eq!(
            validate_endpoint(PortType::Audio, &midi_out, PortSide::Output),
            Err(GraphError::TypeMismatch {
                expected: PortType::Audio,
                got: PortType::Midi
            })
        );
        assert!(matches!(
            validate_endpoint(PortType::Audio, &audio_out, PortSide::Input),
            Err(GraphError::DirectionMismatch { .. })
        ));
    }

    #[test]
    fn attach_then_detach_leaves_no_wire() {
        let mut ctx = SignalContext::new(&EngineConfig::default());
        let from = ctx.create(ResourceKind::Oscillator);
        let target_resource = ctx.create(ResourceKind::ConstantSource);
        let mut target = Port::param_input("frequency", target_resource);
        let id: Id = "c1".into();

        let wire = attach_audio(&mut ctx, &id, from, &mut target).unwrap();
        let endpoint = |node: &str, port: &str| Endpoint {
            node_id: node.into(),
            port_id: port.into(),
        };
        let mut connection = Connection::new(id.clone(), PortType::Audio, endpoint("a", "out"), endpoint("b", "frequency"), wire);
        assert_eq!(target.param().unwrap().len(), 1);

        connection.detach(&mut ctx, Some(&mut target));
        assert!(!connection.is_attached());
        assert!(target.param().unwrap().is_empty());
        assert!(ctx.outputs_of(from).is_empty());
    }
}
