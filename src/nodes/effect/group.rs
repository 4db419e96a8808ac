use crate::config::EngineConfig;
use crate::error::GraphError;
use crate::node::{NodeCore, NodeKind, NodeSnapshot, SignalNode};
use crate::port::{Port, PortSide, PortType};
use crate::signal::{ResourceId, ResourceKind, SignalContext};

/// Container node. Its ports are whatever the snapshot declares, audio only.
///
/// Param inputs are backed by a constant source so they can be modulated like
/// any other parameter. Every port passes through a gain that is opened on
/// enable and closed on disable.
pub struct Group {
    core: NodeCore,
    gains: Vec<ResourceId>,
}

impl Group {
    pub fn new(snapshot: &NodeSnapshot, ctx: &mut SignalContext, _config: &EngineConfig) -> Result<Self, GraphError> {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::Group);

        if let Some(bad) = snapshot.ports.iter().find(|p| p.port_type != PortType::Audio) {
            return Err(GraphError::UnsupportedPort {
                node_id: snapshot.id.clone(),
                kind: NodeKind::Group,
                port_type: bad.port_type,
            });
        }

        let mut gains = Vec::with_capacity(snapshot.ports.len());
        for spec in &snapshot.ports {
            let gain = ctx.create_with_value(ResourceKind::Gain, 1.0);
            gains.push(gain);
            let port = if spec.side == PortSide::Input && spec.is_audio_param_input {
                let source = ctx.create(ResourceKind::ConstantSource);
                let _ = ctx.connect(source, gain);
                core.own(gain);
                Port::param_input(spec.id.clone(), source)
            } else {
                Port::audio(spec.id.clone(), spec.side, gain)
            };
            core.add_port(port);
        }

        Ok(Self { core, gains })
    }

    fn set_gains(&self, ctx: &mut SignalContext, value: f64) {
        for &gain in &self.gains {
            let _ = ctx.set_value(gain, value);
        }
    }
}

impl SignalNode for Group {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn on_enable(&mut self, ctx: &mut SignalContext) {
        self.set_gains(ctx, 1.0);
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        self.set_gains(ctx, 0.0);
    }

    fn name(&self) -> &'static str {
        "Group"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortSpec;
    use crate::Id;

    fn spec(id: &str, port_type: PortType, side: PortSide, param: bool) -> PortSpec {
        PortSpec {
            id: id.into(),
            port_type,
            side,
            is_audio_param_input: param,
        }
    }

    #[test]
    fn rejects_non_audio_ports() {
        let config = EngineConfig::default();
        let mut ctx = SignalContext::new(&config);
        let snapshot = NodeSnapshot::new("g", NodeKind::Group).with_port(spec("m", PortType::Midi, PortSide::Input, false));
        let before = ctx.live_resources();
        assert!(matches!(
            Group::new(&snapshot, &mut ctx, &config),
            Err(GraphError::UnsupportedPort { port_type: PortType::Midi, .. })
        ));
        assert_eq!(ctx.live_resources(), before);
    }

    #[test]
    fn gains_follow_enable_state() {
        let config = EngineConfig::default();
        let mut ctx = SignalContext::new(&config);
        let snapshot = NodeSnapshot::new("g", NodeKind::Group)
            .with_port(spec("in", PortType::Audio, PortSide::Input, false))
            .with_port(spec("cutoff", PortType::Audio, PortSide::Input, true))
            .with_port(spec("out", PortType::Audio, PortSide::Output, false));
        let mut group = Group::new(&snapshot, &mut ctx, &config).unwrap();

        assert!(group.core.port(&Id::from("cutoff")).unwrap().is_param_input());
        group.on_disable(&mut ctx);
        assert!(group.gains.iter().all(|&g| ctx.value(g) == Some(0.0)));
        group.on_enable(&mut ctx);
        assert!(group.gains.iter().all(|&g| ctx.value(g) == Some(1.0)));
    }
}
