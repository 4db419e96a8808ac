use crate::config::EngineConfig;
use crate::node::{NodeCore, NodeKind, NodeSnapshot, NumberParam, SignalNode};
use crate::port::{Port, PortSide};
use crate::signal::{ResourceId, ResourceKind, SignalContext};

/// A gain stage whose level can also be modulated through the "gain" param input.
pub struct Gain {
    core: NodeCore,
    output: ResourceId,
}

impl Gain {
    pub fn new(snapshot: &NodeSnapshot, ctx: &mut SignalContext, _config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::Gain);

        let level = ctx.create_with_value(ResourceKind::Gain, 1.0);
        let modulation = ctx.create(ResourceKind::ConstantSource);
        let output = ctx.create_with_value(ResourceKind::Gain, 1.0);
        let _ = ctx.connect(modulation, level);
        let _ = ctx.connect(level, output);

        core.add_port(Port::audio("input", PortSide::Input, level));
        core.add_port(Port::param_input("gain", modulation));
        core.add_port(Port::audio("output", PortSide::Output, output));
        core.add_number("gain", NumberParam::audio(level, 1.0, 0.0, 10.0));

        Self { core, output }
    }
}

impl SignalNode for Gain {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn on_enable(&mut self, ctx: &mut SignalContext) {
        let _ = ctx.set_value(self.output, 1.0);
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        let _ = ctx.set_value(self.output, 0.0);
    }

    fn name(&self) -> &'static str {
        "Gain"
    }
}
