use tracing::warn;

use crate::config::EngineConfig;
use crate::node::{EnumParam, NodeCore, NodeKind, NodeSnapshot, NumberParam, SignalNode};
use crate::port::{Port, PortSide};
use crate::signal::{ResourceId, ResourceKind, SignalContext};

/// A single oscillator with modulatable frequency and detune.
///
/// The output is also tapped into the shared monitor so it can be visualized.
/// If the tap cannot be attached the oscillator still plays.
pub struct Oscillator {
    core: NodeCore,
    output: ResourceId,
    monitored: bool,
}

impl Oscillator {
    pub fn new(snapshot: &NodeSnapshot, ctx: &mut SignalContext, _config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::Oscillator);

        let oscillator = core.own(ctx.create(ResourceKind::Oscillator));
        let frequency = ctx.create_with_value(ResourceKind::ConstantSource, 220.0);
        let detune = ctx.create(ResourceKind::ConstantSource);
        let output = ctx.create_with_value(ResourceKind::Gain, 1.0);
        for (from, to) in [(frequency, oscillator), (detune, oscillator), (oscillator, output)] {
            let _ = ctx.connect(from, to);
        }

        core.add_port(Port::param_input("frequency", frequency));
        core.add_port(Port::param_input("detune", detune));
        core.add_port(Port::audio("output", PortSide::Output, output));
        core.add_number("frequency", NumberParam::audio(frequency, 220.0, 0.0, 20_000.0));
        core.add_number("detune", NumberParam::audio(detune, 0.0, -1200.0, 1200.0));
        core.add_enum("type", EnumParam::new("sine", &["sine", "square", "sawtooth", "triangle"]));
        core.add_string("label", "");

        let monitored = ctx.connect_to_monitor(output);
        if !monitored {
            warn!(node_id = %core.id(), "oscillator running without a monitor tap");
        }

        Self { core, output, monitored }
    }

    pub fn is_monitored(&self) -> bool {
        self.monitored
    }
}

impl SignalNode for Oscillator {
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
        "Oscillator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Id;

    #[test]
    fn attaches_monitor_tap_when_available() {
        let config = EngineConfig::default();
        let mut ctx = SignalContext::new(&config);
        let osc = Oscillator::new(&NodeSnapshot::new("osc", NodeKind::Oscillator), &mut ctx, &config);
        assert!(osc.is_monitored());
        assert!(osc.core.port(&Id::from("frequency")).unwrap().is_param_input());
    }

    #[test]
    fn still_builds_without_monitor() {
        let config = EngineConfig::default().without_monitor();
        let mut ctx = SignalContext::new(&config);
        let osc = Oscillator::new(&NodeSnapshot::new("osc", NodeKind::Oscillator), &mut ctx, &config);
        assert!(!osc.is_monitored());
    }
}
