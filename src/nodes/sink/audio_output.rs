use tracing::warn;

use crate::config::EngineConfig;
use crate::node::{NodeCore, NodeKind, NodeSnapshot, SignalNode};
use crate::nodes::effect::ToggleGain;
use crate::port::{Port, PortSide};
use crate::signal::SignalContext;

/// Terminal node: whatever reaches "input" is sent to the master destination.
pub struct AudioOutput {
    core: NodeCore,
    chain: ToggleGain,
}

impl AudioOutput {
    pub fn new(snapshot: &NodeSnapshot, ctx: &mut SignalContext, _config: &EngineConfig) -> Self {
        let mut core = NodeCore::new(snapshot.id.clone(), NodeKind::AudioOutput);
        let chain = ToggleGain::new(ctx, 0.5);
        core.own(chain.output);

        match ctx.destination() {
            Some(destination) => {
                if let Err(err) = ctx.connect(chain.output, destination) {
                    warn!(node_id = %core.id(), %err, "audio output could not reach the destination");
                }
            }
            None => warn!(node_id = %core.id(), "no master destination, audio output is silent"),
        }

        core.add_port(Port::audio("input", PortSide::Input, chain.input));
        Self { core, chain }
    }
}

impl SignalNode for AudioOutput {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn on_enable(&mut self, ctx: &mut SignalContext) {
        self.chain.enable(ctx);
    }

    fn on_disable(&mut self, ctx: &mut SignalContext) {
        self.chain.disable(ctx);
    }

    fn name(&self) -> &'static str {
        "Audio Output"
    }
}
