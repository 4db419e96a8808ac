//! Built-in node kinds.
//!
//! Nodes are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Produce MIDI or audio without needing an input:
//! - [`Sequencer`] - Fixed-tempo demo loop
//! - [`PatternSequencer`] - Plays a shared pattern view
//! - [`Keyboard`] - Relays a shared keyboard state as notes
//! - [`Oscillator`] - Single oscillator with frequency/detune param inputs
//!
//! ## Effects ([`effect`])
//!
//! Transform what comes in:
//! - [`Gain`] - Gain stage with a modulatable level
//! - [`Group`] - Container with user-declared audio ports
//! - [`PolyphonicMidiConverter`] - Spreads notes across voice slots
//! - [`PolyphonicOscillator`] - One oscillator per voice slot
//!
//! ## Sinks ([`sink`])
//!
//! - [`AudioOutput`] - Feeds the master destination
//!
//! Every kind is a variant of [`Node`]; [`build`] maps a [`NodeKind`] to its constructor.

pub mod effect;
pub mod sink;
pub mod source;

use delegate::delegate;
use tracing::debug;

pub use effect::{Gain, Group, PolyphonicMidiConverter, PolyphonicOscillator};
pub use sink::AudioOutput;
pub use source::{Keyboard, Oscillator, PatternSequencer, Sequencer};

use std::collections::BTreeSet;

use crate::config::EngineConfig;
use crate::error::GraphError;
use crate::midi::MidiAction;
use crate::node::{NodeCore, NodeKind, NodeSnapshot, NodeView, Params, SignalNode, Tick};
use crate::port::Port;
use crate::shared::SharedSnapshot;
use crate::signal::SignalContext;
use crate::Id;

#[enum_delegate::implement(SignalNode, pub trait SignalNode {
    fn core(&self) -> &NodeCore;
    fn core_mut(&mut self) -> &mut NodeCore;
    fn on_tick(&mut self, ctx: &mut SignalContext, tick: Tick);
    fn on_enable(&mut self, ctx: &mut SignalContext);
    fn on_disable(&mut self, ctx: &mut SignalContext);
    fn on_dispose(&mut self, ctx: &mut SignalContext);
    fn on_midi(&mut self, ctx: &mut SignalContext, port_id: &Id, action: MidiAction);
    fn on_number_param(&mut self, ctx: &mut SignalContext, param_id: &Id, value: f64);
    fn on_enum_param(&mut self, ctx: &mut SignalContext, param_id: &Id, value: &str);
    fn on_string_param(&mut self, param_id: &Id, value: &str);
    fn on_set_param(&mut self, param_id: &Id, value: &BTreeSet<String>);
    fn on_reference_changed(&mut self, ctx: &mut SignalContext, param_id: &Id, snapshot: &SharedSnapshot);
    fn on_main_graph_loaded(&mut self, ctx: &mut SignalContext);
    fn on_node_to_node(&mut self, ctx: &mut SignalContext, action: MidiAction);
    fn name(&self) -> &'static str;
})]
pub enum Node {
    AudioOutput(AudioOutput),
    Group(Group),
    Sequencer(Sequencer),
    PatternSequencer(PatternSequencer),
    PolyphonicMidiConverter(PolyphonicMidiConverter),
    PolyphonicOscillator(PolyphonicOscillator),
    Keyboard(Keyboard),
    Oscillator(Oscillator),
    Gain(Gain),
}

type Constructor = fn(&NodeSnapshot, &mut SignalContext, &EngineConfig) -> Result<Node, GraphError>;

/// `NodeKind → constructor`. Resolved by a match so a missing entry fails to compile.
fn constructor(kind: NodeKind) -> Constructor {
    match kind {
        NodeKind::AudioOutput => |s, ctx, cfg| Ok(Node::AudioOutput(AudioOutput::new(s, ctx, cfg))),
        NodeKind::Group => |s, ctx, cfg| Ok(Node::Group(Group::new(s, ctx, cfg)?)),
        NodeKind::Sequencer => |s, ctx, cfg| Ok(Node::Sequencer(Sequencer::new(s, ctx, cfg))),
        NodeKind::PatternSequencer => |s, ctx, cfg| Ok(Node::PatternSequencer(PatternSequencer::new(s, ctx, cfg))),
        NodeKind::PolyphonicMidiConverter => |s, ctx, cfg| Ok(Node::PolyphonicMidiConverter(PolyphonicMidiConverter::new(s, ctx, cfg))),
        NodeKind::PolyphonicOscillator => |s, ctx, cfg| Ok(Node::PolyphonicOscillator(PolyphonicOscillator::new(s, ctx, cfg))),
        NodeKind::Keyboard => |s, ctx, cfg| Ok(Node::Keyboard(Keyboard::new(s, ctx, cfg))),
        NodeKind::Oscillator => |s, ctx, cfg| Ok(Node::Oscillator(Oscillator::new(s, ctx, cfg))),
        NodeKind::Gain => |s, ctx, cfg| Ok(Node::Gain(Gain::new(s, ctx, cfg))),
    }
}

/// Construct the node a snapshot describes. Parameters are not applied here.
pub fn build(snapshot: &NodeSnapshot, ctx: &mut SignalContext, config: &EngineConfig) -> Result<Node, GraphError> {
    let mut node = constructor(snapshot.kind)(snapshot, ctx, config)?;
    let core = node.core_mut();
    core.owner_id = snapshot.owner_id.clone();
    core.group = snapshot.group_id.clone();
    debug!(node_id = %snapshot.id, kind = ?snapshot.kind, "node constructed");
    Ok(node)
}

impl Node {
    delegate! {
        to self.core() {
            pub fn id(&self) -> &Id;
            pub fn kind(&self) -> NodeKind;
            pub fn is_enabled(&self) -> bool;
            pub fn is_disposed(&self) -> bool;
            pub fn port(&self, id: &Id) -> Option<&Port>;
            pub fn params(&self) -> &Params;
        }
    }

    pub fn view(&self) -> NodeView {
        NodeView::of(self)
    }

    /// Flip the enabled flag, running the matching hook only on an actual change.
    pub fn set_enabled(&mut self, ctx: &mut SignalContext, enabled: bool) {
        if self.core().disposed || self.core().enabled == enabled {
            return;
        }
        self.core_mut().enabled = enabled;
        if enabled {
            self.on_enable(ctx);
        } else {
            self.on_disable(ctx);
        }
    }

    /// Run the dispose hook, then release ports and owned resources.
    /// A second call returns [`GraphError::AlreadyDisposed`] and releases nothing.
    pub fn dispose(&mut self, ctx: &mut SignalContext) -> Result<(), GraphError> {
        if self.core().disposed {
            return Err(GraphError::AlreadyDisposed(self.id().clone()));
        }
        if self.core().enabled {
            self.core_mut().enabled = false;
            self.on_disable(ctx);
        }
        self.on_dispose(ctx);
        let core = self.core_mut();
        core.release_all(ctx);
        core.disposed = true;
        Ok(())
    }
}
