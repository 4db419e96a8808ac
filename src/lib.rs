//! Tonegraph - a collaborative audio/MIDI node graph
//!
//! Design principles:
//! - One [`GraphManager`] owns every node and connection; all mutation goes through it
//! - Nodes are a closed set of kinds dispatched through the [`Node`] enum
//! - Ports are typed; connections are validated before anything is wired
//! - Native signal resources live in an explicit [`SignalContext`], never a global
//! - Shared patterns and keyboards are observed by id, never owned by nodes
//! - Sequencing runs in beats with fixed-precision rounding so long sessions don't drift
//!
//! The host calls [`GraphManager::on_tick`] from its audio clock and feeds state
//! changes in through [`GraphManager::apply`] (or the individual operations).

pub mod config;
pub mod connection;
pub mod error;
pub mod event_stream;
mod id;
pub mod logging;
pub mod manager;
pub mod midi;
pub mod node;
pub mod nodes;
pub mod notification;
pub mod port;
pub mod shared;
pub mod signal;
pub mod time;
pub mod voice;

pub use config::{EngineConfig, LoggingConfig};
pub use connection::{Connection, ConnectionSnapshot};
pub use error::{GraphError, SignalError};
pub use id::{GroupId, Id, TOP_GROUP};
pub use manager::{GhostConnection, GraphManager, GraphSnapshot, LoadReport, TickSubscription};
pub use midi::MidiAction;
pub use node::{NodeKind, NodeSnapshot, NodeView, SignalNode};
pub use nodes::Node;
pub use notification::GraphNotification;
pub use port::{Centering, PortSide, PortSpec, PortType};
pub use signal::SignalContext;
