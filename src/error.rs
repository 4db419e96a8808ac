//! Error types for graph and signal operations.
//!
//! None of these are fatal. The [`GraphManager`](crate::GraphManager) logs every
//! error at the operation boundary and leaves prior state intact.

use thiserror::Error;

use crate::node::NodeKind;
use crate::port::{PortSide, PortType};
use crate::shared::SharedKind;
use crate::Id;

/// Failures raised by the [`SignalContext`](crate::signal::SignalContext).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("signal resource {0} does not exist or was already released")]
    UnknownResource(u64),
    #[error("signal resources {from} -> {to} are already wired")]
    AlreadyWired { from: u64, to: u64 },
    #[error("signal resources {from} -> {to} are not wired")]
    NotWired { from: u64, to: u64 },
    #[error("monitor tap is unavailable")]
    MonitorUnavailable,
    #[error("port has no backing signal resource")]
    Unbacked,
}

/// Errors that can occur while applying a graph operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(Id),
    #[error("port {port_id} not found on node {node_id}")]
    PortNotFound { node_id: Id, port_id: Id },
    #[error("connection {0} not found")]
    ConnectionNotFound(Id),
    #[error("{kind:?} reference {id} not found")]
    ReferenceNotFound { kind: SharedKind, id: Id },
    #[error("parameter {param_id} not found on node {node_id}")]
    ParamNotFound { node_id: Id, param_id: Id },
    #[error("signal type mismatch: expected {expected:?}, got {got:?}")]
    TypeMismatch { expected: PortType, got: PortType },
    #[error("port {port_id} is an {got:?} port, expected {expected:?}")]
    DirectionMismatch {
        port_id: Id,
        expected: PortSide,
        got: PortSide,
    },
    #[error("port {port_id} on node {node_id} is not an audio param input")]
    NotParamInput { node_id: Id, port_id: Id },
    #[error("refusing to wire dummy connection {0}")]
    DummyConnection(Id),
    #[error("node {node_id} ({kind:?}) cannot declare a {port_type:?} port")]
    UnsupportedPort {
        node_id: Id,
        kind: NodeKind,
        port_type: PortType,
    },
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("node {0} was already disposed")]
    AlreadyDisposed(Id),
    #[error("signal resource failure: {0}")]
    Resource(#[from] SignalError),
}

impl GraphError {
    /// Whether this error is a lookup miss rather than a malformed request.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GraphError::NodeNotFound(_)
                | GraphError::PortNotFound { .. }
                | GraphError::ConnectionNotFound(_)
                | GraphError::ReferenceNotFound { .. }
                | GraphError::ParamNotFound { .. }
        )
    }
}
