// pipeline/mod.rs — node/port/pipeline abstraction.
//
// A pipeline is a DAG of nodes connected through typed ports. The
// scheduler computes a topological order once (construction-time errors:
// port type mismatch, dangling ports, cycles) and then drives each node
// exactly once per run, in dependency order, feeding every input port
// the most recent message produced on its connected output port.
//
// The scheduler is generic over an execution context `C` so its
// semantics are testable without a GPU: the real detector nodes run
// against `GpuContext` (gpu/detector.rs), the scheduler test suite runs
// against `()`.

pub mod graph;
pub mod message;
pub mod node;

pub use graph::{NodeId, Pipeline};
pub use message::{Message, MessageKind, PortSpec};
pub use node::{NodeError, PipelineNode};

use std::error::Error;
use std::fmt;

/// Errors from pipeline construction and execution.
///
/// Everything except `MissingInput` and `NodeFailed` is detected at
/// construction/compile time; a run never discovers a malformed graph.
#[derive(Debug)]
pub enum PipelineError {
    /// Connected ports carry different message kinds.
    PortMismatch {
        from: String,
        to: String,
        expected: MessageKind,
        found: MessageKind,
    },
    /// Named port does not exist on the node.
    UnknownPort { node: String, port: String },
    /// The `NodeId` was minted by a different pipeline.
    UnknownNode { node: usize },
    /// An input port may have at most one incoming edge.
    DuplicateInput { node: String, port: String },
    /// Every input port must be connected before compile succeeds.
    UnconnectedInput { node: String, port: String },
    /// The graph has no topological order.
    CycleDetected,
    /// `run` was called before a successful `compile`.
    NotCompiled,
    /// A producing node did not emit a message for a connected port.
    MissingInput { node: String, port: String },
    /// A node returned the wrong number (or kinds) of output messages.
    OutputMismatch { node: String },
    /// A node's execution failed; remaining nodes were not run.
    NodeFailed {
        node: String,
        source: Box<dyn Error + Send + Sync>,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::PortMismatch { from, to, expected, found } => write!(
                f,
                "port type mismatch connecting {from} -> {to}: expected {expected:?}, found {found:?}"
            ),
            PipelineError::UnknownPort { node, port } => {
                write!(f, "node '{node}' has no port '{port}'")
            }
            PipelineError::UnknownNode { node } => {
                write!(f, "node id {node} does not belong to this pipeline")
            }
            PipelineError::DuplicateInput { node, port } => {
                write!(f, "input port '{port}' of node '{node}' is already connected")
            }
            PipelineError::UnconnectedInput { node, port } => {
                write!(f, "input port '{port}' of node '{node}' is not connected")
            }
            PipelineError::CycleDetected => write!(f, "pipeline graph contains a cycle"),
            PipelineError::NotCompiled => write!(f, "pipeline must be compiled before running"),
            PipelineError::MissingInput { node, port } => {
                write!(f, "no message available on input port '{port}' of node '{node}'")
            }
            PipelineError::OutputMismatch { node } => write!(
                f,
                "node '{node}' produced outputs that do not match its declared ports"
            ),
            PipelineError::NodeFailed { node, source } => {
                write!(f, "node '{node}' failed: {source}")
            }
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::NodeFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
