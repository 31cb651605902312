// pipeline/node.rs — the unit of pipeline work.
//
// Lifecycle: constructed → initialized → (running)* → released.
// `init` is where a node acquires its fixed set of work textures and
// applies any one-time parameter patches; `release` must undo the
// patches *before* returning textures to the pool (restore-then-release,
// never the reverse — a future borrower must not inherit mutated
// sampling state). Re-initializing after release is not supported.

use std::error::Error;

use super::message::{Message, PortSpec};

/// Error type nodes report from `init`/`run`/`release`. The scheduler
/// wraps it in `PipelineError::NodeFailed` with the node's identity.
pub type NodeError = Box<dyn Error + Send + Sync>;

/// A pipeline node, generic over the execution context `C` (the GPU
/// nodes use [`crate::gpu::GpuContext`]).
///
/// Port slices must be stable for the node's lifetime: the scheduler
/// snapshots them at `add_node` time.
pub trait PipelineNode<C> {
    fn name(&self) -> &str;

    fn input_ports(&self) -> &[PortSpec];

    fn output_ports(&self) -> &[PortSpec];

    /// Acquire resources. Called once, in topological order, before the
    /// first run.
    fn init(&mut self, cx: &mut C) -> Result<(), NodeError> {
        let _ = cx;
        Ok(())
    }

    /// Execute. `inputs` holds one message per declared input port, in
    /// port order. Must return exactly one message per declared output
    /// port, in port order, with matching kinds.
    fn run(&mut self, cx: &mut C, inputs: &[Message]) -> Result<Vec<Message>, NodeError>;

    /// Restore any patched parameters, then give resources back.
    fn release(&mut self, cx: &mut C) -> Result<(), NodeError> {
        let _ = cx;
        Ok(())
    }
}
