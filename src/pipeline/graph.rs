// pipeline/graph.rs — DAG scheduler.
//
// `connect` validates port existence and kind compatibility immediately;
// `compile` checks that every input port is fed and computes a Kahn
// topological order; `run` executes nodes in that order, failing fast on
// the first node error. Submission order is therefore deterministic and
// fixed by the graph shape — the GPU may pipeline passes internally, but
// this layer never reorders them.

use log::debug;

use super::message::{Message, PortSpec};
use super::node::PipelineNode;
use super::PipelineError;

/// Opaque handle to a node within one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

struct Edge {
    from_node: usize,
    from_port: usize,
    to_node: usize,
    to_port: usize,
}

struct NodeSlot<C> {
    node: Box<dyn PipelineNode<C>>,
    name: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    /// Latest message per output port, refreshed each run.
    produced: Vec<Option<Message>>,
}

/// A directed acyclic graph of pipeline nodes.
pub struct Pipeline<C> {
    slots: Vec<NodeSlot<C>>,
    edges: Vec<Edge>,
    /// Topological order; populated by `compile`.
    order: Option<Vec<usize>>,
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Pipeline<C> {
    pub fn new() -> Self {
        Pipeline { slots: Vec::new(), edges: Vec::new(), order: None }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Box<dyn PipelineNode<C>>) -> NodeId {
        let name = node.name().to_string();
        let inputs = node.input_ports().to_vec();
        let outputs = node.output_ports().to_vec();
        let produced = vec![None; outputs.len()];
        self.slots.push(NodeSlot { node, name, inputs, outputs, produced });
        self.order = None;
        NodeId(self.slots.len() - 1)
    }

    /// Connect an output port to an input port. Kind mismatch, unknown
    /// ports, and double-connected inputs are rejected here — a compiled
    /// pipeline can no longer fail for structural reasons.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: &str,
        to: NodeId,
        to_port: &str,
    ) -> Result<(), PipelineError> {
        let from_slot = self
            .slots
            .get(from.0)
            .ok_or(PipelineError::UnknownNode { node: from.0 })?;
        let to_slot = self
            .slots
            .get(to.0)
            .ok_or(PipelineError::UnknownNode { node: to.0 })?;

        let from_idx = port_index(&from_slot.outputs, from_port).ok_or_else(|| {
            PipelineError::UnknownPort {
                node: from_slot.name.clone(),
                port: from_port.to_string(),
            }
        })?;
        let to_idx = port_index(&to_slot.inputs, to_port).ok_or_else(|| {
            PipelineError::UnknownPort {
                node: to_slot.name.clone(),
                port: to_port.to_string(),
            }
        })?;

        let expected = to_slot.inputs[to_idx].kind;
        let found = from_slot.outputs[from_idx].kind;
        if expected != found {
            return Err(PipelineError::PortMismatch {
                from: format!("{}.{}", from_slot.name, from_port),
                to: format!("{}.{}", to_slot.name, to_port),
                expected,
                found,
            });
        }

        if self.edges.iter().any(|e| e.to_node == to.0 && e.to_port == to_idx) {
            return Err(PipelineError::DuplicateInput {
                node: to_slot.name.clone(),
                port: to_port.to_string(),
            });
        }

        self.edges.push(Edge {
            from_node: from.0,
            from_port: from_idx,
            to_node: to.0,
            to_port: to_idx,
        });
        self.order = None;
        Ok(())
    }

    /// Validate the graph and compute the execution order.
    pub fn compile(&mut self) -> Result<(), PipelineError> {
        // Every input port must be fed.
        for (i, slot) in self.slots.iter().enumerate() {
            for (p, port) in slot.inputs.iter().enumerate() {
                let fed = self.edges.iter().any(|e| e.to_node == i && e.to_port == p);
                if !fed {
                    return Err(PipelineError::UnconnectedInput {
                        node: slot.name.clone(),
                        port: port.name.to_string(),
                    });
                }
            }
        }

        // Kahn's algorithm. Ties broken by insertion order so the
        // submission order is stable across runs.
        let n = self.slots.len();
        let mut indegree = vec![0usize; n];
        for e in &self.edges {
            indegree[e.to_node] += 1;
        }
        let mut ready: Vec<usize> =
            (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.first().copied() {
            ready.remove(0);
            order.push(i);
            for e in self.edges.iter().filter(|e| e.from_node == i) {
                indegree[e.to_node] -= 1;
                if indegree[e.to_node] == 0 {
                    ready.push(e.to_node);
                }
            }
        }
        if order.len() != n {
            return Err(PipelineError::CycleDetected);
        }

        debug!(
            "pipeline compiled: {} nodes, {} edges, order {:?}",
            n,
            self.edges.len(),
            order.iter().map(|&i| self.slots[i].name.as_str()).collect::<Vec<_>>()
        );
        self.order = Some(order);
        Ok(())
    }

    /// Initialize all nodes in execution order. Compile first if needed.
    pub fn init(&mut self, cx: &mut C) -> Result<(), PipelineError> {
        if self.order.is_none() {
            self.compile()?;
        }
        let order = self.order.clone().ok_or(PipelineError::NotCompiled)?;
        for i in order {
            self.slots[i].node.init(cx).map_err(|source| PipelineError::NodeFailed {
                node: self.slots[i].name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Execute every node once, in topological order. The first failing
    /// node aborts the run; no partial-success state is exposed.
    pub fn run(&mut self, cx: &mut C) -> Result<(), PipelineError> {
        let order = self.order.clone().ok_or(PipelineError::NotCompiled)?;

        for i in order {
            // Gather this node's inputs from its producers.
            let mut inputs = Vec::with_capacity(self.slots[i].inputs.len());
            for p in 0..self.slots[i].inputs.len() {
                let edge = self
                    .edges
                    .iter()
                    .find(|e| e.to_node == i && e.to_port == p)
                    .expect("compile() verified every input is connected");
                let msg = self.slots[edge.from_node].produced[edge.from_port]
                    .clone()
                    .ok_or_else(|| PipelineError::MissingInput {
                        node: self.slots[i].name.clone(),
                        port: self.slots[i].inputs[p].name.to_string(),
                    })?;
                inputs.push(msg);
            }

            let slot = &mut self.slots[i];
            debug!("running node '{}'", slot.name);
            let outputs =
                slot.node.run(cx, &inputs).map_err(|source| PipelineError::NodeFailed {
                    node: slot.name.clone(),
                    source,
                })?;

            if outputs.len() != slot.outputs.len()
                || outputs
                    .iter()
                    .zip(slot.outputs.iter())
                    .any(|(m, spec)| m.kind() != spec.kind)
            {
                return Err(PipelineError::OutputMismatch { node: slot.name.clone() });
            }
            for (p, msg) in outputs.into_iter().enumerate() {
                slot.produced[p] = Some(msg);
            }
        }
        Ok(())
    }

    /// The most recent message produced on a node's output port.
    pub fn output(&self, node: NodeId, port: &str) -> Option<&Message> {
        let slot = self.slots.get(node.0)?;
        let idx = port_index(&slot.outputs, port)?;
        slot.produced[idx].as_ref()
    }

    /// Release all nodes in reverse execution order.
    pub fn release(&mut self, cx: &mut C) -> Result<(), PipelineError> {
        let order = self.order.clone().ok_or(PipelineError::NotCompiled)?;
        for i in order.into_iter().rev() {
            self.slots[i].node.release(cx).map_err(|source| {
                PipelineError::NodeFailed { node: self.slots[i].name.clone(), source }
            })?;
        }
        Ok(())
    }
}

fn port_index(ports: &[PortSpec], name: &str) -> Option<usize> {
    ports.iter().position(|p| p.name == name)
}
