//! Compiled graph IR consumed by the memory planner.
//!
//! The node vector is already in topological order: every producer precedes
//! its consumers. The planner never reorders or rewrites nodes; it only
//! fills in [`Node::output_offsets`] and [`Node::workspace_offsets`].

use std::fs;
use std::path::Path;

pub mod node;
pub mod op;
pub mod tensor;

use serde::{Deserialize, Serialize};

use crate::error::{io_context, PlanError, PlanResult};
use crate::graph_error;

pub use node::{
    InputDesc, InputRef, Node, NodeAttrs, NodeId, OutputDesc, OutputRef, INVALID_OFFSET,
};
pub use op::OpType;
pub use tensor::{DType, Format, TensorDesc};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a node at the end of the topological order.
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Connect output `out_index` of `src` to input `in_index` of `dst`.
    ///
    /// Missing inputs on `dst` are created with a default descriptor. An
    /// input that was already connected is re-pointed.
    pub fn connect(
        &mut self,
        src: NodeId,
        out_index: usize,
        dst: NodeId,
        in_index: usize,
    ) -> PlanResult<()> {
        let producer = self.node(src).ok_or(PlanError::NodeNotFound(src.0))?;
        if out_index >= producer.outputs.len() {
            return Err(PlanError::InvalidSlot {
                node: src.0,
                kind: "output",
                index: out_index,
            });
        }
        if self.node(dst).is_none() {
            return Err(PlanError::NodeNotFound(dst.0));
        }

        let source = OutputRef {
            node: src,
            index: out_index,
        };
        let sink = InputRef {
            node: dst,
            index: in_index,
        };

        let consumer = &mut self.nodes[dst.0];
        if consumer.inputs.len() <= in_index {
            consumer.inputs.resize_with(in_index + 1, InputDesc::default);
        }
        let previous = consumer.inputs[in_index].source.replace(source);

        if let Some(old) = previous {
            if let Some(out) = self
                .nodes
                .get_mut(old.node.0)
                .and_then(|n| n.outputs.get_mut(old.index))
            {
                out.consumers.retain(|c| *c != sink);
            }
        }
        self.nodes[src.0].outputs[out_index].consumers.push(sink);
        Ok(())
    }

    /// Downstream edges of an output; empty for an unknown output.
    pub fn consumers(&self, output: OutputRef) -> &[InputRef] {
        self.node(output.node)
            .and_then(|n| n.outputs.get(output.index))
            .map(|o| o.consumers.as_slice())
            .unwrap_or(&[])
    }

    /// Producing output feeding an input, if connected.
    pub fn source_of(&self, input: InputRef) -> Option<OutputRef> {
        self.node(input.node)
            .and_then(|n| n.inputs.get(input.index))
            .and_then(|i| i.source)
    }

    /// An edge into a graph-output op whose input and output descriptors
    /// match: the producer's buffer is forwarded to the boundary as-is.
    pub fn is_direct_output_edge(&self, input: InputRef) -> bool {
        let Some(node) = self.node(input.node) else {
            return false;
        };
        if node.op_type != OpType::NetOutput {
            return false;
        }
        match (node.inputs.get(input.index), node.outputs.get(input.index)) {
            (Some(i), Some(o)) => i.desc.is_layout_compatible(&o.desc),
            _ => false,
        }
    }

    /// Renumber node ids and rebuild consumer lists from input sources.
    ///
    /// Needed after deserialization, where consumer lists are not stored.
    pub fn relink(&mut self) -> PlanResult<()> {
        for (pos, node) in self.nodes.iter_mut().enumerate() {
            node.id = NodeId(pos);
            for out in &mut node.outputs {
                out.consumers.clear();
            }
        }

        let mut edges = Vec::new();
        for node in &self.nodes {
            for (index, input) in node.inputs.iter().enumerate() {
                if let Some(source) = input.source {
                    edges.push((
                        source,
                        InputRef {
                            node: node.id,
                            index,
                        },
                    ));
                }
            }
        }

        for (source, sink) in edges {
            let output = self
                .nodes
                .get_mut(source.node.0)
                .and_then(|n| n.outputs.get_mut(source.index))
                .ok_or_else(|| {
                    graph_error!(
                        "input {} of node {} refers to missing output {}:{}",
                        sink.index,
                        sink.node.0,
                        source.node.0,
                        source.index
                    )
                })?;
            output.consumers.push(sink);
        }
        Ok(())
    }

    /// Check the structural preconditions of the planner: topological order,
    /// in-range edges and in-range reuse-input declarations.
    pub fn validate(&self) -> PlanResult<()> {
        for (pos, node) in self.nodes.iter().enumerate() {
            if node.id.0 != pos {
                return Err(graph_error!(
                    "node {} has id {} but sits at position {}",
                    node.name,
                    node.id.0,
                    pos
                ));
            }
            for (index, input) in node.inputs.iter().enumerate() {
                let Some(source) = input.source else {
                    continue;
                };
                let producer = self
                    .node(source.node)
                    .ok_or(PlanError::NodeNotFound(source.node.0))?;
                if source.node.0 >= pos {
                    return Err(graph_error!(
                        "node {} input {} is produced by {} which is not scheduled before it",
                        node.name,
                        index,
                        producer.name
                    ));
                }
                if source.index >= producer.outputs.len() {
                    return Err(PlanError::InvalidSlot {
                        node: source.node.0,
                        kind: "output",
                        index: source.index,
                    });
                }
            }
            for (index, output) in node.outputs.iter().enumerate() {
                if let Some(k) = output.reuse_input {
                    if k >= node.inputs.len() {
                        return Err(graph_error!(
                            "output {} of node {} reuses missing input {}",
                            index,
                            node.name,
                            k
                        ));
                    }
                }
            }
            if let Some(bad) = node
                .attrs
                .boundary_outputs
                .iter()
                .find(|i| **i >= node.outputs.len())
            {
                return Err(PlanError::InvalidSlot {
                    node: pos,
                    kind: "output",
                    index: *bad,
                });
            }
        }
        Ok(())
    }

    /// Drop every offset annotation left by a previous planning run.
    pub fn clear_offsets(&mut self) {
        for node in &mut self.nodes {
            node.output_offsets.clear();
            node.workspace_offsets.clear();
        }
    }

    pub fn from_json(text: &str) -> PlanResult<Self> {
        let mut graph: Graph = serde_json::from_str(text)?;
        graph.relink()?;
        Ok(graph)
    }

    /// Read and relink a graph stored as JSON.
    pub fn load(path: &Path) -> PlanResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| io_context(e, &format!("reading {}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> PlanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
