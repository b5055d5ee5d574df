//! Nodes of the compiled graph and their memory descriptors.

use serde::{Deserialize, Serialize};

use super::op::OpType;
use super::tensor::TensorDesc;

/// Sentinel stored in offset lists for slots the planner has not annotated.
pub const INVALID_OFFSET: i64 = -1;

/// Position of a node in [`super::Graph::nodes`]; doubles as its rank in
/// the topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// An output anchor: output `index` of `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub index: usize,
}

/// An input anchor: input `index` of `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputRef {
    pub node: NodeId,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDesc {
    #[serde(default)]
    pub desc: TensorDesc,
    /// Producing output; `None` for a dangling input.
    #[serde(default)]
    pub source: Option<OutputRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDesc {
    #[serde(default)]
    pub desc: TensorDesc,
    /// Bytes this output occupies on the device.
    pub size: u64,
    /// In-place: this output occupies the memory of input `k`.
    #[serde(default)]
    pub reuse_input: Option<usize>,
    /// Downstream edges, rebuilt by [`super::Graph::relink`].
    #[serde(skip)]
    pub consumers: Vec<InputRef>,
}

impl OutputDesc {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn with_desc(mut self, desc: TensorDesc) -> Self {
        self.desc = desc;
        self
    }

    pub fn reusing_input(mut self, input: usize) -> Self {
        self.reuse_input = Some(input);
        self
    }
}

/// Attributes the planner reads. A missing attribute is simply `None` or
/// empty; reading never fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    /// Dynamic-batch branch this node belongs to.
    #[serde(default)]
    pub batch_label: Option<String>,
    /// Present on branch-fusion convergence ops; disables pool reuse.
    #[serde(default)]
    pub convergence_label: Option<i64>,
    /// Per-workspace reuse permission; indices past the end are allowed.
    #[serde(default)]
    pub workspace_reuse: Vec<bool>,
    /// Output indices declared as graph-boundary outputs.
    #[serde(default)]
    pub boundary_outputs: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
    pub name: String,
    pub op_type: OpType,
    #[serde(default)]
    pub stream_id: i64,
    #[serde(default)]
    pub inputs: Vec<InputDesc>,
    #[serde(default)]
    pub outputs: Vec<OutputDesc>,
    #[serde(default)]
    pub workspace_bytes: Vec<u64>,
    #[serde(default)]
    pub attrs: NodeAttrs,
    #[serde(default)]
    pub output_offsets: Vec<i64>,
    #[serde(default)]
    pub workspace_offsets: Vec<i64>,
}

impl Node {
    pub fn new(name: impl Into<String>, op_type: impl Into<OpType>) -> Self {
        Self {
            id: NodeId::default(),
            name: name.into(),
            op_type: op_type.into(),
            stream_id: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            workspace_bytes: Vec::new(),
            attrs: NodeAttrs::default(),
            output_offsets: Vec::new(),
            workspace_offsets: Vec::new(),
        }
    }

    pub fn on_stream(mut self, stream_id: i64) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_input(mut self, desc: TensorDesc) -> Self {
        self.inputs.push(InputDesc { desc, source: None });
        self
    }

    /// Add an output of `size` bytes with a default descriptor.
    pub fn with_output(self, size: u64) -> Self {
        self.with_output_desc(OutputDesc::new(size))
    }

    pub fn with_output_desc(mut self, output: OutputDesc) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_workspace(mut self, size: u64) -> Self {
        self.workspace_bytes.push(size);
        self
    }

    pub fn with_batch_label(mut self, label: impl Into<String>) -> Self {
        self.attrs.batch_label = Some(label.into());
        self
    }

    pub fn with_convergence_label(mut self, label: i64) -> Self {
        self.attrs.convergence_label = Some(label);
        self
    }

    pub fn with_workspace_reuse(mut self, flags: Vec<bool>) -> Self {
        self.attrs.workspace_reuse = flags;
        self
    }

    pub fn with_boundary_output(mut self, index: usize) -> Self {
        self.attrs.boundary_outputs.push(index);
        self
    }

    pub fn output_size(&self, index: usize) -> Option<u64> {
        self.outputs.get(index).map(|o| o.size)
    }

    pub fn is_boundary_output(&self, index: usize) -> bool {
        self.attrs.boundary_outputs.contains(&index)
    }

    pub fn workspace_reuse_allowed(&self, index: usize) -> bool {
        self.attrs.workspace_reuse.get(index).copied().unwrap_or(true)
    }

    /// Outputs that declare in-place reuse of input `input`.
    pub fn outputs_reusing_input(&self, input: usize) -> impl Iterator<Item = usize> + '_ {
        self.outputs
            .iter()
            .enumerate()
            .filter(move |(_, o)| o.reuse_input == Some(input))
            .map(|(i, _)| i)
    }
}
