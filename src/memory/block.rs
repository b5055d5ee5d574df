//! Memory blocks: candidate byte ranges of the arena and the slots mapped
//! onto them.
//!
//! Blocks live in a plain `Vec<Block>` owned by the allocator and are
//! addressed by [`BlockId`]. Nothing holds a reference to a block across
//! phases; merged-away blocks are flagged `deleted` rather than removed so
//! every id stays valid for the whole pass.

use std::fmt;

use serde::Serialize;

use crate::graph::{Graph, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SlotKind {
    Output,
    Workspace,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Output => write!(f, "Output"),
            SlotKind::Workspace => write!(f, "Workspace"),
        }
    }
}

/// One memory-consuming point of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Slot {
    pub node: NodeId,
    pub kind: SlotKind,
    pub index: usize,
}

impl Slot {
    pub fn output(node: NodeId, index: usize) -> Self {
        Self {
            node,
            kind: SlotKind::Output,
            index,
        }
    }

    pub fn workspace(node: NodeId, index: usize) -> Self {
        Self {
            node,
            kind: SlotKind::Workspace,
            index,
        }
    }

    /// `[name(type), Output, 0]`, falling back to the node id when the node
    /// is unknown.
    pub fn describe(&self, graph: &Graph) -> String {
        match graph.node(self.node) {
            Some(node) => format!("[{}({}), {}, {}]", node.name, node.op_type, self.kind, self.index),
            None => format!("[#{}, {}, {}]", self.node.0, self.kind, self.index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub usize);

/// Round `size` up to a multiple of `alignment` (a power of two).
pub fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return size;
    }
    size.saturating_add(alignment - 1) & !(alignment - 1)
}

#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    size: u64,
    real_sizes: Vec<u64>,
    members: Vec<Slot>,
    pub(crate) ref_count: usize,
    stream_id: i64,
    head_offset: Option<u64>,
    tail_offset: Option<u64>,
    pub(crate) deleted: bool,
}

impl Block {
    pub fn new(id: BlockId, size: u64, stream_id: i64) -> Self {
        Self {
            id,
            size,
            real_sizes: Vec::new(),
            members: Vec::new(),
            ref_count: 0,
            stream_id,
            head_offset: None,
            tail_offset: None,
            deleted: false,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn real_sizes(&self) -> &[u64] {
        &self.real_sizes
    }

    pub fn members(&self) -> &[Slot] {
        &self.members
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn stream_id(&self) -> i64 {
        self.stream_id
    }

    pub fn head_offset(&self) -> Option<u64> {
        self.head_offset
    }

    pub fn tail_offset(&self) -> Option<u64> {
        self.tail_offset
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Free and still part of the layout.
    pub fn is_reusable(&self) -> bool {
        self.ref_count == 0 && !self.deleted
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.members.contains(&slot)
    }

    /// Map another slot onto this block, recording the bytes it asked for.
    pub fn attach(&mut self, slot: Slot, real_size: u64) {
        self.members.push(slot);
        self.real_sizes.push(real_size);
    }

    pub fn max_real_size(&self) -> Option<u64> {
        self.real_sizes.iter().copied().max()
    }

    /// Grow to the largest recorded request and round up to `alignment`.
    /// Never shrinks.
    pub fn resize(&mut self, alignment: u64) {
        let max = self.max_real_size().unwrap_or(0);
        self.size = align_up(self.size.max(max), alignment);
    }

    pub(crate) fn place(&mut self, head: u64) {
        self.head_offset = Some(head);
        self.tail_offset = Some(head.saturating_add(self.size.saturating_sub(1)));
    }

    /// Batch label shared by every member, if there is exactly one.
    pub fn shared_batch_label<'g>(&self, graph: &'g Graph) -> Option<&'g str> {
        let first = self.members.first()?;
        let label = graph
            .node(first.node)?
            .attrs
            .batch_label
            .as_deref()
            .filter(|l| !l.is_empty())?;
        let all_same = self.members[1..].iter().all(|slot| match graph.node(slot.node) {
            Some(node) => node.attrs.batch_label.as_deref() == Some(label),
            None => true,
        });
        all_same.then_some(label)
    }

    /// One-line dump for debug logs.
    pub fn describe(&self, graph: &Graph) -> String {
        let members: Vec<String> = self.members.iter().map(|m| m.describe(graph)).collect();
        let offsets = match (self.head_offset, self.tail_offset) {
            (Some(h), Some(t)) => format!("{}..={}", h, t),
            _ => "unplaced".to_string(),
        };
        format!(
            "Block {} size: {} at {} stream: {} real_sizes: {:?} ref_count: {}{} members: {}",
            self.id.0,
            self.size,
            offsets,
            self.stream_id,
            self.real_sizes,
            self.ref_count,
            if self.deleted { " (deleted)" } else { "" },
            members.join(" ")
        )
    }
}
