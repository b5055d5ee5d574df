//! Block allocator: the single walk over the node list that maps every slot
//! onto a block.
//!
//! # Strategy
//!
//! - Outputs and workspaces are bucketed through the size ladder
//! - Reuse-eligible requests scan the pool in release order for the first
//!   block whose stream is permitted and whose size matches
//! - A block stays live while consumer edges still read it; each consumer
//!   node releases one reference per input edge once it is processed
//! - In-place outputs join the block of the input they alias
//! - Workspaces are released when the next node on the same stream starts

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::block::{Block, BlockId, Slot, SlotKind};
use super::config::{PlannerConfig, Target};
use super::ladder::SizeLadder;
use super::pool::ReusePool;
use super::streams::StreamReuseGraph;
use crate::graph::{Graph, InputRef, Node, OpType, OutputRef};

/// Counters gathered during the allocation walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    /// Blocks created
    pub fresh_blocks: usize,
    /// Requests served from the pool
    pub reused_blocks: usize,
    /// In-place outputs attached to their input's block
    pub aliased_slots: usize,
    /// Slots annotated with offset 0 without a block
    pub zero_slots: usize,
    /// Edges or slots dropped because of dangling references
    pub skipped_slots: usize,
    /// Bucketed bytes of all fresh blocks
    pub fresh_bytes: u64,
    /// Requested bytes served from the pool
    pub reused_bytes: u64,
}

impl AllocatorStats {
    pub fn reuse_rate_percent(&self) -> f64 {
        let total = self.fresh_blocks + self.reused_blocks;
        if total == 0 {
            0.0
        } else {
            self.reused_blocks as f64 / total as f64 * 100.0
        }
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AllocatorStats: fresh={} ({}B), reused={} ({}B, {}%), aliased={}, zero={}, skipped={}",
            self.fresh_blocks,
            self.fresh_bytes,
            self.reused_blocks,
            self.reused_bytes,
            self.reuse_rate_percent() as u32,
            self.aliased_slots,
            self.zero_slots,
            self.skipped_slots
        )
    }
}

/// Result of the walk: every block ever created, in creation order, and
/// the slots that bypass the block machinery.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub blocks: Vec<Block>,
    pub zero_slots: Vec<Slot>,
    pub stats: AllocatorStats,
}

pub struct BlockAllocator<'a> {
    graph: &'a Graph,
    config: &'a PlannerConfig,
    ladder: &'a SizeLadder,
    streams: &'a StreamReuseGraph,
    blocks: Vec<Block>,
    pool: ReusePool,
    output_blocks: HashMap<OutputRef, BlockId>,
    /// Workspace blocks waiting for the next node on their stream
    pending_workspaces: BTreeMap<i64, Vec<BlockId>>,
    zero_slots: Vec<Slot>,
    stats: AllocatorStats,
}

impl<'a> BlockAllocator<'a> {
    pub fn new(
        graph: &'a Graph,
        config: &'a PlannerConfig,
        ladder: &'a SizeLadder,
        streams: &'a StreamReuseGraph,
    ) -> Self {
        Self {
            graph,
            config,
            ladder,
            streams,
            blocks: Vec::new(),
            pool: ReusePool::new(),
            output_blocks: HashMap::new(),
            pending_workspaces: BTreeMap::new(),
            zero_slots: Vec::new(),
            stats: AllocatorStats::default(),
        }
    }

    pub fn run(mut self) -> Allocation {
        if self.config.reuse_enabled() {
            info!("Memory reuse is open for graph {}", self.graph.name);
        } else {
            info!("Memory reuse is closed for graph {}", self.graph.name);
        }

        let graph = self.graph;
        for node in &graph.nodes {
            self.process_node(node);
        }

        for block in &self.blocks {
            debug!("{}", block.describe(graph));
        }
        debug!("{}", self.stats);

        Allocation {
            blocks: self.blocks,
            zero_slots: self.zero_slots,
            stats: self.stats,
        }
    }

    fn process_node(&mut self, node: &Node) {
        if let Some(pending) = self.pending_workspaces.remove(&node.stream_id) {
            for id in pending {
                self.release(id);
            }
        }

        for (index, output) in node.outputs.iter().enumerate() {
            let out = OutputRef {
                node: node.id,
                index,
            };
            // bound ahead of time by an in-place producer
            if self.output_blocks.contains_key(&out) {
                continue;
            }
            let slot = Slot::output(node.id, index);
            if output.size == 0 || node.op_type.is_zero_memory() {
                self.mark_zero(slot);
                continue;
            }
            if let Some(input) = output.reuse_input {
                if self.alias_input(node, out, input) {
                    continue;
                }
                debug!(
                    "{} reuses input {} which has no block, allocating",
                    slot.describe(self.graph),
                    input
                );
            }
            self.acquire_output(node, out, output.size);
        }

        for (index, &size) in node.workspace_bytes.iter().enumerate() {
            let slot = Slot::workspace(node.id, index);
            if size == 0 || node.op_type.is_zero_memory() {
                self.mark_zero(slot);
                continue;
            }
            let reusable = self.slot_reusable(node, SlotKind::Workspace, index);
            let bucketed = self.ladder.bucket_or_exact(size);
            let id = self.acquire(node, slot, bucketed, size, reusable);
            self.pending_workspaces
                .entry(node.stream_id)
                .or_default()
                .push(id);
        }

        self.release_inputs(node);
    }

    fn mark_zero(&mut self, slot: Slot) {
        self.zero_slots.push(slot);
        self.stats.zero_slots += 1;
    }

    /// Bucket, acquire and bind an output, then fix its liveness up to the
    /// number of consumer edges that will release it.
    fn acquire_output(&mut self, node: &Node, out: OutputRef, size: u64) {
        let slot = Slot::output(out.node, out.index);
        let reusable = self.slot_reusable(node, SlotKind::Output, out.index);
        let bucketed = self.ladder.bucket_or_exact(size);
        let id = self.acquire(node, slot, bucketed, size, reusable);

        let edges = self.counted_edges(out);
        let block = &mut self.blocks[id.0];
        block.ref_count = block.ref_count.saturating_sub(1) + edges;
        self.output_blocks.insert(out, id);
        self.bind_in_place_consumers(out, id);
    }

    /// Attach `out` to the block holding input `input` of `node`.
    fn alias_input(&mut self, node: &Node, out: OutputRef, input: usize) -> bool {
        let source = node.inputs.get(input).and_then(|i| i.source);
        let Some(id) = source.and_then(|s| self.output_blocks.get(&s).copied()) else {
            return false;
        };
        let size = node.output_size(out.index).unwrap_or(0);
        self.attach_alias(out, size, id);
        self.bind_in_place_consumers(out, id);
        true
    }

    fn attach_alias(&mut self, out: OutputRef, size: u64, id: BlockId) {
        let edges = self.counted_edges(out);
        let block = &mut self.blocks[id.0];
        block.attach(Slot::output(out.node, out.index), size);
        block.ref_count += edges;
        self.output_blocks.insert(out, id);
        self.stats.aliased_slots += 1;
    }

    /// Propagate a freshly bound block forward through in-place consumers.
    fn bind_in_place_consumers(&mut self, out: OutputRef, id: BlockId) {
        let graph = self.graph;
        let mut work = vec![out];
        while let Some(current) = work.pop() {
            for edge in graph.consumers(current) {
                let Some(consumer) = graph.node(edge.node) else {
                    warn!("Output {}:{} feeds a missing node {}", current.node.0, current.index, edge.node.0);
                    self.stats.skipped_slots += 1;
                    continue;
                };
                if consumer.op_type.is_zero_memory() {
                    continue;
                }
                for index in consumer.outputs_reusing_input(edge.index) {
                    let aliased = OutputRef {
                        node: consumer.id,
                        index,
                    };
                    let size = consumer.outputs[index].size;
                    if size == 0 || self.output_blocks.contains_key(&aliased) {
                        continue;
                    }
                    self.attach_alias(aliased, size, id);
                    work.push(aliased);
                }
            }
        }
    }

    fn acquire(&mut self, node: &Node, slot: Slot, bucketed: u64, real: u64, reusable: bool) -> BlockId {
        if reusable {
            if let Some(id) = self.take_from_pool(node.stream_id, bucketed) {
                let block = &mut self.blocks[id.0];
                block.attach(slot, real);
                block.ref_count += 1;
                self.stats.reused_blocks += 1;
                self.stats.reused_bytes = self.stats.reused_bytes.saturating_add(real);
                return id;
            }
        }

        let id = BlockId(self.blocks.len());
        let mut block = Block::new(id, bucketed, node.stream_id);
        block.attach(slot, real);
        block.ref_count = 1;
        debug!("{}", block.describe(self.graph));
        self.blocks.push(block);
        self.stats.fresh_blocks += 1;
        self.stats.fresh_bytes = self.stats.fresh_bytes.saturating_add(bucketed);
        id
    }

    fn take_from_pool(&mut self, stream_id: i64, size: u64) -> Option<BlockId> {
        let graph = self.graph;
        let position = self.pool.entries().iter().position(|id| {
            let block = &self.blocks[id.0];
            block.is_reusable()
                && !hosts_data_like(block, graph)
                && self.streams.can_reuse(stream_id, block.stream_id())
                && self.pool.admits(block, size, self.config.reuse_threshold)
        })?;

        let id = self.pool.entries()[position];
        let block = &self.blocks[id.0];
        if block.stream_id() != stream_id {
            debug!(
                "Stream {} reuses block {} of stream {}",
                stream_id,
                id.0,
                block.stream_id()
            );
        }
        if block.size() != size {
            debug!(
                "Block {} of size {} granted to a {} byte request",
                id.0,
                block.size(),
                size
            );
        }
        Some(self.pool.take(position, block))
    }

    fn release(&mut self, id: BlockId) {
        let block = &mut self.blocks[id.0];
        if block.ref_count == 0 {
            return;
        }
        block.ref_count -= 1;
        if block.is_reusable() {
            self.pool.push(block);
        }
    }

    fn release_inputs(&mut self, node: &Node) {
        let graph = self.graph;
        for (index, input) in node.inputs.iter().enumerate() {
            let Some(source) = input.source else {
                continue;
            };
            let Some(producer) = graph.node(source.node) else {
                warn!("Input {} of {} refers to a missing node", index, node.name);
                self.stats.skipped_slots += 1;
                continue;
            };
            let edge = InputRef {
                node: node.id,
                index,
            };
            if !self.counts_edge(edge)
                || producer.op_type.holds_parameter()
                || producer.is_boundary_output(source.index)
                || graph.is_direct_output_edge(edge)
            {
                continue;
            }
            let Some(&id) = self.output_blocks.get(&source) else {
                continue;
            };
            if !self
                .streams
                .can_reuse(node.stream_id, self.blocks[id.0].stream_id())
            {
                continue;
            }
            self.release(id);
        }
    }

    /// Edges that keep a block live. Every edge does except edges into
    /// graph outputs on the tiny target.
    fn counts_edge(&self, edge: InputRef) -> bool {
        if self.config.target != Target::Tiny {
            return true;
        }
        !matches!(self.graph.node(edge.node), Some(n) if n.op_type == OpType::NetOutput)
    }

    fn counted_edges(&self, out: OutputRef) -> usize {
        self.graph
            .consumers(out)
            .iter()
            .filter(|edge| self.counts_edge(**edge))
            .count()
    }

    fn slot_reusable(&self, node: &Node, kind: SlotKind, index: usize) -> bool {
        if !self.config.reuse_enabled()
            || node.attrs.convergence_label.is_some()
            || node.op_type.excludes_reuse()
        {
            return false;
        }
        match kind {
            SlotKind::Workspace => node.workspace_reuse_allowed(index),
            SlotKind::Output => {
                let out = OutputRef {
                    node: node.id,
                    index,
                };
                !node.is_boundary_output(index)
                    && !self
                        .graph
                        .consumers(out)
                        .iter()
                        .any(|edge| self.graph.is_direct_output_edge(*edge))
            }
        }
    }
}

fn hosts_data_like(block: &Block, graph: &Graph) -> bool {
    block
        .members()
        .iter()
        .any(|m| graph.node(m.node).is_some_and(|n| n.op_type.is_data_like()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, OutputDesc};

    fn run(graph: &Graph, config: &PlannerConfig, ladder: Vec<u64>) -> Allocation {
        let ladder = SizeLadder::new(ladder).unwrap();
        let streams = StreamReuseGraph::build(graph);
        BlockAllocator::new(graph, config, &ladder, &streams).run()
    }

    fn block_of(alloc: &Allocation, slot: Slot) -> &Block {
        alloc
            .blocks
            .iter()
            .find(|b| b.contains(slot))
            .expect("slot has a block")
    }

    fn chain(sizes: &[u64]) -> Graph {
        let mut graph = Graph::new("chain");
        let mut prev = None;
        for (i, size) in sizes.iter().enumerate() {
            let id = graph.add_node(Node::new(format!("n{}", i), "Conv2D").with_output(*size));
            if let Some(p) = prev {
                graph.connect(p, 0, id, 0).unwrap();
            }
            prev = Some(id);
        }
        graph
    }

    #[test]
    fn test_chain_reuses_released_block() {
        let graph = chain(&[64, 64, 64]);
        let alloc = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_eq!(alloc.stats.fresh_blocks, 2);
        assert_eq!(alloc.stats.reused_blocks, 1);
        assert_eq!(
            block_of(&alloc, Slot::output(NodeId(0), 0)).id(),
            block_of(&alloc, Slot::output(NodeId(2), 0)).id()
        );
    }

    #[test]
    fn test_disabled_reuse_is_all_fresh() {
        let graph = chain(&[64, 64, 64]);
        let config = PlannerConfig::default().with_disable_reuse(true);
        let alloc = run(&graph, &config, vec![64]);
        assert_eq!(alloc.stats.fresh_blocks, 3);
        assert_eq!(alloc.stats.reused_blocks, 0);
    }

    #[test]
    fn test_ref_count_matches_consumer_edges() {
        let mut graph = Graph::new("fan");
        let a = graph.add_node(Node::new("a", "Conv2D").with_output(64));
        let b = graph.add_node(Node::new("b", "Relu").with_output(64));
        let c = graph.add_node(Node::new("c", "Relu").with_output(64));
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(a, 0, c, 0).unwrap();

        let config = PlannerConfig::default();
        let ladder = SizeLadder::new(vec![64]).unwrap();
        let streams = StreamReuseGraph::build(&graph);
        let mut allocator = BlockAllocator::new(&graph, &config, &ladder, &streams);
        allocator.process_node(&graph.nodes[0]);
        assert_eq!(allocator.blocks[0].ref_count(), 2);
        allocator.process_node(&graph.nodes[1]);
        assert_eq!(allocator.blocks[0].ref_count(), 1);
        assert!(allocator.pool.is_empty());
        allocator.process_node(&graph.nodes[2]);
        assert_eq!(allocator.blocks[0].ref_count(), 0);
        assert_eq!(allocator.pool.entries(), &[BlockId(0)]);
    }

    #[test]
    fn test_in_place_output_joins_producer_block() {
        let mut graph = Graph::new("inplace");
        let d = graph.add_node(Node::new("d", "Conv2D").with_output(64));
        let c = graph.add_node(
            Node::new("c", "Relu").with_output_desc(OutputDesc::new(64).reusing_input(0)),
        );
        let x = graph.add_node(Node::new("x", "Relu").with_output(64));
        graph.connect(d, 0, c, 0).unwrap();
        graph.connect(c, 0, x, 0).unwrap();

        let config = PlannerConfig::default();
        let ladder = SizeLadder::new(vec![64]).unwrap();
        let streams = StreamReuseGraph::build(&graph);
        let mut allocator = BlockAllocator::new(&graph, &config, &ladder, &streams);
        allocator.process_node(&graph.nodes[0]);
        let block = &allocator.blocks[0];
        assert!(block.contains(Slot::output(c, 0)));
        assert_eq!(block.ref_count(), 2);

        let alloc = run(&graph, &config, vec![64]);
        assert_eq!(alloc.stats.aliased_slots, 1);
        assert_eq!(
            block_of(&alloc, Slot::output(c, 0)).id(),
            block_of(&alloc, Slot::output(d, 0)).id()
        );
        assert!(!block_of(&alloc, Slot::output(x, 0)).contains(Slot::output(d, 0)));
    }

    #[test]
    fn test_zero_slots_bypass_blocks() {
        let mut graph = Graph::new("zero");
        graph.add_node(Node::new("v", "Variable").with_output(64).with_workspace(16));
        graph.add_node(Node::new("e", "Conv2D").with_output(0));
        let alloc = run(&graph, &PlannerConfig::default(), vec![16, 64]);
        assert!(alloc.blocks.is_empty());
        assert_eq!(alloc.zero_slots.len(), 3);
    }

    #[test]
    fn test_workspace_released_at_next_node_on_stream() {
        let mut graph = Graph::new("ws");
        graph.add_node(Node::new("a", "Conv2D").with_workspace(128));
        let b = graph.add_node(Node::new("b", "Conv2D").with_output(128));
        let alloc = run(&graph, &PlannerConfig::default(), vec![128]);
        assert_eq!(alloc.blocks.len(), 1);
        assert!(alloc.blocks[0].contains(Slot::output(b, 0)));
    }

    #[test]
    fn test_workspace_not_released_across_streams() {
        let mut graph = Graph::new("ws");
        graph.add_node(Node::new("a", "Conv2D").with_workspace(128));
        graph.add_node(Node::new("b", "Conv2D").on_stream(1).with_output(128));
        let alloc = run(&graph, &PlannerConfig::default(), vec![128]);
        assert_eq!(alloc.blocks.len(), 2);
    }

    #[test]
    fn test_workspace_reuse_flag() {
        let mut graph = Graph::new("ws");
        graph.add_node(Node::new("a", "Conv2D").with_workspace(128));
        graph.add_node(
            Node::new("b", "Conv2D")
                .with_workspace(128)
                .with_workspace_reuse(vec![false]),
        );
        let alloc = run(&graph, &PlannerConfig::default(), vec![128]);
        assert_eq!(alloc.stats.fresh_blocks, 2);
    }

    #[test]
    fn test_data_like_blocks_are_not_regranted() {
        let mut graph = Graph::new("data");
        let d = graph.add_node(Node::new("in", "Data").with_output(64));
        let r = graph.add_node(Node::new("r", "Relu").with_output(64));
        let s = graph.add_node(Node::new("s", "Relu").with_output(64));
        graph.connect(d, 0, r, 0).unwrap();
        graph.connect(r, 0, s, 0).unwrap();
        let alloc = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_eq!(alloc.stats.fresh_blocks, 3);
    }

    #[test]
    fn test_convergence_label_forces_fresh() {
        let mut graph = chain(&[64, 64, 64]);
        graph.nodes[2].attrs.convergence_label = Some(1);
        let alloc = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_eq!(alloc.stats.reused_blocks, 0);
    }

    #[test]
    fn test_parameter_producers_are_never_released() {
        let mut graph = Graph::new("param");
        let p = graph.add_node(Node::new("p", "FastrcnnPredictions").with_output(64));
        let a = graph.add_node(Node::new("a", "Relu").with_output(64));
        let b = graph.add_node(Node::new("b", "Relu").with_output(64));
        graph.connect(p, 0, a, 0).unwrap();
        graph.connect(a, 0, b, 0).unwrap();
        let alloc = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_eq!(block_of(&alloc, Slot::output(p, 0)).members().len(), 1);
        assert_eq!(alloc.stats.reused_blocks, 0);
    }

    #[test]
    fn test_direct_output_edge_keeps_block_live() {
        let mut graph = Graph::new("out");
        let a = graph.add_node(Node::new("a", "Conv2D").with_output(64));
        let o = graph.add_node(Node::new("out", "NetOutput").with_output(64));
        let b = graph.add_node(Node::new("b", "Conv2D").with_output(64));
        graph.connect(a, 0, o, 0).unwrap();
        let alloc = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_ne!(
            block_of(&alloc, Slot::output(a, 0)).id(),
            block_of(&alloc, Slot::output(b, 0)).id()
        );
    }

    #[test]
    fn test_tiny_target_ignores_graph_output_edges() {
        let mut graph = Graph::new("tiny");
        let a = graph.add_node(Node::new("a", "Conv2D").with_output(64));
        let r = graph.add_node(Node::new("r", "Relu").with_output(64));
        let o = graph.add_node(Node::new("out", "NetOutput").with_output(64));
        graph.connect(a, 0, r, 0).unwrap();
        graph.connect(a, 0, o, 0).unwrap();

        let default = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_eq!(block_of(&default, Slot::output(a, 0)).ref_count(), 1);

        let tiny = run(&graph, &PlannerConfig::default().with_target(Target::Tiny), vec![64]);
        assert_eq!(block_of(&tiny, Slot::output(a, 0)).ref_count(), 0);
    }

    #[test]
    fn test_oversized_reuse_is_a_threshold_policy() {
        // three 256-byte blocks freed together, then a 128-byte request
        let mut graph = Graph::new("knob");
        let producers: Vec<NodeId> = (0..3)
            .map(|i| graph.add_node(Node::new(format!("p{}", i), "Conv2D").with_output(256)))
            .collect();
        let join = graph.add_node(Node::new("join", "Concat").with_output(8));
        for (i, p) in producers.iter().enumerate() {
            graph.connect(*p, 0, join, i).unwrap();
        }
        let small = graph.add_node(Node::new("small", "Relu").with_output(128));
        graph.connect(join, 0, small, 0).unwrap();

        let ladder = vec![8, 128, 256];
        let strict = run(&graph, &PlannerConfig::default(), ladder.clone());
        assert_eq!(block_of(&strict, Slot::output(small, 0)).size(), 128);

        let loose = run(&graph, &PlannerConfig::default().with_reuse_threshold(2), ladder);
        assert_eq!(block_of(&loose, Slot::output(small, 0)).size(), 256);
    }

    #[test]
    fn test_missing_producer_is_skipped() {
        let mut graph = chain(&[64, 64]);
        graph.nodes[1].inputs[0].source = Some(OutputRef {
            node: NodeId(99),
            index: 0,
        });
        let alloc = run(&graph, &PlannerConfig::default(), vec![64]);
        assert_eq!(alloc.stats.skipped_slots, 1);
        assert_eq!(alloc.stats.fresh_blocks, 2);
    }

    #[test]
    fn test_stats_display() {
        let stats = AllocatorStats {
            fresh_blocks: 1,
            reused_blocks: 1,
            fresh_bytes: 128,
            reused_bytes: 100,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("fresh=1 (128B)"));
        assert!(text.contains("50%"));
    }
}
