//! Entry point of the memory planning pass.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use super::allocator::{AllocatorStats, BlockAllocator};
use super::block::{Block, Slot};
use super::config::PlannerConfig;
use super::ladder::{allocatable_sizes, GraphLadder, LadderProvider};
use super::layout::{resolve_layout, write_back};
use super::merger::merge_dynamic_batch_blocks;
use super::streams::StreamReuseGraph;
use crate::error::{PlanError, PlanResult};
use crate::graph::Graph;
use crate::internal_error;

/// Placement of one surviving block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    pub id: usize,
    pub size: u64,
    pub head_offset: u64,
    pub tail_offset: u64,
    pub stream_id: i64,
    /// `[name(type), kind, index]` of every member slot
    pub members: Vec<String>,
}

/// Outcome of a planning pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanSummary {
    /// Bytes the device buffer must reserve
    pub arena_size: u64,
    pub live_blocks: usize,
    pub deleted_blocks: usize,
    /// Batch label used as merge template, if any branch was merged
    pub merge_template: Option<String>,
    pub stats: AllocatorStats,
    pub blocks: Vec<BlockReport>,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "arena size: {} bytes, {} blocks ({} merged away)",
            self.arena_size, self.live_blocks, self.deleted_blocks
        )?;
        if let Some(template) = &self.merge_template {
            writeln!(f, "dynamic batch template: {}", template)?;
        }
        writeln!(f, "{}", self.stats)?;
        for block in &self.blocks {
            writeln!(
                f,
                "  block {:>4} [{:>10}..={:>10}] size {:>10} stream {:>3}: {}",
                block.id,
                block.head_offset,
                block.tail_offset,
                block.size,
                block.stream_id,
                block.members.join(" ")
            )?;
        }
        Ok(())
    }
}

/// Plans the arena of one graph.
///
/// Each assigner owns nothing beyond its configuration; every pass builds
/// its blocks, pool and counters from scratch.
pub struct MemoryAssigner {
    config: PlannerConfig,
    ladder: Box<dyn LadderProvider>,
}

impl MemoryAssigner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            ladder: Box::new(GraphLadder),
        }
    }

    /// Replace the default ladder derived from the graph's own sizes.
    pub fn with_ladder(mut self, ladder: impl LadderProvider + 'static) -> Self {
        self.ladder = Box::new(ladder);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Run the pass and write offsets back onto `graph`.
    ///
    /// Fails only when the configuration is invalid or the size ladder
    /// cannot be derived. A graph with nothing to allocate succeeds with an
    /// arena of 0.
    pub fn assign(&self, graph: &mut Graph) -> PlanResult<PlanSummary> {
        self.config.validate()?;
        graph.clear_offsets();

        let ladder = self.ladder.ladder(graph).map_err(|e| match e {
            PlanError::LadderDerivationFailed(_) | PlanError::SizeOverflow { .. } => e,
            other => PlanError::LadderDerivationFailed(other.to_string()),
        })?;

        if ladder.is_empty() {
            let zero_slots = zero_slots_of(graph);
            info!(
                "Graph {} has nothing to allocate ({} zero-size slots)",
                graph.name,
                zero_slots.len()
            );
            write_back(graph, &[], &zero_slots);
            return Ok(PlanSummary::default());
        }

        // sizes missing every rung fall back to their exact value
        allocatable_sizes(graph)?;

        let streams = StreamReuseGraph::build(graph);
        let mut allocation = BlockAllocator::new(graph, &self.config, &ladder, &streams).run();

        let merge = if self.config.reuse_enabled() {
            merge_dynamic_batch_blocks(&mut allocation.blocks, graph)
        } else {
            Default::default()
        };

        let arena_size = resolve_layout(&mut allocation.blocks, self.config.alignment)?;
        for block in &allocation.blocks {
            debug!("After resize: {}", block.describe(graph));
        }
        write_back(graph, &allocation.blocks, &allocation.zero_slots);

        let blocks = report_blocks(&allocation.blocks, graph)?;
        let summary = PlanSummary {
            arena_size,
            live_blocks: blocks.len(),
            deleted_blocks: allocation.blocks.len() - blocks.len(),
            merge_template: merge.template,
            stats: allocation.stats,
            blocks,
        };
        info!(
            "Graph {}: arena {} bytes in {} blocks",
            graph.name, summary.arena_size, summary.live_blocks
        );
        Ok(summary)
    }
}

impl Default for MemoryAssigner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

fn zero_slots_of(graph: &Graph) -> Vec<Slot> {
    let mut slots = Vec::new();
    for node in &graph.nodes {
        let zero_memory = node.op_type.is_zero_memory();
        for (index, output) in node.outputs.iter().enumerate() {
            if zero_memory || output.size == 0 {
                slots.push(Slot::output(node.id, index));
            }
        }
        for (index, size) in node.workspace_bytes.iter().enumerate() {
            if zero_memory || *size == 0 {
                slots.push(Slot::workspace(node.id, index));
            }
        }
    }
    slots
}

fn report_blocks(blocks: &[Block], graph: &Graph) -> PlanResult<Vec<BlockReport>> {
    blocks
        .iter()
        .filter(|b| !b.is_deleted())
        .map(|b| {
            let (Some(head_offset), Some(tail_offset)) = (b.head_offset(), b.tail_offset()) else {
                return Err(internal_error!("block {} survived layout unplaced", b.id().0));
            };
            Ok(BlockReport {
                id: b.id().0,
                size: b.size(),
                head_offset,
                tail_offset,
                stream_id: b.stream_id(),
                members: b.members().iter().map(|m| m.describe(graph)).collect(),
            })
        })
        .collect()
}
