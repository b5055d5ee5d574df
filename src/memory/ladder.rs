//! Size bucketing.
//!
//! Requests are rounded up to the next rung of a ladder of admissible block
//! sizes so that freed blocks match later requests more often. The ladder
//! comes from a [`LadderProvider`]; by default it is every non-zero size the
//! graph asks for.

use tracing::{debug, warn};

use crate::error::{PlanError, PlanResult};
use crate::graph::Graph;

/// Ascending, duplicate-free list of admissible block sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeLadder {
    sizes: Vec<u64>,
}

impl SizeLadder {
    /// Build from a list that must already be strictly ascending and free of
    /// zeros.
    pub fn new(sizes: Vec<u64>) -> PlanResult<Self> {
        if sizes.first() == Some(&0) {
            return Err(PlanError::InvalidLadder("ladder contains a zero size".to_string()));
        }
        if let Some(pair) = sizes.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PlanError::InvalidLadder(format!(
                "ladder is not strictly ascending at {} -> {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { sizes })
    }

    /// Sort, dedup and drop zeros.
    pub fn from_unsorted(mut sizes: Vec<u64>) -> Self {
        sizes.retain(|s| *s != 0);
        sizes.sort_unstable();
        sizes.dedup();
        Self { sizes }
    }

    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn largest(&self) -> Option<u64> {
        self.sizes.last().copied()
    }

    /// Smallest rung that holds `size`, or `None` if it is beyond the top.
    pub fn bucket_for(&self, size: u64) -> Option<u64> {
        let pos = self.sizes.partition_point(|rung| *rung < size);
        let bucket = self.sizes.get(pos).copied();
        if bucket.is_none() {
            warn!(
                "Memory needed size {} is beyond the biggest block in memory ranges ({:?})",
                size,
                self.largest()
            );
        }
        bucket
    }

    /// [`Self::bucket_for`], falling back to the unbucketed size.
    pub fn bucket_or_exact(&self, size: u64) -> u64 {
        self.bucket_for(size).unwrap_or(size)
    }
}

/// Source of the size ladder for one planning pass.
///
/// Failing here is the only fatal outcome of a pass.
pub trait LadderProvider {
    fn ladder(&self, graph: &Graph) -> PlanResult<SizeLadder>;
}

/// Every non-zero output and workspace size of the graph. Outputs that reuse
/// an input never allocate and are not counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphLadder;

impl LadderProvider for GraphLadder {
    fn ladder(&self, graph: &Graph) -> PlanResult<SizeLadder> {
        let ladder = SizeLadder::from_unsorted(allocatable_sizes(graph)?);
        debug!("All memory size: {:?}", ladder.sizes());
        Ok(ladder)
    }
}

/// Sizes of every slot that may get a block, in node order.
///
/// Fails with [`PlanError::SizeOverflow`] on a size no arena offset can
/// address.
pub fn allocatable_sizes(graph: &Graph) -> PlanResult<Vec<u64>> {
    let mut sizes = Vec::new();
    for node in &graph.nodes {
        let outputs = node
            .outputs
            .iter()
            .filter(|o| o.reuse_input.is_none())
            .map(|o| o.size);
        for size in outputs.chain(node.workspace_bytes.iter().copied()) {
            if size > i64::MAX as u64 {
                return Err(PlanError::SizeOverflow {
                    node: node.name.clone(),
                    size,
                });
            }
            sizes.push(size);
        }
    }
    Ok(sizes)
}

/// A caller-supplied ladder, validated on use.
#[derive(Debug, Clone, Default)]
pub struct FixedLadder {
    sizes: Vec<u64>,
}

impl FixedLadder {
    pub fn new(sizes: Vec<u64>) -> Self {
        Self { sizes }
    }
}

impl LadderProvider for FixedLadder {
    fn ladder(&self, _graph: &Graph) -> PlanResult<SizeLadder> {
        SizeLadder::new(self.sizes.clone())
            .map_err(|e| PlanError::LadderDerivationFailed(e.to_string()))
    }
}
