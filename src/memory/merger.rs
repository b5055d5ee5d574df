//! Dynamic-batch merging.
//!
//! Branches tagged with different batch labels never run together, so the
//! blocks of one branch can host the slots of another. Blocks whose members
//! all share one label are grouped by that label; the largest group is the
//! template and every other group folds into it rank by rank.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::block::{Block, BlockId, Slot};
use crate::graph::Graph;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Label whose blocks absorbed the other branches
    pub template: Option<String>,
    /// Blocks marked deleted
    pub folded: usize,
}

pub fn merge_dynamic_batch_blocks(blocks: &mut [Block], graph: &Graph) -> MergeReport {
    let mut groups: BTreeMap<&str, Vec<BlockId>> = BTreeMap::new();
    for block in blocks.iter().filter(|b| !b.is_deleted()) {
        if let Some(label) = block.shared_batch_label(graph) {
            groups.entry(label).or_default().push(block.id());
        }
    }

    let mut template: Option<&str> = None;
    let mut most = 0;
    for (label, ids) in &groups {
        if ids.len() > most {
            most = ids.len();
            template = Some(*label);
        }
    }
    let Some(template) = template else {
        return MergeReport::default();
    };

    for ids in groups.values_mut() {
        // stable: equal sizes keep creation order
        ids.sort_by_key(|id| std::cmp::Reverse(blocks[id.0].max_real_size().unwrap_or(0)));
    }

    let mut report = MergeReport {
        template: Some(template.to_string()),
        folded: 0,
    };
    let Some(template_ids) = groups.get(template) else {
        return report;
    };

    for (label, ids) in &groups {
        if *label == template {
            continue;
        }
        for (rank, (&src, &dst)) in ids.iter().zip(template_ids).enumerate() {
            let moved: Vec<(Slot, u64)> = blocks[src.0]
                .members()
                .iter()
                .copied()
                .zip(blocks[src.0].real_sizes().iter().copied())
                .collect();
            for (slot, size) in moved {
                blocks[dst.0].attach(slot, size);
            }
            blocks[src.0].deleted = true;
            report.folded += 1;
            debug!(
                "Batch {} rank {}: block {} folded into block {}",
                label, rank, src.0, dst.0
            );
        }
    }

    info!(
        "Dynamic batch merge: template {} ({} blocks), {} blocks folded",
        template,
        template_ids.len(),
        report.folded
    );
    report
}
