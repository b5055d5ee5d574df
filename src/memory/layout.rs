//! Final placement of blocks in the arena and write-back of slot offsets.

use tracing::{debug, warn};

use super::block::{Block, Slot, SlotKind};
use crate::error::{PlanError, PlanResult};
use crate::graph::{Graph, INVALID_OFFSET};

/// Resize every surviving block and pack them back to back in container
/// order. Returns the arena size.
pub fn resolve_layout(blocks: &mut [Block], alignment: u64) -> PlanResult<u64> {
    let mut cursor: u64 = 0;
    for block in blocks.iter_mut().filter(|b| !b.is_deleted()) {
        block.resize(alignment);
        let end = cursor
            .checked_add(block.size())
            .filter(|end| *end <= i64::MAX as u64)
            .ok_or_else(|| PlanError::SizeOverflow {
                node: format!("block {}", block.id().0),
                size: block.size(),
            })?;
        block.place(cursor);
        debug!("Block {} size {} placed at {}", block.id().0, block.size(), cursor);
        cursor = end;
    }
    Ok(cursor)
}

/// Write every placed block's head offset to its member slots, and offset 0
/// to every zero slot.
pub fn write_back(graph: &mut Graph, blocks: &[Block], zero_slots: &[Slot]) {
    for block in blocks.iter().filter(|b| !b.is_deleted()) {
        let Some(head) = block.head_offset() else {
            continue;
        };
        for slot in block.members() {
            write_slot(graph, *slot, head as i64, false);
        }
    }
    for slot in zero_slots {
        write_slot(graph, *slot, 0, true);
    }
}

fn write_slot(graph: &mut Graph, slot: Slot, offset: i64, force: bool) {
    let Some(node) = graph.node_mut(slot.node) else {
        warn!("Cannot write offset of {:?}: node missing", slot);
        return;
    };
    let smallest_wins =
        !force && slot.kind == SlotKind::Output && node.op_type.keeps_smallest_offset();
    let offsets = match slot.kind {
        SlotKind::Output => &mut node.output_offsets,
        SlotKind::Workspace => &mut node.workspace_offsets,
    };
    if offsets.len() <= slot.index {
        offsets.resize(slot.index + 1, INVALID_OFFSET);
    }
    let current = offsets[slot.index];
    if smallest_wins && current != INVALID_OFFSET && current <= offset {
        return;
    }
    offsets[slot.index] = offset;
}
