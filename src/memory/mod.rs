//! Static memory planning for compiled graphs
//!
//! Every output and workspace of a graph is mapped onto one byte range of a
//! single flat arena reserved on the device before execution. Slots whose
//! lifetimes do not overlap share ranges.
//!
//! # Pattern
//!
//! 1. Derive the size ladder from the graph (or take one from the caller)
//! 2. Resolve which streams may inherit freed blocks from which
//! 3. Walk the nodes in topological order, acquiring and releasing blocks
//! 4. Fold mutually exclusive dynamic-batch branches onto shared blocks
//! 5. Resize, pack blocks back to back and write offsets onto the nodes

pub mod allocator;
pub mod assigner;
pub mod block;
pub mod config;
pub mod ladder;
pub mod layout;
pub mod merger;
pub mod pool;
pub mod streams;

pub use allocator::{Allocation, AllocatorStats, BlockAllocator};
pub use assigner::{BlockReport, MemoryAssigner, PlanSummary};
pub use block::{align_up, Block, BlockId, Slot, SlotKind};
pub use config::{PlannerConfig, Target};
pub use ladder::{FixedLadder, GraphLadder, LadderProvider, SizeLadder};
pub use merger::{merge_dynamic_batch_blocks, MergeReport};
pub use streams::{StreamInfo, StreamReuseGraph};
