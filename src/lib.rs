//! tensorplan - static memory planner for compiled tensor graphs
//!
//! Assigns every output and workspace of an ahead-of-time compiled graph a
//! byte offset in one flat device arena, reusing freed ranges across the
//! stream-parallel schedule.

#![allow(clippy::collapsible_if)] // Sometimes clearer for control flow
#![allow(clippy::type_complexity)]

pub mod error;
pub mod graph;
pub mod logging;
pub mod memory;
pub mod session;

pub use error::{ErrorCategory, PlanError, PlanResult};
pub use graph::{Graph, Node, NodeId, OpType, OutputDesc, TensorDesc};
pub use memory::{MemoryAssigner, PlanSummary, PlannerConfig, Target};
pub use session::CompileSession;
