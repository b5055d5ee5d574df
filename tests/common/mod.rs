//! Common test utilities for planner integration tests
//!
//! Graph builders shared by the scenario, property and config suites, plus
//! tempfile helpers for tests that go through the JSON form of a graph.

#![allow(dead_code)]

mod fixtures;
mod tempfile_helpers;

pub use fixtures::*;
pub use serial_test::serial;
pub use tempfile_helpers::*;

use tensorplan::{Graph, MemoryAssigner, PlanSummary, PlannerConfig};

/// Plan a clone of `graph` and return both the annotated graph and summary.
pub fn plan(graph: &Graph, config: PlannerConfig) -> (Graph, PlanSummary) {
    let mut planned = graph.clone();
    let summary = MemoryAssigner::new(config)
        .assign(&mut planned)
        .expect("planning succeeds");
    (planned, summary)
}
