//! Per-compilation context.
//!
//! A [`CompileSession`] carries the string options of one compilation and
//! resolves them into typed configuration. Each compilation owns its own
//! session; nothing is shared between graphs compiled side by side.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::PlanResult;
use crate::graph::Graph;
use crate::memory::{MemoryAssigner, PlanSummary, PlannerConfig};

#[derive(Debug, Clone, Default)]
pub struct CompileSession {
    options: BTreeMap<String, String>,
    graphs_planned: usize,
}

impl CompileSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_option(key, value);
        self
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn planner_config(&self) -> PlanResult<PlannerConfig> {
        PlannerConfig::from_options(&self.options)
    }

    /// Number of graphs planned through this session
    pub fn graphs_planned(&self) -> usize {
        self.graphs_planned
    }

    /// Plan `graph` with the configuration resolved from this session.
    pub fn plan(&mut self, graph: &mut Graph) -> PlanResult<PlanSummary> {
        let config = self.planner_config()?;
        debug!("Planning graph {} with {:?}", graph.name, config);
        let summary = MemoryAssigner::new(config).assign(graph)?;
        self.graphs_planned += 1;
        Ok(summary)
    }
}
