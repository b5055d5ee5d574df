//! Configuration for the memory planner
//!
//! [`PlannerConfig`] is resolved once per compilation and handed to the
//! planner constructor. Nothing in the planner looks options up on its own.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Option key of the string-valued reuse switch; `"1"` disables reuse.
pub const DISABLE_REUSE_OPTION: &str = "memory.disable_reuse";
pub const REUSE_THRESHOLD_OPTION: &str = "memory.reuse_threshold";
pub const ALIGNMENT_OPTION: &str = "memory.alignment";
pub const TARGET_OPTION: &str = "memory.target";

/// Environment override for the reuse switch
pub const DISABLE_REUSE_ENV: &str = "TENSORPLAN_DISABLE_REUSE";

/// Pooled blocks of one size class that must be outstanding before a
/// larger block may satisfy a smaller request.
pub const DEFAULT_REUSE_THRESHOLD: u64 = 10;

pub const DEFAULT_ALIGNMENT: u64 = 32;

/// Device class the plan is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Default,
    /// Graph outputs are copied out eagerly; edges into graph-output ops
    /// neither keep a block live nor release it.
    Tiny,
}

impl FromStr for Target {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "" => Ok(Target::Default),
            "tiny" => Ok(Target::Tiny),
            other => Err(PlanError::InvalidConfiguration(format!(
                "unknown target '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Default => write!(f, "default"),
            Target::Tiny => write!(f, "tiny"),
        }
    }
}

/// Configuration for one planning pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Give every slot a fresh block
    pub disable_reuse: bool,

    /// Outstanding count above which an oversized pooled block may be granted
    pub reuse_threshold: u64,

    /// Final block sizes round up to this (power of two)
    pub alignment: u64,

    pub target: Target,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            disable_reuse: false,
            reuse_threshold: DEFAULT_REUSE_THRESHOLD,
            alignment: DEFAULT_ALIGNMENT,
            target: Target::Default,
        }
    }
}

impl PlannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disable_reuse(mut self, disable_reuse: bool) -> Self {
        self.disable_reuse = disable_reuse;
        self
    }

    pub fn with_reuse_threshold(mut self, reuse_threshold: u64) -> Self {
        self.reuse_threshold = reuse_threshold;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn reuse_enabled(&self) -> bool {
        !self.disable_reuse
    }

    /// Resolve from string-valued compile options.
    ///
    /// Unknown keys are ignored. Keys that are present must parse.
    pub fn from_options(options: &BTreeMap<String, String>) -> PlanResult<Self> {
        let mut config = PlannerConfig::default();

        if let Some(value) = options.get(DISABLE_REUSE_OPTION) {
            config.disable_reuse = value.trim() == "1";
        }

        if let Some(value) = options.get(REUSE_THRESHOLD_OPTION) {
            config.reuse_threshold = parse_number(REUSE_THRESHOLD_OPTION, value)?;
        }

        if let Some(value) = options.get(ALIGNMENT_OPTION) {
            config.alignment = parse_number(ALIGNMENT_OPTION, value)?;
        }

        if let Some(value) = options.get(TARGET_OPTION) {
            config.target = value.trim().parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    ///
    /// Environment variables:
    /// - `TENSORPLAN_DISABLE_REUSE`: `1` disables reuse
    pub fn from_env() -> Self {
        let mut config = PlannerConfig::default();

        if let Ok(value) = env::var(DISABLE_REUSE_ENV) {
            config.disable_reuse = value.trim() == "1";
        }

        config
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(PlanError::InvalidConfiguration(format!(
                "alignment must be a non-zero power of two, got {}",
                self.alignment
            )));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> PlanResult<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        PlanError::InvalidConfiguration(format!("{} = '{}': {}", key, value, e))
    })
}
