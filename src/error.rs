//! Error handling for the memory planner
//!
//! Only a handful of conditions are fatal for a planning pass. Everything
//! else (dangling edges, missing attributes, a size that fits no bucket) is
//! logged and skipped by the planner itself and never surfaces here.
//!
//! Errors are grouped into categories so callers can tell apart:
//! - User errors (bad configuration, bad ladder handed in by the caller)
//! - Graph errors (the graph collaborator produced something unusable)
//! - Internal errors (bugs in the planner)

use std::fmt;

/// Unified error type for tensorplan
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    // ========== Graph Errors ==========
    /// Graph structure violates a planner precondition
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Node id does not exist in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(usize),

    /// Output, input or workspace index out of range for its node
    #[error("Invalid slot: node {node} has no {kind} #{index}")]
    InvalidSlot {
        node: usize,
        kind: &'static str,
        index: usize,
    },

    // ========== Ladder Errors ==========
    /// The size ladder could not be derived at all
    #[error("Size ladder derivation failed: {0}")]
    LadderDerivationFailed(String),

    /// Caller supplied a ladder that is not strictly ascending or holds zero
    #[error("Invalid size ladder: {0}")]
    InvalidLadder(String),

    /// A requested size cannot be represented as an arena offset
    #[error("Size {size} of node {node} exceeds the addressable arena")]
    SizeOverflow { node: String, size: u64 },

    // ========== Configuration Errors ==========
    /// Invalid planner configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== I/O Errors ==========
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Graph (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlanError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlanError::InvalidConfiguration(_)
            | PlanError::InvalidLadder(_)
            | PlanError::Io(_)
            | PlanError::Serialization(_) => ErrorCategory::User,

            PlanError::InvalidGraph(_)
            | PlanError::NodeNotFound(_)
            | PlanError::InvalidSlot { .. }
            | PlanError::LadderDerivationFailed(_)
            | PlanError::SizeOverflow { .. } => ErrorCategory::Graph,

            PlanError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// True when the caller handed in something it can fix
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// True when the graph handed to the planner is unusable.
    ///
    /// The build must be aborted; re-running on the same graph fails the
    /// same way.
    pub fn is_graph_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Graph)
    }

    /// True when the error indicates a planner bug
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or configuration from the caller
    User,
    /// Malformed graph from the upstream compiler
    Graph,
    /// Planner bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Graph => write!(f, "Graph"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type used throughout the planner
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Create a graph error with context
///
/// # Examples
/// ```ignore
/// return Err(graph_error!("node {} consumes itself", name));
/// ```
#[macro_export]
macro_rules! graph_error {
    ($msg:expr) => {
        $crate::error::PlanError::InvalidGraph($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PlanError::InvalidGraph(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::PlanError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PlanError::Internal(format!($fmt, $($arg)*))
    };
}

/// Wrap an I/O error with the path or action that failed
pub fn io_context(err: std::io::Error, msg: &str) -> PlanError {
    PlanError::Io(std::io::Error::new(err.kind(), format!("{}: {}", msg, err)))
}
