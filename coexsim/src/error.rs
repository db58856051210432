//! Error types and utilities for simulation operations.

use thiserror::Error;

/// Errors surfaced by the simulation engine and by node construction.
///
/// The taxonomy is deliberately narrow: collisions are modeled outcomes (the
/// `collided` flag on a transmission), not errors, and interrupting a task
/// that is not suspended on an interruptible wait is a no-op.
#[derive(Debug, Error)]
pub enum SimError {
    /// A weak handle was used after the simulation world was dropped.
    #[error("simulation world has been dropped")]
    WorldDropped,

    /// A node or campaign was built from an inconsistent configuration.
    ///
    /// Raised at construction time, never mid-run.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure to set up the runtime or write campaign output.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
