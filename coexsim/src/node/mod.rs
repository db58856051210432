//! Per-node contention state machines for both radio families.

pub mod ap;
pub mod gnb;

pub use ap::Ap;
pub use gnb::Gnb;

/// Logs at debug level for the traced node, trace level otherwise.
macro_rules! node_log {
    ($node:expr, $($arg:tt)*) => {
        if $node.traced {
            tracing::debug!(node = $node.id, $($arg)*);
        } else {
            tracing::trace!(node = $node.id, $($arg)*);
        }
    };
}

pub(crate) use node_log;
