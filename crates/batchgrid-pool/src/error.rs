//! Pool error types.

use thiserror::Error;

/// Errors from capacity bookkeeping. Both indicate an accounting bug in
/// the caller, not a shortage of capacity.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("cannot free {amount} on node {node}: only {held} held")]
    OverFree { node: String, amount: f64, held: f64 },
}

pub type PoolResult<T> = Result<T, PoolError>;
