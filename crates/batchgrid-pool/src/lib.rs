//! batchgrid-pool — capacity accounting across a fragmented set of nodes.
//!
//! The pool owns every node's reservation state. Callers reserve an
//! amount and receive the node it landed on, free it when the work
//! completes, and take deep-copy snapshots to simulate placements
//! without committing them.
//!
//! # Components
//!
//! - **`node`** — A single node's capacity and reservation
//! - **`pool`** — The pool: best-fit reservation, free, snapshot, refresh
//! - **`convert`** — Building nodes from discovery results

pub mod convert;
pub mod error;
pub mod node;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use node::Node;
pub use pool::ResourcePool;
