//! batchgrid-scheduler — pipelined four-stage batch dispatch.
//!
//! Turns batch plans into reserved, timed operations and submits them so
//! that every batch's stages complete in canonical order while many
//! batches overlap.
//!
//! # Architecture
//!
//! ```text
//! PipelineScheduler
//!   ├── StagePlanner (greed held fixed, thread counts re-planned)
//!   ├── ResourcePool (owned; reserve at admission, free on completion)
//!   ├── StageQueues  (four FIFOs, paced by the StabilizeB cutoff)
//!   ├── in-flight set (matched against completions, lost after grace)
//!   ├── DesyncDetector (rolling window over completed stages)
//!   └── PrepDriver   (fire-and-forget waves back to baseline)
//! ```

pub mod desync;
pub mod error;
pub mod pipeline;
pub mod prep;
pub mod queues;

pub use desync::{DesyncDetector, DesyncEvent};
pub use error::{SchedulerError, SchedulerResult};
pub use pipeline::{Collaborators, HaltReason, PipelineScheduler, RunSummary};
pub use prep::{PrepDriver, PrepReport};
pub use queues::StageQueues;
