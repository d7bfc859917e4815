//! WAL application for the Tessera columnar time-series engine.
//!
//! Consumes commit notifications and replays sequencer-ordered WAL
//! transactions into table writers:
//!
//! - `NotificationQueue`: shared multi-consumer queue of commit
//!   notifications (at-least-once, duplicates tolerated)
//! - `WriterPool`: reason-tagged, non-blocking exclusive table writers with
//!   distressed-table gating
//! - `ApplyWalJob` / `ApplyWorkerPool`: the work-stealing apply loop and
//!   the worker threads that run it
//! - `testing`: in-memory table writer and fixtures for exercising the
//!   whole pipeline

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod job;
pub mod notifications;
pub mod pool;
pub mod testing;

pub use job::{ApplyWalJob, ApplyWorkerPool};
pub use notifications::NotificationQueue;
pub use pool::{PoolError, WriterPool, WAL_APPLY_REASON};
