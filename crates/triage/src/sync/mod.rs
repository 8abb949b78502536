//! Sync engine: cycle driver and scheduling
//!
//! A cycle is idempotent: running it again after a failure never creates
//! duplicate records and never loses a message the cursor has passed.

mod cycle;
mod task;
mod timing;

pub use cycle::{
    CycleError, CycleOptions, CyclePhase, CycleReport, MessageFailure, MessageOutcome, run_cycle,
};
pub use task::{FailurePolicy, Schedule, StopSignal, SyncTask, TaskEvent, TaskHandle};
pub use timing::{cooldown_elapsed, next_backoff};
