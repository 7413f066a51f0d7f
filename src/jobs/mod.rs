//! Job system: submission, execution, progress and status of async jobs.
//!
//! - `state`: job kinds, lifecycle states and result codes
//! - `progress`: per-job bounded progress channel
//! - `registry`: job handles keyed by id, retention reaper
//! - `reporter`: write side handed to executions
//! - `dataset`: Adjust input validation and row cap
//! - `dispatcher`: validation, queueing and the worker pool
//! - `status`: normalized client status

pub mod dataset;
pub mod dispatcher;
pub mod progress;
pub mod registry;
pub mod reporter;
pub mod state;
pub mod status;

pub use dataset::Dataset;
pub use dispatcher::{Dispatcher, DispatcherConfig, JobRequest};
pub use progress::{Outcome, PROGRESS_TOTAL, ProgressChannel, ProgressEvent};
pub use registry::{JobHandle, JobId, JobRegistry, JobSnapshot, RegistrySummary, spawn_reaper};
pub use reporter::ProgressReporter;
pub use state::{ADJUST_DONE, JobKind, JobOutput, JobState, MODEL_READY, MODEL_RELEASED};
pub use status::{ClientState, StatusAggregator, StatusReport};
