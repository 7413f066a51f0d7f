//! Write side of a job: the only path through which a job's state changes.

use std::sync::Arc;

use tracing::{debug, warn};

use super::progress::{Outcome, PROGRESS_TOTAL};
use super::registry::{JobHandle, JobId};
use super::state::{JobOutput, JobState};

/// Handed to the execution of one job (and through it to the backend) to
/// report staged progress. Writes never block on readers for longer than a
/// short per-job lock.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    handle: Arc<JobHandle>,
}

impl ProgressReporter {
    pub fn new(handle: Arc<JobHandle>) -> Self {
        Self { handle }
    }

    pub fn job_id(&self) -> JobId {
        self.handle.id()
    }

    /// Report a stage. Values below the last reported progress are raised to
    /// it. Reports after the job has ended are ignored.
    pub fn stage(&self, stage: &str, progress: u8) {
        match self.handle.push_stage(stage, progress) {
            Ok(event) => {
                debug!(
                    job_id = %self.handle.id(),
                    stage = %event.stage,
                    progress = event.progress,
                    "Job progress"
                );
            }
            Err(e) => {
                warn!(job_id = %self.handle.id(), stage, error = %e, "Dropped progress report");
            }
        }
    }

    /// Mark the job as picked up by a worker.
    pub(crate) fn start(&self) -> bool {
        match self.handle.transition_to(JobState::Running) {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %self.handle.id(), error = %e, "Job could not start");
                false
            }
        }
    }

    /// Close the job successfully.
    pub(crate) fn finish(&self, stage: &str, output: JobOutput) {
        if let Err(e) = self
            .handle
            .close(stage, PROGRESS_TOTAL, Outcome::Success(output))
        {
            warn!(job_id = %self.handle.id(), error = %e, "Job could not finish");
        }
    }

    /// Close the job as failed. The progress value stays where it was.
    pub(crate) fn fail(&self, message: String) {
        let stage = message.clone();
        if let Err(e) = self.handle.close(&stage, 0, Outcome::Failure(message)) {
            warn!(job_id = %self.handle.id(), error = %e, "Job could not record failure");
        }
    }
}
