//! Status aggregator: one normalized status shape for every job kind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::progress::{Outcome, PROGRESS_TOTAL};
use super::registry::{JobId, JobRegistry, JobSnapshot};
use super::state::{JobOutput, JobState};

/// Message shown while a job has not reported anything yet.
pub const STARTING_MESSAGE: &str = "Starting...";

/// Client-visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    Pending,
    Progress,
    Finished,
    Failed,
}

/// Status payload returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ClientState,
    pub current: u32,
    pub total: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
}

impl StatusReport {
    /// Placeholder for a job that has not started, or is not known at all.
    pub fn pending() -> Self {
        Self {
            state: ClientState::Pending,
            current: 0,
            total: 1,
            status: STARTING_MESSAGE.to_string(),
            result: None,
        }
    }

    /// Translate an internal snapshot into the client shape.
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        let total = u32::from(PROGRESS_TOTAL);
        let latest = snapshot.latest.as_ref();

        match snapshot.state {
            JobState::Pending => Self::pending(),
            JobState::Running => Self {
                state: ClientState::Progress,
                current: latest.map(|e| u32::from(e.progress)).unwrap_or(0),
                total,
                status: latest
                    .map(|e| e.stage.clone())
                    .unwrap_or_else(|| STARTING_MESSAGE.to_string()),
                result: None,
            },
            JobState::Finished => {
                let result = latest.and_then(|e| match &e.outcome {
                    Some(Outcome::Success(output)) => Some(output.clone()),
                    _ => None,
                });
                Self {
                    state: ClientState::Finished,
                    current: latest.map(|e| u32::from(e.progress)).unwrap_or(total),
                    total,
                    status: latest.map(|e| e.stage.clone()).unwrap_or_default(),
                    result,
                }
            }
            JobState::Failed => {
                let message = latest
                    .and_then(|e| match &e.outcome {
                        Some(Outcome::Failure(message)) => Some(message.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| "Job failed".to_string());
                Self {
                    state: ClientState::Failed,
                    current: 1,
                    total: 1,
                    status: message,
                    result: None,
                }
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ClientState::Finished | ClientState::Failed)
    }
}

/// Answers status queries from the registry alone.
#[derive(Clone)]
pub struct StatusAggregator {
    registry: Arc<JobRegistry>,
}

impl StatusAggregator {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Status of `id`. Unknown identifiers (never issued, or already reaped)
    /// read as a not-yet-started job.
    pub async fn status(&self, id: JobId) -> StatusReport {
        match self.registry.get(id).await {
            Ok(handle) => StatusReport::from_snapshot(&handle.snapshot()),
            Err(e) => {
                debug!(job_id = %id, error = %e, "Status for unknown job");
                StatusReport::pending()
            }
        }
    }

    /// Like [`status`](Self::status) but distinguishes unknown identifiers.
    pub async fn lookup(&self, id: JobId) -> Option<StatusReport> {
        self.registry
            .get(id)
            .await
            .ok()
            .map(|handle| StatusReport::from_snapshot(&handle.snapshot()))
    }
}
