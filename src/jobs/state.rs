//! Job kinds and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result code reported when an Adjust job finishes.
pub const ADJUST_DONE: u32 = 1003;
/// Result code reported when a LoadModel job finishes.
pub const MODEL_READY: u32 = 1001;
/// Result code reported when a Release job finishes.
pub const MODEL_RELEASED: u32 = 1002;

/// The four kinds of work the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Adjust a model's parameters on a user dataset.
    Adjust,
    /// Load a model for interactive use.
    LoadModel,
    /// Answer one question with the loaded model.
    Ask,
    /// Release the loaded model.
    Release,
}

impl JobKind {
    /// Whether this kind runs inside the exclusive resource's critical section.
    pub fn touches_resource(&self) -> bool {
        !matches!(self, Self::Adjust)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Adjust => "adjust",
            Self::LoadModel => "load_model",
            Self::Ask => "ask",
            Self::Release => "release",
        };
        write!(f, "{s}")
    }
}

/// Payload carried by a job's terminal success event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    /// Fixed numeric code (Adjust, LoadModel, Release).
    Code(u32),
    /// Generated answer (Ask).
    Text(String),
}

/// State of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted and queued, not yet picked up by a worker.
    Pending,
    /// A worker is executing the job.
    Running,
    /// Finished successfully.
    Finished,
    /// Failed; the failure message is the last progress event.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Failed) | (Running, Finished) | (Running, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: JobState,
    /// New state.
    pub to: JobState,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Finished));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!JobState::Finished.can_transition_to(JobState::Running));
        assert!(!JobState::Finished.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Finished));
        assert!(!JobState::Pending.can_transition_to(JobState::Finished));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn only_adjust_skips_the_resource() {
        assert!(!JobKind::Adjust.touches_resource());
        assert!(JobKind::LoadModel.touches_resource());
        assert!(JobKind::Ask.touches_resource());
        assert!(JobKind::Release.touches_resource());
    }

    #[test]
    fn output_serializes_untagged() {
        assert_eq!(serde_json::to_string(&JobOutput::Code(1001)).unwrap(), "1001");
        assert_eq!(
            serde_json::to_string(&JobOutput::Text("4".into())).unwrap(),
            "\"4\""
        );
    }

    #[test]
    fn job_state_display() {
        assert_eq!(JobState::Running.to_string(), "running");
        assert_eq!(JobKind::LoadModel.to_string(), "load_model");
    }
}
