//! Per-job progress stream.
//!
//! A job's execution appends events; pollers read snapshots. The buffer is
//! bounded and drops its oldest entries on overflow, since a poller only
//! needs the latest one. Progress never goes backwards and the stream closes
//! after its terminal event.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::JobOutput;

/// Upper bound of the progress scale.
pub const PROGRESS_TOTAL: u8 = 100;

/// How a terminal event ended the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Success(JobOutput),
    Failure(String),
}

/// One immutable progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Human-readable stage label.
    pub stage: String,
    /// Progress on a 0..=100 scale.
    pub progress: u8,
    /// Present only on the terminal event.
    pub outcome: Option<Outcome>,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Rejections from appending to a [`ProgressChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("progress stream already closed by a terminal event")]
    Closed,
}

/// Bounded append-only stream of [`ProgressEvent`]s.
#[derive(Debug)]
pub struct ProgressChannel {
    events: VecDeque<ProgressEvent>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(16)),
            capacity,
            dropped: 0,
            closed: false,
        }
    }

    /// Append a non-terminal stage update.
    pub fn stage(
        &mut self,
        stage: impl Into<String>,
        progress: u8,
    ) -> Result<ProgressEvent, ProgressError> {
        self.push(stage.into(), progress, None)
    }

    /// Append the terminal event and close the stream.
    pub fn finish(
        &mut self,
        stage: impl Into<String>,
        progress: u8,
        outcome: Outcome,
    ) -> Result<ProgressEvent, ProgressError> {
        self.push(stage.into(), progress, Some(outcome))
    }

    fn push(
        &mut self,
        stage: String,
        progress: u8,
        outcome: Option<Outcome>,
    ) -> Result<ProgressEvent, ProgressError> {
        if self.closed {
            return Err(ProgressError::Closed);
        }

        // Clamp into range and never below the last reported value.
        let floor = self.events.back().map(|e| e.progress).unwrap_or(0);
        let progress = progress.min(PROGRESS_TOTAL).max(floor);

        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }

        self.closed = outcome.is_some();
        let event = ProgressEvent {
            stage,
            progress,
            outcome,
            at: Utc::now(),
        };
        self.events.push_back(event.clone());
        Ok(event)
    }

    /// Most recent event, if any.
    pub fn latest(&self) -> Option<&ProgressEvent> {
        self.events.back()
    }

    /// Buffered events, oldest first.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.iter().cloned().collect()
    }

    /// Number of events evicted by overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_decreases() {
        let mut channel = ProgressChannel::new(8);
        channel.stage("a", 40).unwrap();
        let event = channel.stage("b", 10).unwrap();
        assert_eq!(event.progress, 40);
        let event = channel.stage("c", 250).unwrap();
        assert_eq!(event.progress, 100);
    }

    #[test]
    fn terminal_event_closes_stream() {
        let mut channel = ProgressChannel::new(8);
        channel.stage("start", 0).unwrap();
        channel
            .finish("done", 100, Outcome::Success(JobOutput::Code(1001)))
            .unwrap();
        assert!(channel.is_closed());
        assert_eq!(channel.stage("late", 100), Err(ProgressError::Closed));
        assert_eq!(
            channel.finish("again", 100, Outcome::Failure("x".into())),
            Err(ProgressError::Closed)
        );

        let events = channel.events();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut channel = ProgressChannel::new(3);
        for i in 0..5u8 {
            channel.stage(format!("step {i}"), i * 10).unwrap();
        }
        channel
            .finish("done", 100, Outcome::Success(JobOutput::Code(1002)))
            .unwrap();

        let events = channel.events();
        assert_eq!(events.len(), 3);
        assert_eq!(channel.dropped(), 3);
        assert_eq!(events[0].stage, "step 3");
        assert!(events[2].is_terminal());
    }

    #[test]
    fn empty_channel_has_no_latest() {
        let channel = ProgressChannel::new(0);
        assert!(channel.latest().is_none());
        assert!(!channel.is_closed());
    }
}
