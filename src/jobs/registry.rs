//! Job handle registry: identifier → job lookup with retention-based reaping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::progress::{Outcome, ProgressChannel, ProgressError, ProgressEvent};
use super::state::{JobKind, JobState, StateTransition};
use crate::error::JobError;

/// Opaque job identifier handed to clients.
pub type JobId = Uuid;

/// Mutable part of a job, guarded per entry.
#[derive(Debug)]
struct JobRecord {
    state: JobState,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    transitions: Vec<StateTransition>,
    progress: ProgressChannel,
}

/// Point-in-time copy of a job for readers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub latest: Option<ProgressEvent>,
    /// Progress events evicted from the bounded buffer.
    pub dropped_events: u64,
}

/// A registered job.
///
/// Readers may snapshot it at any time. Only the execution that owns the job
/// writes to it, through [`ProgressReporter`](super::reporter::ProgressReporter).
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    created_at: DateTime<Utc>,
    record: Mutex<JobRecord>,
    state_tx: watch::Sender<JobState>,
}

impl JobHandle {
    /// Create a fresh `Pending` job with a new identifier.
    pub fn new(kind: JobKind, progress_capacity: usize) -> Self {
        let now = Utc::now();
        let (state_tx, _rx) = watch::channel(JobState::Pending);
        Self {
            id: Uuid::new_v4(),
            kind,
            created_at: now,
            record: Mutex::new(JobRecord {
                state: JobState::Pending,
                updated_at: now,
                finished_at: None,
                transitions: Vec::new(),
                progress: ProgressChannel::new(progress_capacity),
            }),
            state_tx,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.record().state
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.record();
        JobSnapshot {
            id: self.id,
            kind: self.kind,
            state: record.state,
            created_at: self.created_at,
            updated_at: record.updated_at,
            finished_at: record.finished_at,
            latest: record.progress.latest().cloned(),
            dropped_events: record.progress.dropped(),
        }
    }

    /// Buffered progress events, oldest first.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.record().progress.events()
    }

    /// State transition history.
    pub fn transitions(&self) -> Vec<StateTransition> {
        self.record().transitions.clone()
    }

    /// Wait until the job reaches a terminal state and return it.
    pub async fn wait_terminal(&self) -> JobState {
        let mut rx = self.state_tx.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // Sender lives as long as self, so this is unreachable in practice.
            Err(_) => self.state(),
        }
    }

    fn record(&self) -> MutexGuard<'_, JobRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        match self.record().finished_at {
            Some(finished) => now
                .signed_duration_since(finished)
                .to_std()
                .map(|age| age >= retention)
                .unwrap_or(retention.is_zero()),
            None => false,
        }
    }

    pub(crate) fn transition_to(&self, target: JobState) -> Result<(), String> {
        let mut record = self.record();
        if !record.state.can_transition_to(target) {
            return Err(format!(
                "Cannot transition job {} from {} to {}",
                self.id, record.state, target
            ));
        }
        let now = Utc::now();
        let from = record.state;
        record.transitions.push(StateTransition {
            from,
            to: target,
            timestamp: now,
        });
        record.state = target;
        record.updated_at = now;
        if target.is_terminal() {
            record.finished_at = Some(now);
        }
        drop(record);

        self.state_tx.send_replace(target);
        Ok(())
    }

    pub(crate) fn push_stage(
        &self,
        stage: &str,
        progress: u8,
    ) -> Result<ProgressEvent, ProgressError> {
        let mut record = self.record();
        let event = record.progress.stage(stage, progress)?;
        record.updated_at = event.at;
        Ok(event)
    }

    /// Append the terminal event and move to the matching terminal state in
    /// one critical section, so readers never see one without the other.
    pub(crate) fn close(&self, stage: &str, progress: u8, outcome: Outcome) -> Result<(), String> {
        let target = match outcome {
            Outcome::Success(_) => JobState::Finished,
            Outcome::Failure(_) => JobState::Failed,
        };

        let mut record = self.record();
        if !record.state.can_transition_to(target) {
            return Err(format!(
                "Cannot close job {} from {} as {}",
                self.id, record.state, target
            ));
        }
        let event = record
            .progress
            .finish(stage, progress, outcome)
            .map_err(|e| e.to_string())?;
        let from = record.state;
        record.transitions.push(StateTransition {
            from,
            to: target,
            timestamp: event.at,
        });
        record.state = target;
        record.updated_at = event.at;
        record.finished_at = Some(event.at);
        let dropped = record.progress.dropped();
        drop(record);

        if dropped > 0 {
            debug!(job_id = %self.id, dropped, "Progress buffer overflowed before close");
        }

        self.state_tx.send_replace(target);
        Ok(())
    }
}

/// Concurrent map of every job still retained.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    progress_capacity: usize,
}

impl JobRegistry {
    /// Create a new registry.
    pub fn new(progress_capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            progress_capacity,
        }
    }

    /// Create and register a new `Pending` job.
    pub async fn register(&self, kind: JobKind) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(kind, self.progress_capacity));
        self.jobs
            .write()
            .await
            .insert(handle.id(), Arc::clone(&handle));
        debug!(job_id = %handle.id(), kind = %kind, "Job registered");
        handle
    }

    /// Look up a job by identifier.
    pub async fn get(&self, id: JobId) -> Result<Arc<JobHandle>, JobError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobError::UnknownIdentifier { id })
    }

    /// Remove terminal jobs that finished at least `retention` ago.
    /// Returns the number of jobs removed.
    pub async fn reap(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|id, handle| {
            let expired = handle.is_expired(retention, now);
            if expired {
                debug!(job_id = %id, kind = %handle.kind(), "Job reaped");
            }
            !expired
        });
        let reaped = before - jobs.len();

        if reaped > 0 {
            info!(count = reaped, remaining = jobs.len(), "Reaped finished jobs");
        }

        reaped
    }

    /// Get the number of retained jobs (all states).
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Check if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Get summary of all retained jobs.
    pub async fn summary(&self) -> RegistrySummary {
        let jobs = self.jobs.read().await;

        let mut summary = RegistrySummary::default();
        for handle in jobs.values() {
            match handle.state() {
                JobState::Pending => summary.pending += 1,
                JobState::Running => summary.running += 1,
                JobState::Finished => summary.finished += 1,
                JobState::Failed => summary.failed += 1,
            }
        }

        summary.total = jobs.len();
        summary
    }
}

/// Summary of all retained jobs.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
}

/// Spawn a background task that periodically reaps expired jobs.
pub fn spawn_reaper(
    registry: Arc<JobRegistry>,
    interval: Duration,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    if interval.is_zero() {
        warn!("Reap interval of zero requested, using one second");
    }
    let period = interval.max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            registry.reap(retention).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::state::JobOutput;

    fn finish(handle: &JobHandle) {
        handle.transition_to(JobState::Running).unwrap();
        handle
            .close("done", 100, Outcome::Success(JobOutput::Code(1002)))
            .unwrap();
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = JobRegistry::new(8);
        let handle = registry.register(JobKind::Ask).await;

        let fetched = registry.get(handle.id()).await.unwrap();
        assert_eq!(fetched.kind(), JobKind::Ask);
        assert_eq!(fetched.state(), JobState::Pending);
    }

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let registry = JobRegistry::new(8);
        let id = Uuid::new_v4();
        let result = registry.get(id).await;
        assert!(matches!(
            result,
            Err(JobError::UnknownIdentifier { id: missing }) if missing == id
        ));
    }

    #[tokio::test]
    async fn identifiers_are_unique() {
        let registry = JobRegistry::new(8);
        let a = registry.register(JobKind::Release).await;
        let b = registry.register(JobKind::Release).await;
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn reap_removes_only_terminal_jobs() {
        let registry = JobRegistry::new(8);
        let done = registry.register(JobKind::Release).await;
        let pending = registry.register(JobKind::Ask).await;
        finish(&done);

        let reaped = registry.reap(Duration::ZERO).await;
        assert_eq!(reaped, 1);
        assert!(registry.get(done.id()).await.is_err());
        assert!(registry.get(pending.id()).await.is_ok());
    }

    #[tokio::test]
    async fn reap_respects_retention_window() {
        let registry = JobRegistry::new(8);
        let done = registry.register(JobKind::Release).await;
        finish(&done);

        assert_eq!(registry.reap(Duration::from_secs(3600)).await, 0);
        assert!(registry.get(done.id()).await.is_ok());
    }

    #[test]
    fn snapshot_counts_evicted_progress() {
        let handle = JobHandle::new(JobKind::Adjust, 2);
        handle.transition_to(JobState::Running).unwrap();
        for step in 1..=4 {
            handle.push_stage("step", step * 10).unwrap();
        }

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.dropped_events, 2);
        assert_eq!(snapshot.latest.unwrap().progress, 40);
    }

    #[tokio::test]
    async fn close_is_atomic_and_final() {
        let handle = JobHandle::new(JobKind::LoadModel, 8);
        handle.transition_to(JobState::Running).unwrap();
        handle.push_stage("loading", 10).unwrap();
        handle
            .close("boom", 10, Outcome::Failure("bad".into()))
            .unwrap();

        assert_eq!(handle.state(), JobState::Failed);
        assert!(handle.close("again", 100, Outcome::Failure("x".into())).is_err());
        assert!(handle.push_stage("late", 100).is_err());

        let snapshot = handle.snapshot();
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.latest.unwrap().is_terminal());
        assert_eq!(snapshot.dropped_events, 0);

        let transitions = handle.transitions();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from, JobState::Pending);
        assert_eq!(transitions[1].from, JobState::Running);
        assert_eq!(transitions[1].to, JobState::Failed);
    }

    #[tokio::test]
    async fn wait_terminal_wakes_on_close() {
        let handle = Arc::new(JobHandle::new(JobKind::Release, 8));
        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.wait_terminal().await })
        };

        finish(&handle);
        assert_eq!(waiter.await.unwrap(), JobState::Finished);
    }

    #[tokio::test]
    async fn summary_counts_states() {
        let registry = JobRegistry::new(8);
        registry.register(JobKind::Ask).await;
        let running = registry.register(JobKind::Adjust).await;
        running.transition_to(JobState::Running).unwrap();
        let done = registry.register(JobKind::Release).await;
        finish(&done);

        let summary = registry.summary().await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.finished, 1);
    }
}
