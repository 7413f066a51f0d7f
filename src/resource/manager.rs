//! Owner of the loaded model and its conversation state.
//!
//! Every operation takes a [`Ticket`] reserved at submission time, waits for
//! its turn, and then runs alone: loading, answering and releasing never
//! overlap, and they happen in the order the jobs were submitted.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

use super::ticket::{Ticket, TicketLine};
use crate::backend::{ModelBackend, TextPipeline};
use crate::error::{BackendError, JobError};
use crate::jobs::ProgressReporter;
use crate::prompt;

/// Lifecycle phase of the exclusive resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePhase {
    Unloaded,
    Loading,
    Ready,
    Answering,
    Releasing,
}

impl std::fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Answering => "answering",
            Self::Releasing => "releasing",
        };
        write!(f, "{s}")
    }
}

/// Conversation history fed back into the pipeline as `{history}{input}`.
#[derive(Debug, Default)]
pub struct Conversation {
    history: String,
    exchanges: usize,
}

impl Conversation {
    fn render(&self, input: &str) -> String {
        format!("{}{input}", self.history)
    }

    fn record(&mut self, input: &str, output: &str) {
        self.history.push_str(input);
        self.history.push_str(output);
        self.exchanges += 1;
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.exchanges = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges == 0 && self.history.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exchanges
    }
}

struct LoadedModel {
    pipeline: Box<dyn TextPipeline>,
    conversation: Conversation,
}

impl LoadedModel {
    async fn converse(&mut self, input: &str) -> Result<String, BackendError> {
        let prompt = self.conversation.render(input);
        let output = self.pipeline.generate(&prompt).await?;
        self.conversation.record(input, &output);
        Ok(output)
    }
}

struct Slot {
    phase: ResourcePhase,
    loaded: Option<LoadedModel>,
}

/// Exclusive access to the slot for the duration of one operation.
///
/// If the operation is interrupted (panic or cancelled future) while in a
/// transitional phase, dropping the turn rolls the slot back: a half-built
/// or half-released model is discarded and an interrupted answer leaves the
/// model `Ready` with an empty conversation.
struct Turn<'a> {
    slot: MutexGuard<'a, Slot>,
    phase_tx: &'a watch::Sender<ResourcePhase>,
    // Declared after `slot` so the lock is released before the line advances.
    _ticket: Ticket,
}

impl Turn<'_> {
    fn set_phase(&mut self, phase: ResourcePhase) {
        let from = self.slot.phase;
        self.slot.phase = phase;
        self.phase_tx.send_replace(phase);
        debug!(%from, to = %phase, "Resource phase changed");
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let rollback = match self.slot.phase {
            ResourcePhase::Loading | ResourcePhase::Releasing => {
                self.slot.loaded = None;
                ResourcePhase::Unloaded
            }
            ResourcePhase::Answering => {
                if let Some(loaded) = self.slot.loaded.as_mut() {
                    loaded.conversation.clear();
                }
                ResourcePhase::Ready
            }
            _ => return,
        };
        warn!(
            from = %self.slot.phase,
            to = %rollback,
            "Rolling back interrupted resource operation"
        );
        self.set_phase(rollback);
    }
}

/// Manages the single loaded model.
pub struct ResourceManager {
    backend: Arc<dyn ModelBackend>,
    line: Arc<TicketLine>,
    slot: Mutex<Slot>,
    phase_tx: watch::Sender<ResourcePhase>,
}

impl ResourceManager {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        let (phase_tx, _rx) = watch::channel(ResourcePhase::Unloaded);
        Self {
            backend,
            line: TicketLine::new(),
            slot: Mutex::new(Slot {
                phase: ResourcePhase::Unloaded,
                loaded: None,
            }),
            phase_tx,
        }
    }

    /// Reserve a place in line. Must be called in submission order.
    pub fn reserve(&self) -> Ticket {
        self.line.issue()
    }

    /// Current phase. Never blocks on a running operation.
    pub fn phase(&self) -> ResourcePhase {
        *self.phase_tx.borrow()
    }

    /// Subscribe to phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<ResourcePhase> {
        self.phase_tx.subscribe()
    }

    /// Operations reserved but not yet completed.
    pub fn queued(&self) -> u64 {
        self.line.waiting()
    }

    /// Identifier of the loaded model, once no operation is running.
    pub async fn loaded_model(&self) -> Option<String> {
        let slot = self.slot.lock().await;
        slot.loaded
            .as_ref()
            .map(|loaded| loaded.pipeline.model_id().to_string())
    }

    /// Exchanges held in conversation memory, once no operation is running.
    pub async fn conversation_len(&self) -> Option<usize> {
        let slot = self.slot.lock().await;
        slot.loaded.as_ref().map(|loaded| loaded.conversation.len())
    }

    async fn enter(&self, ticket: Ticket) -> Turn<'_> {
        ticket.wait_turn().await;
        let slot = self.slot.lock().await;
        Turn {
            slot,
            phase_tx: &self.phase_tx,
            _ticket: ticket,
        }
    }

    /// Construct the resource from `model`. Fails with a conflict unless
    /// nothing is loaded; a failed construction leaves nothing loaded.
    pub async fn load(
        &self,
        ticket: Ticket,
        model: &str,
        progress: &ProgressReporter,
    ) -> Result<(), JobError> {
        let mut turn = self.enter(ticket).await;
        if turn.slot.phase != ResourcePhase::Unloaded {
            return Err(JobError::Conflict {
                operation: "load a model",
                phase: turn.slot.phase,
            });
        }

        turn.set_phase(ResourcePhase::Loading);
        match self.backend.load(model, progress).await {
            Ok(pipeline) => {
                turn.slot.loaded = Some(LoadedModel {
                    pipeline,
                    conversation: Conversation::default(),
                });
                turn.set_phase(ResourcePhase::Ready);
                info!(job_id = %progress.job_id(), model, "Model loaded");
                Ok(())
            }
            Err(e) => {
                turn.slot.loaded = None;
                turn.set_phase(ResourcePhase::Unloaded);
                warn!(job_id = %progress.job_id(), model, error = %e, "Model load failed");
                Err(e.into())
            }
        }
    }

    /// Answer one question with the loaded model. Conversation memory is
    /// cleared afterwards whatever the outcome.
    pub async fn ask(
        &self,
        ticket: Ticket,
        question: &str,
        progress: &ProgressReporter,
    ) -> Result<String, JobError> {
        let mut turn = self.enter(ticket).await;
        if turn.slot.phase != ResourcePhase::Ready || turn.slot.loaded.is_none() {
            return Err(JobError::Conflict {
                operation: "answer a question",
                phase: turn.slot.phase,
            });
        }

        turn.set_phase(ResourcePhase::Answering);
        let generated = match turn.slot.loaded.as_mut() {
            Some(loaded) => {
                let generated = loaded.converse(&prompt::question_prompt(question)).await;
                loaded.conversation.clear();
                generated
            }
            None => Err(BackendError::Generation("no pipeline loaded".to_string())),
        };
        turn.set_phase(ResourcePhase::Ready);

        let raw = generated?;
        debug!(job_id = %progress.job_id(), chars = raw.len(), "Generation complete");
        prompt::extract_response(&raw)
    }

    /// Tear down the resource and purge cached artifacts. Releasing when
    /// nothing is loaded succeeds without doing anything. Returns whether a
    /// model was released.
    pub async fn release(
        &self,
        ticket: Ticket,
        progress: &ProgressReporter,
    ) -> Result<bool, JobError> {
        let mut turn = self.enter(ticket).await;
        match turn.slot.phase {
            ResourcePhase::Unloaded => {
                debug!(job_id = %progress.job_id(), "Release with nothing loaded");
                return Ok(false);
            }
            ResourcePhase::Ready => {}
            phase => {
                return Err(JobError::Conflict {
                    operation: "release the model",
                    phase,
                });
            }
        }

        turn.set_phase(ResourcePhase::Releasing);
        let released = turn.slot.loaded.take();
        drop(released);

        if let Err(e) = self.backend.purge_cache().await {
            warn!(job_id = %progress.job_id(), error = %e, "Cache purge failed after release");
        }

        turn.set_phase(ResourcePhase::Unloaded);
        info!(job_id = %progress.job_id(), "Model released");
        Ok(true)
    }

    /// Purge cached artifacts in turn with the other resource operations.
    /// Skipped while a model is loaded, since it may still read from the
    /// cache; the release that unloads it purges instead. Returns whether the
    /// purge ran.
    pub async fn purge(
        &self,
        ticket: Ticket,
        progress: &ProgressReporter,
    ) -> Result<bool, BackendError> {
        let turn = self.enter(ticket).await;
        if turn.slot.phase != ResourcePhase::Unloaded {
            debug!(
                job_id = %progress.job_id(),
                phase = %turn.slot.phase,
                "Cache purge deferred to release"
            );
            return Ok(false);
        }

        self.backend.purge_cache().await?;
        debug!(job_id = %progress.job_id(), "Cache purged");
        Ok(true)
    }
}
