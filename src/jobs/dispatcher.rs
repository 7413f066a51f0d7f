//! Dispatcher: validates submissions and runs jobs on a fixed worker pool.
//!
//! `submit()` never waits for execution: it validates, registers the job,
//! queues it and returns the identifier. Workers pull jobs in submission
//! order; each job runs to its terminal state on one worker.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dataset::Dataset;
use super::registry::{JobId, JobRegistry};
use super::reporter::ProgressReporter;
use super::state::{ADJUST_DONE, JobKind, JobOutput, MODEL_READY, MODEL_RELEASED};
use crate::backend::{FineTuneRequest, ModelBackend};
use crate::config::ServiceConfig;
use crate::error::{JobError, ValidationError};
use crate::resource::{ResourceManager, Ticket};

/// A job as submitted by a client.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Adjust {
        dataset: Dataset,
        output_model: Option<String>,
    },
    LoadModel {
        model_name: String,
    },
    Ask {
        question: String,
    },
    Release,
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Adjust { .. } => JobKind::Adjust,
            Self::LoadModel { .. } => JobKind::LoadModel,
            Self::Ask { .. } => JobKind::Ask,
            Self::Release => JobKind::Release,
        }
    }
}

/// Validated input, before a place in the resource line is reserved.
#[derive(Debug)]
enum JobInput {
    Adjust(FineTuneRequest),
    LoadModel(String),
    Ask(String),
    Release,
}

impl JobInput {
    fn schedule(self, resources: &ResourceManager) -> Work {
        match self {
            Self::Adjust(request) => Work::Adjust(request),
            Self::LoadModel(model) => Work::LoadModel {
                model,
                ticket: resources.reserve(),
            },
            Self::Ask(question) => Work::Ask {
                question,
                ticket: resources.reserve(),
            },
            Self::Release => Work::Release {
                ticket: resources.reserve(),
            },
        }
    }
}

/// Input ready to execute.
#[derive(Debug)]
enum Work {
    Adjust(FineTuneRequest),
    LoadModel { model: String, ticket: Ticket },
    Ask { question: String, ticket: Ticket },
    Release { ticket: Ticket },
}

struct QueuedJob {
    reporter: ProgressReporter,
    kind: JobKind,
    work: Work,
}

/// Dispatcher limits.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub max_dataset_rows: usize,
    pub default_output_model: String,
}

impl From<&ServiceConfig> for DispatcherConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            workers: config.workers,
            max_dataset_rows: config.max_dataset_rows,
            default_output_model: config.default_output_model.clone(),
        }
    }
}

/// Shared dependencies for job execution.
struct Executor {
    resources: Arc<ResourceManager>,
    backend: Arc<dyn ModelBackend>,
}

/// Accepts jobs and runs them on the worker pool.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<JobRegistry>,
    resources: Arc<ResourceManager>,
    /// Guards ticket reservation + enqueue so both happen in the same order.
    queue_tx: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create the dispatcher and spawn its workers.
    pub fn start(
        config: DispatcherConfig,
        registry: Arc<JobRegistry>,
        resources: Arc<ResourceManager>,
        backend: Arc<dyn ModelBackend>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<QueuedJob>();
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let executor = Arc::new(Executor {
            resources: Arc::clone(&resources),
            backend,
        });

        let worker_count = config.workers.max(1);
        let workers = (0..worker_count)
            .map(|worker| {
                let queue_rx = Arc::clone(&queue_rx);
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    loop {
                        let next = queue_rx.lock().await.recv().await;
                        let Some(job) = next else { break };
                        run_job(&executor, job, worker).await;
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        info!(workers = worker_count, "Worker pool started");

        Arc::new(Self {
            config,
            registry,
            resources,
            queue_tx: Mutex::new(Some(queue_tx)),
            workers: tokio::sync::Mutex::new(workers),
        })
    }

    /// Validate and queue a job. Returns as soon as the job is registered.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, ValidationError> {
        let kind = request.kind();
        let input = self.prepare(request).inspect_err(|e| {
            debug!(kind = %kind, error = %e, "Submission rejected");
        })?;

        let handle = self.registry.register(kind).await;
        let job_id = handle.id();
        let reporter = ProgressReporter::new(handle);

        let rejected = {
            let queue = self.queue_tx.lock().unwrap_or_else(|p| p.into_inner());
            match queue.as_ref() {
                Some(tx) => {
                    let work = input.schedule(&self.resources);
                    tx.send(QueuedJob {
                        reporter: reporter.clone(),
                        kind,
                        work,
                    })
                    .is_err()
                }
                None => true,
            }
        };

        if rejected {
            warn!(job_id = %job_id, kind = %kind, "Job submitted after shutdown");
            reporter.fail(
                JobError::Aborted {
                    id: job_id,
                    reason: "worker pool is shut down".to_string(),
                }
                .to_string(),
            );
        } else {
            info!(job_id = %job_id, kind = %kind, "Job submitted");
        }

        Ok(job_id)
    }

    /// Check a request's shape and turn it into executable input.
    fn prepare(&self, request: JobRequest) -> Result<JobInput, ValidationError> {
        match request {
            JobRequest::Adjust {
                dataset,
                output_model,
            } => {
                dataset.validate()?;
                let output_model = match output_model {
                    Some(name) if name.trim().is_empty() => {
                        return Err(ValidationError::EmptyOutputModel);
                    }
                    Some(name) => name.trim().to_string(),
                    None => self.config.default_output_model.clone(),
                };

                let received = dataset.row_count();
                let dataset = dataset.capped(self.config.max_dataset_rows, &mut rand::thread_rng());
                if dataset.row_count() < received {
                    debug!(
                        received,
                        kept = dataset.row_count(),
                        "Dataset subsampled"
                    );
                }

                Ok(JobInput::Adjust(FineTuneRequest {
                    samples: dataset.training_samples(),
                    output_model,
                }))
            }
            JobRequest::LoadModel { model_name } => {
                let model_name = model_name.trim();
                if model_name.is_empty() {
                    return Err(ValidationError::EmptyModelName);
                }
                Ok(JobInput::LoadModel(model_name.to_string()))
            }
            JobRequest::Ask { question } => {
                let question = question.trim();
                if question.is_empty() {
                    return Err(ValidationError::EmptyQuestion);
                }
                Ok(JobInput::Ask(question.to_string()))
            }
            JobRequest::Release => Ok(JobInput::Release),
        }
    }

    /// Stop accepting jobs, let the workers drain the queue, and wait for
    /// them to exit. Queued jobs still run to completion.
    pub async fn shutdown(&self) {
        let sender = self
            .queue_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let count = workers.len();
        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
        info!(workers = count, "Worker pool stopped");
    }
}

/// Run one job on the current worker. The job body runs in its own task so a
/// panic becomes a failed job instead of a dead worker.
async fn run_job(executor: &Arc<Executor>, job: QueuedJob, worker: usize) {
    let reporter = job.reporter.clone();
    let job_id = reporter.job_id();
    let kind = job.kind;

    let task = tokio::spawn(Arc::clone(executor).execute(job));
    if let Err(e) = task.await {
        warn!(job_id = %job_id, kind = %kind, worker, error = %e, "Job execution aborted");
        reporter.fail(
            JobError::Aborted {
                id: job_id,
                reason: e.to_string(),
            }
            .to_string(),
        );
    }
}

impl Executor {
    async fn execute(self: Arc<Self>, job: QueuedJob) {
        let QueuedJob {
            reporter,
            kind,
            work,
        } = job;
        let job_id = reporter.job_id();

        if !reporter.start() {
            return;
        }
        info!(job_id = %job_id, kind = %kind, "Job started");

        match self.perform(work, &reporter).await {
            Ok((stage, output)) => {
                info!(job_id = %job_id, kind = %kind, "Job finished");
                reporter.finish(stage, output);
            }
            Err(e) => {
                warn!(job_id = %job_id, kind = %kind, error = %e, "Job failed");
                reporter.fail(e.to_string());
            }
        }
    }

    async fn perform(
        &self,
        work: Work,
        progress: &ProgressReporter,
    ) -> Result<(&'static str, JobOutput), JobError> {
        match work {
            Work::Adjust(request) => {
                progress.stage("Preparing the adjustment...", 0);
                progress.stage("Adapting the dataset...", 10);
                let result = self.backend.fine_tune(request, progress).await;
                // The purge touches the shared cache, so it queues behind
                // whatever resource operations are already reserved.
                let ticket = self.resources.reserve();
                if let Err(e) = self.resources.purge(ticket, progress).await {
                    warn!(
                        job_id = %progress.job_id(),
                        error = %e,
                        "Cache purge failed after adjustment"
                    );
                }
                result?;
                Ok(("Training complete!", JobOutput::Code(ADJUST_DONE)))
            }
            Work::LoadModel { model, ticket } => {
                progress.stage("Connecting to the model store...", 0);
                self.resources.load(ticket, &model, progress).await?;
                Ok(("Model ready for questions!", JobOutput::Code(MODEL_READY)))
            }
            Work::Ask { question, ticket } => {
                progress.stage("Asking the question...", 0);
                let answer = self.resources.ask(ticket, &question, progress).await?;
                Ok(("Answer generated!", JobOutput::Text(answer)))
            }
            Work::Release { ticket } => {
                progress.stage("Closing the inference session...", 0);
                self.resources.release(ticket, progress).await?;
                Ok(("Inference finished!", JobOutput::Code(MODEL_RELEASED)))
            }
        }
    }
}
