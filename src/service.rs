//! Job service: wires the registry, resource manager, dispatcher, status
//! aggregator and reaper into one handle shared by the HTTP layer.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::ModelBackend;
use crate::config::ServiceConfig;
use crate::error::ValidationError;
use crate::jobs::{
    Dispatcher, DispatcherConfig, JobId, JobRegistry, JobRequest, RegistrySummary,
    StatusAggregator, StatusReport, spawn_reaper,
};
use crate::resource::{ResourceManager, ResourcePhase};

pub struct JobService {
    registry: Arc<JobRegistry>,
    resources: Arc<ResourceManager>,
    dispatcher: Arc<Dispatcher>,
    status: StatusAggregator,
    backend_name: String,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl JobService {
    /// Start the worker pool and the reaper. Must run inside a Tokio runtime.
    pub fn start(config: &ServiceConfig, backend: Arc<dyn ModelBackend>) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::new(config.progress_capacity));
        let resources = Arc::new(ResourceManager::new(Arc::clone(&backend)));
        let dispatcher = Dispatcher::start(
            DispatcherConfig::from(config),
            Arc::clone(&registry),
            Arc::clone(&resources),
            Arc::clone(&backend),
        );
        let reaper = spawn_reaper(Arc::clone(&registry), config.reap_interval, config.retention);

        info!(
            backend = backend.name(),
            workers = config.workers,
            retention_secs = config.retention.as_secs(),
            "Job service started"
        );

        Arc::new(Self {
            status: StatusAggregator::new(Arc::clone(&registry)),
            registry,
            resources,
            dispatcher,
            backend_name: backend.name().to_string(),
            reaper: Mutex::new(Some(reaper)),
        })
    }

    pub async fn submit(&self, request: JobRequest) -> Result<JobId, ValidationError> {
        self.dispatcher.submit(request).await
    }

    /// Status of a job; unknown ids read as not yet started.
    pub async fn status(&self, id: JobId) -> StatusReport {
        self.status.status(id).await
    }

    pub async fn lookup(&self, id: JobId) -> Option<StatusReport> {
        self.status.lookup(id).await
    }

    /// Wait for a job to end and return its final status. Unknown ids return
    /// the placeholder immediately.
    pub async fn wait(&self, id: JobId) -> StatusReport {
        if let Ok(handle) = self.registry.get(id).await {
            handle.wait_terminal().await;
        }
        self.status.status(id).await
    }

    pub fn resource_phase(&self) -> ResourcePhase {
        self.resources.phase()
    }

    /// Resource operations reserved but not yet completed.
    pub fn queued_operations(&self) -> u64 {
        self.resources.queued()
    }

    pub async fn loaded_model(&self) -> Option<String> {
        self.resources.loaded_model().await
    }

    pub async fn summary(&self) -> RegistrySummary {
        self.registry.summary().await
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Stop the reaper, then drain the worker pool.
    pub async fn shutdown(&self) {
        let reaper = self.reaper.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(reaper) = reaper {
            reaper.abort();
        }
        self.dispatcher.shutdown().await;
        info!("Job service stopped");
    }
}
