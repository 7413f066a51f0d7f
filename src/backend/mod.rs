//! Model backend: the opaque collaborator that downloads, adjusts and runs
//! models.
//!
//! The job core never looks inside a backend. It hands over typed input and a
//! [`ProgressReporter`] for staged updates, and gets back a result or a
//! [`BackendError`].

pub mod simulated;

pub use simulated::SimulatedBackend;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::jobs::ProgressReporter;

/// A loaded text-generation pipeline.
#[async_trait]
pub trait TextPipeline: Send + Sync {
    /// Identifier of the model behind this pipeline.
    fn model_id(&self) -> &str;

    /// Generate a continuation of `prompt`. The returned text includes the
    /// prompt itself, as text-generation pipelines do.
    async fn generate(&mut self, prompt: &str) -> Result<String, BackendError>;
}

/// Input of an adjust (fine-tune) run.
#[derive(Debug, Clone)]
pub struct FineTuneRequest {
    /// Instruction-formatted training samples.
    pub samples: Vec<String>,
    /// Name the adjusted model is published under.
    pub output_model: String,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &str;

    /// Download `model` and assemble a generation pipeline around it.
    async fn load(
        &self,
        model: &str,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn TextPipeline>, BackendError>;

    /// Adjust a base model on `request.samples`, merge and publish it.
    async fn fine_tune(
        &self,
        request: FineTuneRequest,
        progress: &ProgressReporter,
    ) -> Result<(), BackendError>;

    /// Remove cached downloads and intermediate artifacts.
    async fn purge_cache(&self) -> Result<(), BackendError>;
}
