//! In-process backend that walks through the same stages as a real one with
//! a configurable pause, so the service can run without an ML runtime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{FineTuneRequest, ModelBackend, TextPipeline};
use crate::error::BackendError;
use crate::jobs::ProgressReporter;
use crate::prompt::{EOS_MARKER, RESPONSE_MARKER};

/// Backend that simulates downloads, training and generation.
pub struct SimulatedBackend {
    stage_delay: Duration,
    unavailable: HashSet<String>,
    purges: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new(stage_delay: Duration) -> Self {
        Self {
            stage_delay,
            unavailable: HashSet::new(),
            purges: AtomicUsize::new(0),
        }
    }

    /// Make downloads of `model` fail.
    pub fn with_unavailable(mut self, model: impl Into<String>) -> Self {
        self.unavailable.insert(model.into());
        self
    }

    /// Number of cache purges performed so far.
    pub fn purge_count(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.stage_delay.is_zero() {
            tokio::time::sleep(self.stage_delay).await;
        }
    }
}

#[async_trait]
impl ModelBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn load(
        &self,
        model: &str,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn TextPipeline>, BackendError> {
        progress.stage("Downloading the selected model...", 10);
        self.pause().await;
        if self.unavailable.contains(model) {
            return Err(BackendError::Download {
                model: model.to_string(),
                reason: "repository not found".to_string(),
            });
        }

        progress.stage("Preparing the conversation pipeline...", 80);
        self.pause().await;

        info!(model, "Simulated pipeline ready");
        Ok(Box::new(SimulatedPipeline {
            model_id: model.to_string(),
        }))
    }

    async fn fine_tune(
        &self,
        request: FineTuneRequest,
        progress: &ProgressReporter,
    ) -> Result<(), BackendError> {
        if request.samples.is_empty() {
            return Err(BackendError::Training("no training samples".to_string()));
        }

        progress.stage("Downloading the base model...", 30);
        self.pause().await;
        progress.stage("Adjusting the parameters...", 40);
        self.pause().await;
        progress.stage("Merging the parameters...", 70);
        self.pause().await;
        progress.stage("Publishing the adjusted model...", 90);
        self.pause().await;

        info!(
            samples = request.samples.len(),
            output_model = %request.output_model,
            "Simulated fine-tune published"
        );
        Ok(())
    }

    async fn purge_cache(&self) -> Result<(), BackendError> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Pipeline that answers by restating the question.
struct SimulatedPipeline {
    model_id: String,
}

#[async_trait]
impl TextPipeline for SimulatedPipeline {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&mut self, prompt: &str) -> Result<String, BackendError> {
        let question = prompt
            .rsplit("### Input:")
            .next()
            .and_then(|tail| tail.split(RESPONSE_MARKER).next())
            .map(str::trim)
            .unwrap_or_default();

        let mut text = prompt.to_string();
        if !prompt.contains(RESPONSE_MARKER) {
            text.push_str(RESPONSE_MARKER);
            text.push('\n');
        }
        text.push_str(&format!("{} received: {question}", self.model_id));
        text.push_str(EOS_MARKER);
        Ok(text)
    }
}
