// Translation layer
//
// - model: the Gemini client behind the `TranslationModel` trait
// - manager: the resumable, rate-limited book translation loop

pub mod manager;
pub mod model;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use manager::TranslationManager;
pub use model::GeminiModel;

use crate::config::TranslateConfig;
use crate::error::Result;

/// A text generation backend.
#[async_trait]
pub trait TranslationModel: Send + Sync {
    /// Model name used for rate-limit bookkeeping
    fn name(&self) -> &str;

    /// Number of requests allowed in flight at once
    fn batch_size(&self) -> usize;

    /// Send one prompt and return the generated text
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The three models a book translation uses.
#[derive(Clone)]
pub struct ModelSet {
    pub primary: Arc<dyn TranslationModel>,
    pub retry: Arc<dyn TranslationModel>,
    pub cleanup: Arc<dyn TranslationModel>,
}

impl ModelSet {
    pub fn new(
        primary: Arc<dyn TranslationModel>,
        retry: Arc<dyn TranslationModel>,
        cleanup: Arc<dyn TranslationModel>,
    ) -> Self {
        Self {
            primary,
            retry,
            cleanup,
        }
    }

    pub fn select(&self, is_retry: bool) -> &Arc<dyn TranslationModel> {
        if is_retry { &self.retry } else { &self.primary }
    }
}

/// Factory for the Gemini-backed model set
pub struct ModelFactory;

impl ModelFactory {
    /// Build the model set from config; fails when the API key is missing.
    pub fn create_models(config: &TranslateConfig) -> Result<ModelSet> {
        let api_key = config.api_key()?;
        info!(
            "Using models: primary={}, retry={}, cleanup={}",
            config.model, config.retry_model, config.cleanup_model
        );

        Ok(ModelSet::new(
            Arc::new(GeminiModel::new(config, &config.model, &api_key)?),
            Arc::new(GeminiModel::new(config, &config.retry_model, &api_key)?),
            Arc::new(GeminiModel::new(config, &config.cleanup_model, &api_key)?),
        ))
    }
}
