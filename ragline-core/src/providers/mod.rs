//! Concrete [`LlmProvider`] backends.
//!
//! Gemini is the only hosted backend the pipeline currently targets;
//! [`create_provider`] picks between it and the offline mock based on
//! configuration.

pub mod gemini;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::{LlmProvider, MockLlmProvider};
use std::sync::Arc;

pub use gemini::GeminiProvider;

/// Instantiate the configured provider.
///
/// `"gemini"` builds a [`GeminiProvider`], `"mock"` a [`MockLlmProvider`];
/// anything else is `LlmError::UnsupportedProvider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}
