//! LLM integration.
//!
//! A single backend today: Anthropic's Messages API over `reqwest`. Callers
//! only see the [`LlmProvider`] trait so tests can substitute a stub.

pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use provider::*;

use std::sync::Arc;

use secrecy::SecretString;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    /// Override for the Messages endpoint.
    pub url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    let mut provider = AnthropicProvider::new(config.api_key.clone(), &config.model);
    if let Some(url) = &config.url {
        provider = provider.with_url(url);
    }
    tracing::info!("Using Anthropic (model: {})", config.model);
    Arc::new(provider)
}
