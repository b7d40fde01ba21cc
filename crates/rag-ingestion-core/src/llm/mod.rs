//! LLM Gateway (spec.md §4.4, component C4).
//!
//! Unified `embed`/`generate` across four providers, including the
//! OpenRouter document-caching paths for Claude (explicit `cache_control`)
//! and Gemini 2.5 (implicit prefix caching). Grounded in the teacher's
//! `embedding::LlamaServerManager` (`embed`/`embed_single` trait shape) and
//! `rag-api-server::services::llm_service::LlmService` (reqwest client with
//! a timeout, provider-specific request building) — generalized from one
//! local llama-server endpoint to the four-provider dispatch spec.md
//! requires.

mod anthropic;
mod google;
mod openai;
mod openrouter;

use crate::config::{EmbeddingProvider, Settings, TextProvider};
use crate::error::ProviderCallError;
use std::time::Duration;

/// Result of an embedding call.
#[derive(Debug, Clone)]
pub struct EmbedResult {
    pub vector: Vec<f32>,
    pub token_usage: Option<u32>,
}

/// Options accepted by `generate`.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Pre-extracted (or caller-supplied) document text for OpenRouter's
    /// cache-aware paths. When `None`, the gateway auto-detects a
    /// `<document>...</document>` span in the prompt unless
    /// `disable_auto_cache` is set.
    pub cache_document: Option<String>,
    pub disable_auto_cache: bool,
}

/// Usage/cache metrics surfaced from an OpenRouter call, per spec.md §4.4
/// ("request `usage.include` so cache-hit metrics... can be logged").
#[derive(Debug, Clone, Default)]
pub struct GenerateUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub cache_tokens: Option<u32>,
    pub cache_discount: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub usage: GenerateUsage,
}

pub struct Gateway {
    client: reqwest::Client,
    settings: Settings,
}

impl Gateway {
    pub fn new(settings: Settings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self { client, settings }
    }

    /// Embed(text) → {vector, tokenUsage}. Dispatches on `EMBEDDING_PROVIDER`.
    pub async fn embed(&self, text: &str) -> Result<EmbedResult, ProviderCallError> {
        match self.settings.embedding.provider {
            EmbeddingProvider::OpenAi => openai::embed(&self.client, &self.settings.embedding, text).await,
            EmbeddingProvider::Google => google::embed(&self.client, &self.settings.embedding, text).await,
        }
        .map_err(wrap_provider_context("embed"))
    }

    /// Generate(prompt, system?, opts?) → text. Dispatches on `TEXT_PROVIDER`.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        opts: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderCallError> {
        let text_cfg = self.settings.text.as_ref().ok_or_else(|| {
            ProviderCallError::Transient("generate() called without a configured TEXT_PROVIDER".into())
        })?;

        match text_cfg.provider {
            TextProvider::OpenAi => openai::generate(&self.client, text_cfg, prompt, system).await,
            TextProvider::Anthropic => anthropic::generate(&self.client, text_cfg, prompt, system).await,
            TextProvider::Google => google::generate(&self.client, text_cfg, prompt, system).await,
            TextProvider::OpenRouter => {
                openrouter::generate(&self.client, text_cfg, prompt, system, opts).await
            }
        }
    }
}

fn wrap_provider_context(op: &'static str) -> impl Fn(ProviderCallError) -> ProviderCallError {
    move |err| match err {
        ProviderCallError::RateLimited { retry_after_secs } => {
            ProviderCallError::RateLimited { retry_after_secs }
        }
        ProviderCallError::Transient(msg) => ProviderCallError::Transient(format!("{op}: {msg}")),
    }
}

/// Extracts the `<document>...</document>` span from a prompt for
/// auto-detected OpenRouter caching (spec.md §4.4).
pub(crate) fn extract_document_tag(prompt: &str) -> Option<String> {
    let start_tag = "<document>";
    let end_tag = "</document>";
    let start = prompt.find(start_tag)? + start_tag.len();
    let end = prompt[start..].find(end_tag)? + start;
    Some(prompt[start..end].to_string())
}

pub(crate) fn retry_after_from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_document_tag_contents() {
        let prompt = "before <document>the doc body</document> after";
        assert_eq!(extract_document_tag(prompt).as_deref(), Some("the doc body"));
    }

    #[test]
    fn returns_none_without_document_tag() {
        assert!(extract_document_tag("no tags here").is_none());
    }
}
