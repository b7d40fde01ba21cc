//! Contextual Enricher (spec.md §4.8, component C8).
//!
//! Drives the prompt builder (C7) and LLM gateway (C4) across a batch of
//! chunks under the rate limiter (C2) and retrier (C3), verifying that
//! enrichment preserves the original chunk verbatim (spec.md §3 invariant
//! 3). Grounded in the teacher's `document_service::process_upload` batched
//! embedding loop (`texts.chunks(batch_size)` with per-batch progress) —
//! generalized here from an embedding batch to a contextualization batch
//! run concurrently via `futures::future::join_all`.

use crate::config::{Settings, TextProvider};
use crate::llm::{Gateway, GenerateOptions};
use crate::prompt;
use crate::rate_limiter::RateLimiter;
use crate::retry::with_rate_limit_retry;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub position: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EnrichedChunk {
    pub position: usize,
    pub text: String,
    pub success: bool,
}

/// Whether the active text provider/model benefits from a cache-friendly
/// prompt split (Claude or Gemini via OpenRouter, spec.md §4.8 step 1).
fn wants_cache_friendly_prompt(settings: &Settings) -> bool {
    match &settings.text {
        Some(cfg) if cfg.provider == TextProvider::OpenRouter => {
            let lower = cfg.model.to_lowercase();
            lower.contains("claude") || lower.contains("gemini")
        }
        _ => false,
    }
}

/// Enriches a batch of chunks concurrently, returning one `EnrichedChunk`
/// per input, order-independent but each carrying its original `position`
/// so the caller can reassemble order (spec.md §4.8 "Ordering").
pub async fn enrich_batch(
    gateway: &Gateway,
    rate_limiter: &Arc<RateLimiter>,
    settings: &Settings,
    chunks: &[ChunkInput],
    content_type: &str,
    full_document_text: &str,
) -> Vec<EnrichedChunk> {
    if !settings.ctx_rag_enabled {
        return chunks
            .iter()
            .map(|c| EnrichedChunk { position: c.position, text: c.text.clone(), success: true })
            .collect();
    }

    let cache_friendly = wants_cache_friendly_prompt(settings);
    let futures = chunks.iter().map(|chunk| {
        enrich_one(gateway, rate_limiter, chunk, content_type, full_document_text, cache_friendly)
    });
    futures::future::join_all(futures).await
}

async fn enrich_one(
    gateway: &Gateway,
    rate_limiter: &Arc<RateLimiter>,
    chunk: &ChunkInput,
    content_type: &str,
    full_document_text: &str,
    cache_friendly: bool,
) -> EnrichedChunk {
    let built = prompt::build(&chunk.text, content_type, Some(full_document_text), cache_friendly);
    if built.is_error() {
        return EnrichedChunk { position: chunk.position, text: chunk.text.clone(), success: false };
    }

    rate_limiter.acquire().await;

    let (prompt_text, system_prompt, opts) = match &built {
        prompt::BuiltPrompt::Inline { prompt } => (prompt.clone(), None, GenerateOptions::default()),
        prompt::BuiltPrompt::CacheFriendly { system_prompt, prompt, document } => (
            prompt.clone(),
            Some(system_prompt.clone()),
            GenerateOptions { cache_document: Some(document.clone()), disable_auto_cache: false },
        ),
    };

    let result = with_rate_limit_retry(
        || gateway.generate(&prompt_text, system_prompt.as_deref(), &opts),
        "contextual_enrich",
    )
    .await;

    match result {
        Ok(generated) => {
            let text = repair_if_divergent(&generated.text, &chunk.text);
            EnrichedChunk { position: chunk.position, text, success: true }
        }
        Err(err) => {
            warn!(position = chunk.position, error = %err, "contextual enrichment failed, falling back to raw chunk");
            EnrichedChunk { position: chunk.position, text: chunk.text.clone(), success: false }
        }
    }
}

/// Enforces spec.md §3 invariant 3: the raw chunk must appear as a
/// contiguous substring of the enriched text. If the LLM's return doesn't
/// contain it, repair by prepending the LLM text to the raw chunk,
/// separated by a blank line, so the invariant holds without discarding
/// whatever context the model did produce.
fn repair_if_divergent(enriched: &str, raw_chunk: &str) -> String {
    if enriched.contains(raw_chunk) {
        enriched.to_string()
    } else {
        format!("{enriched}\n\n{raw_chunk}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_is_noop_when_chunk_already_contained() {
        let enriched = "Some context. Original chunk text here.";
        assert_eq!(repair_if_divergent(enriched, "Original chunk text here."), enriched);
    }

    #[test]
    fn repair_prepends_when_chunk_missing() {
        let enriched = "Some unrelated context.";
        let repaired = repair_if_divergent(enriched, "The raw chunk.");
        assert!(repaired.contains("The raw chunk."));
        assert!(repaired.starts_with("Some unrelated context."));
        assert!(repaired.ends_with("The raw chunk."));
    }

    #[tokio::test]
    async fn ctx_rag_disabled_short_circuits_to_raw_chunks() {
        let settings = test_settings(false);
        let gateway = Gateway::new(settings.clone());
        let limiter = RateLimiter::new(60);
        let chunks = vec![
            ChunkInput { position: 0, text: "alpha".into() },
            ChunkInput { position: 1, text: "beta".into() },
        ];

        let out = enrich_batch(&gateway, &limiter, &settings, &chunks, "text/plain", "full doc").await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.success));
        assert_eq!(out[0].text, "alpha");
        assert_eq!(out[1].text, "beta");
    }

    fn test_settings(ctx_rag_enabled: bool) -> Settings {
        use crate::config::{EmbeddingConfig, EmbeddingProvider, RateLimitConfig};
        Settings {
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::OpenAi,
                model: "text-embedding-3-small".into(),
                dimension: 1536,
                api_key: "sk-test".into(),
                base_url: None,
            },
            text: None,
            ctx_rag_enabled,
            rate_limits: RateLimitConfig {
                max_concurrent_requests: 30,
                requests_per_minute: 60,
                tokens_per_minute: 150_000,
            },
        }
    }
}
