//! Ingestion Orchestrator (spec.md §4.9, component C9).
//!
//! End-to-end per-document pipeline: idempotency check, extract, store
//! document memory, chunk, enrich, embed, persist fragments. Grounded in
//! the teacher's `DocumentService::process_upload` (detect → parse → chunk
//! → batch-embed → save, with per-batch progress reporting) — generalized
//! from a single-tenant Postgres document table to the UUID-keyed
//! `MemoryStore` capability spec.md §6 names, and from plain embedding
//! batches to enrich-then-embed batches gated by the rate limiter.

use crate::chunker::Chunker;
use crate::enrich::{self, ChunkInput};
use crate::error::{IngestError, Result};
use crate::extract;
use crate::llm::Gateway;
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use crate::retry::with_rate_limit_retry;
use crate::store::{MemoryStore, NewDocument, NewFragment};
use base64::Engine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const FRAGMENT_SOURCE: &str = "rag-ingestion-pipeline";
const INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

const BINARY_MIME_PREFIXES: &[&str] = &["image/", "audio/", "video/"];
const BINARY_MIME_EXACT: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/zip",
    "application/octet-stream",
];
const BINARY_MIME_CONTAINS: &[&str] = &["wordprocessingml"];
const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "jpg", "jpeg", "png", "gif", "mp3",
    "mp4", "wav",
];

fn is_binary(content_type: &str, filename: &str) -> bool {
    let content_type = content_type.to_lowercase();
    if BINARY_MIME_PREFIXES.iter().any(|p| content_type.starts_with(p)) {
        return true;
    }
    if BINARY_MIME_EXACT.contains(&content_type.as_str()) {
        return true;
    }
    if BINARY_MIME_CONTAINS.iter().any(|c| content_type.contains(c)) {
        return true;
    }
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    BINARY_EXTENSIONS.contains(&ext.as_str())
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub client_document_id: Uuid,
    pub content_type: String,
    pub original_filename: String,
    /// Raw text for text content, base64 for binary content per `is_binary`.
    pub content: String,
    pub world_id: Uuid,
    pub room_id: Uuid,
    pub entity_id: Uuid,
    pub agent_id: Uuid,
    /// Overrides the default 500/100 token chunk target (spec.md §4.6).
    /// The character knowledge loader (C11) passes 1500/200 here, per
    /// spec.md §4.11 step 4.
    pub chunk_target_tokens: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub client_document_id: Uuid,
    pub stored_document_memory_id: Uuid,
    pub fragment_count: usize,
}

pub struct Orchestrator {
    store: Arc<dyn MemoryStore>,
    gateway: Arc<Gateway>,
    rate_limiter: Arc<RateLimiter>,
    settings: crate::config::Settings,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        gateway: Arc<Gateway>,
        settings: crate::config::Settings,
        metrics: Metrics,
    ) -> Self {
        let rate_limiter = RateLimiter::new(settings.rate_limits.requests_per_minute);
        Self { store, gateway, rate_limiter, settings, metrics }
    }

    pub async fn ingest(&self, options: IngestOptions) -> Result<IngestResult> {
        let started = Instant::now();

        // 1. Idempotency check (spec.md §4.9 step 1).
        if let Some(existing) = self.store.get_memory_by_id(options.client_document_id).await? {
            if existing.metadata.get("type").and_then(|v| v.as_str()) == Some("document") {
                let count = self.store.count_fragments(options.client_document_id).await?;
                info!(
                    document_id = %options.client_document_id,
                    fragment_count = count,
                    "document already ingested, skipping re-processing"
                );
                return Ok(IngestResult {
                    client_document_id: options.client_document_id,
                    stored_document_memory_id: options.client_document_id,
                    fragment_count: count,
                });
            }
        }

        let result = self.ingest_new(&options).await;
        self.metrics.add_ingest_time(started.elapsed());
        match &result {
            Ok(_) => self.metrics.incr_documents_ingested(),
            Err(_) => self.metrics.incr_documents_failed(),
        }
        result
    }

    async fn ingest_new(&self, options: &IngestOptions) -> Result<IngestResult> {
        // 2. Binary classification + 3. Extract.
        let binary = is_binary(&options.content_type, &options.original_filename);
        let extracted_text = if binary {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&options.content)
                .map_err(|e| IngestError::UnsupportedContent(format!("invalid base64: {e}")))?;
            extract::extract(&bytes, &options.content_type, &options.original_filename)?
        } else {
            options.content.clone()
        };

        if extracted_text.trim().is_empty() {
            return Err(IngestError::NoTextExtracted);
        }

        // 4. Store document memory. PDFs keep the original base64 as the
        // stored text so downstream UIs can re-render the original bytes;
        // everything else stores the extracted text (spec.md §3).
        let stored_text = if options.content_type.to_lowercase() == "application/pdf" {
            options.content.clone()
        } else {
            extracted_text.clone()
        };

        let file_ext = options
            .original_filename
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_string();

        self.store
            .create_document(NewDocument {
                id: options.client_document_id,
                content_type: options.content_type.clone(),
                original_filename: options.original_filename.clone(),
                file_size: options.content.len() as u64,
                stored_text,
                title: options.original_filename.clone(),
                file_ext,
                agent_id: options.agent_id,
                room_id: options.room_id,
                world_id: options.world_id,
                entity_id: options.entity_id,
            })
            .await?;

        // 5. Chunk.
        let chunker = match options.chunk_target_tokens {
            Some((size, overlap)) => Chunker::new(size, overlap),
            None => Chunker::default(),
        };
        let chunks = chunker.chunk(&extracted_text);
        self.metrics.add_chunks_created(chunks.len() as u64);

        // 6. Enrich + embed + persist, in batches of K = min(30, provider
        // max_concurrent_requests).
        let batch_size = self.settings.rate_limits.max_concurrent_requests.min(30).max(1);
        let mut saved_count = 0usize;
        let mut failed_count = 0usize;

        for batch in chunks.chunks(batch_size) {
            let inputs: Vec<ChunkInput> = batch
                .iter()
                .map(|c| ChunkInput { position: c.position, text: c.content.clone() })
                .collect();

            let enriched = enrich::enrich_batch(
                &self.gateway,
                &self.rate_limiter,
                &self.settings,
                &inputs,
                &options.content_type,
                &extracted_text,
            )
            .await;

            for chunk in enriched {
                if !chunk.success {
                    self.metrics.incr_enrichment_fallback();
                }

                self.rate_limiter.acquire().await;
                let embed_result = with_rate_limit_retry(
                    || self.gateway.embed(&chunk.text),
                    "embed_fragment",
                )
                .await;

                let vector = match embed_result {
                    Ok(r) if !r.vector.is_empty() => r.vector,
                    Ok(_) => {
                        warn!(position = chunk.position, "embedding returned a zero-length vector, skipping fragment");
                        failed_count += 1;
                        continue;
                    }
                    Err(err) => {
                        warn!(position = chunk.position, error = %err, "embedding failed, skipping fragment");
                        failed_count += 1;
                        continue;
                    }
                };
                self.metrics.add_embeddings_generated(1);

                let persisted = self
                    .store
                    .create_fragment(NewFragment {
                        document_id: options.client_document_id,
                        position: chunk.position,
                        text: chunk.text,
                        embedding: vector,
                        agent_id: options.agent_id,
                        room_id: options.room_id,
                        world_id: options.world_id,
                        entity_id: options.entity_id,
                        source: FRAGMENT_SOURCE.to_string(),
                    })
                    .await;

                match persisted {
                    Ok(_) => saved_count += 1,
                    Err(err) => {
                        warn!(position = chunk.position, error = %err, "failed to persist fragment");
                        failed_count += 1;
                    }
                }
            }

            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }

        self.metrics.add_fragments_persisted(saved_count as u64);
        if failed_count > 0 {
            self.metrics.add_fragments_failed(failed_count as u64);
            warn!(
                document_id = %options.client_document_id,
                failed_count,
                "ingestion completed with failed fragments"
            );
        }

        Ok(IngestResult {
            client_document_id: options.client_document_id,
            stored_document_memory_id: options.client_document_id,
            fragment_count: saved_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_extension_and_mime_are_binary() {
        assert!(is_binary("application/pdf", "a.pdf"));
        assert!(is_binary("application/octet-stream", "a.bin"));
        assert!(is_binary("image/png", "a.png"));
        assert!(is_binary(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "a.docx"
        ));
    }

    #[test]
    fn markdown_and_plain_text_are_not_binary() {
        assert!(!is_binary("text/markdown", "a.md"));
        assert!(!is_binary("text/plain", "a.txt"));
    }

    #[test]
    fn unrecognized_mime_falls_back_to_extension() {
        assert!(is_binary("application/x-unknown", "photo.jpg"));
        assert!(!is_binary("application/x-unknown", "notes.md"));
    }
}
