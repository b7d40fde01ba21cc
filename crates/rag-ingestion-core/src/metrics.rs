//! In-process metrics (SPEC_FULL.md §B ambient stack).
//!
//! An atomics-based counter bundle grounded in the teacher's
//! `utils::metrics::Metrics` — the spec names no external metrics sink, but
//! ambient observability into documents/chunks/fragments/embeddings still
//! gets a home, the same shape the teacher exposes from its worker loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    documents_ingested: AtomicU64,
    documents_failed: AtomicU64,
    chunks_created: AtomicU64,
    fragments_persisted: AtomicU64,
    fragments_failed: AtomicU64,
    embeddings_generated: AtomicU64,
    enrichment_fallbacks: AtomicU64,
    total_ingest_time_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                documents_ingested: AtomicU64::new(0),
                documents_failed: AtomicU64::new(0),
                chunks_created: AtomicU64::new(0),
                fragments_persisted: AtomicU64::new(0),
                fragments_failed: AtomicU64::new(0),
                embeddings_generated: AtomicU64::new(0),
                enrichment_fallbacks: AtomicU64::new(0),
                total_ingest_time_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn incr_documents_ingested(&self) {
        self.inner.documents_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_documents_failed(&self) {
        self.inner.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chunks_created(&self, n: u64) {
        self.inner.chunks_created.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fragments_persisted(&self, n: u64) {
        self.inner.fragments_persisted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fragments_failed(&self, n: u64) {
        self.inner.fragments_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_embeddings_generated(&self, n: u64) {
        self.inner.embeddings_generated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_enrichment_fallback(&self) {
        self.inner.enrichment_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ingest_time(&self, d: Duration) {
        self.inner
            .total_ingest_time_ms
            .fetch_add(d.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn documents_ingested(&self) -> u64 {
        self.inner.documents_ingested.load(Ordering::Relaxed)
    }

    pub fn documents_failed(&self) -> u64 {
        self.inner.documents_failed.load(Ordering::Relaxed)
    }

    pub fn chunks_created(&self) -> u64 {
        self.inner.chunks_created.load(Ordering::Relaxed)
    }

    pub fn fragments_persisted(&self) -> u64 {
        self.inner.fragments_persisted.load(Ordering::Relaxed)
    }

    pub fn fragments_failed(&self) -> u64 {
        self.inner.fragments_failed.load(Ordering::Relaxed)
    }

    pub fn embeddings_generated(&self) -> u64 {
        self.inner.embeddings_generated.load(Ordering::Relaxed)
    }

    pub fn average_ingest_time_ms(&self) -> f64 {
        let n = self.documents_ingested();
        if n == 0 {
            return 0.0;
        }
        self.inner.total_ingest_time_ms.load(Ordering::Relaxed) as f64 / n as f64
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.incr_documents_ingested();
        m.incr_documents_ingested();
        m.add_chunks_created(5);
        assert_eq!(m.documents_ingested(), 2);
        assert_eq!(m.chunks_created(), 5);
    }

    #[test]
    fn average_ingest_time_is_zero_with_no_documents() {
        let m = Metrics::new();
        assert_eq!(m.average_ingest_time_ms(), 0.0);
    }
}
