//! Worker Pool Manager (spec.md §4.10, component C10).
//!
//! One long-lived worker per `agentId`, created on demand. Routes a single
//! `PdfMainDocumentStored` or `ProcessingError` to the pending callback
//! registered for its `documentId`, then unregisters it — exactly once, per
//! spec.md §4.10. Grounded in the teacher's process-wide `Worker`/
//! `TaskQueue` split (`worker/mod.rs`, `worker/queue.rs`) generalized from
//! one shared worker to a registry keyed by agent, per spec.md §9's
//! "process-wide registry with well-defined init/teardown... tests must be
//! able to construct a pool with an injected spawner".

use crate::messages::{HostMessage, WorkerMessage};
use crate::worker::{self, StoreFactory};
use rag_ingestion_core::Settings;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

enum PendingOutcome {
    PdfMainDocumentStored { stored_document_memory_id: Option<Uuid>, error: Option<String> },
    KnowledgeAdded { count: usize },
    ProcessingError { error: String },
}

struct WorkerEntry {
    tx: mpsc::Sender<HostMessage>,
    ready_result: Result<(), String>,
}

/// Host-side registry of per-agent workers. Mutated only by the manager
/// (spec.md §5 "Shared-resource policy").
pub struct WorkerPoolManager {
    settings: Settings,
    store_factory: StoreFactory,
    workers: Mutex<HashMap<Uuid, WorkerEntry>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<PendingOutcome>>>,
}

impl WorkerPoolManager {
    pub fn new(settings: Settings, store_factory: StoreFactory) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store_factory,
            workers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns a worker for `agent_id` if one doesn't already exist, and
    /// awaits its readiness handshake (spec.md §4.10 "ensureWorkerIsReady").
    pub async fn ensure_worker_is_ready(self: &Arc<Self>, agent_id: Uuid) -> Result<(), String> {
        {
            let workers = self.workers.lock().await;
            if let Some(entry) = workers.get(&agent_id) {
                return entry.ready_result.clone();
            }
        }

        self.spawn_worker(agent_id).await
    }

    async fn spawn_worker(self: &Arc<Self>, agent_id: Uuid) -> Result<(), String> {
        let (host_tx, host_rx) = mpsc::channel::<WorkerMessage>(CHANNEL_CAPACITY);
        let (worker_tx, worker_rx) = mpsc::channel::<HostMessage>(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        let settings = self.settings.clone();
        let store_factory = self.store_factory.clone();
        tokio::spawn(async move {
            worker::run(agent_id, settings, store_factory, worker_rx, host_tx).await;
        });

        let pool = self.clone();
        tokio::spawn(async move {
            pool.route_messages(agent_id, host_rx, ready_tx).await;
        });

        let _ = worker_tx.send(HostMessage::InitDbAdapter).await;

        let result = ready_rx
            .await
            .unwrap_or_else(|_| Err("worker task dropped before signaling readiness".to_string()));

        let mut workers = self.workers.lock().await;
        if result.is_ok() {
            workers.insert(agent_id, WorkerEntry { tx: worker_tx, ready_result: Ok(()) });
        } else {
            workers.remove(&agent_id);
        }

        result
    }

    /// Drains `WorkerMessage`s for one worker, routing `WorkerReady` into
    /// the handshake future and everything else to whatever pending
    /// callback is registered for its `documentId` (spec.md §4.10).
    async fn route_messages(
        self: Arc<Self>,
        agent_id: Uuid,
        mut host_rx: mpsc::Receiver<WorkerMessage>,
        ready_tx: oneshot::Sender<Result<(), String>>,
    ) {
        let mut ready_tx = Some(ready_tx);

        while let Some(message) = host_rx.recv().await {
            match message {
                WorkerMessage::WorkerReady { agent_id } => {
                    info!(%agent_id, "worker ready");
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                WorkerMessage::WorkerError { agent_id, error, .. } => {
                    warn!(%agent_id, %error, "worker reported an unrecoverable error");
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(error.clone()));
                    }
                    self.workers.lock().await.remove(&agent_id);
                    break;
                }
                WorkerMessage::PdfMainDocumentStored { client_document_id, stored_document_memory_id, error } => {
                    self.resolve_pending(
                        client_document_id,
                        PendingOutcome::PdfMainDocumentStored { stored_document_memory_id, error },
                    )
                    .await;
                }
                WorkerMessage::KnowledgeAdded { document_id, count, .. } => {
                    self.resolve_pending(document_id, PendingOutcome::KnowledgeAdded { count }).await;
                }
                WorkerMessage::ProcessingError { document_id, error, .. } => {
                    self.resolve_pending(document_id, PendingOutcome::ProcessingError { error }).await;
                }
            }
        }

        // Channel closed without an explicit WorkerError: treat as a dropped
        // worker (spec.md §4.10 "Worker exit or error drops the worker from
        // the pool and rejects the ready promise").
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(format!("worker for agent {agent_id} exited before becoming ready")));
        }
        self.workers.lock().await.remove(&agent_id);
    }

    async fn resolve_pending(&self, document_id: Uuid, outcome: PendingOutcome) {
        let sender = self.pending.lock().await.remove(&document_id);
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }

    /// Registers a one-shot callback for `document_id`, forwards
    /// `PROCESS_PDF_THEN_FRAGMENTS` to the agent's worker (spawning it if
    /// necessary), and awaits the single routed response.
    pub async fn process_pdf_then_fragments(
        self: &Arc<Self>,
        agent_id: Uuid,
        client_document_id: Uuid,
        file_content_b64: String,
        content_type: String,
        original_filename: String,
        world_id: Uuid,
    ) -> Result<(Option<Uuid>, Option<String>), String> {
        self.ensure_worker_is_ready(agent_id).await?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(client_document_id, tx);

        let worker_tx = {
            let workers = self.workers.lock().await;
            workers
                .get(&agent_id)
                .map(|e| e.tx.clone())
                .ok_or_else(|| format!("no worker registered for agent {agent_id}"))?
        };

        worker_tx
            .send(HostMessage::ProcessPdfThenFragments {
                client_document_id,
                file_content_b64,
                content_type,
                original_filename,
                world_id,
            })
            .await
            .map_err(|e| e.to_string())?;

        match rx.await {
            Ok(PendingOutcome::PdfMainDocumentStored { stored_document_memory_id, error }) => {
                Ok((stored_document_memory_id, error))
            }
            Ok(PendingOutcome::ProcessingError { error }) => Err(error),
            Ok(PendingOutcome::KnowledgeAdded { .. }) => {
                Err("received KnowledgeAdded before PdfMainDocumentStored".to_string())
            }
            Err(_) => Err("worker dropped the pending callback before responding".to_string()),
        }
    }

    /// Forwards `PROCESS_DOCUMENT` and awaits the routed `KnowledgeAdded`
    /// or `ProcessingError` response.
    pub async fn process_document(
        self: &Arc<Self>,
        agent_id: Uuid,
        document_id: Uuid,
        file_content_b64: String,
        content_type: String,
        original_filename: String,
        world_id: Uuid,
        room_id: Uuid,
        entity_id: Uuid,
    ) -> Result<usize, String> {
        self.ensure_worker_is_ready(agent_id).await?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(document_id, tx);

        let worker_tx = {
            let workers = self.workers.lock().await;
            workers
                .get(&agent_id)
                .map(|e| e.tx.clone())
                .ok_or_else(|| format!("no worker registered for agent {agent_id}"))?
        };

        worker_tx
            .send(HostMessage::ProcessDocument {
                document_id,
                file_content_b64,
                content_type,
                original_filename,
                world_id,
                room_id,
                entity_id,
            })
            .await
            .map_err(|e| e.to_string())?;

        match rx.await {
            Ok(PendingOutcome::KnowledgeAdded { count }) => Ok(count),
            Ok(PendingOutcome::ProcessingError { error }) => Err(error),
            Ok(PendingOutcome::PdfMainDocumentStored { error, .. }) => {
                Err(error.unwrap_or_else(|| "unexpected PdfMainDocumentStored response".to_string()))
            }
            Err(_) => Err("worker dropped the pending callback before responding".to_string()),
        }
    }

    /// Terminates every worker, closing their channels so in-flight
    /// operations abort abruptly per spec.md §5 ("a worker shutdown
    /// terminates in-flight operations abruptly").
    pub async fn terminate_all(&self) {
        let workers = self.workers.lock().await;
        for (agent_id, entry) in workers.iter() {
            info!(%agent_id, "terminating worker");
            let _ = entry.tx.send(HostMessage::Shutdown).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_ingestion_core::config::{EmbeddingConfig, EmbeddingProvider, RateLimitConfig};
    use rag_ingestion_core::error::Result;
    use rag_ingestion_core::store::{Memory, NewDocument, NewFragment};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStore {
        fragments: AtomicUsize,
    }

    #[async_trait]
    impl MemoryStore for FakeStore {
        async fn get_memory_by_id(&self, _id: Uuid) -> Result<Option<Memory>> {
            Ok(None)
        }
        async fn get_memories(&self, _table_name: &str, _entity_id: Option<Uuid>) -> Result<Vec<Memory>> {
            Ok(Vec::new())
        }
        async fn create_document(&self, document: NewDocument) -> Result<Uuid> {
            Ok(document.id)
        }
        async fn create_fragment(&self, _fragment: NewFragment) -> Result<Uuid> {
            self.fragments.fetch_add(1, Ordering::SeqCst);
            Ok(Uuid::new_v4())
        }
        async fn count_fragments(&self, _document_id: Uuid) -> Result<usize> {
            Ok(self.fragments.load(Ordering::SeqCst))
        }
        async fn ensure_embedding_dimension(&self, dimension: usize) -> Result<()> {
            if dimension == 0 {
                return Err(rag_ingestion_core::error::IngestError::WorkerInitFailure("zero dim".into()));
            }
            Ok(())
        }
    }

    use rag_ingestion_core::store::MemoryStore;

    fn test_settings() -> Settings {
        Settings {
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::OpenAi,
                model: "text-embedding-3-small".into(),
                dimension: 8,
                api_key: "sk-test".into(),
                base_url: None,
            },
            text: None,
            ctx_rag_enabled: false,
            rate_limits: RateLimitConfig {
                max_concurrent_requests: 5,
                requests_per_minute: 60,
                tokens_per_minute: 10_000,
            },
        }
    }

    #[test]
    fn store_factory_type_is_constructible() {
        // Smoke test that the StoreFactory alias composes the way worker.rs expects.
        let _factory: StoreFactory = Arc::new(|_agent_id: Uuid| {
            Box::pin(async move {
                let store: Arc<dyn MemoryStore> = Arc::new(FakeStore { fragments: AtomicUsize::new(0) });
                Ok(store)
            }) as futures::future::BoxFuture<'static, anyhow::Result<Arc<dyn MemoryStore>>>
        });
        let _settings = test_settings();
    }
}
