//! Per-agent worker state machine (spec.md §4.10).
//!
//! `starting → ready → (processing) → ready | terminating | failed`. Each
//! worker owns its own `MemoryStore` and `Orchestrator`, communicating with
//! the host exclusively over the `messages` channel pair — no shared
//! mutable state crosses that boundary, matching spec.md §9's "Shared
//! mutable state between host and worker is forbidden by design". Grounded
//! in the teacher's `Worker::run` main loop (`tokio::select!` over a
//! notification channel and a shutdown signal) — generalized from one
//! process-wide worker to one worker per agent.

use crate::messages::{HostMessage, WorkerMessage};
use futures::future::BoxFuture;
use rag_ingestion_core::llm::Gateway;
use rag_ingestion_core::metrics::Metrics;
use rag_ingestion_core::orchestrator::{IngestOptions, Orchestrator};
use rag_ingestion_core::store::MemoryStore;
use rag_ingestion_core::Settings;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Probe text for the dimension bootstrap (spec.md §4.10 step 3) — used
/// verbatim so the behavior is deterministic, per SPEC_FULL.md §C.2.
pub const DIMENSION_PROBE_TEXT: &str = "dimension_check_string";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Processing,
    Terminating,
    Failed,
}

/// Produces this worker's own `MemoryStore`, invoked from inside the
/// worker task itself (spec.md §4.10 step 2: "Worker initializes its own
/// database adapter").
pub type StoreFactory =
    Arc<dyn Fn(Uuid) -> BoxFuture<'static, anyhow::Result<Arc<dyn MemoryStore>>> + Send + Sync>;

pub struct WorkerHandle {
    pub agent_id: Uuid,
    pub tx: mpsc::Sender<HostMessage>,
}

/// Runs the startup handshake and message loop for one agent's worker.
/// Intended to be spawned as its own `tokio::task`.
pub async fn run(
    agent_id: Uuid,
    settings: Settings,
    store_factory: StoreFactory,
    mut rx: mpsc::Receiver<HostMessage>,
    host_tx: mpsc::Sender<WorkerMessage>,
) {
    let mut state = WorkerState::Starting;

    // Startup handshake: wait for INIT_DB_ADAPTER, then init store + probe
    // embedding dimension (spec.md §4.10 steps 1-4).
    match rx.recv().await {
        Some(HostMessage::InitDbAdapter) => {}
        Some(_) => {
            warn!(%agent_id, "worker received work before INIT_DB_ADAPTER, ignoring until init");
        }
        None => return,
    }

    let gateway = Arc::new(Gateway::new(settings.clone()));
    let store = match store_factory(agent_id).await {
        Ok(store) => store,
        Err(err) => {
            state = WorkerState::Failed;
            let _ = host_tx
                .send(WorkerMessage::WorkerError {
                    agent_id,
                    error: err.to_string(),
                    stack: None,
                })
                .await;
            error!(%agent_id, error = %err, ?state, "worker failed to initialize database adapter");
            return;
        }
    };

    let dimension = match gateway.embed(DIMENSION_PROBE_TEXT).await {
        Ok(result) => result.vector.len(),
        Err(err) => {
            state = WorkerState::Failed;
            let _ = host_tx
                .send(WorkerMessage::WorkerError {
                    agent_id,
                    error: err.to_string(),
                    stack: None,
                })
                .await;
            error!(%agent_id, error = %err, ?state, "worker dimension probe failed");
            return;
        }
    };

    if let Err(err) = store.ensure_embedding_dimension(dimension).await {
        state = WorkerState::Failed;
        let _ = host_tx
            .send(WorkerMessage::WorkerError {
                agent_id,
                error: err.to_string(),
                stack: None,
            })
            .await;
        error!(%agent_id, error = %err, ?state, "worker failed ensure_embedding_dimension");
        return;
    }

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        gateway,
        settings,
        Metrics::new(),
    ));

    state = WorkerState::Ready;
    if host_tx.send(WorkerMessage::WorkerReady { agent_id }).await.is_err() {
        // Host side dropped its receiver; nothing more to do.
        return;
    }
    info!(%agent_id, ?state, "worker ready");

    while let Some(message) = rx.recv().await {
        match message {
            HostMessage::InitDbAdapter => {
                warn!(%agent_id, "received redundant INIT_DB_ADAPTER after ready, ignoring");
            }
            HostMessage::Shutdown => {
                state = WorkerState::Terminating;
                info!(%agent_id, ?state, "worker shutting down");
                break;
            }
            HostMessage::ProcessDocument {
                document_id,
                file_content_b64,
                content_type,
                original_filename,
                world_id,
                room_id,
                entity_id,
            } => {
                state = WorkerState::Processing;
                let options = IngestOptions {
                    client_document_id: document_id,
                    content_type,
                    original_filename,
                    content: file_content_b64,
                    world_id,
                    room_id,
                    entity_id,
                    agent_id,
                    chunk_target_tokens: None,
                };

                match orchestrator.ingest(options).await {
                    Ok(result) => {
                        let _ = host_tx
                            .send(WorkerMessage::KnowledgeAdded {
                                document_id,
                                count: result.fragment_count,
                                agent_id,
                            })
                            .await;
                    }
                    Err(err) => {
                        let _ = host_tx
                            .send(WorkerMessage::ProcessingError {
                                document_id,
                                error: err.to_string(),
                                stack: None,
                                agent_id,
                            })
                            .await;
                    }
                }
                state = WorkerState::Ready;
            }
            HostMessage::ProcessPdfThenFragments {
                client_document_id,
                file_content_b64,
                content_type,
                original_filename,
                world_id,
            } => {
                state = WorkerState::Processing;
                let options = IngestOptions {
                    client_document_id,
                    content_type,
                    original_filename,
                    content: file_content_b64,
                    world_id,
                    room_id: agent_id,
                    entity_id: agent_id,
                    agent_id,
                    chunk_target_tokens: None,
                };

                match orchestrator.ingest(options).await {
                    Ok(result) => {
                        let _ = host_tx
                            .send(WorkerMessage::PdfMainDocumentStored {
                                client_document_id,
                                stored_document_memory_id: Some(result.stored_document_memory_id),
                                error: None,
                            })
                            .await;
                        let _ = host_tx
                            .send(WorkerMessage::KnowledgeAdded {
                                document_id: client_document_id,
                                count: result.fragment_count,
                                agent_id,
                            })
                            .await;
                    }
                    Err(err) => {
                        let _ = host_tx
                            .send(WorkerMessage::PdfMainDocumentStored {
                                client_document_id,
                                stored_document_memory_id: None,
                                error: Some(err.to_string()),
                            })
                            .await;
                    }
                }
                state = WorkerState::Ready;
            }
        }
    }

    info!(%agent_id, ?state, "worker terminated");
}
