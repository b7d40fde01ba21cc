//! Host ↔ worker message protocol (spec.md §4.10 table).
//!
//! Modeled as a typed enum pair over `tokio::mpsc` channels rather than the
//! teacher's `worker_threads`-style string-tagged postMessage payloads —
//! spec.md §9 calls for "isolated execution contexts... communicating
//! exclusively via typed messages", and Rust's enums give us that for free
//! without a serialization boundary, since host and worker share a process
//! (spec.md §9's "OS threads, goroutines-in-subprocesses, or actual
//! sub-processes" is satisfied here by per-agent tokio tasks, DESIGN.md).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host → worker.
#[derive(Debug, Clone)]
pub enum HostMessage {
    InitDbAdapter,
    ProcessDocument {
        document_id: Uuid,
        file_content_b64: String,
        content_type: String,
        original_filename: String,
        world_id: Uuid,
        room_id: Uuid,
        entity_id: Uuid,
    },
    ProcessPdfThenFragments {
        client_document_id: Uuid,
        file_content_b64: String,
        content_type: String,
        original_filename: String,
        world_id: Uuid,
    },
    Shutdown,
}

/// Worker → host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    WorkerReady {
        agent_id: Uuid,
    },
    WorkerError {
        agent_id: Uuid,
        error: String,
        stack: Option<String>,
    },
    PdfMainDocumentStored {
        client_document_id: Uuid,
        stored_document_memory_id: Option<Uuid>,
        error: Option<String>,
    },
    KnowledgeAdded {
        document_id: Uuid,
        count: usize,
        agent_id: Uuid,
    },
    ProcessingError {
        document_id: Uuid,
        error: String,
        stack: Option<String>,
        agent_id: Uuid,
    },
}
