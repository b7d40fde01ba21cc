//! Character Knowledge Loader (spec.md §4.11, component C11).
//!
//! On service start, enqueues character-supplied knowledge strings through
//! the orchestrator (C9) under a bounded semaphore, deduplicated by a
//! deterministic content hash so restarts are idempotent (spec.md §9 open
//! question: "two `generateScopedId`-style approaches... here we require
//! deterministic hashing"). Grounded in the teacher's `BulkIndexer::run`
//! batch-over-documents loop and `utils::limiters::Limiters` semaphore
//! pattern — generalized from a DB-backed unprocessed-document scan to an
//! in-memory list of character knowledge strings.

use crate::orchestrator::{IngestOptions, Orchestrator};
use crate::store::MemoryStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

const KNOWLEDGE_SEMAPHORE_PERMITS: usize = 10;
/// Distinct from document ingestion's 500/100 target — character facts are
/// typically small but deserve their own fragments (spec.md §4.11 step 4).
const KNOWLEDGE_CHUNK_SIZE_TOKENS: usize = 1500;
const KNOWLEDGE_CHUNK_OVERLAP_TOKENS: usize = 200;

#[derive(Debug, Clone)]
struct ParsedKnowledgePath {
    path: String,
    filename: String,
    file_ext: String,
}

/// Parses the `Path: <filepath>\n` convention (spec.md §4.11 step 3).
fn parse_path_prefix(item: &str) -> Option<ParsedKnowledgePath> {
    let rest = item.strip_prefix("Path: ")?;
    let (path, _) = rest.split_once('\n')?;
    let path = path.trim().to_string();
    let filename = path.rsplit('/').next().unwrap_or(&path).to_string();
    let file_ext = filename.rsplit('.').next().unwrap_or("").to_string();
    Some(ParsedKnowledgePath { path, filename, file_ext })
}

/// Deterministic knowledge id so reprocessing across restarts is
/// idempotent (spec.md §4.11 step 1).
fn knowledge_id(agent_id: Uuid, item: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(item.as_bytes());
    let digest = hasher.finalize();
    Uuid::from_slice(&digest[..16]).expect("sha256 digest is at least 16 bytes")
}

/// Loads `character.knowledge` strings for `agent_id` through the
/// orchestrator's ingestion path, bounded by a 10-permit semaphore,
/// deduplicated by content hash. Runs asynchronously; failures are logged,
/// never propagated, so they cannot block service startup (spec.md §4.11).
pub async fn load(
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn MemoryStore>,
    agent_id: Uuid,
    knowledge_items: Vec<String>,
) {
    let semaphore = Arc::new(Semaphore::new(KNOWLEDGE_SEMAPHORE_PERMITS));
    let mut handles = Vec::with_capacity(knowledge_items.len());

    for item in knowledge_items {
        let semaphore = semaphore.clone();
        let orchestrator = orchestrator.clone();
        let store = store.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            load_one(orchestrator, store, agent_id, item).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn load_one(orchestrator: Arc<Orchestrator>, store: Arc<dyn MemoryStore>, agent_id: Uuid, item: String) {
    let id = knowledge_id(agent_id, &item);

    match store.get_memory_by_id(id).await {
        Ok(Some(_)) => {
            info!(knowledge_id = %id, "character knowledge already exists, skipping");
            return;
        }
        Ok(None) => {}
        Err(err) => {
            warn!(knowledge_id = %id, error = %err, "failed to check character knowledge existence");
            return;
        }
    }

    let parsed = parse_path_prefix(&item);
    let (content_type, filename) = match &parsed {
        Some(p) => (format!("text/{}", p.file_ext), p.filename.clone()),
        None => ("text/plain".to_string(), format!("character-knowledge-{id}")),
    };

    let options = IngestOptions {
        client_document_id: id,
        content_type,
        original_filename: filename,
        content: item,
        world_id: agent_id,
        room_id: agent_id,
        entity_id: agent_id,
        agent_id,
        chunk_target_tokens: Some(default_chunk_targets()),
    };

    match orchestrator.ingest(options).await {
        Ok(result) => {
            info!(
                knowledge_id = %id,
                fragment_count = result.fragment_count,
                "loaded character knowledge"
            );
        }
        Err(err) => {
            warn!(knowledge_id = %id, error = %err, "failed to load character knowledge");
        }
    }
}

pub const fn default_chunk_targets() -> (usize, usize) {
    (KNOWLEDGE_CHUNK_SIZE_TOKENS, KNOWLEDGE_CHUNK_OVERLAP_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_prefixed_knowledge() {
        let item = "Path: docs/lore/kingdom.md\nThe kingdom was founded in...";
        let parsed = parse_path_prefix(item).unwrap();
        assert_eq!(parsed.path, "docs/lore/kingdom.md");
        assert_eq!(parsed.filename, "kingdom.md");
        assert_eq!(parsed.file_ext, "md");
    }

    #[test]
    fn plain_knowledge_has_no_path_prefix() {
        assert!(parse_path_prefix("Just a fact about the world.").is_none());
    }

    #[test]
    fn knowledge_id_is_deterministic() {
        let agent_id = Uuid::new_v4();
        let item = "some character fact";
        assert_eq!(knowledge_id(agent_id, item), knowledge_id(agent_id, item));
    }

    #[test]
    fn knowledge_id_differs_per_item() {
        let agent_id = Uuid::new_v4();
        assert_ne!(knowledge_id(agent_id, "fact one"), knowledge_id(agent_id, "fact two"));
    }
}
