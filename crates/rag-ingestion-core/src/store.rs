//! Data model and storage contract (spec.md §3, §6 "Consumed from the
//! runtime host").
//!
//! Generalizes the teacher's `database::{models, repository}` — there keyed
//! by `i32` document ids against a fixed `rag_document_chunks` table — to
//! the UUID-keyed `Memory` record the host runtime hands the pipeline:
//! `documents` and `knowledge` are two logical tables sharing one `memories`
//! shape, distinguished by `metadata.type`. `PgMemoryStore` keeps the
//! teacher's `sqlx` + `pgvector` + transactional-upsert approach
//! (`Repository::insert_chunks`) generalized to that shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{IngestError, Result};

pub const TABLE_DOCUMENTS: &str = "documents";
pub const TABLE_KNOWLEDGE: &str = "knowledge";

/// A single memory record as the host runtime's adapter understands it:
/// both Documents and Fragments ("knowledge") are stored under this shape,
/// distinguished by `metadata["type"]` (spec.md §3).
#[derive(Debug, Clone)]
pub struct Memory {
    pub id: Uuid,
    pub table_name: String,
    pub content_text: String,
    pub embedding: Option<Vec<f32>>,
    pub agent_id: Uuid,
    pub room_id: Uuid,
    pub world_id: Uuid,
    pub entity_id: Uuid,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

pub struct NewDocument {
    pub id: Uuid,
    pub content_type: String,
    pub original_filename: String,
    pub file_size: u64,
    pub stored_text: String,
    pub title: String,
    pub file_ext: String,
    pub agent_id: Uuid,
    pub room_id: Uuid,
    pub world_id: Uuid,
    pub entity_id: Uuid,
}

pub struct NewFragment {
    pub document_id: Uuid,
    pub position: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub agent_id: Uuid,
    pub room_id: Uuid,
    pub world_id: Uuid,
    pub entity_id: Uuid,
    pub source: String,
}

/// The runtime-host capability the pipeline depends on (spec.md §6): a
/// typed memory store plus a declared embedding dimension. Treated as an
/// external collaborator — this trait is the seam, `PgMemoryStore` one
/// possible implementation of it.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get_memory_by_id(&self, id: Uuid) -> Result<Option<Memory>>;
    async fn get_memories(&self, table_name: &str, entity_id: Option<Uuid>) -> Result<Vec<Memory>>;
    async fn create_document(&self, document: NewDocument) -> Result<Uuid>;
    async fn create_fragment(&self, fragment: NewFragment) -> Result<Uuid>;
    async fn count_fragments(&self, document_id: Uuid) -> Result<usize>;
    async fn ensure_embedding_dimension(&self, dimension: usize) -> Result<()>;
}

pub struct PgMemoryStore {
    pool: PgPool,
}

impl PgMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn get_memory_by_id(&self, id: Uuid) -> Result<Option<Memory>> {
        let row = sqlx::query_as::<_, MemoryRow>(
            r#"SELECT id, table_name, content_text, embedding, agent_id, room_id,
                      world_id, entity_id, metadata, created_at
               FROM memories WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_memories(&self, table_name: &str, entity_id: Option<Uuid>) -> Result<Vec<Memory>> {
        let rows = match entity_id {
            Some(entity_id) => {
                sqlx::query_as::<_, MemoryRow>(
                    r#"SELECT id, table_name, content_text, embedding, agent_id, room_id,
                              world_id, entity_id, metadata, created_at
                       FROM memories WHERE table_name = $1 AND entity_id = $2"#,
                )
                .bind(table_name)
                .bind(entity_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MemoryRow>(
                    r#"SELECT id, table_name, content_text, embedding, agent_id, room_id,
                              world_id, entity_id, metadata, created_at
                       FROM memories WHERE table_name = $1"#,
                )
                .bind(table_name)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_document(&self, document: NewDocument) -> Result<Uuid> {
        let metadata = serde_json::json!({
            "type": "document",
            "documentId": document.id,
            "title": document.title,
            "fileExt": document.file_ext,
            "source": "rag-service-main-upload",
            "timestamp": Utc::now(),
        });

        sqlx::query(
            r#"INSERT INTO memories
                   (id, table_name, content_text, embedding, agent_id, room_id,
                    world_id, entity_id, metadata, created_at)
               VALUES ($1, $2, $3, NULL, $4, $5, $6, $7, $8, now())
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(document.id)
        .bind(TABLE_DOCUMENTS)
        .bind(&document.stored_text)
        .bind(document.agent_id)
        .bind(document.room_id)
        .bind(document.world_id)
        .bind(document.entity_id)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(document.id)
    }

    async fn create_fragment(&self, fragment: NewFragment) -> Result<Uuid> {
        if fragment.embedding.is_empty() {
            return Err(IngestError::ZeroVector);
        }

        let id = Uuid::new_v4();
        let metadata = serde_json::json!({
            "type": "fragment",
            "documentId": fragment.document_id,
            "position": fragment.position,
            "timestamp": Utc::now(),
            "source": fragment.source,
        });
        let embedding = Vector::from(fragment.embedding);

        sqlx::query(
            r#"INSERT INTO memories
                   (id, table_name, content_text, embedding, agent_id, room_id,
                    world_id, entity_id, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())"#,
        )
        .bind(id)
        .bind(TABLE_KNOWLEDGE)
        .bind(&fragment.text)
        .bind(embedding)
        .bind(fragment.agent_id)
        .bind(fragment.room_id)
        .bind(fragment.world_id)
        .bind(fragment.entity_id)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn count_fragments(&self, document_id: Uuid) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT count(*) FROM memories
               WHERE table_name = $1
                 AND metadata->>'type' = 'fragment'
                 AND (metadata->>'documentId')::uuid = $2"#,
        )
        .bind(TABLE_KNOWLEDGE)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as usize)
    }

    async fn ensure_embedding_dimension(&self, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(IngestError::WorkerInitFailure(
                "embedding dimension probe returned a non-positive length".into(),
            ));
        }
        // pgvector columns are declared with a fixed dimension at schema
        // creation time; here we only validate the bootstrap probe, mirroring
        // the teacher's settings validation rather than altering the schema
        // live.
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: Uuid,
    table_name: String,
    content_text: String,
    embedding: Option<Vector>,
    agent_id: Uuid,
    room_id: Uuid,
    world_id: Uuid,
    entity_id: Uuid,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl From<MemoryRow> for Memory {
    fn from(row: MemoryRow) -> Self {
        Memory {
            id: row.id,
            table_name: row.table_name,
            content_text: row.content_text,
            embedding: row.embedding.map(|v| v.to_vec()),
            agent_id: row.agent_id,
            room_id: row.room_id,
            world_id: row.world_id,
            entity_id: row.entity_id,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_metadata_table_names_match_spec_constants() {
        assert_eq!(TABLE_DOCUMENTS, "documents");
        assert_eq!(TABLE_KNOWLEDGE, "knowledge");
    }
}
