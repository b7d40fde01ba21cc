use anyhow::Result;
use rag_ingestion_core::store::PgMemoryStore;
use rag_ingestion_core::Settings;
use rag_worker::WorkerPoolManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info};

/// No HTTP surface ships with this binary (spec.md §1 non-goal: auth,
/// plugin discovery, and the HTTP surface stay external). This process
/// embeds the worker pool manager exactly the way a host runtime would —
/// connecting a shared Postgres pool, handing each worker its own
/// `MemoryStore`, and exposing `process_document`/`process_pdf_then_fragments`
/// as the host-facing API spec.md §6 describes.
#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = rag_ingestion_core::logging::init("logs")?;
    info!("starting rag-worker");

    let settings = Settings::load()?;
    info!("configuration loaded");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new().max_connections(10).connect(&database_url).await?;
    info!("database connection pool established");

    let store_factory: rag_worker::StoreFactory = {
        let pool = pool.clone();
        Arc::new(move |agent_id: uuid::Uuid| {
            let pool = pool.clone();
            Box::pin(async move {
                info!(%agent_id, "initializing worker database adapter");
                let store: Arc<dyn rag_ingestion_core::store::MemoryStore> =
                    Arc::new(PgMemoryStore::new(pool));
                Ok(store)
            })
        })
    };

    let manager = WorkerPoolManager::new(settings, store_factory);
    info!("worker pool manager ready");

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, terminating workers");
    manager.terminate_all().await;
    pool.close().await;
    info!("rag-worker stopped");

    Ok(())
}
