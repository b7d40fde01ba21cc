use thiserror::Error;

/// Error taxonomy for the ingestion pipeline (spec.md §7).
///
/// Kinds map 1:1 onto the propagation policy: `ConfigInvalid` is fatal at
/// startup, `UnsupportedContent`/`NoTextExtracted` propagate to the caller,
/// everything else is absorbed per-chunk/per-fragment and only surfaces in
/// aggregate counts.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("no text extracted from document")]
    NoTextExtracted,

    #[error("document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    #[error("provider rate limited (retry_after={retry_after_secs:?})")]
    ProviderRateLimited { retry_after_secs: Option<u64> },

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("embedding vector was empty")]
    ZeroVector,

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("worker init failure: {0}")]
    WorkerInitFailure(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        IngestError::Unknown(err.to_string())
    }
}

/// Distinguishes a rate-limited provider response from any other transient
/// failure, so the retrier (C3) can decide whether a single retry applies.
/// Provider call sites return this instead of `IngestError` directly.
#[derive(Debug, Clone)]
pub enum ProviderCallError {
    RateLimited { retry_after_secs: Option<u64> },
    Transient(String),
}

impl std::fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited (retry_after={retry_after_secs:?})")
            }
            Self::Transient(msg) => write!(f, "{msg}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
