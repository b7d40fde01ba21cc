//! Configuration resolver (spec.md §4.1, component C1).
//!
//! Layers `config::Config` over `dotenvy`, the way the teacher's
//! `rag-embedding-worker/src/config/settings.rs` does: an optional
//! `config/settings` file source, overridden by an `Environment` source,
//! deserialized into a flat `RawSettings` record and then validated into
//! the typed `Settings` the rest of the pipeline consumes. Unlike the
//! teacher's own domain config (nested structs reached via an `APP__`
//! prefix and `__` separator), the values this component reads are the
//! provider-standard flat names spec.md §4.1 enumerates verbatim
//! (`OPENAI_API_KEY`, `EMBEDDING_PROVIDER`, ...), so no prefix is applied
//! and `RawSettings` has no nesting that would need a separator.

use crate::error::{IngestError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Google,
}

impl EmbeddingProvider {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "google" => Ok(Self::Google),
            other => Err(IngestError::ConfigInvalid(format!(
                "unknown EMBEDDING_PROVIDER: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextProvider {
    OpenAi,
    Anthropic,
    OpenRouter,
    Google,
}

impl TextProvider {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "openrouter" => Ok(Self::OpenRouter),
            "google" => Ok(Self::Google),
            other => Err(IngestError::ConfigInvalid(format!(
                "unknown TEXT_PROVIDER: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimension: usize,
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TextConfig {
    pub provider: TextProvider,
    pub model: String,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Rate-limit knobs, clamped by provider-specific ceilings (spec.md §4.1).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_concurrent_requests: usize,
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub embedding: EmbeddingConfig,
    pub text: Option<TextConfig>,
    pub ctx_rag_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

/// The config-crate-deserialized shape of everything spec.md §4.1 names,
/// before provider-combination validation. Every field is optional because
/// `config::Environment` only populates keys that are actually set in the
/// process environment (or the optional settings file).
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    embedding_provider: Option<String>,
    text_provider: Option<String>,
    text_model: Option<String>,
    text_embedding_model: Option<String>,
    openai_embedding_model: Option<String>,
    openai_embedding_dimensions: Option<usize>,
    embedding_dimension: Option<usize>,
    openai_api_key: Option<String>,
    anthropic_api_key: Option<String>,
    openrouter_api_key: Option<String>,
    google_api_key: Option<String>,
    openai_base_url: Option<String>,
    anthropic_base_url: Option<String>,
    openrouter_base_url: Option<String>,
    google_base_url: Option<String>,
    ctx_rag_enabled: Option<bool>,
    max_input_tokens: Option<usize>,
    max_output_tokens: Option<usize>,
    max_concurrent_requests: Option<usize>,
    requests_per_minute: Option<u32>,
    tokens_per_minute: Option<u32>,
}

impl Settings {
    /// Loads configuration the way the teacher's `Settings::load()` does:
    /// an optional `config/settings` file, overridden by the process
    /// environment (`dotenvy` populates it first from a local `.env`),
    /// merged by `config::Config` and deserialized into `RawSettings`.
    /// Fails fast with a specific `ConfigInvalid` error on any inconsistent
    /// combination (spec.md §4.1).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(Environment::default().try_parsing(true))
            .build()
            .map_err(|e| IngestError::ConfigInvalid(format!("loading configuration: {e}")))?;

        let raw: RawSettings = config
            .try_deserialize()
            .map_err(|e| IngestError::ConfigInvalid(format!("parsing configuration: {e}")))?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let embedding_provider = match raw.embedding_provider.as_deref() {
            Some(p) => EmbeddingProvider::parse(p)?,
            None => EmbeddingProvider::OpenAi,
        };

        let embedding_model_default = match embedding_provider {
            EmbeddingProvider::OpenAi => "text-embedding-3-small",
            EmbeddingProvider::Google => "text-embedding-004",
        };
        let mut embedding_model = raw.text_embedding_model.clone();
        if embedding_model.is_none() && embedding_provider == EmbeddingProvider::OpenAi {
            // §4.1: absent EMBEDDING_PROVIDER falls back to OPENAI_EMBEDDING_MODEL too.
            embedding_model = raw.openai_embedding_model.clone();
        }
        let embedding_model = embedding_model.unwrap_or_else(|| embedding_model_default.to_string());

        let dimension = raw
            .embedding_dimension
            .or(raw.openai_embedding_dimensions)
            .unwrap_or(1536);

        let (embedding_api_key, embedding_api_key_name) = match embedding_provider {
            EmbeddingProvider::OpenAi => (raw.openai_api_key.clone(), "OPENAI_API_KEY"),
            EmbeddingProvider::Google => (raw.google_api_key.clone(), "GOOGLE_API_KEY"),
        };
        let embedding_api_key = embedding_api_key.ok_or_else(|| {
            IngestError::ConfigInvalid(format!(
                "embedding provider {embedding_provider:?} selected but {embedding_api_key_name} is not set"
            ))
        })?;

        let embedding_base_url = match embedding_provider {
            EmbeddingProvider::OpenAi => raw.openai_base_url.clone(),
            EmbeddingProvider::Google => raw.google_base_url.clone(),
        };

        let embedding = EmbeddingConfig {
            provider: embedding_provider,
            model: embedding_model,
            dimension,
            api_key: embedding_api_key,
            base_url: embedding_base_url,
        };

        let ctx_rag_enabled = raw.ctx_rag_enabled.unwrap_or(false);

        let max_input_tokens = raw.max_input_tokens.unwrap_or(4000);
        let max_output_tokens = raw.max_output_tokens.unwrap_or(4096);

        let text = match raw.text_provider.as_deref() {
            Some(p) => {
                let provider = TextProvider::parse(p)?;
                let model = raw.text_model.clone().ok_or_else(|| {
                    IngestError::ConfigInvalid("TEXT_PROVIDER set but TEXT_MODEL is missing".into())
                })?;
                let (api_key, api_key_name) = match provider {
                    TextProvider::OpenAi => (raw.openai_api_key.clone(), "OPENAI_API_KEY"),
                    TextProvider::Anthropic => (raw.anthropic_api_key.clone(), "ANTHROPIC_API_KEY"),
                    TextProvider::OpenRouter => (raw.openrouter_api_key.clone(), "OPENROUTER_API_KEY"),
                    TextProvider::Google => (raw.google_api_key.clone(), "GOOGLE_API_KEY"),
                };
                let api_key = api_key.ok_or_else(|| {
                    IngestError::ConfigInvalid(format!(
                        "text provider {provider:?} selected but {api_key_name} is not set"
                    ))
                })?;
                let base_url = match provider {
                    TextProvider::OpenAi => raw.openai_base_url.clone(),
                    TextProvider::Anthropic => raw.anthropic_base_url.clone(),
                    TextProvider::OpenRouter => raw.openrouter_base_url.clone(),
                    TextProvider::Google => raw.google_base_url.clone(),
                };
                Some(TextConfig {
                    provider,
                    model,
                    max_input_tokens,
                    max_output_tokens,
                    api_key,
                    base_url,
                })
            }
            None => {
                if ctx_rag_enabled {
                    return Err(IngestError::ConfigInvalid(
                        "CTX_RAG_ENABLED=true requires TEXT_PROVIDER to be set".into(),
                    ));
                }
                None
            }
        };

        if ctx_rag_enabled && text.is_none() {
            return Err(IngestError::ConfigInvalid(
                "CTX_RAG_ENABLED=true requires a text provider/model".into(),
            ));
        }

        let mut max_concurrent_requests = raw.max_concurrent_requests.unwrap_or(30);
        let mut requests_per_minute = raw.requests_per_minute.unwrap_or(60);
        let mut tokens_per_minute = raw.tokens_per_minute.unwrap_or(150_000);

        // Provider-specific ceilings (spec.md §4.1).
        match embedding_provider {
            EmbeddingProvider::OpenAi => {
                requests_per_minute = requests_per_minute.min(3000);
                tokens_per_minute = tokens_per_minute.min(150_000);
            }
            EmbeddingProvider::Google => {
                requests_per_minute = requests_per_minute.min(60);
                tokens_per_minute = tokens_per_minute.min(100_000);
            }
        }
        max_concurrent_requests = max_concurrent_requests.min(30);

        Ok(Self {
            embedding,
            text,
            ctx_rag_enabled,
            rate_limits: RateLimitConfig {
                max_concurrent_requests,
                requests_per_minute,
                tokens_per_minute,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_rag_env() {
        for key in [
            "EMBEDDING_PROVIDER",
            "TEXT_PROVIDER",
            "TEXT_MODEL",
            "TEXT_EMBEDDING_MODEL",
            "OPENAI_EMBEDDING_MODEL",
            "OPENAI_EMBEDDING_DIMENSIONS",
            "EMBEDDING_DIMENSION",
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
            "OPENROUTER_API_KEY",
            "GOOGLE_API_KEY",
            "CTX_RAG_ENABLED",
            "MAX_CONCURRENT_REQUESTS",
            "REQUESTS_PER_MINUTE",
            "TOKENS_PER_MINUTE",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_to_openai_embeddings_with_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_rag_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");

        let settings = Settings::load().unwrap();
        assert_eq!(settings.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(settings.embedding.dimension, 1536);
        assert!(!settings.ctx_rag_enabled);
        assert!(settings.text.is_none());
        clear_rag_env();
    }

    #[test]
    fn missing_embedding_key_is_config_invalid() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_rag_env();

        let err = Settings::load().unwrap_err();
        assert!(matches!(err, IngestError::ConfigInvalid(_)));
        clear_rag_env();
    }

    #[test]
    fn ctx_rag_without_text_provider_is_config_invalid() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_rag_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("CTX_RAG_ENABLED", "true");

        let err = Settings::load().unwrap_err();
        assert!(matches!(err, IngestError::ConfigInvalid(_)));
        clear_rag_env();
    }

    #[test]
    fn google_rate_limits_are_clamped() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_rag_env();
        std::env::set_var("EMBEDDING_PROVIDER", "google");
        std::env::set_var("GOOGLE_API_KEY", "g-test");
        std::env::set_var("REQUESTS_PER_MINUTE", "1000");
        std::env::set_var("TOKENS_PER_MINUTE", "1000000");

        let settings = Settings::load().unwrap();
        assert_eq!(settings.rate_limits.requests_per_minute, 60);
        assert_eq!(settings.rate_limits.tokens_per_minute, 100_000);
        clear_rag_env();
    }
}
