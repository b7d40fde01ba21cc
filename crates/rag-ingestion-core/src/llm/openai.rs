//! OpenAI-compatible embedding and chat-completion calls.
//!
//! Request/response shapes follow `other_examples`'s `OpenAiCompatibleProvider`
//! (`/embeddings` body, OpenAI-format JSON response, 429 handled specially)
//! generalized to also cover `/chat/completions` for `TEXT_PROVIDER=openai`.

use super::{retry_after_from_headers, EmbedResult, GenerateResult, GenerateUsage};
use crate::config::{EmbeddingConfig, TextConfig};
use crate::error::ProviderCallError;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub async fn embed(
    client: &reqwest::Client,
    cfg: &EmbeddingConfig,
    text: &str,
) -> Result<EmbedResult, ProviderCallError> {
    let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{base_url}/embeddings");

    let mut body = json!({
        "model": cfg.model,
        "input": text,
    });
    if matches!(cfg.model.as_str(), "text-embedding-3-small" | "text-embedding-3-large") {
        body["dimensions"] = json!(cfg.dimension);
    }

    let resp = client
        .post(url)
        .bearer_auth(&cfg.api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderCallError::Transient(e.to_string()))?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = retry_after_from_headers(resp.headers());
        return Err(ProviderCallError::RateLimited { retry_after_secs });
    }
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(ProviderCallError::Transient(format!(
            "openai embeddings returned {status}: {text}"
        )));
    }

    let parsed: EmbeddingsResponse = resp
        .json()
        .await
        .map_err(|e| ProviderCallError::Transient(format!("decoding embeddings response: {e}")))?;

    let vector = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| ProviderCallError::Transient("embeddings response had no data".into()))?;

    Ok(EmbedResult {
        vector,
        token_usage: parsed.usage.map(|u| u.total_tokens),
    })
}

pub async fn generate(
    client: &reqwest::Client,
    cfg: &TextConfig,
    prompt: &str,
    system: Option<&str>,
) -> Result<GenerateResult, ProviderCallError> {
    let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{base_url}/chat/completions");

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let body = json!({
        "model": cfg.model,
        "messages": messages,
        "max_tokens": cfg.max_output_tokens,
        "temperature": 0.3,
    });

    let resp = client
        .post(url)
        .bearer_auth(&cfg.api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderCallError::Transient(e.to_string()))?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = retry_after_from_headers(resp.headers());
        return Err(ProviderCallError::RateLimited { retry_after_secs });
    }
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(ProviderCallError::Transient(format!(
            "openai chat completions returned {status}: {text}"
        )));
    }

    let parsed: ChatCompletionResponse = resp
        .json()
        .await
        .map_err(|e| ProviderCallError::Transient(format!("decoding chat completion: {e}")))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| ProviderCallError::Transient("chat completion had no choices".into()))?;

    Ok(GenerateResult {
        text,
        usage: GenerateUsage {
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
            cache_tokens: None,
            cache_discount: None,
        },
    })
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
    usage: Option<EmbeddingsUsage>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingsUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
