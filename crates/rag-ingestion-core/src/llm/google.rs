//! Google Generative Language API calls (`EMBEDDING_PROVIDER=google`,
//! `TEXT_PROVIDER=google`).
//!
//! Per spec.md §4.4, the Google path sets `GOOGLE_GENERATIVE_AI_API_KEY` in
//! the process environment before each call — a concession to Google's own
//! SDKs discovering credentials that way — rather than threading the key
//! through the request builder like the other three providers. Carried
//! through here unchanged (see spec.md §8, REDESIGN FLAGS, for the noted
//! cleaner alternative this deliberately does not take).

use super::{retry_after_from_headers, EmbedResult, GenerateResult, GenerateUsage};
use crate::config::{EmbeddingConfig, TextConfig};
use crate::error::ProviderCallError;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

fn propagate_key(api_key: &str) {
    std::env::set_var("GOOGLE_GENERATIVE_AI_API_KEY", api_key);
}

pub async fn embed(
    client: &reqwest::Client,
    cfg: &EmbeddingConfig,
    text: &str,
) -> Result<EmbedResult, ProviderCallError> {
    propagate_key(&cfg.api_key);

    let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let model = &cfg.model;
    let url = format!("{base_url}/models/{model}:embedContent?key={}", cfg.api_key);

    let body = json!({
        "model": format!("models/{model}"),
        "content": { "parts": [{ "text": text }] },
    });

    let resp = client
        .post(url)
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
            "google embedContent returned {status}: {text}"
        )));
    }

    let parsed: EmbedContentResponse = resp
        .json()
        .await
        .map_err(|e| ProviderCallError::Transient(format!("decoding embedContent response: {e}")))?;

    Ok(EmbedResult {
        vector: parsed.embedding.values,
        token_usage: None,
    })
}

pub async fn generate(
    client: &reqwest::Client,
    cfg: &TextConfig,
    prompt: &str,
    system: Option<&str>,
) -> Result<GenerateResult, ProviderCallError> {
    propagate_key(&cfg.api_key);

    let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let model = &cfg.model;
    let url = format!("{base_url}/models/{model}:generateContent?key={}", cfg.api_key);

    let mut body = json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": 0.3,
            "maxOutputTokens": cfg.max_output_tokens,
        },
    });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    let resp = client
        .post(url)
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
            "google generateContent returned {status}: {text}"
        )));
    }

    let parsed: GenerateContentResponse = resp
        .json()
        .await
        .map_err(|e| ProviderCallError::Transient(format!("decoding generateContent response: {e}")))?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| ProviderCallError::Transient("generateContent returned no candidates".into()))?;

    Ok(GenerateResult {
        text,
        usage: GenerateUsage {
            prompt_tokens: parsed.usage_metadata.as_ref().map(|u| u.prompt_token_count),
            completion_tokens: parsed
                .usage_metadata
                .as_ref()
                .map(|u| u.candidates_token_count),
            cache_tokens: parsed
                .usage_metadata
                .as_ref()
                .and_then(|u| u.cached_content_token_count),
            cache_discount: None,
        },
    })
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(rename = "cachedContentTokenCount")]
    cached_content_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagate_key_sets_the_env_var_the_sdk_reads() {
        propagate_key("test-google-key");
        assert_eq!(
            std::env::var("GOOGLE_GENERATIVE_AI_API_KEY").unwrap(),
            "test-google-key"
        );
    }
}
