//! Anthropic Messages API calls for `TEXT_PROVIDER=anthropic` (no embedding
//! support — Anthropic does not offer an embeddings endpoint, so this
//! provider is only ever reached from `Gateway::generate`).

use super::{retry_after_from_headers, GenerateResult, GenerateUsage};
use crate::config::TextConfig;
use crate::error::ProviderCallError;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub async fn generate(
    client: &reqwest::Client,
    cfg: &TextConfig,
    prompt: &str,
    system: Option<&str>,
) -> Result<GenerateResult, ProviderCallError> {
    let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{base_url}/messages");

    let mut body = json!({
        "model": cfg.model,
        "max_tokens": cfg.max_output_tokens,
        "temperature": 0.3,
        "messages": [{"role": "user", "content": prompt}],
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }

    let resp = client
        .post(url)
        .header("x-api-key", &cfg.api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
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
            "anthropic messages returned {status}: {text}"
        )));
    }

    let parsed: MessagesResponse = resp
        .json()
        .await
        .map_err(|e| ProviderCallError::Transient(format!("decoding messages response: {e}")))?;

    let text = parsed
        .content
        .into_iter()
        .find_map(|block| block.text)
        .ok_or_else(|| ProviderCallError::Transient("messages response had no text block".into()))?;

    Ok(GenerateResult {
        text,
        usage: GenerateUsage {
            prompt_tokens: parsed.usage.as_ref().map(|u| u.input_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.output_tokens),
            cache_tokens: parsed
                .usage
                .as_ref()
                .and_then(|u| u.cache_read_input_tokens),
            cache_discount: None,
        },
    })
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
    cache_read_input_tokens: Option<u32>,
}
