//! OpenRouter dispatch for `TEXT_PROVIDER=openrouter` (spec.md §4.4).
//!
//! OpenRouter fronts many model families behind one OpenAI-shaped chat
//! endpoint; the family is inferred from the model name so the gateway can
//! apply family-specific document-caching strategies. Grounded in the
//! teacher's `rag-api-server::services::llm_service::LlmService` (reqwest
//! client posting to a single chat-completions-shaped endpoint) and the
//! `OpenAiCompatibleProvider` in `other_examples` for response parsing.

use super::{extract_document_tag, retry_after_from_headers, GenerateOptions, GenerateResult, GenerateUsage};
use crate::config::TextConfig;
use crate::error::ProviderCallError;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

enum ModelFamily {
    Claude,
    Gemini,
    Other,
}

fn classify(model: &str) -> ModelFamily {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        ModelFamily::Claude
    } else if lower.contains("gemini") {
        ModelFamily::Gemini
    } else {
        ModelFamily::Other
    }
}

pub async fn generate(
    client: &reqwest::Client,
    cfg: &TextConfig,
    prompt: &str,
    system: Option<&str>,
    opts: &GenerateOptions,
) -> Result<GenerateResult, ProviderCallError> {
    let document = if opts.disable_auto_cache {
        opts.cache_document.clone()
    } else {
        opts.cache_document.clone().or_else(|| extract_document_tag(prompt))
    };

    let body = match (classify(&cfg.model), document) {
        (ModelFamily::Claude, Some(document)) => claude_cached_body(cfg, prompt, system, &document),
        (ModelFamily::Gemini, Some(document)) => gemini_cached_body(cfg, prompt, system, &document),
        _ => plain_body(cfg, prompt, system),
    };

    let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{base_url}/chat/completions");

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
            "openrouter chat completions returned {status}: {text}"
        )));
    }

    let parsed: ChatCompletionResponse = resp
        .json()
        .await
        .map_err(|e| ProviderCallError::Transient(format!("decoding openrouter response: {e}")))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| ProviderCallError::Transient("openrouter response had no choices".into()))?;

    Ok(GenerateResult {
        text,
        usage: GenerateUsage {
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
            cache_tokens: parsed
                .usage
                .as_ref()
                .and_then(|u| u.prompt_tokens_details.as_ref())
                .and_then(|d| d.cached_tokens),
            cache_discount: parsed.usage.as_ref().and_then(|u| u.cost_details.as_ref()).and_then(|c| c.upstream_inference_cache_discount),
        },
    })
}

/// Claude via OpenRouter: the question text accompanies the chunk; the
/// document segment carries `cache_control: {type: "ephemeral"}`, pinned
/// into the system turn when present, otherwise into the user turn ahead of
/// the question.
fn plain_text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

fn cached_text_block(text: &str) -> Value {
    json!({
        "type": "text",
        "text": text,
        "cache_control": { "type": "ephemeral" },
    })
}

fn claude_cached_body(cfg: &TextConfig, prompt: &str, system: Option<&str>, document: &str) -> Value {
    let question = prompt.replace(document, "").trim().to_string();
    let question = if question.is_empty() { prompt.to_string() } else { question };

    let messages = match system {
        Some(system) => {
            let system_content = vec![plain_text_block(system), cached_text_block(document)];
            vec![
                json!({ "role": "system", "content": system_content }),
                json!({ "role": "user", "content": question }),
            ]
        }
        None => {
            let user_content = vec![cached_text_block(document), plain_text_block(&question)];
            vec![json!({ "role": "user", "content": user_content })]
        }
    };

    json!({
        "model": cfg.model,
        "messages": messages,
        "temperature": 0.3,
        "max_tokens": cfg.max_output_tokens,
        "usage": { "include": true },
    })
}

/// Gemini via OpenRouter: deterministic single-string prompt so the
/// provider's implicit prefix-caching can recognize a repeated prefix
/// across calls sharing the same document.
fn gemini_cached_body(cfg: &TextConfig, prompt: &str, system: Option<&str>, document: &str) -> Value {
    let question = prompt.replace(document, "").trim().to_string();
    let question = if question.is_empty() { prompt.to_string() } else { question };
    let system = system.unwrap_or("");
    let combined = format!("{system}\n\n{document}\n\n{question}");

    json!({
        "model": cfg.model,
        "messages": [{ "role": "user", "content": combined }],
        "temperature": 0.3,
        "max_tokens": cfg.max_output_tokens,
        "usage": { "include": true },
    })
}

fn plain_body(cfg: &TextConfig, prompt: &str, system: Option<&str>) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));

    json!({
        "model": cfg.model,
        "messages": messages,
        "temperature": 0.3,
        "max_tokens": cfg.max_output_tokens,
        "usage": { "include": true },
    })
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
    prompt_tokens_details: Option<PromptTokensDetails>,
    cost_details: Option<CostDetails>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct CostDetails {
    upstream_inference_cache_discount: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_claude_model_names() {
        assert!(matches!(classify("anthropic/claude-3.5-sonnet"), ModelFamily::Claude));
    }

    #[test]
    fn classifies_gemini_model_names() {
        assert!(matches!(classify("google/gemini-2.5-pro"), ModelFamily::Gemini));
    }

    #[test]
    fn falls_back_to_other_family() {
        assert!(matches!(classify("meta-llama/llama-3.1-70b"), ModelFamily::Other));
    }

    #[test]
    fn claude_body_pins_document_in_system_turn_when_system_present() {
        let cfg = TextConfig {
            provider: crate::config::TextProvider::OpenRouter,
            model: "anthropic/claude-3.5-sonnet".into(),
            max_input_tokens: 4000,
            max_output_tokens: 1024,
            api_key: "key".into(),
            base_url: None,
        };
        let body = claude_cached_body(&cfg, "What is X?", Some("You are helpful."), "doc text");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"][1]["cache_control"]["type"], "ephemeral");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn gemini_body_is_a_single_string_prompt() {
        let cfg = TextConfig {
            provider: crate::config::TextProvider::OpenRouter,
            model: "google/gemini-2.5-flash".into(),
            max_input_tokens: 4000,
            max_output_tokens: 1024,
            api_key: "key".into(),
            base_url: None,
        };
        let body = gemini_cached_body(&cfg, "What is X?", Some("sys"), "doc text");
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert_eq!(content, "sys\n\ndoc text\n\nWhat is X?");
    }
}
