//! Model Router & Dialect Strategies (spec.md §4.5). Three upstream request
//! families share one interface — `build_request` / `parse_response` — as a
//! tagged sum over `Dialect` plus a function table, rather than an
//! interface-per-strategy registry (spec.md §9's design note).

use serde_json::{json, Value};

use fmproxy_protocol::{ContentPart, Message, MessageContent, Role, UnifiedResponse, Usage};

use crate::model_table::{Dialect, ModelConfig};

const OPENAI_API_VERSION: &str = "2024-02-01";

#[derive(Debug, thiserror::Error)]
pub enum DialectError {
    #[error("upstream response body was not valid JSON: {0}")]
    InvalidJson(String),
    #[error("upstream response missing expected field: {0}")]
    MissingField(&'static str),
}

pub struct DialectRequest {
    pub url: String,
    pub body: Value,
}

/// Builds the dialect-specific request for a deployment. `deployment_base`
/// is the inference root for the resolved deployment, e.g.
/// `{base_url}/v2/inference/deployments/{deployment_id}` (spec.md §6) —
/// the caller assembles that once and passes it down so dialect code
/// doesn't need to know about deployment resolution. `streaming` selects
/// the native-streaming variant of the request when true (spec.md §4.8's
/// true-streaming path).
pub fn build_request(deployment_base: &str, model: &ModelConfig, messages: &[Message], streaming: bool) -> DialectRequest {
    match model.dialect() {
        Dialect::Openai => build_openai(deployment_base, model, messages, streaming),
        Dialect::Anthropic => build_anthropic(deployment_base, model, messages, streaming),
        Dialect::Gemini => build_gemini(deployment_base, model, messages, streaming),
    }
}

pub fn parse_response(dialect: Dialect, raw: &[u8]) -> Result<UnifiedResponse, DialectError> {
    let value: Value = serde_json::from_slice(raw).map_err(|err| DialectError::InvalidJson(err.to_string()))?;
    match dialect {
        Dialect::Openai => parse_openai(&value),
        Dialect::Anthropic => parse_anthropic(&value),
        Dialect::Gemini => parse_gemini(&value),
    }
}

// ---------------------------------------------------------------- OpenAI ---

fn build_openai(deployment_base: &str, model: &ModelConfig, messages: &[Message], streaming: bool) -> DialectRequest {
    let url = format!("{deployment_base}/chat/completions?api-version={OPENAI_API_VERSION}");
    let mut body = json!({
        "messages": messages,
        "max_completion_tokens": model.default_max_tokens,
        "stream": streaming,
        "temperature": 0.7,
    });
    if streaming {
        // Asks the upstream to emit a final usage-bearing chunk (spec.md
        // §4.8's true-streaming path needs aggregate usage on stream end).
        body["stream_options"] = json!({"include_usage": true});
    }
    DialectRequest { url, body }
}

fn parse_openai(value: &Value) -> Result<UnifiedResponse, DialectError> {
    let text = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or(DialectError::MissingField("choices[0].message.content"))?
        .to_string();

    let usage = value.get("usage");
    let prompt_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let total_tokens = usage.and_then(|u| u.get("total_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    Ok(UnifiedResponse {
        text,
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        success: true,
    })
}

// ------------------------------------------------------------- Anthropic ---

fn build_anthropic(deployment_base: &str, model: &ModelConfig, messages: &[Message], streaming: bool) -> DialectRequest {
    let url = format!("{deployment_base}/invoke");

    let mut system: Option<String> = None;
    let mut turns = Vec::new();
    for message in messages {
        if message.role == Role::System && system.is_none() {
            system = Some(message.content.flatten_text());
            continue;
        }
        turns.push(json!({
            "role": anthropic_role(message.role),
            "content": anthropic_content_parts(&message.content),
        }));
    }

    let mut body = json!({
        "messages": turns,
        "max_tokens": model.default_max_tokens,
        "stream": streaming,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    DialectRequest { url, body }
}

fn anthropic_role(role: Role) -> &'static str {
    match role {
        Role::System | Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn anthropic_content_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => vec![json!({"type": "text", "text": text})],
        MessageContent::Parts(parts) => parts.iter().map(anthropic_part).collect(),
    }
}

fn anthropic_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { image_url } => match decode_data_url(&image_url.url) {
            Some((media_type, data)) => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            }),
            None => json!({"type": "text", "text": "[unsupported image reference]"}),
        },
    }
}

fn parse_anthropic(value: &Value) -> Result<UnifiedResponse, DialectError> {
    let text = value
        .get("content")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("text"))
        .and_then(|v| v.as_str())
        .ok_or(DialectError::MissingField("content[0].text"))?
        .to_string();

    let usage = value.get("usage");
    let prompt_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    Ok(UnifiedResponse {
        text,
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
        success: true,
    })
}

// ---------------------------------------------------------------- Gemini ---

fn build_gemini(deployment_base: &str, model: &ModelConfig, messages: &[Message], streaming: bool) -> DialectRequest {
    let method = if streaming { "streamGenerateContent" } else { "generateContent" };
    let url = format!("{deployment_base}:{method}");

    let mut system_instruction: Option<Value> = None;
    let mut contents = Vec::new();
    for message in messages {
        if message.role == Role::System {
            system_instruction = Some(json!({"parts": [{"text": message.content.flatten_text()}]}));
            continue;
        }
        contents.push(json!({
            "role": gemini_role(message.role),
            "parts": gemini_parts(&message.content),
        }));
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {"maxOutputTokens": model.default_max_tokens},
    });
    if let Some(system_instruction) = system_instruction {
        body["systemInstruction"] = system_instruction;
    }
    DialectRequest { url, body }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::System | Role::User => "user",
        Role::Assistant => "model",
    }
}

fn gemini_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => vec![json!({"text": text})],
        MessageContent::Parts(parts) => parts.iter().map(gemini_part).collect(),
    }
}

fn gemini_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"text": text}),
        ContentPart::ImageUrl { image_url } => match decode_data_url(&image_url.url) {
            Some((mime_type, data)) => json!({"inline_data": {"mime_type": mime_type, "data": data}}),
            None => json!({"text": "[unsupported image reference]"}),
        },
    }
}

fn parse_gemini(value: &Value) -> Result<UnifiedResponse, DialectError> {
    let parts = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or(DialectError::MissingField("candidates[0].content.parts"))?;

    let text = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    let usage = value.get("usageMetadata");
    let prompt_tokens = usage.and_then(|u| u.get("promptTokenCount")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage.and_then(|u| u.get("candidatesTokenCount")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let total_tokens = usage.and_then(|u| u.get("totalTokenCount")).and_then(|v| v.as_u64()).unwrap_or(prompt_tokens + completion_tokens) as u32;

    Ok(UnifiedResponse {
        text,
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        success: true,
    })
}

/// Extracts the content-delta text from one native-streaming SSE event's
/// JSON payload, per dialect. Returns `None` for control events that carry
/// no visible delta (e.g. OpenAI's role-only first chunk, Anthropic's
/// `message_start`/`message_stop`).
pub fn parse_stream_delta(dialect: Dialect, event_data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(event_data).ok()?;
    match dialect {
        Dialect::Openai => value
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .map(str::to_string),
        Dialect::Anthropic => value
            .get("delta")?
            .get("text")?
            .as_str()
            .map(str::to_string),
        Dialect::Gemini => {
            let parts = value.get("candidates")?.get(0)?.get("content")?.get("parts")?.as_array()?;
            let joined = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("");
            if joined.is_empty() { None } else { Some(joined) }
        }
    }
}

/// Partial usage reported by a single native-streaming event. Dialects
/// report usage incrementally (Anthropic splits prompt/completion across
/// `message_start`/`message_delta`; OpenAI and Gemini report once, near the
/// end), so fields the event doesn't carry are `None` rather than assumed
/// zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Extracts whatever usage fields one native-streaming SSE event's JSON
/// payload carries, per dialect. Returns `None` for events with no usage
/// information at all (most content-delta events). The streaming adapter
/// folds these across the whole stream into the terminal chunk's aggregate
/// usage (spec.md §4.8).
pub fn parse_stream_usage(dialect: Dialect, event_data: &str) -> Option<UsageDelta> {
    let value: Value = serde_json::from_str(event_data).ok()?;
    match dialect {
        Dialect::Openai => {
            let usage = value.get("usage")?;
            Some(UsageDelta {
                prompt_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
                completion_tokens: usage.get("completion_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
                total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
            })
        }
        Dialect::Anthropic => {
            // `message_start` nests usage under `message`; `message_delta`
            // carries it at the top level.
            let usage = match value.get("message").and_then(|m| m.get("usage")) {
                Some(usage) => usage,
                None => value.get("usage")?,
            };
            Some(UsageDelta {
                prompt_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
                completion_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
                total_tokens: None,
            })
        }
        Dialect::Gemini => {
            let usage = value.get("usageMetadata")?;
            Some(UsageDelta {
                prompt_tokens: usage.get("promptTokenCount").and_then(|v| v.as_u64()).map(|v| v as u32),
                completion_tokens: usage.get("candidatesTokenCount").and_then(|v| v.as_u64()).map(|v| v as u32),
                total_tokens: usage.get("totalTokenCount").and_then(|v| v.as_u64()).map(|v| v as u32),
            })
        }
    }
}

/// Decodes a `data:<media-type>;base64,<payload>` URL into `(media_type,
/// payload)`. Non-data URLs (plain `https://...` references) return `None`
/// so the caller can fall back to a sentinel text part (spec.md §4.5).
fn decode_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    Some((media_type.to_string(), payload.to_string()))
}
