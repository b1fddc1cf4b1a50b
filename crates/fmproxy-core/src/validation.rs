//! Validation Gate (spec.md §4.4): structural and bound checks run before
//! any upstream work, plus the NUL-byte sanitization pass applied to every
//! string in the request.

use fmproxy_protocol::{ChatRequest, ContentPart, Message, MessageContent, Role};

use crate::model_table::ModelConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub messages: Vec<String>,
}

impl ValidationError {
    fn single(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }
}

pub struct ValidationLimits {
    pub max_messages_per_request: usize,
    pub max_content_length: usize,
}

/// Rejects oversized bodies before JSON parsing is even attempted — the
/// caller invokes this against `Content-Length` (or the actually-read byte
/// count) ahead of `serde_json::from_slice`.
pub fn check_payload_size(byte_len: usize, max_request_size: usize) -> Result<(), ValidationError> {
    if byte_len > max_request_size {
        return Err(ValidationError::single(format!(
            "request body of {byte_len} bytes exceeds the {max_request_size}-byte limit"
        )));
    }
    Ok(())
}

pub fn validate_chat_request(
    request: &ChatRequest,
    model: Option<&ModelConfig>,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    let Some(model) = model else {
        return Err(ValidationError::single(format!("unknown model \"{}\"", request.model)));
    };

    if request.messages.is_empty() {
        errors.push("messages must be a non-empty array".to_string());
    }
    if request.messages.len() > limits.max_messages_per_request {
        errors.push(format!(
            "messages exceeds the limit of {} entries",
            limits.max_messages_per_request
        ));
    }

    for (index, message) in request.messages.iter().enumerate() {
        validate_message(index, message, model, limits, &mut errors);
    }

    if let Some(max_tokens) = request.max_tokens {
        if max_tokens == 0 {
            errors.push("max_tokens must be a positive integer".to_string());
        } else if max_tokens > model.default_max_tokens {
            errors.push(format!(
                "max_tokens {max_tokens} exceeds the model's cap of {}",
                model.default_max_tokens
            ));
        }
    }

    check_bound(request.temperature, 0.0, 2.0, "temperature", &mut errors);
    check_bound(request.top_p, 0.0, 1.0, "top_p", &mut errors);
    check_bound(request.frequency_penalty, -2.0, 2.0, "frequency_penalty", &mut errors);
    check_bound(request.presence_penalty, -2.0, 2.0, "presence_penalty", &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { messages: errors })
    }
}

fn validate_message(
    index: usize,
    message: &Message,
    model: &ModelConfig,
    limits: &ValidationLimits,
    errors: &mut Vec<String>,
) {
    if !matches!(message.role, Role::System | Role::User | Role::Assistant) {
        errors.push(format!("messages[{index}].role is not one of system/user/assistant"));
    }

    match &message.content {
        MessageContent::Text(text) => {
            if text.trim().is_empty() {
                errors.push(format!("messages[{index}].content must not be empty"));
            }
            if text.len() > limits.max_content_length {
                errors.push(format!(
                    "messages[{index}].content exceeds the {}-byte limit",
                    limits.max_content_length
                ));
            }
        }
        MessageContent::Parts(parts) => {
            if parts.is_empty() {
                errors.push(format!("messages[{index}].content must not be an empty parts array"));
            }
            for (part_index, part) in parts.iter().enumerate() {
                match part {
                    ContentPart::Text { text } => {
                        if text.len() > limits.max_content_length {
                            errors.push(format!(
                                "messages[{index}].content[{part_index}].text exceeds the {}-byte limit",
                                limits.max_content_length
                            ));
                        }
                    }
                    ContentPart::ImageUrl { image_url } => {
                        if !model.supports_vision {
                            errors.push(format!(
                                "messages[{index}].content[{part_index}] is an image_url part, but model \"{}\" does not support vision",
                                model.name
                            ));
                        }
                        if image_url.url.trim().is_empty() {
                            errors.push(format!("messages[{index}].content[{part_index}].image_url.url must not be empty"));
                        }
                    }
                }
            }
        }
    }
}

fn check_bound(value: Option<f64>, min: f64, max: f64, field: &str, errors: &mut Vec<String>) {
    if let Some(value) = value {
        if value < min || value > max {
            errors.push(format!("{field} must be within [{min}, {max}], got {value}"));
        }
    }
}

/// Strips NUL bytes from every string the request carries, recursively.
/// Idempotent: a second pass over already-sanitized content is a no-op
/// (spec.md §8).
pub fn sanitize_chat_request(request: &mut ChatRequest) {
    for message in &mut request.messages {
        sanitize_content(&mut message.content);
    }
}

fn sanitize_content(content: &mut MessageContent) {
    match content {
        MessageContent::Text(text) => strip_nul_in_place(text),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => strip_nul_in_place(text),
                    ContentPart::ImageUrl { image_url } => strip_nul_in_place(&mut image_url.url),
                }
            }
        }
    }
}

fn strip_nul_in_place(text: &mut String) {
    if text.contains('\0') {
        *text = text.chars().filter(|&c| c != '\0').collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelConfig {
        ModelConfig {
            name: "gpt-5-nano".to_string(),
            deployment_id: "dep-1".to_string(),
            dialect: "openai".to_string(),
            supports_streaming: true,
            supports_vision: false,
            default_max_tokens: 4096,
        }
    }

    fn limits() -> ValidationLimits {
        ValidationLimits {
            max_messages_per_request: 200,
            max_content_length: 200_000,
        }
    }

    fn request_with(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "gpt-5-nano".to_string(),
            messages,
            stream: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    #[test]
    fn happy_path_passes() {
        let request = request_with(vec![Message {
            role: Role::User,
            content: MessageContent::Text("ping".to_string()),
        }]);
        assert!(validate_chat_request(&request, Some(&model()), &limits()).is_ok());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let request = request_with(vec![]);
        let err = validate_chat_request(&request, None, &limits()).unwrap_err();
        assert!(err.messages[0].contains("unknown model"));
    }

    #[test]
    fn empty_messages_rejected() {
        let request = request_with(vec![]);
        let err = validate_chat_request(&request, Some(&model()), &limits()).unwrap_err();
        assert!(err.messages.iter().any(|m| m.contains("non-empty")));
    }

    #[test]
    fn image_part_requires_vision_support() {
        let request = request_with(vec![Message {
            role: Role::User,
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: fmproxy_protocol::ImageUrl {
                    url: "data:image/png;base64,QUJD".to_string(),
                },
            }]),
        }]);
        let err = validate_chat_request(&request, Some(&model()), &limits()).unwrap_err();
        assert!(err.messages.iter().any(|m| m.contains("does not support vision")));
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let mut request = request_with(vec![Message {
            role: Role::User,
            content: MessageContent::Text("ping".to_string()),
        }]);
        request.temperature = Some(9.0);
        let err = validate_chat_request(&request, Some(&model()), &limits()).unwrap_err();
        assert!(err.messages.iter().any(|m| m.contains("temperature")));
    }

    #[test]
    fn sanitize_strips_nul_bytes_and_is_idempotent() {
        let mut request = request_with(vec![Message {
            role: Role::User,
            content: MessageContent::Text("hi\0there\0".to_string()),
        }]);
        sanitize_chat_request(&mut request);
        let once = request.messages[0].content.as_plain_text().unwrap().to_string();
        assert!(!once.contains('\0'));
        sanitize_chat_request(&mut request);
        let twice = request.messages[0].content.as_plain_text().unwrap().to_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn oversized_payload_rejected_before_parse() {
        assert!(check_payload_size(100, 50).is_err());
        assert!(check_payload_size(10, 50).is_ok());
    }
}
