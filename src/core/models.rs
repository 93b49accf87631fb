use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-16k";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Chronological, oldest first. Sent to the API as-is.
pub type Conversation = Vec<Message>;

/// Caller-supplied parameters; anything left out gets a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialChatParameters {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

impl PartialChatParameters {
    #[must_use]
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }
}

/// Fully resolved request parameters, serialized next to `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatParameters {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
}

impl Default for ChatParameters {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ChatParameters {
    /// Fills in defaults for absent fields.
    ///
    /// An explicit temperature of `0.0` is kept. A `max_tokens` of zero and an
    /// empty model name can never be sent, so they are defaulted as if absent.
    /// Ranges are not validated.
    #[must_use]
    pub fn prepare(partial: PartialChatParameters) -> Self {
        let temperature = partial.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = partial
            .max_tokens
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let model = partial
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            temperature,
            max_tokens,
            model,
        }
    }
}

impl From<PartialChatParameters> for ChatParameters {
    fn from(partial: PartialChatParameters) -> Self {
        Self::prepare(partial)
    }
}

/// Body of a chat completions request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub params: &'a ChatParameters,
}

/// Response of a non-streaming chat completion. Fields this crate does not
/// model are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletion {
    /// Text of the first choice, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    pub message: CompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    #[serde(default = "assistant_role")]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

const fn assistant_role() -> Role {
    Role::Assistant
}

/// One decoded `data:` frame of a streamed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

impl StreamEvent {
    /// Delta text of the first choice; empty when the frame carries none.
    #[must_use]
    pub fn delta_content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prepare_defaults_absent_fields() {
        let params = ChatParameters::prepare(PartialChatParameters::default());
        assert_eq!(params, ChatParameters::default());
        assert_eq!(params.model, "gpt-3.5-turbo-16k");
        assert_eq!(params.max_tokens, 512);
        assert!(params.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn test_prepare_passes_present_fields_through() {
        let params = ChatParameters::prepare(PartialChatParameters {
            temperature: Some(1.7),
            max_tokens: Some(2048),
            model: Some("gpt-4o".to_string()),
        });
        assert!((params.temperature - 1.7).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 2048);
        assert_eq!(params.model, "gpt-4o");
    }

    #[test]
    fn test_prepare_keeps_explicit_zero_temperature() {
        let params = ChatParameters::prepare(PartialChatParameters {
            temperature: Some(0.0),
            ..Default::default()
        });
        assert!(params.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn test_prepare_does_not_validate_ranges() {
        let params = ChatParameters::prepare(PartialChatParameters {
            temperature: Some(-3.0),
            ..Default::default()
        });
        assert!((params.temperature + 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_prepare_defaults_unsendable_values() {
        let params = ChatParameters::prepare(PartialChatParameters {
            temperature: None,
            max_tokens: Some(0),
            model: Some("   ".to_string()),
        });
        assert_eq!(params.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(params.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_request_body_shape() {
        let params = ChatParameters::default();
        let messages = vec![Message::user("hi")];
        let body = serde_json::to_value(ChatRequest {
            messages: &messages,
            stream: Some(true),
            params: &params,
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "temperature": 0.0,
                "max_tokens": 512,
                "model": "gpt-3.5-turbo-16k"
            })
        );
    }

    #[test]
    fn test_request_body_omits_stream_when_blocking() {
        let params = ChatParameters::default();
        let body = serde_json::to_value(ChatRequest {
            messages: &[],
            stream: None,
            params: &params,
        })
        .unwrap();
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_completion_keeps_unknown_fields() {
        let raw = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 3}
        });
        let completion: ChatCompletion = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(completion.content(), Some("Hi!"));
        assert_eq!(serde_json::to_value(&completion).unwrap(), raw);
    }

    #[test]
    fn test_stream_event_without_content() {
        let event: StreamEvent = serde_json::from_value(json!({
            "id": "1",
            "choices": [{"delta": {"role": "assistant"}}]
        }))
        .unwrap();
        assert_eq!(event.delta_content(), "");
        assert_eq!(event.choices[0].delta.role, Some(Role::Assistant));
    }
}
