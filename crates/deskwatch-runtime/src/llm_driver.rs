//! [`LlmDriver`] – OpenAI-compatible model interface.
//!
//! Talks to any server that exposes the OpenAI `/v1/chat/completions` and
//! `/v1/audio/transcriptions` endpoints: the hosted OpenAI API, or a local
//! server such as [Ollama](https://ollama.com) for the chat half.
//!
//! Chat messages may carry an inline JPEG as a base64 `data:` URL so a single
//! request can pair an instruction with a webcam frame.
//!
//! # Example
//!
//! ```rust,no_run
//! use deskwatch_runtime::llm_driver::{ChatMessage, CompletionOptions, LlmDriver};
//!
//! let driver = LlmDriver::new("https://api.openai.com", "gpt-4o").with_api_key("sk-...");
//!
//! let messages = vec![ChatMessage::user_with_image("What is on the desk?", b"\xFF\xD8...")];
//!
//! // Requires network access – skipped in unit tests.
//! // let reply = driver.complete(&messages, &CompletionOptions::default()).await?;
//! ```

use base64::Engine as _;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    /// An inline JPEG as a `data:image/jpeg;base64,…` URL.
    pub fn jpeg(bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/jpeg;base64,{encoded}"),
            },
        }
    }
}

/// Plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user turn carrying `text` followed by an inline JPEG frame.
    pub fn user_with_image(text: impl Into<String>, jpeg: &[u8]) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::jpeg(jpeg),
            ]),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request options
// ─────────────────────────────────────────────────────────────────────────────

/// `response_format` field that requests structured JSON Schema output.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

impl ResponseFormat {
    /// Ask for output matching the JSON Schema of `T`.
    pub fn json_schema_for<T: JsonSchema>(name: &str) -> Self {
        let schema = serde_json::to_value(schema_for!(T)).unwrap_or(serde_json::Value::Null);
        Self {
            kind: "json_schema",
            json_schema: serde_json::json!({ "name": name, "schema": schema }),
        }
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible API.
///
/// Construct once and reuse; [`with_model`][Self::with_model] derives a
/// driver for another model that shares the same connection pool.
#[derive(Clone)]
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for LlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmDriver")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl LlmDriver {
    /// Create a new driver pointing at `base_url` (e.g. `"https://api.openai.com"`)
    /// and using `model` (e.g. `"gpt-4o"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request. A blank key is
    /// ignored.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key: String = key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    /// A driver for `model` on the same server and credentials.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send `messages` to the model and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails or the server answers
    /// with an error status, or [`LlmError::BadResponse`] if the response
    /// shape is unexpected.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: options.response_format.as_ref(),
        };
        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let response: ChatResponse = self
            .authorize(self.client.post(self.endpoint("chat/completions")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))?;
        choice
            .message
            .content
            .ok_or_else(|| LlmError::BadResponse("reply has no text content".into()))
    }

    /// Transcribe an audio clip with this driver's model.
    ///
    /// `file_name` only hints the container format to the server
    /// (`clip.webm`, `clip.wav`, …).
    pub async fn transcribe(
        &self,
        clip: Vec<u8>,
        file_name: &str,
        language: &str,
    ) -> Result<String, LlmError> {
        debug!(model = %self.model, bytes = clip.len(), "transcription request");
        let part = reqwest::multipart::Part::bytes(clip).file_name(file_name.to_string());
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if !language.trim().is_empty() {
            form = form.text("language", language.trim().to_string());
        }

        let response: TranscriptionResponse = self
            .authorize(self.client.post(self.endpoint("audio/transcriptions")))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_role() {
        let json = serde_json::to_string(&ChatMessage::system("hello")).unwrap();
        assert!(json.contains("\"system\""));
        assert!(json.contains("\"content\":\"hello\""));
    }

    #[test]
    fn image_message_uses_openai_part_layout() {
        let msg = ChatMessage::user_with_image("describe", &[0xFF, 0xD8, 0xFF]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "describe");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,/9j/"
        );
    }

    #[test]
    fn chat_message_roundtrip() {
        let msg = ChatMessage::user_with_image("What is next?", b"jpeg");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, msg.content);
    }

    #[test]
    fn request_omits_unset_options() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ChatRequest {
            model: "gpt-4o",
            messages: &messages,
            stream: false,
            max_tokens: None,
            temperature: None,
            response_format: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_none());
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn response_format_embeds_named_schema() {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct Verdict {
            activity: String,
        }
        let format = ResponseFormat::json_schema_for::<Verdict>("verdict");
        let value = serde_json::to_value(&format).unwrap();
        assert_eq!(value["type"], "json_schema");
        assert_eq!(value["json_schema"]["name"], "verdict");
        assert!(value["json_schema"]["schema"].to_string().contains("activity"));
    }

    #[test]
    fn reply_without_content_deserializes() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let driver = LlmDriver::new("http://localhost:11434/", "llava");
        assert_eq!(
            driver.endpoint("chat/completions"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn with_model_keeps_server_and_key() {
        let driver = LlmDriver::new(DEFAULT_BASE_URL, "gpt-4o").with_api_key("sk-test");
        let whisper = driver.with_model("whisper-1");
        assert_eq!(whisper.model(), "whisper-1");
        assert_eq!(whisper.base_url(), DEFAULT_BASE_URL);
        assert!(format!("{whisper:?}").contains("[redacted]"));
        assert!(!format!("{whisper:?}").contains("sk-test"));
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let driver = LlmDriver::new(DEFAULT_BASE_URL, "gpt-4o").with_api_key("  ");
        assert!(driver.api_key.is_none());
    }
}
