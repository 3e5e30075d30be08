//! Collaborator seams – everything the monitor delegates to the outside
//! world.
//!
//! The monitor only ever sees these traits, so tests swap in fakes and the
//! CLI wires in the capture directory, the console and an
//! [`OpenAiCollaborator`].
//!
//! All collaborator failures surface as [`WatchError`]; callers decide
//! whether a failure becomes a fallback value or a logged tick failure.

use async_trait::async_trait;
use deskwatch_types::WatchError;
use tracing::debug;

use crate::analysis::VisionVerdict;
use crate::coach::{Advice, AdviceRequest, advice_prompt};
use crate::llm_driver::{ChatMessage, CompletionOptions, LlmDriver, LlmError, ResponseFormat};

impl From<LlmError> for WatchError {
    fn from(e: LlmError) -> Self {
        WatchError::Collaborator(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────────────────────────

/// A recorded microphone clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    /// Container hint, e.g. `clip.webm`.
    pub file_name: String,
}

impl AudioClip {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One sample from the capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// JPEG bytes of the current webcam frame.
    pub frame: Vec<u8>,
    /// Ambient level, decibel-like.
    pub ambient_level: f64,
    pub audio_clip: Option<AudioClip>,
}

/// Produces the current frame, ambient level and latest audio clip.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture(&self) -> Result<Capture, WatchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Inference collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Turns a frame plus audio context into the raw text of a verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        frame: &[u8],
        ambient_level: f64,
        recent_speech: &str,
    ) -> Result<String, WatchError>;
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, WatchError>;
}

/// Produces the raw text of a coaching message.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, request: &AdviceRequest) -> Result<String, WatchError>;
}

/// Where advice ends up: spoken, printed, pushed to a notification.
#[async_trait]
pub trait AdviceSink: Send + Sync {
    async fn deliver(&self, advice: &Advice) -> Result<(), WatchError>;

    /// `true` while advice is being played back; audio captured meanwhile
    /// would only transcribe the advice itself.
    fn is_speaking(&self) -> bool {
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAiCollaborator
// ─────────────────────────────────────────────────────────────────────────────

/// Model selection for [`OpenAiCollaborator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiModels {
    pub vision: String,
    pub advice: String,
    pub transcription: String,
    /// ISO-639-1 language tag sent with every transcription.
    pub transcription_language: String,
    /// Request `response_format: json_schema` for classification. Servers
    /// that do not support it should leave this off; replies are parsed
    /// leniently either way.
    pub structured_output: bool,
}

impl Default for OpenAiModels {
    fn default() -> Self {
        Self {
            vision: "gpt-4o".to_string(),
            advice: "gpt-4o".to_string(),
            transcription: "whisper-1".to_string(),
            transcription_language: "en".to_string(),
            structured_output: false,
        }
    }
}

/// Classifier, transcriber and advisor backed by one OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiCollaborator {
    vision: LlmDriver,
    advice: LlmDriver,
    transcription: LlmDriver,
    language: String,
    structured_output: bool,
}

impl OpenAiCollaborator {
    /// Derive one driver per model from `driver` (which supplies the base
    /// URL and credentials).
    pub fn new(driver: &LlmDriver, models: OpenAiModels) -> Self {
        Self {
            vision: driver.with_model(models.vision),
            advice: driver.with_model(models.advice),
            transcription: driver.with_model(models.transcription),
            language: models.transcription_language,
            structured_output: models.structured_output,
        }
    }

    fn classification_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: Some(200),
            temperature: Some(0.3),
            response_format: self
                .structured_output
                .then(|| ResponseFormat::json_schema_for::<VisionVerdict>("vision_verdict")),
        }
    }
}

#[async_trait]
impl Classifier for OpenAiCollaborator {
    async fn classify(
        &self,
        frame: &[u8],
        ambient_level: f64,
        recent_speech: &str,
    ) -> Result<String, WatchError> {
        let prompt = crate::analysis::vision_prompt(ambient_level, recent_speech);
        let messages = vec![ChatMessage::user_with_image(prompt, frame)];
        let reply = self
            .vision
            .complete(&messages, &self.classification_options())
            .await?;
        debug!(model = %self.vision.model(), chars = reply.len(), "classification reply");
        Ok(reply)
    }
}

#[async_trait]
impl Transcriber for OpenAiCollaborator {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, WatchError> {
        let text = self
            .transcription
            .transcribe(clip.bytes.clone(), &clip.file_name, &self.language)
            .await?;
        Ok(text)
    }
}

#[async_trait]
impl Advisor for OpenAiCollaborator {
    async fn advise(&self, request: &AdviceRequest) -> Result<String, WatchError> {
        let messages = vec![ChatMessage::user_with_image(
            advice_prompt(request),
            &request.frame,
        )];
        let options = CompletionOptions {
            max_tokens: Some(400),
            temperature: Some(1.0),
            response_format: None,
        };
        Ok(self.advice.complete(&messages, &options).await?)
    }
}
