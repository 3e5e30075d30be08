//! `deskwatch-runtime` – everything that turns samples into a timeline and
//! a timeline into advice.
//!
//! # Modules
//!
//! - [`monitor`] – [`Monitor`][monitor::Monitor]: schedules the sample and
//!   advice ticks as independent Tokio tasks over a shared
//!   [`TimelineStore`][deskwatch_memory::TimelineStore].
//! - [`digest`] – [`WindowDigest`][digest::WindowDigest]: activity
//!   histogram, speech excerpts and state trails for a window of entries.
//! - [`analysis`] – interprets classifier replies (refusal scan, parse
//!   chain, fallback state) into complete entry records.
//! - [`coach`] – builds the advice prompt and resolves replies into
//!   [`Advice`][coach::Advice], falling back to a fixed message.
//! - [`collaborators`] – the traits the monitor talks to (capture,
//!   classifier, transcriber, advisor, sink) and
//!   [`OpenAiCollaborator`][collaborators::OpenAiCollaborator].
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: an async
//!   OpenAI-compatible client for chat completions with inline images and
//!   audio transcription.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod analysis;
pub mod coach;
pub mod collaborators;
pub mod digest;
pub mod llm_driver;
pub mod monitor;
pub mod telemetry;

pub use analysis::{Analysis, AnalysisOutcome, ParseStrategy, VisionVerdict};
pub use coach::{Advice, AdviceRequest, FALLBACK_ADVICE};
pub use collaborators::{
    AdviceSink, Advisor, AudioClip, Capture, CaptureSource, Classifier, OpenAiCollaborator,
    OpenAiModels, Transcriber,
};
pub use digest::WindowDigest;
pub use llm_driver::{ChatMessage, CompletionOptions, LlmDriver, LlmError, Role};
pub use monitor::{Collaborators, Monitor, MonitorConfig, MonitorHandle};
pub use telemetry::{TracerProviderGuard, init_tracing};
