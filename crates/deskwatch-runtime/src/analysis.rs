//! Interpreting classifier replies.
//!
//! Vision models answer in free text even when told to return bare JSON:
//! sometimes wrapped in a Markdown fence, sometimes with a sentence around
//! the object, sometimes a refusal. [`interpret`] turns any such reply into
//! a complete [`Analysis`] and records which path produced it.
//!
//! Interpretation never fails. Anything that cannot be read becomes the
//! fallback state, whose environment tags carry only the noise band.

use chrono::{DateTime, Utc};
use deskwatch_types::{
    Activity, AudioState, EnergyLevel, EntryRecord, EnvironmentTag, Expression, EyeContact,
    FocusLevel, InferenceState, Mood, Posture, VisualState, WatchError, environment_tags,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::collaborators::Classifier;

/// Substrings that mark a reply as a refusal.
pub const REFUSAL_MARKERS: [&str; 3] = ["I'm sorry", "I can't", "I cannot"];

const VISION_INSTRUCTIONS: &str = "\
You are analyzing a workspace for productivity tracking. This is a consenting \
user's own self-monitoring system for personal use only.

Analyze the workspace and the person's current state.

Respond ONLY with valid JSON in exactly this format:
{\"activity\": \"typing\", \"posture\": \"upright\", \"expression\": \"focused\", \
\"eyeContact\": \"screen\", \"focusLevel\": \"high\", \"energyLevel\": \"normal\", \"mood\": \"calm\"}

Options:
- activity: typing | reading | phone | eating | talking | away | relaxing | thinking | unknown
- posture: upright | slouched | leaning | lying
- expression: focused | neutral | tired | happy | stressed | not_visible
- eyeContact: screen | phone | away | closed | camera
- focusLevel: high | medium | low
- energyLevel: energetic | normal | tired
- mood: calm | happy | stressed | frustrated | relaxed

Return ONLY the JSON object. No markdown, no code blocks, no explanation.";

/// The classification prompt, with the audio context appended.
pub fn vision_prompt(ambient_level: f64, recent_speech: &str) -> String {
    let mut prompt = String::from(VISION_INSTRUCTIONS);
    prompt.push_str(&format!("\n\nAmbient sound level: {ambient_level:.0} dB."));
    let speech = recent_speech.trim();
    if !speech.is_empty() {
        prompt.push_str(&format!("\nRecently said: \"{speech}\""));
    }
    prompt
}

// ─────────────────────────────────────────────────────────────────────────────
// Verdict
// ─────────────────────────────────────────────────────────────────────────────

/// The JSON object a classifier is asked to return.
///
/// Absent or `null` fields take the defaults of the fallback state;
/// unrecognized labels take the label's own fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct VisionVerdict {
    pub activity: Option<Activity>,
    pub posture: Option<Posture>,
    pub expression: Option<Expression>,
    pub eye_contact: Option<EyeContact>,
    pub focus_level: Option<FocusLevel>,
    pub energy_level: Option<EnergyLevel>,
    pub mood: Option<Mood>,
}

impl VisionVerdict {
    fn into_states(self) -> (VisualState, InferenceState) {
        let visual = VisualState {
            activity: self.activity.unwrap_or(Activity::Unknown),
            posture: self.posture.unwrap_or(Posture::Upright),
            expression: self.expression.unwrap_or(Expression::Neutral),
            eye_contact: self.eye_contact.unwrap_or(EyeContact::Screen),
        };
        let inference = InferenceState {
            focus_level: self.focus_level.unwrap_or(FocusLevel::Medium),
            energy_level: self.energy_level.unwrap_or(EnergyLevel::Normal),
            mood: self.mood.unwrap_or(Mood::Calm),
        };
        (visual, inference)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parse chain
// ─────────────────────────────────────────────────────────────────────────────

/// Which extraction step produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Contents of the first ```` ``` ```` fence (optionally tagged `json`).
    CodeBlock,
    /// From the first `{` to the last `}`.
    BraceSpan,
    /// The whole trimmed reply.
    WholeText,
}

/// How an [`Analysis`] came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Parsed(ParseStrategy),
    /// The reply contained a refusal marker.
    Refused,
    /// No parse step yielded a JSON object.
    Unparsable,
    /// The classifier call itself failed.
    Failed,
}

impl AnalysisOutcome {
    pub fn is_fallback(self) -> bool {
        !matches!(self, AnalysisOutcome::Parsed(_))
    }
}

pub fn is_refusal(text: &str) -> bool {
    let normalized = text.replace('\u{2019}', "'");
    REFUSAL_MARKERS.iter().any(|m| normalized.contains(m))
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Run the parse chain; the first step that yields a verdict wins.
pub fn extract_verdict(text: &str) -> Option<(VisionVerdict, ParseStrategy)> {
    let candidates = [
        (fenced_block(text), ParseStrategy::CodeBlock),
        (brace_span(text), ParseStrategy::BraceSpan),
        (Some(text.trim()), ParseStrategy::WholeText),
    ];
    for (candidate, strategy) in candidates {
        let Some(candidate) = candidate else { continue };
        match parse_object(candidate) {
            Ok(verdict) => return Some((verdict, strategy)),
            Err(e) => debug!(?strategy, error = %e, "verdict parse step failed"),
        }
    }
    None
}

/// Only a JSON object counts as a verdict; arrays and scalars are rejected.
fn parse_object(candidate: &str) -> Result<VisionVerdict, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(candidate)?;
    if !value.is_object() {
        return Err(serde::de::Error::custom("verdict is not a JSON object"));
    }
    serde_json::from_value(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────────────────────

/// A complete interpretation of one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub visual: VisualState,
    pub inference: InferenceState,
    pub outcome: AnalysisOutcome,
}

impl Analysis {
    /// The state used whenever a reply cannot be interpreted.
    pub fn fallback(outcome: AnalysisOutcome) -> Self {
        let (visual, inference) = VisionVerdict::default().into_states();
        Self {
            visual,
            inference,
            outcome,
        }
    }

    /// Attach audio and a timestamp.
    ///
    /// `recent_speech` decides the `speech` tag; `transcript` is what was
    /// said during this sample and is stored on the record.
    pub fn into_entry(
        self,
        timestamp: DateTime<Utc>,
        ambient_level: f64,
        recent_speech: &str,
        transcript: &str,
    ) -> EntryRecord {
        let tags = if self.outcome.is_fallback() {
            vec![EnvironmentTag::noise_band(ambient_level)]
        } else {
            environment_tags(ambient_level, self.visual.activity, recent_speech)
        };
        EntryRecord::new(
            timestamp,
            self.visual,
            AudioState::new(ambient_level, transcript, tags),
            self.inference,
        )
    }
}

/// Interpret a raw classifier reply.
pub fn interpret(raw: &str) -> Analysis {
    if is_refusal(raw) {
        warn!("classifier refused the frame; using fallback state");
        return Analysis::fallback(AnalysisOutcome::Refused);
    }
    match extract_verdict(raw) {
        Some((verdict, strategy)) => {
            let (visual, inference) = verdict.into_states();
            Analysis {
                visual,
                inference,
                outcome: AnalysisOutcome::Parsed(strategy),
            }
        }
        None => {
            warn!(reply = %raw, "classifier reply is not a JSON verdict; using fallback state");
            Analysis::fallback(AnalysisOutcome::Unparsable)
        }
    }
}

/// Classify one frame.
///
/// # Errors
///
/// Returns [`WatchError::InvalidInput`] for an empty frame, before the
/// classifier is called. Classifier failures are not errors: they yield the
/// fallback state.
pub async fn analyze(
    classifier: &dyn Classifier,
    frame: &[u8],
    ambient_level: f64,
    recent_speech: &str,
) -> Result<Analysis, WatchError> {
    if frame.is_empty() {
        return Err(WatchError::InvalidInput("empty frame".to_string()));
    }
    match classifier.classify(frame, ambient_level, recent_speech).await {
        Ok(raw) => Ok(interpret(&raw)),
        Err(e) => {
            warn!(error = %e, "classifier call failed; using fallback state");
            Ok(Analysis::fallback(AnalysisOutcome::Failed))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
