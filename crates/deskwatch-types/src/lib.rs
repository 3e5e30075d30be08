//! `deskwatch-types` – the observation vocabulary shared by every crate.
//!
//! An [`EntryRecord`] is one timestamped observation: what the camera saw
//! ([`VisualState`]), what the microphone heard ([`AudioState`]) and what the
//! inference service guessed about the person ([`InferenceState`]).
//!
//! Every label is a closed enumeration with a fallback member. Upstream data
//! is untrusted, so deserialization never fails on a bad label: missing,
//! `null`, misspelled or legacy values collapse to the fallback and a record
//! is never left partially populated.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Label enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts any JSON shape so that a wrong type degrades to a fallback
/// instead of failing the surrounding record.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseLabel {
    Text(String),
    Other(serde::de::IgnoredAny),
}

impl LooseLabel {
    fn text(&self) -> Option<&str> {
        match self {
            LooseLabel::Text(s) => Some(s),
            LooseLabel::Other(_) => None,
        }
    }
}

fn normalize_label(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

macro_rules! label_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant, )+
        }

        impl $name {
            /// Every member, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire label of this member.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }

            /// Parse a label case-insensitively; `-` and spaces match `_`.
            pub fn from_label(raw: &str) -> Option<Self> {
                let needle = normalize_label(raw);
                Self::ALL.iter().copied().find(|v| v.as_str() == needle)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

macro_rules! with_fallback {
    ($name:ident, $fallback:ident) => {
        impl $name {
            /// Parse a label, degrading anything unrecognised to the fallback.
            pub fn parse_lenient(raw: &str) -> Self {
                Self::from_label(raw).unwrap_or($name::$fallback)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$fallback
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let loose = LooseLabel::deserialize(deserializer)?;
                Ok(loose.text().map(Self::parse_lenient).unwrap_or_default())
            }
        }
    };
}

label_enum! {
    /// What the person is doing. `exercising` from the older analyzer prompt
    /// is not a member and degrades to `unknown`.
    pub enum Activity {
        Typing => "typing",
        Reading => "reading",
        Phone => "phone",
        Eating => "eating",
        Talking => "talking",
        Away => "away",
        Relaxing => "relaxing",
        Thinking => "thinking",
        Unknown => "unknown",
    }
}
with_fallback!(Activity, Unknown);

label_enum! {
    pub enum Posture {
        Upright => "upright",
        Slouched => "slouched",
        Leaning => "leaning",
        Lying => "lying",
        Unknown => "unknown",
    }
}
with_fallback!(Posture, Unknown);

label_enum! {
    /// Facial expression; `not_visible` when no face is in frame.
    pub enum Expression {
        Focused => "focused",
        Neutral => "neutral",
        Tired => "tired",
        Happy => "happy",
        Stressed => "stressed",
        NotVisible => "not_visible",
    }
}
with_fallback!(Expression, NotVisible);

label_enum! {
    /// Where the person is looking.
    pub enum EyeContact {
        Screen => "screen",
        Phone => "phone",
        Away => "away",
        Closed => "closed",
        Camera => "camera",
        Unknown => "unknown",
    }
}
with_fallback!(EyeContact, Unknown);

label_enum! {
    pub enum FocusLevel {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}
with_fallback!(FocusLevel, Medium);

label_enum! {
    pub enum EnergyLevel {
        Energetic => "energetic",
        Normal => "normal",
        Tired => "tired",
    }
}
with_fallback!(EnergyLevel, Normal);

label_enum! {
    pub enum Mood {
        Calm => "calm",
        Happy => "happy",
        Stressed => "stressed",
        Frustrated => "frustrated",
        Relaxed => "relaxed",
    }
}
with_fallback!(Mood, Calm);

label_enum! {
    /// Ambient sound tag. The first four members are the noise bands.
    pub enum EnvironmentTag {
        Silence => "silence",
        Quiet => "quiet",
        Moderate => "moderate",
        Noisy => "noisy",
        Typing => "typing",
        Speech => "speech",
    }
}

impl<'de> Deserialize<'de> for EnvironmentTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_label(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown environment tag '{raw}'")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Noise bands
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bounds (exclusive) of the silence, quiet and moderate bands.
pub const NOISE_BAND_LIMITS: [f64; 3] = [20.0, 40.0, 60.0];

/// Clamp an ambient level reading to a finite, non-negative value.
pub fn clamp_level(level: f64) -> f64 {
    if level.is_finite() && level > 0.0 { level } else { 0.0 }
}

impl EnvironmentTag {
    /// Map an ambient level onto its noise band with a strict `<` table:
    /// `< 20` silence, `< 40` quiet, `< 60` moderate, otherwise noisy.
    pub fn noise_band(level: f64) -> Self {
        let level = clamp_level(level);
        if level < NOISE_BAND_LIMITS[0] {
            EnvironmentTag::Silence
        } else if level < NOISE_BAND_LIMITS[1] {
            EnvironmentTag::Quiet
        } else if level < NOISE_BAND_LIMITS[2] {
            EnvironmentTag::Moderate
        } else {
            EnvironmentTag::Noisy
        }
    }

    pub fn is_noise_band(self) -> bool {
        matches!(
            self,
            EnvironmentTag::Silence
                | EnvironmentTag::Quiet
                | EnvironmentTag::Moderate
                | EnvironmentTag::Noisy
        )
    }
}

/// Build the environment tag list for a live sample.
///
/// Always starts with exactly one noise band, then `typing` when the person
/// was seen typing, then `speech` when recent speech text is non-blank.
pub fn environment_tags(level: f64, activity: Activity, speech: &str) -> Vec<EnvironmentTag> {
    let mut tags = vec![EnvironmentTag::noise_band(level)];
    if activity == Activity::Typing {
        tags.push(EnvironmentTag::Typing);
    }
    if !speech.trim().is_empty() {
        tags.push(EnvironmentTag::Speech);
    }
    tags
}

fn lenient_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<EnvironmentTag>, D::Error> {
    let raw = Option::<Vec<LooseLabel>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .iter()
        .filter_map(LooseLabel::text)
        .filter_map(EnvironmentTag::from_label)
        .collect())
}

fn lenient_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.map(clamp_level).unwrap_or(0.0))
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Record
// ─────────────────────────────────────────────────────────────────────────────

/// What the camera saw.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualState {
    pub activity: Activity,
    pub posture: Posture,
    pub expression: Expression,
    pub eye_contact: EyeContact,
}

/// What the microphone heard.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioState {
    /// Decibel-like, unitless, never negative.
    #[serde(deserialize_with = "lenient_level")]
    pub level: f64,
    pub speech_detected: bool,
    /// Transcribed speech; empty when nothing was said.
    pub speech_content: String,
    #[serde(deserialize_with = "lenient_tags")]
    pub environment_type: Vec<EnvironmentTag>,
}

impl AudioState {
    /// Build the audio half of a live sample. `speech_detected` follows the
    /// transcript so the two can never disagree.
    pub fn new(level: f64, speech: impl Into<String>, environment_type: Vec<EnvironmentTag>) -> Self {
        let speech_content: String = speech.into().trim().to_string();
        Self {
            level: clamp_level(level),
            speech_detected: !speech_content.is_empty(),
            speech_content,
            environment_type,
        }
    }
}

/// Inferred mental state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceState {
    pub focus_level: FocusLevel,
    pub energy_level: EnergyLevel,
    pub mood: Mood,
}

/// One timestamped observation. Immutable once appended to the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub visual: VisualState,
    #[serde(default)]
    pub audio: AudioState,
    #[serde(default)]
    pub inference: InferenceState,
}

impl EntryRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        visual: VisualState,
        audio: AudioState,
        inference: InferenceState,
    ) -> Self {
        Self {
            timestamp,
            visual,
            audio,
            inference,
        }
    }

    /// The transcript, if anything was said.
    pub fn speech(&self) -> Option<&str> {
        let text = self.audio.speech_content.trim();
        (!text.is_empty()).then_some(text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the monitoring layer. The timeline core itself never
/// returns errors; these come from input validation, capture and
/// collaborator calls.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
