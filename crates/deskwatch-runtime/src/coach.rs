//! Coaching advice.
//!
//! An [`AdviceRequest`] bundles everything the advisor gets to see: the
//! current frame and noise level, the window digest and the tail of the
//! timeline. The reply is trimmed and checked; a reply that is missing or
//! too short to be advice is replaced by [`FALLBACK_ADVICE`], so a caller
//! always has something to deliver.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use deskwatch_types::{EntryRecord, WatchError};
use tracing::{info, warn};

use crate::collaborators::Advisor;
use crate::digest::WindowDigest;

/// Delivered whenever the advisor fails or answers with almost nothing.
pub const FALLBACK_ADVICE: &str = "Take a short break, stretch, and drink some water.";

/// Replies shorter than this many characters are treated as empty.
pub const MIN_ADVICE_CHARS: usize = 5;

/// Number of trailing timeline entries sent with every request.
pub const RECENT_CONTEXT: usize = 30;

/// Of those, how many are spelled out line by line in the prompt.
const PROMPT_ROWS: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// Input of one advice round.
#[derive(Debug, Clone)]
pub struct AdviceRequest {
    /// JPEG of the current frame.
    pub frame: Vec<u8>,
    pub ambient_level: f64,
    pub now: DateTime<Utc>,
    pub digest: WindowDigest,
    /// Timeline length when the request was built.
    pub total_entries: usize,
    /// Nominal sampling interval, used to turn `total_entries` into time.
    pub interval_secs: u64,
    /// Newest entries, oldest first; at most [`RECENT_CONTEXT`].
    pub recent: Vec<EntryRecord>,
    /// A question typed by the user. Periodic advice has none.
    pub question: Option<String>,
}

impl AdviceRequest {
    /// Check and normalize the request before anything is sent.
    ///
    /// Trims the question (a blank question becomes `None`) and keeps only
    /// the newest [`RECENT_CONTEXT`] entries.
    ///
    /// # Errors
    ///
    /// [`WatchError::InvalidInput`] when the frame is empty.
    pub fn validated(mut self) -> Result<Self, WatchError> {
        if self.frame.is_empty() {
            return Err(WatchError::InvalidInput("empty frame".to_string()));
        }
        self.question = self
            .question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        let excess = self.recent.len().saturating_sub(RECENT_CONTEXT);
        self.recent.drain(..excess);
        Ok(self)
    }

    /// Approximate minutes of recorded history, rounded to nearest.
    pub fn session_minutes(&self) -> u64 {
        let secs = self.total_entries as u64 * self.interval_secs;
        (secs + 30) / 60
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Render the advisor prompt for `request`.
pub fn advice_prompt(request: &AdviceRequest) -> String {
    let mut prompt = String::from(
        "You are a strict but caring life coach observing someone's day through \
         their workspace camera and microphone. This is a consenting user's own \
         self-monitoring system.\n\n",
    );

    match &request.question {
        Some(question) => {
            let _ = writeln!(prompt, "[Question from the user]\n\"{question}\"");
            let _ = writeln!(
                prompt,
                "Answer it precisely, using the image and the data below.\n"
            );
        }
        None => {
            let _ = writeln!(prompt, "[Periodic advice]");
            let _ = writeln!(
                prompt,
                "From the image and the data below, say what this person needs most right now. \
                 Be strict and concrete.\n"
            );
        }
    }

    let _ = writeln!(prompt, "[Current situation]");
    let _ = writeln!(prompt, "- Time: {}", request.now.format("%A %H:%M UTC"));
    let _ = writeln!(prompt, "- Recorded for: {} minutes", request.session_minutes());
    let _ = writeln!(prompt, "- Ambient sound: {:.0} dB\n", request.ambient_level);

    if !request.digest.is_empty() {
        let _ = writeln!(prompt, "[Summary]\n{}\n", request.digest);
    }

    let skip = request.recent.len().saturating_sub(PROMPT_ROWS);
    let rows = &request.recent[skip..];
    if !rows.is_empty() {
        let _ = writeln!(prompt, "[Recent observations, oldest first]");
        for (i, entry) in rows.iter().enumerate() {
            let _ = write!(
                prompt,
                "{}. {} activity={} posture={} expression={} energy={} mood={}",
                i + 1,
                entry.timestamp.format("%H:%M:%S"),
                entry.visual.activity,
                entry.visual.posture,
                entry.visual.expression,
                entry.inference.energy_level,
                entry.inference.mood,
            );
            if let Some(speech) = entry.speech() {
                let _ = write!(prompt, " said=\"{speech}\"");
            }
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Looking at the image and the data together, tell them the single most \
         important thing, in 2-3 sentences.",
    );
    prompt
}

// ─────────────────────────────────────────────────────────────────────────────
// Advice
// ─────────────────────────────────────────────────────────────────────────────

/// The message handed to the output sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advice {
    pub message: String,
    /// `true` when `message` is [`FALLBACK_ADVICE`] rather than a reply.
    pub fallback: bool,
    /// The question this answers, if any.
    pub question: Option<String>,
}

impl Advice {
    pub fn fallback(question: Option<String>) -> Self {
        Self {
            message: FALLBACK_ADVICE.to_string(),
            fallback: true,
            question,
        }
    }
}

/// Turn an advisor reply into [`Advice`].
pub fn resolve_advice(reply: Result<String, WatchError>, question: Option<String>) -> Advice {
    match reply {
        Ok(text) => {
            let message = text.trim();
            if message.chars().count() < MIN_ADVICE_CHARS {
                warn!(reply = %message, "advice reply too short; using fallback");
                Advice::fallback(question)
            } else {
                Advice {
                    message: message.to_string(),
                    fallback: false,
                    question,
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "advisor call failed; using fallback");
            Advice::fallback(question)
        }
    }
}

/// Ask `advisor` for advice. Always yields something deliverable.
pub async fn request_advice(advisor: &dyn Advisor, request: &AdviceRequest) -> Advice {
    let reply = advisor.advise(request).await;
    let advice = resolve_advice(reply, request.question.clone());
    info!(
        fallback = advice.fallback,
        question = request.question.is_some(),
        entries = request.total_entries,
        "advice resolved"
    );
    advice
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
