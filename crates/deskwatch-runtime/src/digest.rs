//! [`WindowDigest`] – condensed view of a window of timeline entries.
//!
//! Turns a slice of [`EntryRecord`]s into the handful of facts an advice
//! prompt needs: what the person spent time on, what they said, and how
//! their expression, focus and mood moved over the window.
//!
//! The digest is a pure function of its inputs. It never reads the clock, so
//! the same window always renders the same text.
//!
//! # Example
//!
//! ```rust
//! use deskwatch_runtime::digest::WindowDigest;
//!
//! let digest = WindowDigest::from_window(&[], 30.0, 10);
//! assert_eq!(digest.entry_count, 0);
//! assert_eq!(digest.to_string(), "");
//! ```

use std::fmt;

use deskwatch_types::{Activity, EntryRecord, Expression, FocusLevel, Mood};

// ─────────────────────────────────────────────────────────────────────────────
// Building blocks
// ─────────────────────────────────────────────────────────────────────────────

/// One row of the activity histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityShare {
    pub activity: Activity,
    pub count: usize,
    /// `count × sampling interval`.
    pub approx_secs: u64,
}

impl ActivityShare {
    /// Approximate time in whole minutes, rounded to nearest.
    pub fn approx_minutes(&self) -> u64 {
        (self.approx_secs + 30) / 60
    }
}

/// A transcript excerpt with its wall-clock label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechExcerpt {
    /// `HH:MM` in UTC.
    pub at: String,
    pub text: String,
}

/// Collapse consecutive duplicates: `[a, a, b, b, a]` → `[a, b, a]`.
pub fn collapse_runs<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut trail: Vec<T> = Vec::new();
    for value in values {
        if trail.last() != Some(&value) {
            trail.push(value);
        }
    }
    trail
}

/// Count activities; descending by count, ties broken by first appearance.
pub fn activity_histogram(entries: &[EntryRecord], interval_secs: u64) -> Vec<ActivityShare> {
    let mut shares: Vec<ActivityShare> = Vec::new();
    for entry in entries {
        let activity = entry.visual.activity;
        match shares.iter_mut().find(|s| s.activity == activity) {
            Some(share) => share.count += 1,
            None => shares.push(ActivityShare {
                activity,
                count: 1,
                approx_secs: 0,
            }),
        }
    }
    // Stable sort keeps first-appearance order among equal counts.
    shares.sort_by(|a, b| b.count.cmp(&a.count));
    for share in &mut shares {
        share.approx_secs = share.count as u64 * interval_secs;
    }
    shares
}

/// `count` followed by the singular or plural noun.
fn counted(count: usize, singular: &str, plural: &str) -> String {
    let noun = if count == 1 { singular } else { plural };
    format!("{count} {noun}")
}

/// A window length as typed: `1 minute`, `0.4 minutes`, `30 minutes`.
pub fn minutes_label(minutes: f64) -> String {
    let unit = if minutes == 1.0 { "minute" } else { "minutes" };
    format!("{minutes} {unit}")
}

fn join_trail<T: fmt::Display>(trail: &[T]) -> String {
    trail
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" → ")
}

fn distinct<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> usize {
    let mut seen: Vec<T> = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen.len()
}

// ─────────────────────────────────────────────────────────────────────────────
// WindowDigest
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of one trailing window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowDigest {
    /// Window length in minutes, as requested; 0 when the request was not a
    /// positive number.
    pub window_minutes: f64,
    pub entry_count: usize,
    pub activities: Vec<ActivityShare>,
    pub speech: Vec<SpeechExcerpt>,
    pub expression_trail: Vec<Expression>,
    pub focus_trail: Vec<FocusLevel>,
    pub mood_trail: Vec<Mood>,
    pub distinct_activities: usize,
    pub distinct_moods: usize,
}

impl WindowDigest {
    /// Summarize `entries` (oldest first). `interval_secs` is the nominal
    /// sampling interval used to turn counts into durations.
    pub fn from_window(entries: &[EntryRecord], window_minutes: f64, interval_secs: u64) -> Self {
        let window_minutes = if window_minutes.is_finite() && window_minutes > 0.0 {
            window_minutes
        } else {
            0.0
        };
        let speech = entries
            .iter()
            .filter_map(|e| {
                e.speech().map(|text| SpeechExcerpt {
                    at: e.timestamp.format("%H:%M").to_string(),
                    text: text.to_string(),
                })
            })
            .collect();

        Self {
            window_minutes,
            entry_count: entries.len(),
            activities: activity_histogram(entries, interval_secs),
            speech,
            expression_trail: collapse_runs(entries.iter().map(|e| e.visual.expression)),
            focus_trail: collapse_runs(entries.iter().map(|e| e.inference.focus_level)),
            mood_trail: collapse_runs(entries.iter().map(|e| e.inference.mood)),
            distinct_activities: distinct(entries.iter().map(|e| e.visual.activity)),
            distinct_moods: distinct(entries.iter().map(|e| e.inference.mood)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}

impl fmt::Display for WindowDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        writeln!(
            f,
            "Last {} ({}, {}, {})",
            minutes_label(self.window_minutes),
            counted(self.entry_count, "observation", "observations"),
            counted(self.distinct_activities, "distinct activity", "distinct activities"),
            counted(self.distinct_moods, "distinct mood", "distinct moods"),
        )?;
        writeln!(f, "Activities:")?;
        for share in &self.activities {
            writeln!(
                f,
                "- {}: {} (~{} min)",
                share.activity,
                counted(share.count, "sample", "samples"),
                share.approx_minutes()
            )?;
        }
        writeln!(f, "Speech:")?;
        if self.speech.is_empty() {
            writeln!(f, "(none)")?;
        }
        for excerpt in &self.speech {
            writeln!(f, "- [{}] \"{}\"", excerpt.at, excerpt.text)?;
        }
        writeln!(f, "Expression: {}", join_trail(&self.expression_trail))?;
        writeln!(f, "Focus: {}", join_trail(&self.focus_trail))?;
        write!(f, "Mood: {}", join_trail(&self.mood_trail))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
