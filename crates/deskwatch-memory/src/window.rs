//! Trailing time windows over the timeline.
//!
//! Insertion order is authoritative. The selector walks backwards from the
//! newest entry and stops at the first entry that is not newer than the
//! cutoff; it never re-sorts, so clock skew can shorten a window but never
//! reorder it.

use chrono::{DateTime, Duration, Utc};
use deskwatch_types::EntryRecord;

/// Convert a window length in minutes to a [`Duration`].
///
/// Returns `None` for non-finite or non-positive lengths.
pub fn window_duration(minutes: f64) -> Option<Duration> {
    if !minutes.is_finite() || minutes <= 0.0 {
        return None;
    }
    let millis = (minutes * 60_000.0).round();
    if millis >= i64::MAX as f64 {
        return Some(Duration::MAX);
    }
    Some(Duration::milliseconds(millis as i64))
}

/// Number of trailing entries newer than `now − minutes`.
///
/// This is the one place the window rule lives; [`select_window`] and
/// `TimelineStore::recent` both go through it. Zero for a non-positive or
/// non-finite length.
pub fn window_len<'a, I>(entries: I, now: DateTime<Utc>, minutes: f64) -> usize
where
    I: DoubleEndedIterator<Item = &'a EntryRecord>,
{
    let Some(duration) = window_duration(minutes) else {
        return 0;
    };
    let cutoff = now.checked_sub_signed(duration).unwrap_or(DateTime::<Utc>::MIN_UTC);
    entries.rev().take_while(|e| e.timestamp > cutoff).count()
}

/// Select the trailing entries newer than `now − minutes`.
///
/// Returns an empty slice when nothing matches or the window length is not
/// a positive number.
pub fn select_window(entries: &[EntryRecord], now: DateTime<Utc>, minutes: f64) -> &[EntryRecord] {
    let len = window_len(entries.iter(), now, minutes);
    &entries[entries.len() - len..]
}

/// Entry count of a window under the fixed-interval assumption:
/// `⌊minutes × 60 / interval_secs⌋`.
///
/// This is the count-based strategy; it disagrees with [`select_window`]
/// whenever sampling stalled, which is why the timestamp filter is the
/// canonical one.
pub fn nominal_window_len(minutes: f64, interval_secs: u64) -> usize {
    if interval_secs == 0 || !minutes.is_finite() || minutes <= 0.0 {
        return 0;
    }
    let len = (minutes * 60.0 / interval_secs as f64).floor();
    if len >= usize::MAX as f64 { usize::MAX } else { len as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskwatch_types::{AudioState, InferenceState, VisualState};

    fn entry_at(ts: DateTime<Utc>) -> EntryRecord {
        EntryRecord::new(
            ts,
            VisualState::default(),
            AudioState::default(),
            InferenceState::default(),
        )
    }

    fn spaced(now: DateTime<Utc>, count: usize, step_secs: i64) -> Vec<EntryRecord> {
        (0..count)
            .rev()
            .map(|i| entry_at(now - Duration::seconds(i as i64 * step_secs)))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn ten_second_spacing_yields_six_per_minute() {
        let entries = spaced(now(), 100, 10);
        assert_eq!(select_window(&entries, now(), 1.0).len(), 6);
        assert_eq!(select_window(&entries, now(), 5.0).len(), 30);
        assert_eq!(select_window(&entries, now(), 2.5).len(), 15);
    }

    #[test]
    fn short_history_returns_everything() {
        let entries = spaced(now(), 4, 10);
        assert_eq!(select_window(&entries, now(), 30.0).len(), 4);
    }

    #[test]
    fn stale_history_returns_empty() {
        let entries = spaced(now() - Duration::hours(2), 10, 10);
        assert!(select_window(&entries, now(), 30.0).is_empty());
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(select_window(&[], now(), 30.0).is_empty());
    }

    #[test]
    fn non_positive_minutes_return_empty() {
        let entries = spaced(now(), 10, 10);
        assert!(select_window(&entries, now(), 0.0).is_empty());
        assert!(select_window(&entries, now(), -3.0).is_empty());
        assert!(select_window(&entries, now(), f64::NAN).is_empty());
    }

    #[test]
    fn window_keeps_insertion_order_under_clock_skew() {
        // The third entry's clock jumped backwards past the cutoff; the
        // window stops there instead of re-sorting.
        let entries = vec![
            entry_at(now() - Duration::seconds(50)),
            entry_at(now() - Duration::seconds(40)),
            entry_at(now() - Duration::seconds(600)),
            entry_at(now() - Duration::seconds(20)),
            entry_at(now() - Duration::seconds(10)),
        ];
        let window = select_window(&entries, now(), 1.0);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].timestamp, now() - Duration::seconds(20));
    }

    #[test]
    fn duplicate_timestamps_are_all_included() {
        let ts = now() - Duration::seconds(5);
        let entries = vec![entry_at(ts), entry_at(ts), entry_at(ts)];
        assert_eq!(select_window(&entries, now(), 1.0).len(), 3);
    }

    #[test]
    fn nominal_len_matches_fixed_interval() {
        assert_eq!(nominal_window_len(30.0, 10), 180);
        assert_eq!(nominal_window_len(0.5, 10), 3);
        assert_eq!(nominal_window_len(1.0, 0), 0);
        assert_eq!(nominal_window_len(-1.0, 10), 0);
    }
}
