//! Timeline Store.
//!
//! An append-only, capacity-bounded log of [`EntryRecord`]s. The newest
//! `capacity` entries are kept in insertion order; older ones are evicted
//! from the front. After every append the whole sequence is written to a
//! [`SnapshotSlot`] so it can be restored on the next start.
//!
//! The store is advisory self-monitoring data, not critical state: no
//! operation returns an error. Persistence and restore failures are logged
//! and the in-memory sequence stays authoritative.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use deskwatch_memory::snapshot::MemorySlot;
//! use deskwatch_memory::timeline::TimelineStore;
//! use deskwatch_types::{AudioState, EntryRecord, InferenceState, VisualState};
//!
//! let mut store = TimelineStore::new(MemorySlot::new(), 3);
//! for _ in 0..5 {
//!     store.add(EntryRecord::new(
//!         Utc::now(),
//!         VisualState::default(),
//!         AudioState::default(),
//!         InferenceState::default(),
//!     ));
//! }
//! assert_eq!(store.len(), 3);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use deskwatch_types::EntryRecord;
use tracing::{debug, info, warn};

use crate::snapshot::{SnapshotSlot, TimelineError};
use crate::window::{nominal_window_len, window_len};

/// One entry per 10-second tick for 24 hours.
pub const DEFAULT_CAPACITY: usize = 8640;

/// A timeline shared between the sampling and advice tasks. Every mutation
/// and its persistence happen under the lock.
pub type SharedTimeline = Arc<Mutex<TimelineStore>>;

// ─────────────────────────────────────────────────────────────────────────────
// TimelineStore
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity-bounded FIFO of observations with a persisted snapshot.
pub struct TimelineStore {
    entries: VecDeque<EntryRecord>,
    capacity: usize,
    slot: Box<dyn SnapshotSlot>,
    /// Set when a `clear` could neither erase nor overwrite the slot, so the
    /// slot still holds entries the user discarded.
    snapshot_stale: bool,
}

impl std::fmt::Debug for TimelineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineStore")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("snapshot_stale", &self.snapshot_stale)
            .finish()
    }
}

impl TimelineStore {
    /// Create an empty store. Nothing is read from `slot` until
    /// [`load_from_storage`][Self::load_from_storage] is called.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn new(slot: impl SnapshotSlot + 'static, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            slot: Box::new(slot),
            snapshot_stale: false,
        }
    }

    /// Create a store and immediately restore the persisted snapshot.
    pub fn open(slot: impl SnapshotSlot + 'static, capacity: usize) -> Self {
        let mut store = Self::new(slot, capacity);
        store.load_from_storage();
        store
    }

    /// Wrap the store for sharing across tasks.
    pub fn into_shared(self) -> SharedTimeline {
        Arc::new(Mutex::new(self))
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Append `entry`, evict the oldest entries beyond capacity, then
    /// persist. Persistence failure is logged and otherwise ignored.
    pub fn add(&mut self, entry: EntryRecord) {
        if let Some(last) = self.entries.back() {
            if entry.timestamp < last.timestamp {
                debug!(
                    previous = %last.timestamp,
                    incoming = %entry.timestamp,
                    "timeline entry older than its predecessor; keeping insertion order"
                );
            }
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, len = self.entries.len(), "failed to persist timeline snapshot");
        }
    }

    /// Empty the timeline and erase its snapshot.
    ///
    /// If the slot cannot be erased it is overwritten with an empty snapshot.
    /// If that fails too, the slot is marked stale and ignored by
    /// [`load_from_storage`][Self::load_from_storage] until a later write or
    /// erase succeeds, so the old entries are never restored.
    pub fn clear(&mut self) {
        self.entries.clear();
        match self.slot.erase() {
            Ok(()) => self.snapshot_stale = false,
            Err(e) => {
                warn!(error = %e, "failed to erase timeline snapshot; overwriting with an empty one");
                match self.slot.write("[]") {
                    Ok(()) => self.snapshot_stale = false,
                    Err(e) => {
                        warn!(error = %e, "failed to overwrite timeline snapshot; ignoring it until the next successful write");
                        self.snapshot_stale = true;
                    }
                }
            }
        }
        info!("timeline cleared");
    }

    /// Replace the in-memory sequence with the persisted snapshot.
    ///
    /// A missing snapshot yields an empty timeline. A corrupt or unreadable
    /// snapshot is logged and also yields an empty timeline. A snapshot
    /// longer than the capacity keeps only its newest entries.
    ///
    /// Returns the number of restored entries.
    pub fn load_from_storage(&mut self) -> usize {
        self.entries.clear();
        if self.snapshot_stale {
            warn!("timeline snapshot predates the last clear; starting empty");
            return 0;
        }
        match self.read_snapshot() {
            Ok(Some(restored)) => {
                let skip = restored.len().saturating_sub(self.capacity);
                self.entries.extend(restored.into_iter().skip(skip));
                info!(restored = self.entries.len(), "timeline restored from snapshot");
            }
            Ok(None) => debug!("no timeline snapshot found; starting empty"),
            Err(e) => warn!(error = %e, "timeline snapshot unreadable; starting empty"),
        }
        self.entries.len()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// A copy of every entry, oldest first.
    pub fn all(&self) -> Vec<EntryRecord> {
        self.entries.iter().cloned().collect()
    }

    /// Borrowed, read-only view of every entry, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EntryRecord> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The newest entry.
    pub fn latest(&self) -> Option<&EntryRecord> {
        self.entries.back()
    }

    /// The newest `count` entries, oldest first.
    pub fn last_n(&self, count: usize) -> Vec<EntryRecord> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Entries newer than `now − minutes`, oldest first.
    ///
    /// When less history exists than the window covers, every available
    /// entry is returned.
    pub fn recent(&self, minutes: f64, now: DateTime<Utc>) -> Vec<EntryRecord> {
        self.last_n(window_len(self.entries.iter(), now, minutes))
    }

    /// The newest `⌊minutes × 60 / interval_secs⌋` entries, assuming a fixed
    /// sampling interval. Diverges from [`recent`][Self::recent] after
    /// sampling gaps.
    pub fn recent_nominal(&self, minutes: f64, interval_secs: u64) -> Vec<EntryRecord> {
        self.last_n(nominal_window_len(minutes, interval_secs))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn persist(&mut self) -> Result<(), TimelineError> {
        let payload = serde_json::to_string(&self.entries)?;
        self.slot.write(&payload)?;
        self.snapshot_stale = false;
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Vec<EntryRecord>>, TimelineError> {
        match self.slot.read()? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{MemorySlot, SqliteSlot};
    use chrono::Duration;
    use deskwatch_types::{Activity, AudioState, EnvironmentTag, InferenceState, VisualState};

    /// Slot whose writes always fail; reads and erases follow `inner`.
    struct FailingWrites {
        inner: MemorySlot,
    }

    impl SnapshotSlot for FailingWrites {
        fn read(&self) -> Result<Option<String>, TimelineError> {
            self.inner.read()
        }
        fn write(&mut self, _payload: &str) -> Result<(), TimelineError> {
            Err(TimelineError::Unavailable("quota exceeded".to_string()))
        }
        fn erase(&mut self) -> Result<(), TimelineError> {
            self.inner.erase()
        }
    }

    /// Slot shared between two store instances so a "restart" can be
    /// simulated without touching the filesystem.
    #[derive(Clone, Default)]
    struct SharedSlot(Arc<Mutex<MemorySlot>>);

    impl SnapshotSlot for SharedSlot {
        fn read(&self) -> Result<Option<String>, TimelineError> {
            self.0.lock().unwrap().read()
        }
        fn write(&mut self, payload: &str) -> Result<(), TimelineError> {
            self.0.lock().unwrap().write(payload)
        }
        fn erase(&mut self) -> Result<(), TimelineError> {
            self.0.lock().unwrap().erase()
        }
    }

    fn base() -> DateTime<Utc> {
        "2024-05-01T09:00:00Z".parse().unwrap()
    }

    fn entry(seq: i64) -> EntryRecord {
        EntryRecord::new(
            base() + Duration::seconds(seq * 10),
            VisualState {
                activity: Activity::Typing,
                ..VisualState::default()
            },
            AudioState::new(25.0, format!("utterance {seq}"), vec![EnvironmentTag::Quiet]),
            InferenceState::default(),
        )
    }

    // ── add / eviction ───────────────────────────────────────────────────────

    #[test]
    fn add_never_exceeds_capacity_and_keeps_newest() {
        let capacity = 5;
        let mut store = TimelineStore::new(MemorySlot::new(), capacity);
        for total in 1..=12i64 {
            store.add(entry(total));
            assert!(store.len() <= capacity);
            let expected: Vec<EntryRecord> =
                ((total - store.len() as i64 + 1)..=total).map(entry).collect();
            assert_eq!(store.all(), expected);
            assert_eq!(store.len(), (total as usize).min(capacity));
        }
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut store = TimelineStore::new(MemorySlot::new(), 0);
        store.add(entry(1));
        store.add(entry(2));
        assert_eq!(store.capacity(), 1);
        assert_eq!(store.all(), vec![entry(2)]);
    }

    #[test]
    fn out_of_order_timestamps_keep_insertion_order() {
        let mut store = TimelineStore::new(MemorySlot::new(), 10);
        store.add(entry(5));
        store.add(entry(2));
        let all = store.all();
        assert_eq!(all[0], entry(5));
        assert_eq!(all[1], entry(2));
    }

    #[test]
    fn all_returns_a_defensive_copy() {
        let mut store = TimelineStore::new(MemorySlot::new(), 10);
        store.add(entry(1));
        let mut copy = store.all();
        copy.clear();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persistence_failure_does_not_fail_add() {
        let mut store = TimelineStore::new(
            FailingWrites {
                inner: MemorySlot::new(),
            },
            10,
        );
        store.add(entry(1));
        store.add(entry(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest(), Some(&entry(2)));
    }

    // ── persistence round-trip ───────────────────────────────────────────────

    #[test]
    fn fresh_instance_restores_persisted_sequence() {
        let slot = SharedSlot::default();
        let mut first = TimelineStore::new(slot.clone(), 100);
        for i in 0..7 {
            first.add(entry(i));
        }
        let before = first.all();

        let mut second = TimelineStore::new(slot, 100);
        assert_eq!(second.load_from_storage(), 7);
        assert_eq!(second.all(), before);
    }

    #[test]
    fn sqlite_snapshot_survives_restart() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("timeline.sqlite3");
        let path = path.to_string_lossy().to_string();
        {
            let mut store = TimelineStore::open(SqliteSlot::open(&path).unwrap(), 100);
            store.add(entry(1));
            store.add(entry(2));
        }
        let store = TimelineStore::open(SqliteSlot::open(&path).unwrap(), 100);
        assert_eq!(store.all(), vec![entry(1), entry(2)]);
    }

    #[test]
    fn oversized_snapshot_is_trimmed_to_capacity() {
        let entries: Vec<EntryRecord> = (0..10).map(entry).collect();
        let payload = serde_json::to_string(&entries).unwrap();
        let store = TimelineStore::open(MemorySlot::with_payload(payload), 4);
        assert_eq!(store.all(), (6..10).map(entry).collect::<Vec<_>>());
    }

    #[test]
    fn corrupt_snapshot_loads_as_empty() {
        let mut store = TimelineStore::new(MemorySlot::with_payload("{not json"), 10);
        assert_eq!(store.load_from_storage(), 0);
        assert!(store.is_empty());

        let mut wrong_shape = TimelineStore::new(MemorySlot::with_payload("{\"a\":1}"), 10);
        assert_eq!(wrong_shape.load_from_storage(), 0);
    }

    #[test]
    fn missing_snapshot_loads_as_empty() {
        let store = TimelineStore::open(MemorySlot::new(), 10);
        assert!(store.is_empty());
    }

    // ── clear ────────────────────────────────────────────────────────────────

    #[test]
    fn clear_empties_memory_and_snapshot() {
        let slot = SharedSlot::default();
        let mut store = TimelineStore::new(slot.clone(), 10);
        store.add(entry(1));
        store.add(entry(2));
        store.clear();
        assert!(store.all().is_empty());
        assert_eq!(store.load_from_storage(), 0);

        let mut fresh = TimelineStore::new(slot, 10);
        assert_eq!(fresh.load_from_storage(), 0);
    }

    #[test]
    fn clear_overwrites_snapshot_when_erase_fails() {
        struct StickySlot(MemorySlot);
        impl SnapshotSlot for StickySlot {
            fn read(&self) -> Result<Option<String>, TimelineError> {
                self.0.read()
            }
            fn write(&mut self, payload: &str) -> Result<(), TimelineError> {
                self.0.write(payload)
            }
            fn erase(&mut self) -> Result<(), TimelineError> {
                Err(TimelineError::Unavailable("locked".to_string()))
            }
        }

        let mut store = TimelineStore::new(StickySlot(MemorySlot::new()), 10);
        store.add(entry(1));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.load_from_storage(), 0);
    }

    #[test]
    fn clear_never_restores_when_slot_turns_read_only() {
        /// Healthy until `locked` is set, then rejects writes and erases.
        #[derive(Clone, Default)]
        struct LockableSlot {
            inner: SharedSlot,
            locked: Arc<std::sync::atomic::AtomicBool>,
        }
        impl LockableSlot {
            fn is_locked(&self) -> bool {
                self.locked.load(std::sync::atomic::Ordering::SeqCst)
            }
        }
        impl SnapshotSlot for LockableSlot {
            fn read(&self) -> Result<Option<String>, TimelineError> {
                self.inner.read()
            }
            fn write(&mut self, payload: &str) -> Result<(), TimelineError> {
                if self.is_locked() {
                    return Err(TimelineError::Unavailable("read-only".to_string()));
                }
                self.inner.write(payload)
            }
            fn erase(&mut self) -> Result<(), TimelineError> {
                if self.is_locked() {
                    return Err(TimelineError::Unavailable("read-only".to_string()));
                }
                self.inner.erase()
            }
        }

        let slot = LockableSlot::default();
        let mut store = TimelineStore::new(slot.clone(), 10);
        for i in 0..3 {
            store.add(entry(i));
        }
        slot.locked.store(true, std::sync::atomic::Ordering::SeqCst);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.load_from_storage(), 0);
        assert!(store.is_empty());

        // Once the slot accepts writes again, the next add replaces the
        // stale snapshot and restores work normally.
        slot.locked.store(false, std::sync::atomic::Ordering::SeqCst);
        store.add(entry(7));
        assert_eq!(store.load_from_storage(), 1);
        assert_eq!(store.all(), vec![entry(7)]);
    }

    // ── windows ──────────────────────────────────────────────────────────────

    #[test]
    fn recent_returns_six_entries_per_minute() {
        let mut store = TimelineStore::new(MemorySlot::new(), DEFAULT_CAPACITY);
        for i in 0..360 {
            store.add(entry(i));
        }
        let now = entry(359).timestamp;
        assert_eq!(store.recent(1.0, now).len(), 6);
        assert_eq!(store.recent(30.0, now).len(), 180);
        assert_eq!(store.recent(0.5, now).len(), 3);
    }

    #[test]
    fn recent_returns_all_when_history_is_short() {
        let mut store = TimelineStore::new(MemorySlot::new(), 100);
        for i in 0..4 {
            store.add(entry(i));
        }
        let now = entry(3).timestamp;
        assert_eq!(store.recent(30.0, now).len(), 4);
    }

    #[test]
    fn recent_and_nominal_diverge_after_a_gap() {
        let mut store = TimelineStore::new(MemorySlot::new(), 100);
        for i in 0..6 {
            store.add(entry(i));
        }
        // Ten-minute stall, then one more sample.
        store.add(entry(66));
        let now = entry(66).timestamp;
        assert_eq!(store.recent(1.0, now).len(), 1);
        assert_eq!(store.recent_nominal(1.0, 10).len(), 6);
    }

    #[test]
    fn recent_matches_window_selector() {
        let mut store = TimelineStore::new(MemorySlot::new(), 100);
        for i in [0, 1, 2, 40, 3, 50, 51] {
            store.add(entry(i));
        }
        let now = entry(51).timestamp;
        let all = store.all();
        for minutes in [0.0, 0.2, 1.0, 5.0, 9.0, -1.0] {
            assert_eq!(
                store.recent(minutes, now),
                crate::window::select_window(&all, now, minutes).to_vec(),
                "minutes = {minutes}"
            );
        }
    }

    #[test]
    fn last_n_clamps_to_length() {
        let mut store = TimelineStore::new(MemorySlot::new(), 10);
        store.add(entry(1));
        store.add(entry(2));
        assert_eq!(store.last_n(30).len(), 2);
        assert_eq!(store.last_n(1), vec![entry(2)]);
    }
}
