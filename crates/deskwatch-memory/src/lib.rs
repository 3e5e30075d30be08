//! `deskwatch-memory` – the rolling observation timeline.
//!
//! Keeps the last 24 hours of observations in memory and mirrors them into a
//! local SQLite file so a restart picks up where the previous run stopped.
//!
//! # Modules
//!
//! - [`timeline`] – [`TimelineStore`][timeline::TimelineStore]: the
//!   capacity-bounded, insertion-ordered log with best-effort persistence.
//! - [`snapshot`] – [`SnapshotSlot`][snapshot::SnapshotSlot] and its
//!   SQLite and in-memory implementations.
//! - [`window`] – trailing time-window selection over the log.

pub mod snapshot;
pub mod timeline;
pub mod window;

pub use snapshot::{MemorySlot, SnapshotSlot, SqliteSlot, TimelineError};
pub use timeline::{DEFAULT_CAPACITY, SharedTimeline, TimelineStore};
pub use window::{nominal_window_len, select_window};
