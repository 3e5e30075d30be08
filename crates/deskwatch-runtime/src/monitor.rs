//! [`Monitor`] – the sampling and advice scheduler.
//!
//! Two ticks drive the system:
//!
//! 1. **Sample** (every `sample_interval`) – capture a frame, level and
//!    clip; transcribe the clip; classify the frame; append the resulting
//!    [`EntryRecord`] to the timeline.
//! 2. **Advise** (every `advice_interval`, first after
//!    `initial_advice_delay`) – summarize the recent window, ask the advisor,
//!    hand the [`Advice`] to the sink.
//!
//! Every tick runs as its own Tokio task. A slow collaborator never delays
//! the next tick, so ticks may finish out of order; the timeline lock keeps
//! appends serialized. [`MonitorHandle::stop`] stops scheduling only:
//! ticks already in flight still complete and still append.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use deskwatch_runtime::monitor::{Collaborators, Monitor, MonitorConfig};
//! # use deskwatch_memory::{MemorySlot, TimelineStore};
//! # fn wire(collaborators: Collaborators) {
//! let timeline = TimelineStore::open(MemorySlot::new(), 8640).into_shared();
//! let monitor = Arc::new(Monitor::new(MonitorConfig::default(), timeline, collaborators));
//! let handle = monitor.spawn();
//! // ...
//! handle.stop();
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use deskwatch_memory::{SharedTimeline, TimelineStore};
use deskwatch_types::{EntryRecord, WatchError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::analyze;
use crate::coach::{Advice, AdviceRequest, RECENT_CONTEXT, request_advice};
use crate::collaborators::{AdviceSink, Advisor, AudioClip, CaptureSource, Classifier, Transcriber};
use crate::digest::WindowDigest;

/// Clips smaller than this are treated as silence and never transcribed.
pub const MIN_CLIP_BYTES: usize = 1000;

/// How many recent transcripts form the classifier's speech hint.
pub const SPEECH_HINT_LEN: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduling parameters for [`Monitor`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub sample_interval: Duration,
    pub advice_interval: Duration,
    pub initial_advice_delay: Duration,
    /// Window summarized for every advice round.
    pub digest_minutes: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
            advice_interval: Duration::from_secs(30),
            initial_advice_delay: Duration::from_secs(15),
            digest_minutes: 30.0,
        }
    }
}

impl MonitorConfig {
    fn interval_secs(&self) -> u64 {
        self.sample_interval.as_secs().max(1)
    }
}

/// The outside world as seen by the monitor.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureSource>,
    pub classifier: Arc<dyn Classifier>,
    pub transcriber: Arc<dyn Transcriber>,
    pub advisor: Arc<dyn Advisor>,
    pub sink: Arc<dyn AdviceSink>,
}

/// Tick counters since construction.
#[derive(Debug, Default)]
pub struct MonitorStats {
    pub samples: AtomicU64,
    pub sample_failures: AtomicU64,
    pub fallback_samples: AtomicU64,
    pub advice: AtomicU64,
    pub fallback_advice: AtomicU64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Monitor
// ─────────────────────────────────────────────────────────────────────────────

pub struct Monitor {
    config: MonitorConfig,
    timeline: SharedTimeline,
    collaborators: Collaborators,
    speech_hints: Mutex<VecDeque<String>>,
    stats: MonitorStats,
}

impl Monitor {
    pub fn new(config: MonitorConfig, timeline: SharedTimeline, collaborators: Collaborators) -> Self {
        Self {
            config,
            timeline,
            collaborators,
            speech_hints: Mutex::new(VecDeque::with_capacity(SPEECH_HINT_LEN)),
            stats: MonitorStats::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn timeline(&self) -> &SharedTimeline {
        &self.timeline
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Lock the timeline. A poisoned lock is recovered: the store has no
    /// invariant that a panicking reader could break.
    pub fn lock_timeline(&self) -> MutexGuard<'_, TimelineStore> {
        self.timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Digest of the trailing `minutes`, ending now.
    pub fn digest(&self, minutes: f64) -> WindowDigest {
        let window = self.lock_timeline().recent(minutes, Utc::now());
        WindowDigest::from_window(&window, minutes, self.config.interval_secs())
    }

    /// Empty the timeline and the speech hints.
    pub fn clear(&self) {
        self.lock_timeline().clear();
        self.hints().clear();
    }

    fn hints(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.speech_hints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -------------------------------------------------------------------------
    // Sample tick
    // -------------------------------------------------------------------------

    /// Run one sample tick and return the appended entry.
    ///
    /// # Errors
    ///
    /// [`WatchError::Capture`] when nothing could be captured,
    /// [`WatchError::InvalidInput`] when the captured frame is empty. Neither
    /// appends anything. Transcription and classification failures do not
    /// fail the tick.
    pub async fn sample_once(&self) -> Result<EntryRecord, WatchError> {
        let result = self.sample_inner().await;
        match &result {
            Ok(_) => self.stats.samples.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.sample_failures.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn sample_inner(&self) -> Result<EntryRecord, WatchError> {
        let capture = self.collaborators.capture.capture().await?;
        if capture.frame.is_empty() {
            return Err(WatchError::InvalidInput("empty frame".to_string()));
        }

        let transcript = match &capture.audio_clip {
            Some(clip) => self.transcribe(clip).await,
            None => String::new(),
        };
        let hint = self.remember_speech(&transcript);

        let analysis = analyze(
            self.collaborators.classifier.as_ref(),
            &capture.frame,
            capture.ambient_level,
            &hint,
        )
        .await?;
        let outcome = analysis.outcome;
        if outcome.is_fallback() {
            self.stats.fallback_samples.fetch_add(1, Ordering::Relaxed);
        }

        let entry = analysis.into_entry(Utc::now(), capture.ambient_level, &hint, &transcript);
        let len = {
            let mut timeline = self.lock_timeline();
            timeline.add(entry.clone());
            timeline.len()
        };
        info!(
            activity = %entry.visual.activity,
            mood = %entry.inference.mood,
            level = entry.audio.level,
            speech = entry.audio.speech_detected,
            ?outcome,
            len,
            "sample recorded"
        );
        Ok(entry)
    }

    async fn transcribe(&self, clip: &AudioClip) -> String {
        if self.collaborators.sink.is_speaking() {
            debug!("advice playing; skipping transcription");
            return String::new();
        }
        if clip.len() < MIN_CLIP_BYTES {
            debug!(bytes = clip.len(), "clip below threshold; treating as silence");
            return String::new();
        }
        match self.collaborators.transcriber.transcribe(clip).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "transcription failed; treating clip as silence");
                String::new()
            }
        }
    }

    /// Push a non-blank transcript and return the joined hint.
    fn remember_speech(&self, transcript: &str) -> String {
        let mut hints = self.hints();
        if !transcript.is_empty() {
            if hints.len() == SPEECH_HINT_LEN {
                hints.pop_front();
            }
            hints.push_back(transcript.to_string());
        }
        hints.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    // -------------------------------------------------------------------------
    // Advice tick
    // -------------------------------------------------------------------------

    /// Run one advice round, deliver the result, and return it.
    ///
    /// `question` turns the round into an answer to the user.
    ///
    /// # Errors
    ///
    /// [`WatchError::Capture`] or [`WatchError::InvalidInput`] when no usable
    /// frame is available. Advisor and sink failures do not fail the round.
    pub async fn advise_once(&self, question: Option<&str>) -> Result<Advice, WatchError> {
        let capture = self.collaborators.capture.capture().await?;
        let now = Utc::now();
        let (total_entries, recent, window) = {
            let timeline = self.lock_timeline();
            (
                timeline.len(),
                timeline.last_n(RECENT_CONTEXT),
                timeline.recent(self.config.digest_minutes, now),
            )
        };
        let digest =
            WindowDigest::from_window(&window, self.config.digest_minutes, self.config.interval_secs());

        let request = AdviceRequest {
            frame: capture.frame,
            ambient_level: capture.ambient_level,
            now,
            digest,
            total_entries,
            interval_secs: self.config.interval_secs(),
            recent,
            question: question.map(str::to_string),
        }
        .validated()?;

        let advice = request_advice(self.collaborators.advisor.as_ref(), &request).await;
        self.stats.advice.fetch_add(1, Ordering::Relaxed);
        if advice.fallback {
            self.stats.fallback_advice.fetch_add(1, Ordering::Relaxed);
        }
        if let Err(e) = self.collaborators.sink.deliver(&advice).await {
            warn!(error = %e, "advice sink failed");
        }
        Ok(advice)
    }

    // -------------------------------------------------------------------------
    // Scheduling
    // -------------------------------------------------------------------------

    /// Start the tick scheduler on the current Tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let monitor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let config = monitor.config.clone();
            let start = Instant::now();
            let mut sample = tokio::time::interval_at(start, period(config.sample_interval));
            sample.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut advice = tokio::time::interval_at(
                start + config.initial_advice_delay,
                period(config.advice_interval),
            );
            advice.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                sample_secs = config.sample_interval.as_secs_f64(),
                advice_secs = config.advice_interval.as_secs_f64(),
                "monitor started"
            );

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = sample.tick() => {
                        let monitor = Arc::clone(&monitor);
                        tokio::spawn(async move {
                            if let Err(e) = monitor.sample_once().await {
                                warn!(error = %e, "sample tick failed");
                            }
                        });
                    }
                    _ = advice.tick() => {
                        let monitor = Arc::clone(&monitor);
                        tokio::spawn(async move {
                            if let Err(e) = monitor.advise_once(None).await {
                                warn!(error = %e, "advice tick failed");
                            }
                        });
                    }
                }
            }
            info!("monitor stopped");
        });

        MonitorHandle { stop_tx, task }
    }
}

/// Tokio intervals panic on a zero period.
fn period(interval: Duration) -> Duration {
    interval.max(Duration::from_millis(1))
}

/// Controls a running scheduler.
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop scheduling new ticks. In-flight ticks run to completion.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the scheduler loop to exit.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Capture;
    use async_trait::async_trait;
    use deskwatch_memory::MemorySlot;
    use deskwatch_types::{Activity, EnvironmentTag};
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    const VERDICT: &str = r#"{"activity":"typing","mood":"happy"}"#;

    // ── fakes ────────────────────────────────────────────────────────────────

    struct FakeCapture {
        frame: Vec<u8>,
        level: f64,
        clip_bytes: usize,
    }

    #[async_trait]
    impl CaptureSource for FakeCapture {
        async fn capture(&self) -> Result<Capture, WatchError> {
            Ok(Capture {
                frame: self.frame.clone(),
                ambient_level: self.level,
                audio_clip: (self.clip_bytes > 0).then(|| AudioClip {
                    bytes: vec![0u8; self.clip_bytes],
                    file_name: "clip.webm".to_string(),
                }),
            })
        }
    }

    struct FakeClassifier {
        reply: Mutex<String>,
        calls: AtomicUsize,
        last_hint: Mutex<String>,
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, _: &[u8], _: f64, hint: &str) -> Result<String, WatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_hint.lock().unwrap() = hint.to_string();
            Ok(self.reply.lock().unwrap().clone())
        }
    }

    struct FakeTranscriber {
        script: Mutex<VecDeque<Result<String, WatchError>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, _: &AudioClip) -> Result<String, WatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    struct FakeAdvisor(String);

    #[async_trait]
    impl Advisor for FakeAdvisor {
        async fn advise(&self, request: &AdviceRequest) -> Result<String, WatchError> {
            Ok(format!("{} ({} entries)", self.0, request.total_entries))
        }
    }

    #[derive(Default)]
    struct FakeSink {
        delivered: Mutex<Vec<Advice>>,
        speaking: AtomicBool,
    }

    #[async_trait]
    impl AdviceSink for FakeSink {
        async fn deliver(&self, advice: &Advice) -> Result<(), WatchError> {
            self.delivered.lock().unwrap().push(advice.clone());
            Ok(())
        }
        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }
    }

    struct Rig {
        monitor: Arc<Monitor>,
        classifier: Arc<FakeClassifier>,
        transcriber: Arc<FakeTranscriber>,
        sink: Arc<FakeSink>,
    }

    fn rig_with(frame: &[u8], clip_bytes: usize, transcripts: Vec<&str>, config: MonitorConfig) -> Rig {
        let classifier = Arc::new(FakeClassifier {
            reply: Mutex::new(VERDICT.to_string()),
            calls: AtomicUsize::new(0),
            last_hint: Mutex::new(String::new()),
        });
        let transcriber = Arc::new(FakeTranscriber {
            script: Mutex::new(transcripts.into_iter().map(|t| Ok(t.to_string())).collect()),
            calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(FakeSink::default());
        let collaborators = Collaborators {
            capture: Arc::new(FakeCapture {
                frame: frame.to_vec(),
                level: 45.0,
                clip_bytes,
            }),
            classifier: classifier.clone(),
            transcriber: transcriber.clone(),
            advisor: Arc::new(FakeAdvisor("Stand up and stretch".to_string())),
            sink: sink.clone(),
        };
        let timeline = TimelineStore::new(MemorySlot::new(), 100).into_shared();
        Rig {
            monitor: Arc::new(Monitor::new(config, timeline, collaborators)),
            classifier,
            transcriber,
            sink,
        }
    }

    fn rig(clip_bytes: usize, transcripts: Vec<&str>) -> Rig {
        rig_with(b"jpeg", clip_bytes, transcripts, MonitorConfig::default())
    }

    // ── sample tick ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sample_appends_classified_entry() {
        let rig = rig(4096, vec!["  morning standup in five  "]);
        let entry = rig.monitor.sample_once().await.unwrap();
        assert_eq!(entry.visual.activity, Activity::Typing);
        assert_eq!(entry.speech(), Some("morning standup in five"));
        assert_eq!(
            entry.audio.environment_type,
            vec![EnvironmentTag::Moderate, EnvironmentTag::Typing, EnvironmentTag::Speech]
        );
        assert_eq!(rig.monitor.lock_timeline().len(), 1);
        assert_eq!(rig.monitor.stats().samples.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn small_clips_are_not_transcribed() {
        let rig = rig(999, vec!["should never be used"]);
        let entry = rig.monitor.sample_once().await.unwrap();
        assert_eq!(rig.transcriber.calls.load(Ordering::SeqCst), 0);
        assert!(!entry.audio.speech_detected);
    }

    #[tokio::test]
    async fn no_transcription_while_sink_is_speaking() {
        let rig = rig(4096, vec!["the advice itself"]);
        rig.sink.speaking.store(true, Ordering::SeqCst);
        let entry = rig.monitor.sample_once().await.unwrap();
        assert_eq!(rig.transcriber.calls.load(Ordering::SeqCst), 0);
        assert!(entry.speech().is_none());
    }

    #[tokio::test]
    async fn transcription_failure_counts_as_silence() {
        let rig = rig(4096, Vec::new());
        rig.transcriber
            .script
            .lock()
            .unwrap()
            .push_back(Err(WatchError::Collaborator("503".into())));
        let entry = rig.monitor.sample_once().await.unwrap();
        assert!(entry.speech().is_none());
        assert_eq!(rig.monitor.lock_timeline().len(), 1);
    }

    #[tokio::test]
    async fn speech_hint_joins_last_three_transcripts() {
        let rig = rig(4096, vec!["one", "two", "", "three", "four"]);
        for _ in 0..5 {
            rig.monitor.sample_once().await.unwrap();
        }
        assert_eq!(*rig.classifier.last_hint.lock().unwrap(), "two three four");
    }

    #[tokio::test]
    async fn refused_sample_is_recorded_as_fallback() {
        let rig = rig(0, Vec::new());
        *rig.classifier.reply.lock().unwrap() = "I cannot describe people.".to_string();
        let entry = rig.monitor.sample_once().await.unwrap();
        assert_eq!(entry.visual.activity, Activity::Unknown);
        assert_eq!(entry.audio.environment_type, vec![EnvironmentTag::Moderate]);
        assert_eq!(rig.monitor.stats().fallback_samples.load(Ordering::Relaxed), 1);
        assert_eq!(rig.monitor.stats().samples.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn empty_frame_fails_without_appending() {
        let rig = rig_with(b"", 0, Vec::new(), MonitorConfig::default());
        let err = rig.monitor.sample_once().await.unwrap_err();
        assert!(matches!(err, WatchError::InvalidInput(_)));
        assert_eq!(rig.classifier.calls.load(Ordering::SeqCst), 0);
        assert!(rig.monitor.lock_timeline().is_empty());
        assert_eq!(rig.monitor.stats().sample_failures.load(Ordering::Relaxed), 1);
    }

    // ── advice tick ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn advice_is_delivered_to_sink() {
        let rig = rig(0, Vec::new());
        rig.monitor.sample_once().await.unwrap();
        rig.monitor.sample_once().await.unwrap();
        let advice = rig.monitor.advise_once(None).await.unwrap();
        assert_eq!(advice.message, "Stand up and stretch (2 entries)");
        assert!(!advice.fallback);
        assert_eq!(rig.sink.delivered.lock().unwrap().as_slice(), &[advice]);
    }

    #[tokio::test]
    async fn question_is_carried_through() {
        let rig = rig(0, Vec::new());
        let advice = rig.monitor.advise_once(Some(" how am I doing? ")).await.unwrap();
        assert_eq!(advice.question.as_deref(), Some("how am I doing?"));
    }

    #[tokio::test]
    async fn advice_rejects_empty_frame() {
        let rig = rig_with(b"", 0, Vec::new(), MonitorConfig::default());
        let err = rig.monitor.advise_once(None).await.unwrap_err();
        assert!(matches!(err, WatchError::InvalidInput(_)));
        assert!(rig.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_resets_timeline_and_hints() {
        let rig = rig(4096, vec!["before clear"]);
        rig.monitor.sample_once().await.unwrap();
        rig.monitor.clear();
        assert!(rig.monitor.lock_timeline().is_empty());
        rig.monitor.sample_once().await.unwrap();
        assert_eq!(*rig.classifier.last_hint.lock().unwrap(), "");
    }

    #[tokio::test]
    async fn digest_covers_recent_samples() {
        let rig = rig(0, Vec::new());
        rig.monitor.sample_once().await.unwrap();
        let digest = rig.monitor.digest(30.0);
        assert_eq!(digest.entry_count, 1);
        assert_eq!(digest.activities[0].activity, Activity::Typing);
    }

    // ── scheduling ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_ticks_until_stopped() {
        let config = MonitorConfig {
            sample_interval: Duration::from_secs(10),
            advice_interval: Duration::from_secs(30),
            initial_advice_delay: Duration::from_secs(15),
            digest_minutes: 30.0,
        };
        let rig = rig_with(b"jpeg", 0, Vec::new(), config);
        let handle = rig.monitor.spawn();

        // Ticks at 0, 10, 20, 30, 40 s; advice at 15 and 45 s.
        tokio::time::sleep(Duration::from_secs(46)).await;
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let len = rig.monitor.lock_timeline().len();
        assert_eq!(len, 5);
        assert_eq!(rig.sink.delivered.lock().unwrap().len(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rig.monitor.lock_timeline().len(), len);
    }
}
