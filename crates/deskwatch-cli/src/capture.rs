//! Capture-directory source.
//!
//! An external recorder keeps three files up to date inside one directory:
//!
//! | file | contents |
//! |---|---|
//! | `frame.jpg` | latest webcam frame |
//! | `level` | ambient level as a decimal number |
//! | `clip.webm` or `clip.wav` | latest microphone clip |
//!
//! Only the frame is mandatory. A missing or unreadable level reads as 0;
//! a missing clip means no audio for this sample.

use std::path::PathBuf;

use async_trait::async_trait;
use deskwatch_runtime::collaborators::{AudioClip, Capture, CaptureSource};
use deskwatch_types::WatchError;
use tracing::debug;

pub const FRAME_FILE: &str = "frame.jpg";
pub const LEVEL_FILE: &str = "level";
pub const CLIP_FILES: [&str; 2] = ["clip.webm", "clip.wav"];

pub struct DirectoryCapture {
    dir: PathBuf,
}

impl DirectoryCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_level(&self) -> f64 {
        let path = self.dir.join(LEVEL_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw.trim().parse::<f64>().unwrap_or_else(|e| {
                debug!(path = %path.display(), error = %e, "level unreadable; using 0");
                0.0
            }),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no level file; using 0");
                0.0
            }
        }
    }

    async fn read_clip(&self) -> Option<AudioClip> {
        for name in CLIP_FILES {
            if let Ok(bytes) = tokio::fs::read(self.dir.join(name)).await {
                return Some(AudioClip {
                    bytes,
                    file_name: name.to_string(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl CaptureSource for DirectoryCapture {
    async fn capture(&self) -> Result<Capture, WatchError> {
        let frame_path = self.dir.join(FRAME_FILE);
        let frame = tokio::fs::read(&frame_path)
            .await
            .map_err(|e| WatchError::Capture(format!("{}: {e}", frame_path.display())))?;
        Ok(Capture {
            frame,
            ambient_level: self.read_level().await,
            audio_clip: self.read_clip().await,
        })
    }
}
