//! Configuration – reads/writes `~/.deskwatch/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use deskwatch_memory::DEFAULT_CAPACITY;
use deskwatch_runtime::collaborators::OpenAiModels;
use deskwatch_runtime::llm_driver::DEFAULT_BASE_URL;
use deskwatch_runtime::monitor::MonitorConfig;

/// Persisted user configuration stored in `~/.deskwatch/config.toml`.
///
/// Every key has a default, so a partial file is valid.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the OpenAI-compatible API.
    pub api_base_url: String,

    /// API key (stored as plain text; the file is written owner-only).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    pub vision_model: String,
    pub advice_model: String,
    pub transcription_model: String,
    /// ISO-639-1 tag sent with every transcription.
    pub transcription_language: String,
    /// Ask the vision model for schema-constrained JSON.
    pub structured_output: bool,

    /// Directory the capture process writes `frame.jpg`, `level` and the
    /// audio clip into.
    pub capture_dir: PathBuf,
    /// Directory holding `timeline.sqlite3`.
    pub data_dir: PathBuf,

    pub sample_interval_secs: u64,
    pub advice_interval_secs: u64,
    pub initial_advice_delay_secs: u64,
    /// Window length summarized for advice and `/summary`.
    pub digest_minutes: u64,
    pub timeline_capacity: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("vision_model", &self.vision_model)
            .field("advice_model", &self.advice_model)
            .field("transcription_model", &self.transcription_model)
            .field("transcription_language", &self.transcription_language)
            .field("structured_output", &self.structured_output)
            .field("capture_dir", &self.capture_dir)
            .field("data_dir", &self.data_dir)
            .field("sample_interval_secs", &self.sample_interval_secs)
            .field("advice_interval_secs", &self.advice_interval_secs)
            .field("initial_advice_delay_secs", &self.initial_advice_delay_secs)
            .field("digest_minutes", &self.digest_minutes)
            .field("timeline_capacity", &self.timeline_capacity)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let models = OpenAiModels::default();
        let base = home_dir().join(".deskwatch");
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            vision_model: models.vision,
            advice_model: models.advice,
            transcription_model: models.transcription,
            transcription_language: models.transcription_language,
            structured_output: models.structured_output,
            capture_dir: base.join("capture"),
            data_dir: base,
            sample_interval_secs: 10,
            advice_interval_secs: 30,
            initial_advice_delay_secs: 15,
            digest_minutes: 30,
            timeline_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Config {
    /// Scheduler settings. Zero intervals are raised to one second.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            sample_interval: Duration::from_secs(self.sample_interval_secs.max(1)),
            advice_interval: Duration::from_secs(self.advice_interval_secs.max(1)),
            initial_advice_delay: Duration::from_secs(self.initial_advice_delay_secs),
            digest_minutes: self.digest_minutes.max(1) as f64,
        }
    }

    pub fn models(&self) -> OpenAiModels {
        OpenAiModels {
            vision: self.vision_model.clone(),
            advice: self.advice_model.clone(),
            transcription: self.transcription_model.clone(),
            transcription_language: self.transcription_language.clone(),
            structured_output: self.structured_output,
        }
    }

    pub fn timeline_path(&self) -> PathBuf {
        self.data_dir.join("timeline.sqlite3")
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Return the path to `~/.deskwatch/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &Path) -> PathBuf {
    home.join(".deskwatch").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path, applying environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `DESKWATCH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DESKWATCH_API_BASE` | `api_base_url` |
/// | `DESKWATCH_API_KEY` (else `OPENAI_API_KEY`) | `api_key` |
/// | `DESKWATCH_MODEL` | `vision_model` and `advice_model` |
/// | `DESKWATCH_CAPTURE_DIR` | `capture_dir` |
/// | `DESKWATCH_DATA_DIR` | `data_dir` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("DESKWATCH_API_BASE") {
        cfg.api_base_url = v;
    }
    if let Some(v) = get("DESKWATCH_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
        cfg.api_key = v;
    }
    if let Some(v) = get("DESKWATCH_MODEL") {
        cfg.vision_model = v.clone();
        cfg.advice_model = v;
    }
    if let Some(v) = get("DESKWATCH_CAPTURE_DIR") {
        cfg.capture_dir = PathBuf::from(v);
    }
    if let Some(v) = get("DESKWATCH_DATA_DIR") {
        cfg.data_dir = PathBuf::from(v);
    }
}

/// Save the config to disk, creating `~/.deskwatch/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Create `dir` (and parents), restricted to the owner (rwx------) on Unix.
pub fn ensure_private_dir(dir: &Path) -> Result<(), String> {
    fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| format!("Failed to set permissions on {}: {}", dir.display(), e))?;
    }
    Ok(())
}
