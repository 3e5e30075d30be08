//! `deskwatch` – self-monitoring coach, command line.
//!
//! This binary:
//!
//! 1. Checks for `~/.deskwatch/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Opens (and restores) the timeline at `<data_dir>/timeline.sqlite3`, or
//!    an in-memory one with `--ephemeral`.
//! 3. Wires the capture directory, the console and an OpenAI-compatible API
//!    into a [`Monitor`].
//! 4. Drops the user into an **interactive REPL** (`/start`, `/summary`,
//!    `/ask`, …).
//! 5. Intercepts **Ctrl-C**; the timeline is persisted after every sample, so
//!    exiting at any point loses nothing that was recorded.

mod capture;
mod config;
mod repl;
mod sink;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use deskwatch_memory::{MemorySlot, SqliteSlot, TimelineStore};
use deskwatch_runtime::collaborators::OpenAiCollaborator;
use deskwatch_runtime::llm_driver::LlmDriver;
use deskwatch_runtime::monitor::{Collaborators, Monitor};
use deskwatch_types::WatchError;

use crate::capture::DirectoryCapture;
use crate::sink::ConsoleSink;

fn main() {
    // Logs go to stderr; user-facing output stays on stdout.
    let _tracing = deskwatch_runtime::telemetry::init_tracing("deskwatch");
    let ephemeral = std::env::args().skip(1).any(|a| a == "--ephemeral");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – exiting.".yellow().bold());
        println!("{}", "  ✓ Timeline is saved after every sample.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(config = ?cfg, "configuration resolved");

    if cfg.api_key.is_empty() {
        println!(
            "  {} No API key set; hosted APIs will reject requests. Set {} or {}.",
            "!".yellow().bold(),
            "DESKWATCH_API_KEY".bold(),
            "OPENAI_API_KEY".bold()
        );
    }

    // ── Timeline ──────────────────────────────────────────────────────────
    let timeline = if ephemeral {
        println!("  Timeline: {}", "in memory (--ephemeral)".yellow());
        TimelineStore::open(MemorySlot::new(), cfg.timeline_capacity)
    } else {
        match open_sqlite_timeline(&cfg) {
            Ok(store) => {
                println!(
                    "  Timeline: {} ({} entries restored)",
                    cfg.timeline_path().display().to_string().bold(),
                    store.len()
                );
                store
            }
            Err(e) => {
                println!(
                    "{} ({}): {}",
                    "Timeline storage unavailable".red(),
                    cfg.timeline_path().display(),
                    e
                );
                println!("  Falling back to an in-memory timeline.");
                TimelineStore::open(MemorySlot::new(), cfg.timeline_capacity)
            }
        }
    };

    // ── Collaborators ─────────────────────────────────────────────────────
    let driver = LlmDriver::new(&cfg.api_base_url, &cfg.vision_model).with_api_key(&cfg.api_key);
    let openai = Arc::new(OpenAiCollaborator::new(&driver, cfg.models()));
    let collaborators = Collaborators {
        capture: Arc::new(DirectoryCapture::new(&cfg.capture_dir)),
        classifier: openai.clone(),
        transcriber: openai.clone(),
        advisor: openai,
        sink: Arc::new(ConsoleSink),
    };
    println!(
        "  Capture directory: {}",
        cfg.capture_dir.display().to_string().bold()
    );
    println!(
        "  Models: vision {}, advice {}, transcription {} ({})",
        cfg.vision_model.bold(),
        cfg.advice_model.bold(),
        cfg.transcription_model.bold(),
        cfg.transcription_language
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };
    let monitor = Arc::new(Monitor::new(
        cfg.monitor_config(),
        timeline.into_shared(),
        collaborators,
    ));

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(repl::Session::new(&rt, monitor), shutdown);
}

fn open_sqlite_timeline(cfg: &config::Config) -> Result<TimelineStore, WatchError> {
    config::ensure_private_dir(&cfg.data_dir).map_err(WatchError::Storage)?;
    let slot = SqliteSlot::open(&cfg.timeline_path().to_string_lossy())?;
    Ok(TimelineStore::open(slot, cfg.timeline_capacity))
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║     deskwatch First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up deskwatch.\n");

    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);

    cfg.api_base_url = repl::prompt_str(
        &format!("  API base URL [{}]: ", cfg.api_base_url),
        &cfg.api_base_url,
    );
    cfg.vision_model = repl::prompt_str(
        &format!("  Vision model [{}]: ", cfg.vision_model),
        &cfg.vision_model,
    );
    cfg.advice_model = repl::prompt_str(
        &format!("  Advice model [{}]: ", cfg.advice_model),
        &cfg.advice_model,
    );
    cfg.transcription_language = repl::prompt_str(
        &format!("  Transcription language [{}]: ", cfg.transcription_language),
        &cfg.transcription_language,
    );
    let capture_dir = repl::prompt_str(
        &format!("  Capture directory [{}]: ", cfg.capture_dir.display()),
        &cfg.capture_dir.to_string_lossy(),
    );
    cfg.capture_dir = capture_dir.into();

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"     _           _                     _       _     "#.bold().cyan());
    println!("{}", r#"  __| | ___  ___| | ____      ____ _| |_ ___| |__  "#.bold().cyan());
    println!("{}", r#" / _` |/ _ \/ __| |/ /\ \ /\ / / _` | __/ __| '_ \ "#.bold().cyan());
    println!("{}", r#"| (_| |  __/\__ \   <  \ V  V / (_| | || (__| | | |"#.bold().cyan());
    println!("{}", r#" \__,_|\___||___/_|\_\  \_/\_/ \__,_|\__\___|_| |_|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "deskwatch".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Webcam and microphone self-monitoring coach");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_timeline_opens_under_data_dir() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = config::Config {
            data_dir: dir.path().join("data"),
            ..config::Config::default()
        };
        let store = open_sqlite_timeline(&cfg).expect("open");
        assert!(store.is_empty());
        assert!(cfg.timeline_path().exists());
    }

    #[test]
    fn unusable_data_dir_is_a_storage_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let cfg = config::Config {
            data_dir: blocker,
            ..config::Config::default()
        };
        let err = open_sqlite_timeline(&cfg).unwrap_err();
        assert!(matches!(err, WatchError::Storage(_)));
    }
}
