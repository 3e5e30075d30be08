//! REPL – Read-Eval-Print Loop for the deskwatch interactive shell.
//!
//! Supported slash-commands:
//!   /start            – start periodic sampling and advice
//!   /stop             – stop scheduling (in-flight ticks still finish)
//!   /sample           – run one sample tick now
//!   /summary [min]    – print the digest of the last `min` minutes
//!   /ask <question>   – ask the coach a question about right now
//!   /stats            – timeline and tick counters
//!   /clear            – erase the timeline (asks for confirmation)
//!   /help             – show this list
//!   /quit | /exit     – stop and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use deskwatch_runtime::digest::minutes_label;
use deskwatch_runtime::monitor::{Monitor, MonitorHandle};
use deskwatch_types::EntryRecord;
use tokio::runtime::Runtime;

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Sample,
    Summary(Option<f64>),
    Ask(String),
    Stats,
    Clear,
    Help,
    Quit,
}

/// Parse one input line. Errors carry the message to print.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/start" => Ok(Command::Start),
        "/stop" => Ok(Command::Stop),
        "/sample" => Ok(Command::Sample),
        "/summary" if rest.is_empty() => Ok(Command::Summary(None)),
        "/summary" => match rest.parse::<f64>() {
            Ok(m) if m.is_finite() && m > 0.0 => Ok(Command::Summary(Some(m))),
            _ => Err(format!("'{rest}' is not a positive number of minutes")),
        },
        "/ask" if rest.is_empty() => Err("usage: /ask <question>".to_string()),
        "/ask" => Ok(Command::Ask(rest.to_string())),
        "/stats" => Ok(Command::Stats),
        "/clear" => Ok(Command::Clear),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: '{other}'")),
    }
}

/// Shell state: the runtime the monitor runs on and the running scheduler,
/// if any.
pub struct Session<'rt> {
    rt: &'rt Runtime,
    monitor: Arc<Monitor>,
    handle: Option<MonitorHandle>,
}

impl<'rt> Session<'rt> {
    pub fn new(rt: &'rt Runtime, monitor: Arc<Monitor>) -> Self {
        Self {
            rt,
            monitor,
            handle: None,
        }
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(MonitorHandle::is_running)
    }

    fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut session: Session<'_>, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let prompt = if session.is_running() { "deskwatch●>" } else { "deskwatch>" };
        print!("{} ", prompt.bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Start) => cmd_start(&mut session),
            Ok(Command::Stop) => cmd_stop(&mut session),
            Ok(Command::Sample) => cmd_sample(&session),
            Ok(Command::Summary(minutes)) => cmd_summary(&session, minutes),
            Ok(Command::Ask(question)) => cmd_ask(&session, &question),
            Ok(Command::Stats) => cmd_stats(&session),
            Ok(Command::Clear) => cmd_clear(&session),
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Quit) => {
                session.stop();
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(msg) => {
                println!(
                    "{} Type {} for available commands.",
                    msg.red(),
                    "/help".bold()
                );
            }
        }
    }
    session.stop();
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "deskwatch Commands".bold().underline());
    println!("  {}            – start sampling and periodic advice", "/start".bold().cyan());
    println!("  {}             – stop scheduling new ticks", "/stop".bold().cyan());
    println!("  {}           – take one sample now", "/sample".bold().cyan());
    println!("  {}  – summarize the last N minutes", "/summary [min]".bold().cyan());
    println!("  {} – ask the coach", "/ask <question>".bold().cyan());
    println!("  {}            – timeline and tick counters", "/stats".bold().cyan());
    println!("  {}            – erase the timeline", "/clear".bold().cyan());
    println!("  {}     – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_start(session: &mut Session<'_>) {
    if session.is_running() {
        println!("{}", "Monitor is already running.".yellow());
        return;
    }
    let config = session.monitor.config().clone();
    let _enter = session.rt.enter();
    session.handle = Some(session.monitor.spawn());
    println!(
        "  {} sampling every {}s, advice every {}s (first in {}s)",
        "✓".green().bold(),
        config.sample_interval.as_secs(),
        config.advice_interval.as_secs(),
        config.initial_advice_delay.as_secs()
    );
}

fn cmd_stop(session: &mut Session<'_>) {
    if session.stop() {
        println!("  {} monitor stopped", "✓".green().bold());
    } else {
        println!("{}", "Monitor is not running.".yellow());
    }
}

fn cmd_sample(session: &Session<'_>) {
    match session.rt.block_on(session.monitor.sample_once()) {
        Ok(entry) => println!("  {}", describe_entry(&entry)),
        Err(e) => println!("{}: {}", "Sample failed".red(), e),
    }
}

fn cmd_summary(session: &Session<'_>, minutes: Option<f64>) {
    let minutes = minutes.unwrap_or(session.monitor.config().digest_minutes);
    let digest = session.monitor.digest(minutes);
    if digest.is_empty() {
        println!("  {}", format!("No observations in the last {}.", minutes_label(minutes)).dimmed());
        return;
    }
    println!();
    for line in digest.to_string().lines() {
        println!("  {line}");
    }
    println!();
}

fn cmd_ask(session: &Session<'_>, question: &str) {
    // The sink prints the answer.
    if let Err(e) = session.rt.block_on(session.monitor.advise_once(Some(question))) {
        println!("{}: {}", "Could not ask".red(), e);
    }
}

fn cmd_stats(session: &Session<'_>) {
    let (len, capacity, latest) = {
        let timeline = session.monitor.lock_timeline();
        (timeline.len(), timeline.capacity(), timeline.latest().cloned())
    };
    let stats = session.monitor.stats();
    println!("{}", "Statistics".bold().underline());
    println!(
        "  Monitor        : {}",
        if session.is_running() { "running".green() } else { "stopped".yellow() }
    );
    println!("  Timeline       : {len} / {capacity} entries");
    match latest {
        Some(entry) => println!("  Latest         : {}", describe_entry(&entry)),
        None => println!("  Latest         : {}", "(empty)".dimmed()),
    }
    println!(
        "  Samples        : {} ok, {} failed, {} fallback",
        stats.samples.load(Ordering::Relaxed),
        stats.sample_failures.load(Ordering::Relaxed),
        stats.fallback_samples.load(Ordering::Relaxed)
    );
    println!(
        "  Advice         : {} delivered, {} fallback",
        stats.advice.load(Ordering::Relaxed),
        stats.fallback_advice.load(Ordering::Relaxed)
    );
}

fn cmd_clear(session: &Session<'_>) {
    let answer = prompt_str("  Erase the whole timeline? [y/N]: ", "n");
    if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") {
        session.monitor.clear();
        println!("  {} timeline cleared", "✓".green().bold());
    } else {
        println!("  {}", "Kept.".dimmed());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// One-line description of an entry.
pub fn describe_entry(entry: &EntryRecord) -> String {
    let mut line = format!(
        "{} {} / {} / {} · focus {} · mood {} · {:.0} dB",
        entry.timestamp.format("%H:%M:%S"),
        entry.visual.activity,
        entry.visual.posture,
        entry.visual.expression,
        entry.inference.focus_level,
        entry.inference.mood,
        entry.audio.level
    );
    if let Some(speech) = entry.speech() {
        line.push_str(&format!(" · \"{speech}\""));
    }
    line
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}
