//! Console advice sink.

use async_trait::async_trait;
use colored::Colorize;
use deskwatch_runtime::coach::Advice;
use deskwatch_runtime::collaborators::AdviceSink;
use deskwatch_types::WatchError;

/// Prints advice to stdout. Never speaks, so transcription is never
/// suppressed.
#[derive(Debug, Default)]
pub struct ConsoleSink;

/// The lines printed for `advice`, without colour.
pub fn render(advice: &Advice) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(question) = &advice.question {
        lines.push(format!("Q: {question}"));
    }
    let label = if advice.fallback { "coach (fallback)" } else { "coach" };
    lines.push(format!("{label}: {}", advice.message));
    lines
}

#[async_trait]
impl AdviceSink for ConsoleSink {
    async fn deliver(&self, advice: &Advice) -> Result<(), WatchError> {
        println!();
        for line in render(advice) {
            if line.starts_with("Q: ") {
                println!("  {}", line.dimmed());
            } else if advice.fallback {
                println!("  {}", line.yellow());
            } else {
                println!("  {}", line.green().bold());
            }
        }
        Ok(())
    }
}
