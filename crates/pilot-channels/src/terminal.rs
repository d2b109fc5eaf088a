//! Terminal front-end for running a task locally without a chat platform.
//!
//! Progress prints to stdout; confirmation and takeover read stdin on the
//! blocking pool. There is no external resolver, so `resolve_gate` is
//! always a dropped no-op here.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use pilot_core::ProgressUpdate;

use crate::adapter::ChatAdapter;

pub struct TerminalAdapter {
    cancelled: AtomicBool,
}

impl TerminalAdapter {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }
}

impl Default for TerminalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Prompt on stdout and read one stdin line on the blocking pool.
async fn prompt_line(prompt: String) -> String {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        line.trim().to_string()
    })
    .await
    .unwrap_or_default()
}

#[async_trait]
impl ChatAdapter for TerminalAdapter {
    fn channel(&self) -> &str {
        "terminal"
    }

    async fn send_message(&self, text: &str) {
        println!("{text}");
    }

    async fn send_image(&self, path: &Path, caption: &str) {
        println!("[screenshot saved: {}]", path.display());
        if !caption.is_empty() {
            println!("{caption}");
        }
    }

    async fn send_progress(&self, update: &ProgressUpdate) {
        println!("\n{}", "=".repeat(50));
        println!("Step {}/{}", update.step_num, update.total_steps);
        println!("Thinking: {}", update.thinking);
        println!(
            "Action: {}",
            serde_json::to_string_pretty(&update.action).unwrap_or_else(|_| "{}".into())
        );
        if let Some(path) = &update.screenshot_path {
            println!("Screenshot: {}", path.display());
        }
        println!("{}", "=".repeat(50));
    }

    async fn ask_confirmation(&self, message: &str) -> bool {
        let answer = prompt_line(format!("Confirm: {message} (Y/N): ")).await;
        answer.eq_ignore_ascii_case("y")
    }

    async fn ask_takeover(&self, message: &str) {
        let _ = prompt_line(format!("{message}\nPress Enter after completing... ")).await;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn resolve_gate(&self, _decision: bool) -> bool {
        debug!("terminal adapter has no external gate resolver");
        false
    }
}
