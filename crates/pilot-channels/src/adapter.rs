use async_trait::async_trait;
use std::path::Path;

use pilot_core::ProgressUpdate;

/// Length cap for the thinking preview rendered in progress messages.
pub const THINKING_PREVIEW_CHARS: usize = 200;

/// Capability set a conversation front-end must implement.
///
/// Notification methods are fire-and-forget: transport failures are logged
/// by the adapter and never escalated into the task loop. `ask_confirmation`
/// and `ask_takeover` suspend the calling future until an external event
/// resolves the adapter's gate (or the configured timeout fires, which
/// counts as a denial and cancels the task).
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Channel type name ("telegram", "lark", "terminal").
    fn channel(&self) -> &str;

    /// Send a plain text notification.
    async fn send_message(&self, text: &str);

    /// Send an image from a local file.
    async fn send_image(&self, path: &Path, caption: &str);

    /// Render one step's progress. Called exactly once per step, in step
    /// order.
    async fn send_progress(&self, update: &ProgressUpdate);

    /// Ask a yes/no question; suspends until resolved.
    async fn ask_confirmation(&self, message: &str) -> bool;

    /// Ask the human to take over the device; suspends until they signal
    /// done.
    async fn ask_takeover(&self, message: &str);

    /// Whether cooperative cancellation has been requested.
    fn is_cancelled(&self) -> bool;

    /// Request cooperative cancellation; observed at the next step boundary.
    fn cancel(&self);

    /// Resolve the pending confirmation/takeover gate from an external
    /// event (button press, card action). Returns whether a gate was
    /// pending; resolutions with no pending gate are dropped.
    fn resolve_gate(&self, decision: bool) -> bool;
}

/// Bounded preview of the agent's thinking, safe on multi-byte text.
pub fn thinking_preview(thinking: &str) -> String {
    if thinking.chars().count() <= THINKING_PREVIEW_CHARS {
        return thinking.to_string();
    }
    let preview: String = thinking.chars().take(THINKING_PREVIEW_CHARS).collect();
    format!("{preview}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_thinking_unchanged() {
        assert_eq!(thinking_preview("tap the icon"), "tap the icon");
    }

    #[test]
    fn test_long_thinking_truncated() {
        let long = "x".repeat(500);
        let preview = thinking_preview(&long);
        assert_eq!(preview.chars().count(), THINKING_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let long = "界".repeat(300);
        let preview = thinking_preview(&long);
        assert_eq!(preview.chars().count(), THINKING_PREVIEW_CHARS + 3);
    }
}
