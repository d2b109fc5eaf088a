use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of a conversation, scoped per platform.
///
/// Used as the single-flight key in the active-task registry and to route
/// externally-triggered events (button presses, cancel commands) back to
/// the conversation's adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Channel type name (e.g., "telegram", "lark", "terminal").
    pub channel: String,
    /// Platform-specific chat/user identifier.
    pub id: String,
}

impl ConversationKey {
    pub fn new(channel: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            id: id.into(),
        }
    }

    pub fn telegram(chat_id: i64) -> Self {
        Self::new("telegram", chat_id.to_string())
    }

    pub fn lark(open_id: &str) -> Self {
        Self::new("lark", open_id)
    }

    pub fn terminal() -> Self {
        Self::new("terminal", "local")
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.id)
    }
}

/// One decision cycle produced by the step executor. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// The agent's reasoning for this step.
    pub thinking: String,
    /// The structured action the agent took (or the terminal signal).
    #[serde(default = "empty_action")]
    pub action: serde_json::Value,
    /// Whether the task is complete after this step.
    #[serde(default)]
    pub finished: bool,
    /// Final message when `finished` is set.
    #[serde(default)]
    pub message: Option<String>,
}

fn empty_action() -> serde_json::Value {
    serde_json::json!({})
}

impl StepResult {
    /// An intermediate (non-terminal) step.
    pub fn working(thinking: impl Into<String>, action: serde_json::Value) -> Self {
        Self {
            thinking: thinking.into(),
            action,
            finished: false,
            message: None,
        }
    }

    /// A terminal step carrying the agent's completion message.
    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            thinking: String::new(),
            action: serde_json::json!({ "action": "finish" }),
            finished: true,
            message: Some(message.into()),
        }
    }

    /// The action name, or "unknown" when the action map has none.
    pub fn action_name(&self) -> &str {
        self.action
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }
}

/// Per-step progress relayed to the conversation. Constructed once per step,
/// sent exactly once, then discarded; the screenshot file it references is
/// transient.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub step_num: u32,
    pub total_steps: u32,
    pub thinking: String,
    pub action: serde_json::Value,
    pub screenshot_path: Option<PathBuf>,
}

impl ProgressUpdate {
    /// The action name, or "unknown" when the action map has none.
    pub fn action_name(&self) -> &str {
        self.action
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }
}

/// The three disjoint ways a task run can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The agent reported `finished`, carrying its completion message.
    Completed(String),
    /// Cooperative cancellation observed at a step boundary.
    Cancelled,
    /// The step budget ran out before the agent finished.
    MaxStepsReached,
}

impl TaskOutcome {
    /// Final status text for callers that want a single string.
    pub fn status_text(&self) -> String {
        match self {
            TaskOutcome::Completed(message) => message.clone(),
            TaskOutcome::Cancelled => "Task cancelled".to_string(),
            TaskOutcome::MaxStepsReached => "Max steps reached".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_display() {
        assert_eq!(ConversationKey::telegram(42).to_string(), "telegram:42");
        assert_eq!(ConversationKey::lark("ou_abc").to_string(), "lark:ou_abc");
        assert_eq!(ConversationKey::terminal().to_string(), "terminal:local");
    }

    #[test]
    fn test_action_name() {
        let step = StepResult::working("looking", serde_json::json!({ "action": "tap", "x": 1 }));
        assert_eq!(step.action_name(), "tap");

        let step = StepResult::working("looking", serde_json::json!({}));
        assert_eq!(step.action_name(), "unknown");
    }

    #[test]
    fn test_outcome_status_text() {
        assert_eq!(
            TaskOutcome::Completed("Done".into()).status_text(),
            "Done"
        );
        assert_eq!(TaskOutcome::Cancelled.status_text(), "Task cancelled");
        assert_eq!(
            TaskOutcome::MaxStepsReached.status_text(),
            "Max steps reached"
        );
    }
}
