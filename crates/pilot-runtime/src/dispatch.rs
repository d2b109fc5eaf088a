//! Shared dispatch helpers for the platform event loops: single-flight task
//! launch, cancellation, and routing of external gate resolutions.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use pilot_channels::ChatAdapter;
use pilot_core::ConversationKey;

use crate::registry::ActiveTaskRegistry;
use crate::runner::TaskRunner;

/// Result of routing an external resolution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResolution {
    /// A pending gate was released.
    Resolved,
    /// The conversation has a task but no gate was pending.
    NoPendingGate,
    /// No task is running for the conversation.
    NoActiveTask,
}

/// Register the conversation and launch its task. Returns `None` (and
/// launches nothing) when a task is already running for the key; the caller
/// sends its platform's "already running" notice.
///
/// Every exit path of the spawned task (completion, error, panic) drops the
/// registration guard, so a crashed task can never lock the conversation
/// out of future tasks.
pub fn spawn_task(
    registry: &ActiveTaskRegistry,
    key: ConversationKey,
    adapter: Arc<dyn ChatAdapter>,
    runner: TaskRunner,
    task_text: String,
) -> Option<JoinHandle<()>> {
    let guard = registry.try_register(key.clone(), Arc::clone(&adapter))?;

    Some(tokio::spawn(async move {
        let _guard = guard;
        match runner.run_task(&task_text).await {
            Ok(outcome) => {
                info!(key = %key, outcome = %outcome.status_text(), "task finished");
            }
            Err(e) => {
                error!(key = %key, error = %e, "task failed");
                adapter.send_message(&format!("Error: {e}")).await;
            }
        }
    }))
}

/// Request cooperative cancellation of the conversation's running task.
/// Returns whether a task was found.
pub fn request_cancel(registry: &ActiveTaskRegistry, key: &ConversationKey) -> bool {
    match registry.get(key) {
        Some(adapter) => {
            adapter.cancel();
            true
        }
        None => false,
    }
}

/// Route a button/card resolution to the conversation's pending gate.
/// Events with no matching task or no pending gate are logged and dropped.
pub fn resolve_gate(
    registry: &ActiveTaskRegistry,
    key: &ConversationKey,
    decision: bool,
) -> GateResolution {
    match registry.get(key) {
        None => {
            warn!(key = %key, "gate resolution for conversation with no active task — dropped");
            GateResolution::NoActiveTask
        }
        Some(adapter) => {
            if adapter.resolve_gate(decision) {
                GateResolution::Resolved
            } else {
                GateResolution::NoPendingGate
            }
        }
    }
}
