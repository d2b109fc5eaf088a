use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use pilot_agent::SessionFactory;
use pilot_channels::ChatAdapter;
use pilot_config::AgentConfig;
use pilot_core::{PilotError, ProgressUpdate, StepResult, TaskOutcome};
use pilot_device::ScreenshotSource;

use crate::bridge;

/// Runs one task as a bounded sequence of blocking steps, relaying progress
/// to the conversation after every step.
///
/// The caller must hold a registry registration for the conversation before
/// invoking [`TaskRunner::run_task`]; the runner itself never touches the
/// registry.
pub struct TaskRunner {
    adapter: Arc<dyn ChatAdapter>,
    factory: Arc<dyn SessionFactory>,
    screenshots: Arc<dyn ScreenshotSource>,
    max_steps: u32,
    verbose: bool,
}

impl TaskRunner {
    pub fn new(
        adapter: Arc<dyn ChatAdapter>,
        factory: Arc<dyn SessionFactory>,
        screenshots: Arc<dyn ScreenshotSource>,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            adapter,
            factory,
            screenshots,
            max_steps: agent.max_steps,
            verbose: agent.verbose,
        }
    }

    /// Drive the step loop to one of its three terminal outcomes.
    pub async fn run_task(&self, task: &str) -> pilot_core::Result<TaskOutcome> {
        self.adapter
            .send_message(&format!("Starting task: {task}"))
            .await;

        let hooks = bridge::interaction_hooks(Arc::clone(&self.adapter));
        let mut session = self.factory.open(hooks)?;

        let mut step_num: u32 = 0;
        let mut first = true;

        while step_num < self.max_steps {
            // Checked only at the loop top; a step already in flight always
            // completes before cancellation is observed.
            if self.adapter.is_cancelled() {
                info!("task cancelled at step boundary {}", step_num + 1);
                self.adapter.send_message("Task cancelled by user").await;
                return Ok(TaskOutcome::Cancelled);
            }

            step_num += 1;
            let task_text = first.then(|| task.to_string());
            first = false;

            // The blocking step runs on the blocking pool so this context
            // stays free for other conversations and for gate resolution.
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let mut session = session;
                let result = match task_text {
                    Some(text) => session.start(&text),
                    None => session.resume(),
                };
                (session, result)
            })
            .await
            .map_err(|e| PilotError::Agent(format!("step worker failed: {e}")))?;
            session = returned;
            let result = result?;

            self.send_step_progress(&result, step_num).await;

            if result.finished {
                let message = result.message.unwrap_or_else(|| "Done".to_string());
                self.adapter
                    .send_message(&format!("Task completed!\n\n{message}"))
                    .await;
                return Ok(TaskOutcome::Completed(message));
            }
        }

        self.adapter.send_message("Max steps reached").await;
        Ok(TaskOutcome::MaxStepsReached)
    }

    async fn send_step_progress(&self, result: &StepResult, step_num: u32) {
        // The temp path owns the screenshot file; it is removed when this
        // scope ends, whether or not the send succeeded.
        let screenshot: Option<TempPath> = if self.verbose {
            self.capture_screenshot().await
        } else {
            None
        };

        let update = ProgressUpdate {
            step_num,
            total_steps: self.max_steps,
            thinking: result.thinking.clone(),
            action: result.action.clone(),
            screenshot_path: screenshot.as_ref().map(|p| p.to_path_buf()),
        };
        self.adapter.send_progress(&update).await;

        debug!(step = step_num, "progress delivered");
    }

    /// Capture the device screen into a transient file. Failures are logged
    /// and swallowed; the progress update then goes out without an image.
    async fn capture_screenshot(&self) -> Option<TempPath> {
        let bytes = match self.screenshots.capture().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to capture screenshot");
                return None;
            }
        };

        let file = match tempfile::Builder::new()
            .prefix("pilot-step-")
            .suffix(".png")
            .tempfile()
        {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "failed to create screenshot temp file");
                return None;
            }
        };

        let path = file.into_temp_path();
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!(error = %e, "failed to write screenshot temp file");
            return None;
        }
        Some(path)
    }
}
