//! End-to-end tests of the task runner, registry, and interaction bridge
//! using a recording adapter and scripted sessions. No device, no network.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pilot_agent::scripted::ScriptedFactory;
use pilot_agent::{AgentSession, InteractionHooks, SessionFactory};
use pilot_channels::{ChatAdapter, GateOutcome, GateSlot};
use pilot_config::AgentConfig;
use pilot_core::{ConversationKey, PilotError, ProgressUpdate, StepResult, TaskOutcome};
use pilot_device::ScreenshotSource;
use pilot_runtime::{
    request_cancel, resolve_gate, spawn_task, ActiveTaskRegistry, GateResolution, TaskRunner,
};

// ── Test doubles ───────────────────────────────────────────────

#[derive(Default)]
struct RecordingAdapter {
    messages: Mutex<Vec<String>>,
    progress_steps: Mutex<Vec<u32>>,
    prompts: Mutex<Vec<String>>,
    /// (path, existed when the send ran) for each attached screenshot.
    screenshots: Mutex<Vec<(PathBuf, bool)>>,
    cancelled: AtomicBool,
    /// Request cancellation once this many progress updates have been sent.
    cancel_after_progress: Option<u32>,
    gate: GateSlot,
    panic_on_progress: bool,
}

impl RecordingAdapter {
    fn new() -> Self {
        Self::default()
    }

    fn cancel_after(progress_count: u32) -> Self {
        Self {
            cancel_after_progress: Some(progress_count),
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn progress_steps(&self) -> Vec<u32> {
        self.progress_steps.lock().unwrap().clone()
    }

    fn screenshots(&self) -> Vec<(PathBuf, bool)> {
        self.screenshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatAdapter for RecordingAdapter {
    fn channel(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    async fn send_image(&self, _path: &Path, _caption: &str) {}

    async fn send_progress(&self, update: &ProgressUpdate) {
        if let Some(path) = &update.screenshot_path {
            self.screenshots
                .lock()
                .unwrap()
                .push((path.clone(), path.exists()));
        }
        self.progress_steps.lock().unwrap().push(update.step_num);

        if self.panic_on_progress {
            panic!("transport exploded");
        }

        if let Some(n) = self.cancel_after_progress {
            if self.progress_steps.lock().unwrap().len() as u32 >= n {
                self.cancel();
            }
        }
    }

    async fn ask_confirmation(&self, message: &str) -> bool {
        self.prompts.lock().unwrap().push(message.to_string());
        let rx = self.gate.arm();
        match GateSlot::wait(rx, 0).await {
            GateOutcome::Resolved(decision) => decision,
            _ => false,
        }
    }

    async fn ask_takeover(&self, message: &str) {
        self.prompts.lock().unwrap().push(message.to_string());
        let rx = self.gate.arm();
        let _ = GateSlot::wait(rx, 0).await;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn resolve_gate(&self, decision: bool) -> bool {
        self.gate.resolve(decision)
    }
}

struct StaticScreens;

#[async_trait]
impl ScreenshotSource for StaticScreens {
    async fn capture(&self) -> pilot_core::Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

struct FailingScreens;

#[async_trait]
impl ScreenshotSource for FailingScreens {
    async fn capture(&self) -> pilot_core::Result<Vec<u8>> {
        Err(PilotError::Device("no device attached".into()))
    }
}

/// A session whose only step asks for confirmation and reports the answer.
struct ConfirmingFactory;

impl SessionFactory for ConfirmingFactory {
    fn open(&self, hooks: InteractionHooks) -> pilot_core::Result<Box<dyn AgentSession>> {
        Ok(Box::new(ConfirmingSession { hooks }))
    }
}

struct ConfirmingSession {
    hooks: InteractionHooks,
}

impl AgentSession for ConfirmingSession {
    fn start(&mut self, _task: &str) -> pilot_core::Result<StepResult> {
        let approved = (self.hooks.confirm)("Send the message?");
        Ok(StepResult::finished(format!("confirmed={approved}")))
    }

    fn resume(&mut self) -> pilot_core::Result<StepResult> {
        self.start("")
    }
}

/// A session that parks on its first step until the test releases it.
struct HoldFactory {
    release: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

impl SessionFactory for HoldFactory {
    fn open(&self, _hooks: InteractionHooks) -> pilot_core::Result<Box<dyn AgentSession>> {
        Ok(Box::new(HoldSession {
            release: self.release.lock().unwrap().take(),
        }))
    }
}

struct HoldSession {
    release: Option<std::sync::mpsc::Receiver<()>>,
}

impl AgentSession for HoldSession {
    fn start(&mut self, _task: &str) -> pilot_core::Result<StepResult> {
        if let Some(rx) = &self.release {
            let _ = rx.recv();
        }
        Ok(StepResult::finished("Done"))
    }

    fn resume(&mut self) -> pilot_core::Result<StepResult> {
        self.start("")
    }
}

fn agent_cfg(max_steps: u32, verbose: bool) -> AgentConfig {
    AgentConfig {
        max_steps,
        device_id: None,
        verbose,
        lang: "en".into(),
        interaction_timeout_secs: 0,
    }
}

fn runner_with(
    adapter: &Arc<RecordingAdapter>,
    factory: Arc<dyn SessionFactory>,
    screenshots: Arc<dyn ScreenshotSource>,
    cfg: &AgentConfig,
) -> TaskRunner {
    TaskRunner::new(
        Arc::clone(adapter) as Arc<dyn ChatAdapter>,
        factory,
        screenshots,
        cfg,
    )
}

// ── Step loop ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_step_task_completes_with_sequential_progress() {
    let adapter = Arc::new(RecordingAdapter::new());
    let factory = Arc::new(
        ScriptedFactory::new()
            .with_step("open the app", serde_json::json!({ "action": "launch", "package": "com.tencent.mm" }))
            .with_step("tap the chat", serde_json::json!({ "action": "tap", "x": 120, "y": 540 }))
            .with_finish("Done"),
    );
    let started = factory.started_tasks();

    let registry = ActiveTaskRegistry::new();
    let key = ConversationKey::telegram(1);
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(100, false));

    let handle = spawn_task(
        &registry,
        key.clone(),
        Arc::clone(&adapter) as Arc<dyn ChatAdapter>,
        runner,
        "Open WeChat and send a message".into(),
    )
    .expect("registration succeeds");
    handle.await.unwrap();

    // Exactly three updates, strictly 1, 2, 3.
    assert_eq!(adapter.progress_steps(), vec![1, 2, 3]);

    let messages = adapter.messages();
    assert_eq!(messages[0], "Starting task: Open WeChat and send a message");
    assert!(messages.last().unwrap().contains("Done"));

    // Task text reaches the executor only on the first step.
    assert_eq!(
        started.lock().unwrap().as_slice(),
        ["Open WeChat and send a message"]
    );

    // Registry entry is gone after the terminal path.
    assert!(!registry.contains(&key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn max_steps_is_a_terminal_outcome_not_an_error() {
    let adapter = Arc::new(RecordingAdapter::new());
    // Empty script keeps returning non-terminal steps.
    let factory = Arc::new(ScriptedFactory::new());
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(3, false));

    let outcome = runner.run_task("scroll forever").await.unwrap();
    assert_eq!(outcome, TaskOutcome::MaxStepsReached);
    assert_eq!(adapter.progress_steps(), vec![1, 2, 3]);
    assert_eq!(adapter.messages().last().unwrap(), "Max steps reached");
}

// ── Cancellation ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_before_first_step_runs_no_steps() {
    let adapter = Arc::new(RecordingAdapter::new());
    adapter.cancel();

    let factory = Arc::new(ScriptedFactory::new().with_finish("never reached"));
    let started = factory.started_tasks();
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(100, false));

    let outcome = runner.run_task("do nothing").await.unwrap();
    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert!(adapter.progress_steps().is_empty());
    assert!(started.lock().unwrap().is_empty());
    assert!(adapter
        .messages()
        .iter()
        .any(|m| m == "Task cancelled by user"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_after_step_two_halts_at_step_three_boundary() {
    // Cancellation lands while step 2 is finishing; step 2 completes and the
    // run stops before step 3.
    let adapter = Arc::new(RecordingAdapter::cancel_after(2));
    let factory = Arc::new(ScriptedFactory::new());
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(100, false));

    let outcome = runner.run_task("long task").await.unwrap();
    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert_eq!(adapter.progress_steps(), vec![1, 2]);
    assert_eq!(adapter.messages().last().unwrap(), "Task cancelled by user");
}

// ── Confirmation bridge ────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn confirmation_returns_exactly_the_resolved_decision() {
    let adapter = Arc::new(RecordingAdapter::new());
    let runner = runner_with(
        &adapter,
        Arc::new(ConfirmingFactory),
        Arc::new(StaticScreens),
        &agent_cfg(100, false),
    );

    let resolver_adapter = Arc::clone(&adapter);
    let resolver = async move {
        // The resolution event races the prompt; retry until a gate is
        // pending. Early attempts are dropped no-ops by contract.
        loop {
            if resolver_adapter.resolve_gate(true) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    };

    let (outcome, _) = tokio::join!(runner.run_task("send it"), resolver);
    assert_eq!(outcome.unwrap(), TaskOutcome::Completed("confirmed=true".into()));

    // The prompt went out through the adapter.
    assert_eq!(adapter.prompts.lock().unwrap().as_slice(), ["Send the message?"]);

    // The gate was consumed: a second resolution finds nothing.
    assert!(!adapter.resolve_gate(false));
}

// ── Error handling ─────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn step_error_is_reported_and_unregisters() {
    let adapter = Arc::new(RecordingAdapter::new());
    let factory = Arc::new(
        ScriptedFactory::new()
            .with_step("going fine", serde_json::json!({ "action": "tap", "x": 1, "y": 1 }))
            .with_error("device unplugged"),
    );

    let registry = ActiveTaskRegistry::new();
    let key = ConversationKey::telegram(9);
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(100, false));

    let handle = spawn_task(
        &registry,
        key.clone(),
        Arc::clone(&adapter) as Arc<dyn ChatAdapter>,
        runner,
        "fragile task".into(),
    )
    .unwrap();
    handle.await.unwrap();

    assert_eq!(adapter.progress_steps(), vec![1]);
    assert!(adapter
        .messages()
        .iter()
        .any(|m| m.starts_with("Error:") && m.contains("device unplugged")));
    assert!(!registry.contains(&key));

    // The conversation is free for the next task.
    assert!(registry
        .try_register(key, Arc::clone(&adapter) as Arc<dyn ChatAdapter>)
        .is_some());
}

// ── Screenshot lifecycle ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn screenshot_temp_file_removed_after_send() {
    let adapter = Arc::new(RecordingAdapter::new());
    let factory = Arc::new(ScriptedFactory::new().with_finish("Done"));
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(100, true));

    runner.run_task("look once").await.unwrap();

    let screenshots = adapter.screenshots();
    assert_eq!(screenshots.len(), 1);
    let (path, existed_at_send) = &screenshots[0];
    assert!(existed_at_send, "file must exist while the send runs");
    assert!(!path.exists(), "file must be gone after the send attempt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn screenshot_temp_file_removed_even_when_send_panics() {
    let adapter = Arc::new(RecordingAdapter {
        panic_on_progress: true,
        ..RecordingAdapter::default()
    });
    let factory = Arc::new(ScriptedFactory::new().with_finish("Done"));

    let registry = ActiveTaskRegistry::new();
    let key = ConversationKey::telegram(3);
    let runner = runner_with(&adapter, factory, Arc::new(StaticScreens), &agent_cfg(100, true));

    let handle = spawn_task(
        &registry,
        key.clone(),
        Arc::clone(&adapter) as Arc<dyn ChatAdapter>,
        runner,
        "explode".into(),
    )
    .unwrap();
    assert!(handle.await.is_err(), "the send panicked");

    // Both the temp file and the registry entry are cleaned up by drops.
    let screenshots = adapter.screenshots();
    assert_eq!(screenshots.len(), 1);
    assert!(!screenshots[0].0.exists());
    assert!(!registry.contains(&key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_failure_still_delivers_progress_without_image() {
    let adapter = Arc::new(RecordingAdapter::new());
    let factory = Arc::new(ScriptedFactory::new().with_finish("Done"));
    let runner = runner_with(&adapter, factory, Arc::new(FailingScreens), &agent_cfg(100, true));

    let outcome = runner.run_task("blind run").await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed("Done".into()));
    assert_eq!(adapter.progress_steps(), vec![1]);
    assert!(adapter.screenshots().is_empty());
}

// ── Single-flight dispatch ─────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_submission_is_rejected_while_first_runs() {
    let registry = ActiveTaskRegistry::new();
    let key = ConversationKey::telegram(5);

    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let adapter = Arc::new(RecordingAdapter::new());
    let holding = Arc::new(HoldFactory {
        release: Mutex::new(Some(release_rx)),
    });
    let runner = runner_with(&adapter, holding, Arc::new(StaticScreens), &agent_cfg(100, false));

    let handle = spawn_task(
        &registry,
        key.clone(),
        Arc::clone(&adapter) as Arc<dyn ChatAdapter>,
        runner,
        "first".into(),
    )
    .expect("first submission registers");

    // Second submission while the first is parked inside step 1.
    let second_adapter = Arc::new(RecordingAdapter::new());
    let second_runner = runner_with(
        &second_adapter,
        Arc::new(ScriptedFactory::new().with_finish("never")),
        Arc::new(StaticScreens),
        &agent_cfg(100, false),
    );
    assert!(spawn_task(
        &registry,
        key.clone(),
        Arc::clone(&second_adapter) as Arc<dyn ChatAdapter>,
        second_runner,
        "second".into(),
    )
    .is_none());

    // First task proceeds unaffected.
    release_tx.send(()).unwrap();
    handle.await.unwrap();
    assert!(adapter.messages().last().unwrap().contains("Done"));
    assert!(!registry.contains(&key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_and_gate_routing_through_registry() {
    let registry = ActiveTaskRegistry::new();
    let key = ConversationKey::lark("ou_123");
    let adapter = Arc::new(RecordingAdapter::new());

    // No task yet: both routes drop.
    assert!(!request_cancel(&registry, &key));
    assert_eq!(
        resolve_gate(&registry, &key, true),
        GateResolution::NoActiveTask
    );

    let _guard = registry
        .try_register(key.clone(), Arc::clone(&adapter) as Arc<dyn ChatAdapter>)
        .unwrap();

    // Task but no pending gate: dropped, not an error.
    assert_eq!(
        resolve_gate(&registry, &key, true),
        GateResolution::NoPendingGate
    );

    // Pending gate resolves exactly once.
    let rx = adapter.gate.arm();
    assert_eq!(resolve_gate(&registry, &key, false), GateResolution::Resolved);
    assert_eq!(GateSlot::wait(rx, 0).await, GateOutcome::Resolved(false));

    // Cancellation routes to the adapter's flag.
    assert!(request_cancel(&registry, &key));
    assert!(adapter.is_cancelled());
}
