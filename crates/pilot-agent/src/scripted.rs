//! Scripted agent session for deterministic testing.
//!
//! Returns pre-configured step results without touching a device or a model
//! endpoint. Each `open()` hands out a fresh session playing the same script.

use std::sync::{Arc, Mutex};

use pilot_core::{PilotError, StepResult};

use crate::session::{AgentSession, InteractionHooks, SessionFactory};

/// One scripted step: a result, or an error message to fail with.
#[derive(Clone)]
pub enum ScriptedStep {
    Step(StepResult),
    Error(String),
}

/// A session factory that replays a fixed script.
pub struct ScriptedFactory {
    script: Vec<ScriptedStep>,
    /// Task texts passed to `start()`, for assertions in tests.
    started_tasks: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            script: vec![],
            started_tasks: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue an intermediate step.
    pub fn with_step(mut self, thinking: &str, action: serde_json::Value) -> Self {
        self.script.push(ScriptedStep::Step(StepResult::working(thinking, action)));
        self
    }

    /// Queue a terminal step carrying a completion message.
    pub fn with_finish(mut self, message: &str) -> Self {
        self.script.push(ScriptedStep::Step(StepResult::finished(message)));
        self
    }

    /// Queue a step that fails.
    pub fn with_error(mut self, error: &str) -> Self {
        self.script.push(ScriptedStep::Error(error.to_string()));
        self
    }

    /// Task texts `start()` has been called with, across all sessions.
    pub fn started_tasks(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.started_tasks)
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for ScriptedFactory {
    fn open(&self, _hooks: InteractionHooks) -> pilot_core::Result<Box<dyn AgentSession>> {
        Ok(Box::new(ScriptedSession {
            script: self.script.clone().into(),
            started_tasks: Arc::clone(&self.started_tasks),
        }))
    }
}

struct ScriptedSession {
    script: std::collections::VecDeque<ScriptedStep>,
    started_tasks: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSession {
    fn next(&mut self) -> pilot_core::Result<StepResult> {
        match self.script.pop_front() {
            Some(ScriptedStep::Step(step)) => Ok(step),
            Some(ScriptedStep::Error(error)) => Err(PilotError::Agent(error)),
            // Script exhausted: keep "working" so max-steps paths can be tested.
            None => Ok(StepResult::working(
                "(scripted: no more queued steps)",
                serde_json::json!({ "action": "wait" }),
            )),
        }
    }
}

impl AgentSession for ScriptedSession {
    fn start(&mut self, task: &str) -> pilot_core::Result<StepResult> {
        self.started_tasks.lock().unwrap().push(task.to_string());
        self.next()
    }

    fn resume(&mut self) -> pilot_core::Result<StepResult> {
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replays_in_order() {
        let factory = ScriptedFactory::new()
            .with_step("first", serde_json::json!({ "action": "tap", "x": 1, "y": 2 }))
            .with_finish("Done");

        let mut session = factory.open(InteractionHooks::auto_approve()).unwrap();
        let s1 = session.start("open settings").unwrap();
        assert_eq!(s1.thinking, "first");
        assert!(!s1.finished);

        let s2 = session.resume().unwrap();
        assert!(s2.finished);
        assert_eq!(s2.message.as_deref(), Some("Done"));

        let tasks = factory.started_tasks();
        assert_eq!(tasks.lock().unwrap().as_slice(), ["open settings"]);
    }

    #[test]
    fn test_scripted_error_step() {
        let factory = ScriptedFactory::new().with_error("device unplugged");
        let mut session = factory.open(InteractionHooks::auto_approve()).unwrap();
        assert!(session.start("task").is_err());
    }

    #[test]
    fn test_exhausted_script_keeps_working() {
        let factory = ScriptedFactory::new();
        let mut session = factory.open(InteractionHooks::auto_approve()).unwrap();
        let step = session.start("task").unwrap();
        assert!(!step.finished);
    }
}
