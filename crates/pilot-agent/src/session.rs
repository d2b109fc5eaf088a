use pilot_core::StepResult;

/// Callbacks through which a step in flight reaches the human.
///
/// Both closures are invoked from the step's blocking worker thread and must
/// block that thread until the interaction resolves, never the async
/// workers. The task runner builds them over the conversation's adapter.
pub struct InteractionHooks {
    /// Ask a yes/no question; returns the human's decision.
    pub confirm: Box<dyn Fn(&str) -> bool + Send + Sync>,
    /// Ask the human to take over the device; returns once they signal done.
    pub takeover: Box<dyn Fn(&str) + Send + Sync>,
}

impl InteractionHooks {
    /// Hooks that confirm everything and return immediately. Test use only.
    pub fn auto_approve() -> Self {
        Self {
            confirm: Box::new(|_| true),
            takeover: Box::new(|_| ()),
        }
    }
}

/// One task run of the step executor. Stateful: the session carries the
/// agent's internal context between steps, so `resume()` takes no task text.
pub trait AgentSession: Send {
    /// Execute the first step of a task.
    fn start(&mut self, task: &str) -> pilot_core::Result<StepResult>;

    /// Execute the next step, resuming internal state.
    fn resume(&mut self) -> pilot_core::Result<StepResult>;
}

/// Constructs one session per task run, wiring in the interaction hooks.
pub trait SessionFactory: Send + Sync {
    fn open(&self, hooks: InteractionHooks) -> pilot_core::Result<Box<dyn AgentSession>>;
}
