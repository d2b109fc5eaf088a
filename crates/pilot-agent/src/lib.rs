//! # pilot-agent
//!
//! The step-executor seam. The agent's decision logic lives behind an
//! OpenAI-compatible VLM endpoint; this crate wraps one task run of it as a
//! blocking [`AgentSession`] (`start(task)` for the first step, `resume()`
//! afterwards) and carries the [`InteractionHooks`] through which a step in
//! flight can ask the human for confirmation or a manual takeover.
//!
//! Sessions are blocking by contract: the task runner executes them on the
//! blocking pool, never on the async workers.

pub mod scripted;
pub mod session;
pub mod vlm;

pub use session::{AgentSession, InteractionHooks, SessionFactory};
pub use vlm::VlmSessionFactory;
