//! # pilot-runtime
//!
//! The orchestrator. Owns the blocking step loop ([`runner::TaskRunner`]),
//! the process-wide single-flight [`registry::ActiveTaskRegistry`], the
//! worker-to-async confirmation [`bridge`], and the [`dispatch`] helpers the
//! platform event loops share.

pub mod bridge;
pub mod dispatch;
pub mod registry;
pub mod runner;

pub use dispatch::{request_cancel, resolve_gate, spawn_task, GateResolution};
pub use registry::{ActiveTaskRegistry, RegistrationGuard};
pub use runner::TaskRunner;
