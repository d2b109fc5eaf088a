//! # pilot-core
//!
//! Core types and error types for the Phonepilot task orchestrator.
//! This crate defines the shared vocabulary used by every other crate
//! in the workspace.

pub mod error;
pub mod types;

pub use error::{PilotError, Result};
pub use types::{ConversationKey, ProgressUpdate, StepResult, TaskOutcome};
