//! # pilot-channels
//!
//! Conversation adapters. Each adapter bridges one chat front-end (Telegram,
//! Lark, the local terminal) to the task runner through the shared
//! [`ChatAdapter`] contract: progress delivery, screenshots, cooperative
//! cancellation, and the single-use confirmation/takeover gate.
//!
//! Adapters differ only in rendering and transport; the suspension and
//! single-pending-gate guarantees are identical across all of them.

pub mod adapter;
pub mod gate;
pub mod lark;
pub mod telegram;
pub mod terminal;

pub use adapter::ChatAdapter;
pub use gate::{GateOutcome, GateSlot};
