//! Worker-to-async interaction bridge.
//!
//! A step executing on the blocking pool may need to ask the human a
//! question, but the chat interaction must run on the conversation's
//! durable async context, the one already carrying progress delivery and
//! button-click routing. The hooks built here capture that context as a
//! [`Handle`] once per task run and submit each ask onto it, blocking only
//! the worker thread until the gate resolves. No per-call runtime is ever
//! created.

use std::sync::Arc;
use tokio::runtime::Handle;

use pilot_agent::InteractionHooks;
use pilot_channels::ChatAdapter;

/// Build the confirmation/takeover hooks for one task run.
///
/// Must be called on the conversation's async context; the current runtime
/// handle is the durable scheduling target for every ask the session makes.
pub fn interaction_hooks(adapter: Arc<dyn ChatAdapter>) -> InteractionHooks {
    let handle = Handle::current();

    let confirm_adapter = Arc::clone(&adapter);
    let confirm_handle = handle.clone();

    InteractionHooks {
        confirm: Box::new(move |message: &str| {
            confirm_handle.block_on(confirm_adapter.ask_confirmation(message))
        }),
        takeover: Box::new(move |message: &str| handle.block_on(adapter.ask_takeover(message))),
    }
}
