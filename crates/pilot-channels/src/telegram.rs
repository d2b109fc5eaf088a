//! Telegram front-end using the Bot API over plain HTTPS.
//!
//! [`TelegramClient`] is the shared transport: message sending with Markdown
//! fallback, photo upload, in-place edits, inline keyboards, and the
//! long-poll update loop. [`TelegramAdapter`] binds one chat to the
//! [`ChatAdapter`] contract for the duration of a task.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, info, warn};

use pilot_core::{PilotError, ProgressUpdate};

use crate::adapter::{thinking_preview, ChatAdapter};
use crate::gate::{GateOutcome, GateSlot};

/// An update delivered by the long-poll loop.
#[derive(Debug, Clone)]
pub enum TelegramUpdate {
    Message {
        chat_id: i64,
        user_id: i64,
        text: String,
    },
    Callback {
        callback_id: String,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        data: String,
    },
}

/// Thin Bot API client shared by every conversation on this bot.
pub struct TelegramClient {
    token: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        // The long-poll uses timeout=30 server-side, so the request timeout
        // must leave headroom on top of that.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(45))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { token, client }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> pilot_core::Result<serde_json::Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::Channel {
                channel: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PilotError::Channel {
                channel: "telegram".into(),
                reason: format!("{method} failed: {text}"),
            });
        }
        resp.json().await.map_err(|e| PilotError::Channel {
            channel: "telegram".into(),
            reason: format!("{method} returned invalid JSON: {e}"),
        })
    }

    /// Send a text message. Tries Markdown first and falls back to plain
    /// text when Telegram rejects the formatting.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> pilot_core::Result<()> {
        self.send_text_returning_id(chat_id, text).await.map(|_| ())
    }

    /// Send a text message and return its message id (for later editing).
    pub async fn send_text_returning_id(
        &self,
        chat_id: i64,
        text: &str,
    ) -> pilot_core::Result<Option<i64>> {
        let markdown = json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" });
        match self.call("sendMessage", markdown).await {
            Ok(data) => Ok(data["result"]["message_id"].as_i64()),
            Err(_) => {
                debug!("Markdown send rejected, retrying as plain text");
                let plain = json!({ "chat_id": chat_id, "text": text });
                let data = self.call("sendMessage", plain).await?;
                Ok(data["result"]["message_id"].as_i64())
            }
        }
    }

    /// Edit a previously sent message in place.
    pub async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> pilot_core::Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        self.call("editMessageText", body).await.map(|_| ())
    }

    /// Upload a photo from disk using multipart form data.
    pub async fn send_photo(&self, chat_id: i64, path: &Path, caption: &str) -> pilot_core::Result<()> {
        let bytes = tokio::fs::read(path).await.map_err(|e| PilotError::Channel {
            channel: "telegram".into(),
            reason: format!("failed to read photo {}: {e}", path.display()),
        })?;

        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("image/png")
            .map_err(|e| PilotError::Channel {
                channel: "telegram".into(),
                reason: e.to_string(),
            })?;

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PilotError::Channel {
                channel: "telegram".into(),
                reason: format!("sendPhoto failed: {e}"),
            })?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PilotError::Channel {
                channel: "telegram".into(),
                reason: format!("sendPhoto failed: {text}"),
            });
        }
        Ok(())
    }

    /// Send a message with an inline keyboard of `(label, callback_data)`
    /// buttons on one row.
    pub async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[(&str, &str)],
    ) -> pilot_core::Result<()> {
        let row: Vec<serde_json::Value> = buttons
            .iter()
            .map(|(label, data)| json!({ "text": label, "callback_data": data }))
            .collect();
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "reply_markup": { "inline_keyboard": [row] },
        });
        self.call("sendMessage", body).await.map(|_| ())
    }

    /// Answer a callback query so the client stops showing a spinner.
    pub async fn answer_callback(&self, callback_id: &str) {
        let body = json!({ "callback_query_id": callback_id });
        if let Err(e) = self.call("answerCallbackQuery", body).await {
            debug!(error = %e, "failed to answer callback query");
        }
    }

    /// Spawn the long-poll loop. Updates arrive on the returned receiver
    /// until the receiver is dropped.
    pub fn spawn_updates(self: &Arc<Self>) -> mpsc::Receiver<TelegramUpdate> {
        let (tx, rx) = mpsc::channel(256);
        let client = Arc::clone(self);

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let mut consecutive_failures: u32 = 0;
            info!("telegram long-poll started");

            loop {
                if tx.is_closed() {
                    info!("telegram poll loop: receiver dropped, stopping");
                    break;
                }

                let url = format!(
                    "{}?offset={}&timeout=30",
                    client.api_url("getUpdates"),
                    offset
                );
                let resp = match client.client.get(&url).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        if e.is_timeout() {
                            // Expected when no updates arrive; poll again.
                            continue;
                        }
                        consecutive_failures += 1;
                        warn!(error = %e, "telegram poll network error");
                        tokio::time::sleep(backoff(consecutive_failures)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(data) => data,
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(error = %e, "telegram poll: invalid JSON response");
                        tokio::time::sleep(backoff(consecutive_failures)).await;
                        continue;
                    }
                };

                if data["ok"].as_bool() != Some(true) {
                    consecutive_failures += 1;
                    warn!(
                        error_code = data["error_code"].as_i64().unwrap_or(0),
                        description = data["description"].as_str().unwrap_or("unknown"),
                        "telegram API error response"
                    );
                    tokio::time::sleep(backoff(consecutive_failures)).await;
                    continue;
                }
                consecutive_failures = 0;

                if let Some(updates) = data["result"].as_array() {
                    for update in updates {
                        if let Some(uid) = update["update_id"].as_i64() {
                            offset = uid + 1;
                        }
                        if let Some(parsed) = parse_update(update) {
                            if tx.send(parsed).await.is_err() {
                                info!("telegram poll loop: receiver dropped during dispatch");
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 60s.
fn backoff(consecutive_failures: u32) -> std::time::Duration {
    let secs = 1u64
        .checked_shl(consecutive_failures.min(6))
        .unwrap_or(60)
        .min(60);
    std::time::Duration::from_secs(secs)
}

/// Parse one entry of a getUpdates result. Unknown update kinds are skipped.
fn parse_update(update: &serde_json::Value) -> Option<TelegramUpdate> {
    if let Some(cbq) = update.get("callback_query") {
        return Some(TelegramUpdate::Callback {
            callback_id: cbq["id"].as_str().unwrap_or("").to_string(),
            chat_id: cbq["message"]["chat"]["id"].as_i64()?,
            user_id: cbq["from"]["id"].as_i64()?,
            message_id: cbq["message"]["message_id"].as_i64().unwrap_or(0),
            data: cbq["data"].as_str().unwrap_or("").to_string(),
        });
    }
    if let Some(msg) = update.get("message") {
        return Some(TelegramUpdate::Message {
            chat_id: msg["chat"]["id"].as_i64()?,
            user_id: msg["from"]["id"].as_i64()?,
            text: msg["text"].as_str()?.to_string(),
        });
    }
    debug!("skipping unrecognized telegram update");
    None
}

/// One chat bound to the [`ChatAdapter`] contract for the run of a task.
pub struct TelegramAdapter {
    client: Arc<TelegramClient>,
    chat_id: i64,
    cancelled: AtomicBool,
    /// Message id of the in-place progress message, set on first step.
    progress_message_id: TokioMutex<Option<i64>>,
    gate: GateSlot,
    timeout_secs: u64,
}

impl TelegramAdapter {
    pub fn new(client: Arc<TelegramClient>, chat_id: i64, timeout_secs: u64) -> Self {
        Self {
            client,
            chat_id,
            cancelled: AtomicBool::new(false),
            progress_message_id: TokioMutex::new(None),
            gate: GateSlot::new(),
            timeout_secs,
        }
    }

    async fn gate_timed_out(&self, what: &str) {
        self.gate.clear();
        warn!(chat_id = self.chat_id, what, "interaction timed out — cancelling task");
        self.send_message(&format!("No reply to the {what} request — cancelling the task."))
            .await;
        self.cancel();
    }
}

#[async_trait]
impl ChatAdapter for TelegramAdapter {
    fn channel(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, text: &str) {
        if let Err(e) = self.client.send_text(self.chat_id, text).await {
            warn!(chat_id = self.chat_id, error = %e, "failed to send message");
        }
    }

    async fn send_image(&self, path: &Path, caption: &str) {
        if let Err(e) = self.client.send_photo(self.chat_id, path, caption).await {
            warn!(chat_id = self.chat_id, error = %e, "failed to send image");
        }
    }

    async fn send_progress(&self, update: &ProgressUpdate) {
        let text = format!(
            "Step {}/{}\n\n*Thinking:*\n{}\n\n*Action:* {}",
            update.step_num,
            update.total_steps,
            thinking_preview(&update.thinking),
            update.action_name(),
        );

        let mut slot = self.progress_message_id.lock().await;
        match *slot {
            Some(message_id) => {
                if let Err(e) = self.client.edit_text(self.chat_id, message_id, &text).await {
                    debug!(error = %e, "failed to edit progress message");
                }
            }
            None => match self.client.send_text_returning_id(self.chat_id, &text).await {
                Ok(id) => *slot = id,
                Err(e) => warn!(error = %e, "failed to send progress message"),
            },
        }
        drop(slot);

        if let Some(path) = &update.screenshot_path {
            if let Err(e) = self
                .client
                .send_photo(self.chat_id, path, &format!("Step {}", update.step_num))
                .await
            {
                warn!(error = %e, "failed to send screenshot");
            }
        }
    }

    async fn ask_confirmation(&self, message: &str) -> bool {
        let rx = self.gate.arm();
        if let Err(e) = self
            .client
            .send_keyboard(
                self.chat_id,
                &format!("*Confirmation Required*\n\n{message}"),
                &[("Confirm", "confirm_yes"), ("Cancel", "confirm_no")],
            )
            .await
        {
            warn!(error = %e, "failed to send confirmation prompt");
        }

        match GateSlot::wait(rx, self.timeout_secs).await {
            GateOutcome::Resolved(decision) => decision,
            GateOutcome::TimedOut => {
                self.gate_timed_out("confirmation").await;
                false
            }
            GateOutcome::Abandoned => false,
        }
    }

    async fn ask_takeover(&self, message: &str) {
        let rx = self.gate.arm();
        if let Err(e) = self
            .client
            .send_keyboard(
                self.chat_id,
                &format!("*Manual Operation Required*\n\n{message}\n\nPress 'Done' when finished."),
                &[("Done", "takeover_done")],
            )
            .await
        {
            warn!(error = %e, "failed to send takeover prompt");
        }

        match GateSlot::wait(rx, self.timeout_secs).await {
            GateOutcome::Resolved(_) | GateOutcome::Abandoned => {}
            GateOutcome::TimedOut => self.gate_timed_out("takeover").await,
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_update() {
        let update = json!({
            "update_id": 7,
            "message": {
                "message_id": 11,
                "chat": { "id": 1234 },
                "from": { "id": 42 },
                "text": "Open WeChat"
            }
        });
        match parse_update(&update) {
            Some(TelegramUpdate::Message { chat_id, user_id, text }) => {
                assert_eq!(chat_id, 1234);
                assert_eq!(user_id, 42);
                assert_eq!(text, "Open WeChat");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_callback_update() {
        let update = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb1",
                "data": "confirm_yes",
                "from": { "id": 42 },
                "message": { "message_id": 99, "chat": { "id": 1234 } }
            }
        });
        match parse_update(&update) {
            Some(TelegramUpdate::Callback {
                callback_id,
                chat_id,
                message_id,
                data,
                ..
            }) => {
                assert_eq!(callback_id, "cb1");
                assert_eq!(chat_id, 1234);
                assert_eq!(message_id, 99);
                assert_eq!(data, "confirm_yes");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_non_text_update_skipped() {
        let update = json!({ "update_id": 9, "edited_message": { "text": "x" } });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn test_backoff_caps() {
        assert_eq!(backoff(1).as_secs(), 2);
        assert_eq!(backoff(10).as_secs(), 60);
    }
}
