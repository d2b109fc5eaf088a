//! Lark (Feishu) front-end using the open-platform HTTP API.
//!
//! [`LarkClient`] handles tenant-token caching, text messages, image upload,
//! and interactive cards; [`LarkAdapter`] binds one user to the
//! [`ChatAdapter`] contract. Inbound events arrive over the webhook hosted
//! by the CLI, not here.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

use pilot_core::{PilotError, ProgressUpdate};

use crate::adapter::{thinking_preview, ChatAdapter};
use crate::gate::{GateOutcome, GateSlot};

/// Tenant tokens last two hours; refresh with margin.
const TOKEN_TTL: Duration = Duration::from_secs(90 * 60);

/// Thin open-platform client shared by every conversation on this bot.
pub struct LarkClient {
    app_id: String,
    app_secret: String,
    base_url: String,
    client: reqwest::Client,
    token: TokioMutex<Option<(String, Instant)>>,
}

impl LarkClient {
    pub fn new(app_id: String, app_secret: String, base_url: String) -> Self {
        Self {
            app_id,
            app_secret,
            base_url,
            client: reqwest::Client::new(),
            token: TokioMutex::new(None),
        }
    }

    /// Fetch (or reuse) a tenant access token.
    async fn tenant_token(&self) -> pilot_core::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < TOKEN_TTL {
                return Ok(token.clone());
            }
        }

        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.base_url
        );
        let body = json!({ "app_id": self.app_id, "app_secret": self.app_secret });
        let resp: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| lark_err(format!("token request failed: {e}")))?
            .json()
            .await
            .map_err(|e| lark_err(format!("token response invalid: {e}")))?;

        let token = resp["tenant_access_token"]
            .as_str()
            .ok_or_else(|| lark_err(format!("no tenant_access_token in response: {resp}")))?
            .to_string();
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }

    async fn send_content(
        &self,
        open_id: &str,
        msg_type: &str,
        content: String,
    ) -> pilot_core::Result<()> {
        let token = self.tenant_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages?receive_id_type=open_id",
            self.base_url
        );
        let body = json!({
            "receive_id": open_id,
            "msg_type": msg_type,
            "content": content,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| lark_err(format!("send failed: {e}")))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(lark_err(format!("send failed: {text}")));
        }
        Ok(())
    }

    /// Send a plain text message.
    pub async fn send_text(&self, open_id: &str, text: &str) -> pilot_core::Result<()> {
        let content = json!({ "text": text }).to_string();
        self.send_content(open_id, "text", content).await
    }

    /// Upload an image and send it as a message.
    pub async fn send_image(&self, open_id: &str, path: &Path) -> pilot_core::Result<()> {
        let token = self.tenant_token().await?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| lark_err(format!("failed to read image {}: {e}", path.display())))?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("screenshot.png")
            .mime_str("image/png")
            .map_err(|e| lark_err(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("image_type", "message")
            .part("image", part);

        let resp: serde_json::Value = self
            .client
            .post(format!("{}/open-apis/im/v1/images", self.base_url))
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| lark_err(format!("image upload failed: {e}")))?
            .json()
            .await
            .map_err(|e| lark_err(format!("image upload response invalid: {e}")))?;

        let image_key = resp["data"]["image_key"]
            .as_str()
            .ok_or_else(|| lark_err(format!("no image_key in upload response: {resp}")))?;

        let content = json!({ "image_key": image_key }).to_string();
        self.send_content(open_id, "image", content).await
    }

    /// Send an interactive card: a markdown body plus one row of buttons,
    /// each carrying an action value routed back through the webhook.
    pub async fn send_card(
        &self,
        open_id: &str,
        text: &str,
        buttons: &[(&str, &str)],
    ) -> pilot_core::Result<()> {
        let actions: Vec<serde_json::Value> = buttons
            .iter()
            .map(|(label, action)| {
                json!({
                    "tag": "button",
                    "text": { "tag": "plain_text", "content": label },
                    "type": "primary",
                    "value": { "action": action },
                })
            })
            .collect();

        let mut elements = vec![json!({
            "tag": "div",
            "text": { "tag": "lark_md", "content": text },
        })];
        if !actions.is_empty() {
            elements.push(json!({ "tag": "action", "actions": actions }));
        }

        let card = json!({
            "config": { "wide_screen_mode": true },
            "elements": elements,
        });
        self.send_content(open_id, "interactive", card.to_string())
            .await
    }
}

fn lark_err(reason: String) -> PilotError {
    PilotError::Channel {
        channel: "lark".into(),
        reason,
    }
}

/// One Lark user bound to the [`ChatAdapter`] contract for a task run.
pub struct LarkAdapter {
    client: Arc<LarkClient>,
    open_id: String,
    cancelled: AtomicBool,
    gate: GateSlot,
    timeout_secs: u64,
}

impl LarkAdapter {
    pub fn new(client: Arc<LarkClient>, open_id: String, timeout_secs: u64) -> Self {
        Self {
            client,
            open_id,
            cancelled: AtomicBool::new(false),
            gate: GateSlot::new(),
            timeout_secs,
        }
    }

    async fn gate_timed_out(&self, what: &str) {
        self.gate.clear();
        warn!(open_id = %self.open_id, what, "interaction timed out — cancelling task");
        self.send_message(&format!("No reply to the {what} request — cancelling the task."))
            .await;
        self.cancel();
    }
}

#[async_trait]
impl ChatAdapter for LarkAdapter {
    fn channel(&self) -> &str {
        "lark"
    }

    async fn send_message(&self, text: &str) {
        if let Err(e) = self.client.send_text(&self.open_id, text).await {
            warn!(open_id = %self.open_id, error = %e, "failed to send message");
        }
    }

    async fn send_image(&self, path: &Path, caption: &str) {
        if let Err(e) = self.client.send_image(&self.open_id, path).await {
            warn!(open_id = %self.open_id, error = %e, "failed to send image");
            return;
        }
        if !caption.is_empty() {
            debug!(caption, "image caption rendered as separate text");
            if let Err(e) = self.client.send_text(&self.open_id, caption).await {
                warn!(error = %e, "failed to send image caption");
            }
        }
    }

    async fn send_progress(&self, update: &ProgressUpdate) {
        let text = format!(
            "**Step {}/{}**\n**Thinking:** {}\n**Action:** {}",
            update.step_num,
            update.total_steps,
            thinking_preview(&update.thinking),
            update.action_name(),
        );
        if let Err(e) = self
            .client
            .send_card(&self.open_id, &text, &[])
            .await
        {
            warn!(error = %e, "failed to send progress card");
        }

        if let Some(path) = &update.screenshot_path {
            if let Err(e) = self.client.send_image(&self.open_id, path).await {
                warn!(error = %e, "failed to send screenshot");
            }
        }
    }

    async fn ask_confirmation(&self, message: &str) -> bool {
        let rx = self.gate.arm();
        if let Err(e) = self
            .client
            .send_card(
                &self.open_id,
                &format!("**Confirmation Required**\n{message}"),
                &[("Confirm", "confirm"), ("Cancel", "cancel")],
            )
            .await
        {
            warn!(error = %e, "failed to send confirmation card");
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
            .send_card(
                &self.open_id,
                &format!("**Manual Operation Required**\n{message}\nPress 'Done' when finished."),
                &[("Done", "takeover_done")],
            )
            .await
        {
            warn!(error = %e, "failed to send takeover card");
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
