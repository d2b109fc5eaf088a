//! Blocking client session for an OpenAI-compatible phone-use VLM endpoint.
//!
//! The endpoint owns the decision logic. Each step here is transport: capture
//! the screen, send it with the conversation so far, parse the returned
//! thinking/action pair, and execute the primitive device action it names.
//! `confirm` and `takeover` actions route through the interaction hooks.

use base64::Engine;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use pilot_config::{AgentConfig, ModelConfig};
use pilot_core::{PilotError, StepResult};
use pilot_device::AdbBridge;

use crate::session::{AgentSession, InteractionHooks, SessionFactory};

const SYSTEM_PROMPT_EN: &str = "You are a phone-operation agent driving a real Android device. \
Each turn you receive a screenshot of the current screen. Reply with exactly one JSON object: \
{\"thinking\": \"<your reasoning>\", \"action\": {\"action\": \"<name>\", ...}}. \
Available actions: tap{x,y}, swipe{x1,y1,x2,y2}, type{text}, back{}, home{}, launch{package}, \
wait{seconds}, confirm{message} to ask the user before a risky step such as a payment or sending \
a message, takeover{message} to hand the device to the user for logins or captchas, and \
finish{message} when the task is complete.";

const SYSTEM_PROMPT_CN: &str = "你是一个操作真实安卓手机的智能体。每一轮你会收到当前屏幕截图。\
请只回复一个 JSON 对象：{\"thinking\": \"<推理过程>\", \"action\": {\"action\": \"<名称>\", ...}}。\
可用动作：tap{x,y}、swipe{x1,y1,x2,y2}、type{text}、back{}、home{}、launch{package}、wait{seconds}、\
confirm{message}（支付、发送消息等敏感操作前询问用户）、takeover{message}（登录、验证码等需要用户\
手动接管时）、finish{message}（任务完成时）。";

/// Keep at most this many prior messages in the request context.
const MAX_HISTORY: usize = 40;

/// Builds a [`VlmSession`] per task run.
pub struct VlmSessionFactory {
    model: ModelConfig,
    agent: AgentConfig,
}

impl VlmSessionFactory {
    pub fn new(model: ModelConfig, agent: AgentConfig) -> Self {
        Self { model, agent }
    }
}

impl SessionFactory for VlmSessionFactory {
    fn open(&self, hooks: InteractionHooks) -> pilot_core::Result<Box<dyn AgentSession>> {
        // Captured on the async side; the session later uses it to submit
        // device and HTTP work from its blocking worker thread.
        let handle = Handle::try_current()
            .map_err(|_| PilotError::Agent("vlm session must be opened inside a tokio runtime".into()))?;

        Ok(Box::new(VlmSession {
            handle,
            http: reqwest::Client::new(),
            model: self.model.clone(),
            agent: self.agent.clone(),
            adb: AdbBridge::new(self.agent.device_id.clone()),
            hooks,
            messages: Vec::new(),
            feedback: None,
        }))
    }
}

struct VlmSession {
    handle: Handle,
    http: reqwest::Client,
    model: ModelConfig,
    agent: AgentConfig,
    adb: AdbBridge,
    hooks: InteractionHooks,
    /// Chat history, system prompt excluded.
    messages: Vec<Value>,
    /// Outcome of the previous action, surfaced to the model next turn.
    feedback: Option<String>,
}

impl AgentSession for VlmSession {
    fn start(&mut self, task: &str) -> pilot_core::Result<StepResult> {
        self.step(Some(task))
    }

    fn resume(&mut self) -> pilot_core::Result<StepResult> {
        self.step(None)
    }
}

impl VlmSession {
    fn step(&mut self, task: Option<&str>) -> pilot_core::Result<StepResult> {
        let png = self.handle.block_on(self.adb.screenshot())?;
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );

        let mut content = vec![json!({
            "type": "image_url",
            "image_url": { "url": data_url },
        })];
        if let Some(task) = task {
            content.push(json!({ "type": "text", "text": task }));
        }
        if let Some(feedback) = self.feedback.take() {
            content.push(json!({ "type": "text", "text": feedback }));
        }
        self.messages.push(json!({ "role": "user", "content": content }));

        let reply = self.handle.block_on(self.complete())?;
        debug!(reply_len = reply.len(), "model replied");

        // Screenshots are only relevant for the turn they were taken in;
        // replace them with a placeholder so the context stays bounded.
        if let Some(last) = self.messages.last_mut() {
            if let Some(parts) = last.get_mut("content").and_then(|c| c.as_array_mut()) {
                for part in parts.iter_mut() {
                    if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                        *part = json!({ "type": "text", "text": "[screenshot]" });
                    }
                }
            }
        }
        self.messages.push(json!({ "role": "assistant", "content": reply }));
        if self.messages.len() > MAX_HISTORY {
            let excess = self.messages.len() - MAX_HISTORY;
            self.messages.drain(..excess);
        }

        let result = parse_step(&reply);
        if !result.finished {
            self.perform_action(&result)?;
        }
        Ok(result)
    }

    /// One chat-completions round trip.
    async fn complete(&self) -> pilot_core::Result<String> {
        let system = if self.agent.lang == "en" {
            SYSTEM_PROMPT_EN
        } else {
            SYSTEM_PROMPT_CN
        };
        let mut messages = vec![json!({ "role": "system", "content": system })];
        messages.extend(self.messages.iter().cloned());

        let body = json!({
            "model": self.model.model_name,
            "messages": messages,
            "max_tokens": 1024,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.model.base_url.trim_end_matches('/')))
            .bearer_auth(&self.model.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::Model(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PilotError::Model(format!("HTTP {status}: {text}")));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| PilotError::Model(format!("invalid response body: {e}")))?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PilotError::Model("response carries no message content".into()))
    }

    /// Execute the primitive action the model chose; device errors abort the
    /// task, malformed arguments are fed back to the model instead.
    fn perform_action(&mut self, result: &StepResult) -> pilot_core::Result<()> {
        let action = &result.action;
        match result.action_name() {
            "tap" => match (coord(action, "x"), coord(action, "y")) {
                (Some(x), Some(y)) => self.handle.block_on(self.adb.tap(x, y))?,
                _ => self.feedback = Some("tap requires integer x and y".into()),
            },
            "swipe" => {
                let pts = [
                    coord(action, "x1"),
                    coord(action, "y1"),
                    coord(action, "x2"),
                    coord(action, "y2"),
                ];
                match pts {
                    [Some(x1), Some(y1), Some(x2), Some(y2)] => {
                        self.handle.block_on(self.adb.swipe(x1, y1, x2, y2, 300))?
                    }
                    _ => self.feedback = Some("swipe requires x1, y1, x2, y2".into()),
                }
            }
            "type" => match action.get("text").and_then(|t| t.as_str()) {
                Some(text) => self.handle.block_on(self.adb.type_text(text))?,
                None => self.feedback = Some("type requires a text field".into()),
            },
            "back" => self.handle.block_on(self.adb.press_key("back"))?,
            "home" => self.handle.block_on(self.adb.press_key("home"))?,
            "launch" => match action.get("package").and_then(|p| p.as_str()) {
                Some(package) => self.handle.block_on(self.adb.launch_app(package))?,
                None => self.feedback = Some("launch requires a package field".into()),
            },
            "wait" => {
                let secs = action.get("seconds").and_then(|s| s.as_u64()).unwrap_or(1).min(30);
                std::thread::sleep(std::time::Duration::from_secs(secs));
            }
            "confirm" => {
                let message = action
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Proceed with this action?");
                let approved = (self.hooks.confirm)(message);
                self.feedback = Some(if approved {
                    "The user confirmed the action.".into()
                } else {
                    "The user declined the action. Do not retry it.".into()
                });
            }
            "takeover" => {
                let message = action
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Please operate the device manually.");
                (self.hooks.takeover)(message);
                self.feedback = Some("The user has finished the manual operation.".into());
            }
            other => {
                warn!(action = other, "model requested unknown action");
                self.feedback = Some(format!("Unknown action \"{other}\""));
            }
        }
        Ok(())
    }
}

fn coord(action: &Value, field: &str) -> Option<u32> {
    action.get(field).and_then(|v| v.as_u64()).map(|v| v as u32)
}

/// Parse the model reply into a [`StepResult`].
///
/// Expects a JSON object with `thinking` and `action`; replies without one
/// are treated as a finish whose message is the raw text, so a model that
/// answers in prose still terminates the task instead of wedging it.
fn parse_step(reply: &str) -> StepResult {
    let json_part = reply
        .find('{')
        .and_then(|start| reply.rfind('}').map(|end| &reply[start..=end]));

    let parsed = json_part.and_then(|s| serde_json::from_str::<Value>(s).ok());
    let Some(parsed) = parsed else {
        return StepResult::finished(reply.trim());
    };

    let thinking = parsed
        .get("thinking")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();
    let action = parsed
        .get("action")
        .cloned()
        .filter(|a| a.is_object())
        .unwrap_or_else(|| json!({}));
    let finished = action.get("action").and_then(|a| a.as_str()) == Some("finish");
    let message = action
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from);

    StepResult {
        thinking,
        action,
        finished,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_action() {
        let reply = r#"{"thinking": "The home screen is visible", "action": {"action": "tap", "x": 100, "y": 200}}"#;
        let step = parse_step(reply);
        assert_eq!(step.thinking, "The home screen is visible");
        assert_eq!(step.action_name(), "tap");
        assert!(!step.finished);
        assert!(step.message.is_none());
    }

    #[test]
    fn test_parse_step_with_surrounding_prose() {
        let reply = "Sure, here is my step:\n{\"thinking\": \"done looking\", \"action\": {\"action\": \"back\"}}\nThanks!";
        let step = parse_step(reply);
        assert_eq!(step.thinking, "done looking");
        assert_eq!(step.action_name(), "back");
    }

    #[test]
    fn test_parse_step_finish() {
        let reply = r#"{"thinking": "all done", "action": {"action": "finish", "message": "Message sent"}}"#;
        let step = parse_step(reply);
        assert!(step.finished);
        assert_eq!(step.message.as_deref(), Some("Message sent"));
    }

    #[test]
    fn test_parse_step_prose_only_terminates() {
        let step = parse_step("I cannot operate this screen.");
        assert!(step.finished);
        assert_eq!(step.message.as_deref(), Some("I cannot operate this screen."));
    }

    #[test]
    fn test_coord_extraction() {
        let action = json!({ "action": "tap", "x": 10, "y": "oops" });
        assert_eq!(coord(&action, "x"), Some(10));
        assert_eq!(coord(&action, "y"), None);
    }
}
