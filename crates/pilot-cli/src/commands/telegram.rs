//! Telegram bot event loop: routes inbound messages into task launches and
//! button presses into pending gates.

use std::sync::Arc;
use tracing::{debug, info, warn};

use pilot_agent::{SessionFactory, VlmSessionFactory};
use pilot_channels::telegram::{TelegramAdapter, TelegramClient, TelegramUpdate};
use pilot_channels::ChatAdapter;
use pilot_config::PilotConfig;
use pilot_core::{ConversationKey, PilotError};
use pilot_device::{AdbBridge, ScreenshotSource};
use pilot_runtime::{
    request_cancel, resolve_gate, spawn_task, ActiveTaskRegistry, GateResolution, TaskRunner,
};

const WELCOME: &str = "*Welcome to Phonepilot!*\n\n\
Send me a task to automate your phone.\n\n\
*Commands:*\n\
/start - Show this message\n\
/cancel - Cancel current task\n\
/status - Show device status\n\n\
*Example:*\n\
Open WeChat and send a message";

pub async fn cmd_telegram(config: PilotConfig) -> pilot_core::Result<()> {
    if config.telegram.token.is_empty() {
        return Err(PilotError::Config(
            "telegram.token is not set — add it to pilot.toml or TELEGRAM_BOT_TOKEN".into(),
        ));
    }

    let client = Arc::new(TelegramClient::new(config.telegram.token.clone()));
    let registry = ActiveTaskRegistry::new();
    let factory: Arc<dyn SessionFactory> =
        Arc::new(VlmSessionFactory::new(config.model.clone(), config.agent.clone()));

    let mut updates = client.spawn_updates();
    info!("telegram bot started");

    while let Some(update) = updates.recv().await {
        match update {
            TelegramUpdate::Message {
                chat_id,
                user_id,
                text,
            } => {
                if user_id != config.telegram.allowed_user_id {
                    warn!(user_id, "unauthorized access attempt");
                    let _ = client.send_text(chat_id, "Unauthorized user").await;
                    continue;
                }
                handle_message(&config, &client, &registry, &factory, chat_id, text).await;
            }
            TelegramUpdate::Callback {
                callback_id,
                chat_id,
                user_id,
                message_id,
                data,
            } => {
                client.answer_callback(&callback_id).await;
                if user_id != config.telegram.allowed_user_id {
                    warn!(user_id, "unauthorized callback ignored");
                    continue;
                }
                handle_callback(&client, &registry, chat_id, message_id, &data).await;
            }
        }
    }

    Ok(())
}

async fn handle_message(
    config: &PilotConfig,
    client: &Arc<TelegramClient>,
    registry: &ActiveTaskRegistry,
    factory: &Arc<dyn SessionFactory>,
    chat_id: i64,
    text: String,
) {
    let key = ConversationKey::telegram(chat_id);

    match text.as_str() {
        "/start" => {
            let _ = client.send_text(chat_id, WELCOME).await;
        }
        "/cancel" => {
            let notice = if request_cancel(registry, &key) {
                "Cancelling task..."
            } else {
                "No active task"
            };
            let _ = client.send_text(chat_id, notice).await;
        }
        "/status" => {
            let text = status_text(config, registry, &key).await;
            let _ = client.send_text(chat_id, &text).await;
        }
        _ if text.starts_with('/') => {
            let _ = client.send_text(chat_id, "Unknown command. Try /start.").await;
        }
        task => {
            let adapter = Arc::new(TelegramAdapter::new(
                Arc::clone(client),
                chat_id,
                config.agent.interaction_timeout_secs,
            ));
            let screenshots: Arc<dyn ScreenshotSource> =
                Arc::new(AdbBridge::new(config.agent.device_id.clone()));
            let runner = TaskRunner::new(
                Arc::clone(&adapter) as Arc<dyn ChatAdapter>,
                Arc::clone(factory),
                screenshots,
                &config.agent,
            );

            if spawn_task(
                registry,
                key,
                adapter as Arc<dyn ChatAdapter>,
                runner,
                task.to_string(),
            )
            .is_none()
            {
                let _ = client
                    .send_text(chat_id, "Another task is running. Use /cancel to stop it.")
                    .await;
            }
        }
    }
}

async fn handle_callback(
    client: &Arc<TelegramClient>,
    registry: &ActiveTaskRegistry,
    chat_id: i64,
    message_id: i64,
    data: &str,
) {
    let key = ConversationKey::telegram(chat_id);
    let (decision, ack) = match data {
        "confirm_yes" => (true, "Confirmed"),
        "confirm_no" => (false, "Cancelled"),
        "takeover_done" => (true, "Continuing task..."),
        other => {
            debug!(data = other, "unknown callback payload ignored");
            return;
        }
    };

    match resolve_gate(registry, &key, decision) {
        GateResolution::Resolved => {
            if message_id != 0 {
                let _ = client.edit_text(chat_id, message_id, ack).await;
            }
        }
        outcome => debug!(?outcome, "callback without pending gate — dropped"),
    }
}

async fn status_text(
    config: &PilotConfig,
    registry: &ActiveTaskRegistry,
    key: &ConversationKey,
) -> String {
    let adb = AdbBridge::new(config.agent.device_id.clone());
    let mut out = String::new();

    match adb.list_devices().await {
        Ok(devices) if devices.is_empty() => out.push_str("No devices connected"),
        Ok(devices) => {
            out.push_str("*Connected Devices:*\n\n");
            for device in devices {
                out.push_str(&format!("• {} ({})\n", device.serial, device.state));
            }
        }
        Err(e) => out.push_str(&format!("Error getting device status: {e}")),
    }

    if let Some(started) = registry.started_at(key) {
        out.push_str(&format!("\nTask running since {}", started.format("%H:%M:%S")));
    }
    out
}
