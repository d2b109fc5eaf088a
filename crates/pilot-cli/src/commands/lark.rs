//! Lark bot webhook server: event subscription endpoint routing messages
//! into task launches and card actions into pending gates.
//!
//! Lark retries any webhook that does not answer within a few seconds, so
//! message handling is spawned into the background and the handler returns
//! immediately. Retried deliveries are deduplicated by event id.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use pilot_agent::{SessionFactory, VlmSessionFactory};
use pilot_channels::lark::{LarkAdapter, LarkClient};
use pilot_channels::ChatAdapter;
use pilot_config::PilotConfig;
use pilot_core::{ConversationKey, PilotError};
use pilot_device::{AdbBridge, ScreenshotSource};
use pilot_runtime::{resolve_gate, spawn_task, ActiveTaskRegistry, GateResolution, TaskRunner};

struct LarkGateway {
    config: PilotConfig,
    client: Arc<LarkClient>,
    registry: ActiveTaskRegistry,
    factory: Arc<dyn SessionFactory>,
    /// Event ids already handled, so webhook retries do not double-launch.
    processed_events: Mutex<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    type_: Option<String>,
    challenge: Option<String>,
    header: Option<EventHeader>,
    event: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct EventHeader {
    event_id: Option<String>,
    event_type: Option<String>,
}

pub async fn cmd_lark(config: PilotConfig) -> pilot_core::Result<()> {
    if config.lark.app_id.is_empty() || config.lark.app_secret.is_empty() {
        return Err(PilotError::Config(
            "lark.app_id / lark.app_secret are not set — add them to pilot.toml or the environment"
                .into(),
        ));
    }

    let client = Arc::new(LarkClient::new(
        config.lark.app_id.clone(),
        config.lark.app_secret.clone(),
        config.lark.base_url.clone(),
    ));
    let factory: Arc<dyn SessionFactory> =
        Arc::new(VlmSessionFactory::new(config.model.clone(), config.agent.clone()));

    let listen = config.lark.listen.clone();
    let gateway = Arc::new(LarkGateway {
        config,
        client,
        registry: ActiveTaskRegistry::new(),
        factory,
        processed_events: Mutex::new(HashSet::new()),
    });

    let app = Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(gateway);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(listen = %listen, "lark webhook listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn webhook_handler(
    State(gateway): State<Arc<LarkGateway>>,
    Json(payload): Json<EventPayload>,
) -> Json<Value> {
    if payload.type_.as_deref() == Some("url_verification") {
        return Json(json!({ "challenge": payload.challenge.unwrap_or_default() }));
    }

    if let Some(event_id) = payload.header.as_ref().and_then(|h| h.event_id.clone()) {
        let mut seen = gateway.processed_events.lock().unwrap();
        if !seen.insert(event_id) {
            debug!("duplicate lark event ignored");
            return Json(json!({}));
        }
        if seen.len() > 10_000 {
            seen.clear();
        }
    }

    let event_type = payload
        .header
        .as_ref()
        .and_then(|h| h.event_type.as_deref())
        .unwrap_or("");
    let Some(event) = payload.event else {
        return Json(json!({}));
    };

    match event_type {
        "im.message.receive_v1" => {
            // Answer the webhook now; Lark retries slow responses.
            tokio::spawn(async move {
                handle_message_event(gateway, event).await;
            });
        }
        "card.action.trigger" => handle_card_event(&gateway, &event),
        other => debug!(event_type = other, "ignoring lark event"),
    }

    Json(json!({}))
}

async fn handle_message_event(gateway: Arc<LarkGateway>, event: Value) {
    if event["sender"]["sender_type"].as_str() == Some("app") {
        debug!("ignoring message from the bot itself");
        return;
    }
    let Some(open_id) = event["sender"]["sender_id"]["open_id"].as_str() else {
        warn!("lark message without sender open_id");
        return;
    };

    if event["message"]["message_type"].as_str() != Some("text") {
        debug!("ignoring non-text lark message");
        return;
    }
    let content = event["message"]["content"].as_str().unwrap_or("{}");
    let text = serde_json::from_str::<Value>(content)
        .ok()
        .and_then(|c| c["text"].as_str().map(str::trim).map(String::from))
        .unwrap_or_default();
    if text.is_empty() {
        return;
    }

    let adapter = Arc::new(LarkAdapter::new(
        Arc::clone(&gateway.client),
        open_id.to_string(),
        gateway.config.agent.interaction_timeout_secs,
    ));

    if !gateway.config.lark.allowed_users.iter().any(|u| u == open_id) {
        warn!(open_id, "unauthorized lark sender");
        adapter
            .send_message(&format!(
                "Unauthorized user\n\nAsk the administrator to add this ID to allowed_users:\n{open_id}"
            ))
            .await;
        return;
    }

    let key = ConversationKey::lark(open_id);
    let screenshots: Arc<dyn ScreenshotSource> =
        Arc::new(AdbBridge::new(gateway.config.agent.device_id.clone()));
    let runner = TaskRunner::new(
        Arc::clone(&adapter) as Arc<dyn ChatAdapter>,
        Arc::clone(&gateway.factory),
        screenshots,
        &gateway.config.agent,
    );

    if spawn_task(
        &gateway.registry,
        key,
        adapter.clone() as Arc<dyn ChatAdapter>,
        runner,
        text,
    )
    .is_none()
    {
        adapter
            .send_message("Another task is running. Wait for it to finish first.")
            .await;
    }
}

/// Card button press: route the decision into the sender's pending gate.
fn handle_card_event(gateway: &LarkGateway, event: &Value) {
    let Some(open_id) = event["operator"]["open_id"].as_str() else {
        warn!("lark card action without operator open_id");
        return;
    };

    // The action value arrives as an object on v2 payloads and as a
    // JSON-encoded string on older ones.
    let value = &event["action"]["value"];
    let action = if value.is_string() {
        serde_json::from_str::<Value>(value.as_str().unwrap_or("{}"))
            .ok()
            .and_then(|v| v["action"].as_str().map(String::from))
    } else {
        value["action"].as_str().map(String::from)
    };

    let decision = match action.as_deref() {
        Some("confirm") => true,
        Some("cancel") => false,
        Some("takeover_done") => true,
        other => {
            debug!(?other, "unknown card action ignored");
            return;
        }
    };

    let key = ConversationKey::lark(open_id);
    if resolve_gate(&gateway.registry, &key, decision) != GateResolution::Resolved {
        debug!(key = %key, "card action without pending gate — dropped");
    }
}
