//! Run one task from the terminal, without any chat platform.

use std::sync::Arc;
use tracing::info;

use pilot_agent::{SessionFactory, VlmSessionFactory};
use pilot_channels::terminal::TerminalAdapter;
use pilot_channels::ChatAdapter;
use pilot_config::PilotConfig;
use pilot_device::{AdbBridge, ScreenshotSource};
use pilot_runtime::TaskRunner;

pub async fn cmd_run(config: PilotConfig, task: String) -> pilot_core::Result<()> {
    let adapter = Arc::new(TerminalAdapter::new());

    // Ctrl-C requests cooperative cancellation; the current step finishes
    // before the run stops.
    let cancel_adapter = Arc::clone(&adapter);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCancelling after the current step...");
            cancel_adapter.cancel();
        }
    });

    let factory: Arc<dyn SessionFactory> =
        Arc::new(VlmSessionFactory::new(config.model.clone(), config.agent.clone()));
    let screenshots: Arc<dyn ScreenshotSource> =
        Arc::new(AdbBridge::new(config.agent.device_id.clone()));
    let runner = TaskRunner::new(
        adapter as Arc<dyn ChatAdapter>,
        factory,
        screenshots,
        &config.agent,
    );

    let outcome = runner.run_task(&task).await?;
    info!(outcome = %outcome.status_text(), "run finished");
    Ok(())
}
