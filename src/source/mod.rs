pub mod polling;
pub mod webhook;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, Delivery};
use crate::pipeline::Pipeline;

/// Feed the pipeline from whichever delivery mode is configured, until
/// `cancel` fires.
pub async fn run(config: &Config, pipeline: Arc<Pipeline>, cancel: CancellationToken) -> Result<()> {
    match &config.delivery {
        Delivery::Polling { timeout_secs } => {
            info!(mode = "polling", "Starting event source");
            polling::run(pipeline, *timeout_secs, config.drop_pending_updates, cancel).await;
            Ok(())
        }
        Delivery::Webhook(hook) => {
            info!(mode = "webhook", url = %hook.url, "Starting event source");
            webhook::run(pipeline, hook, config.drop_pending_updates, cancel).await
        }
    }
}
