mod config;
mod diagnostics;
mod error;
mod event;
mod filter;
mod pipeline;
mod platform;
mod relay;
mod source;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Delivery};
use crate::diagnostics::Phase;
use crate::pipeline::Pipeline;
use crate::platform::telegram::TeloxideApi;
use crate::platform::TelegramApi;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,channel_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    diagnostics::enter(Phase::Starting);

    // Optional TOML file; environment variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    diagnostics::enter(Phase::ValidatingConfig);
    let config = Config::load(config_path.as_deref()).context("Invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("  Relay mode: {}", config.relay_mode);
    info!(
        "  Destination: chat {} topic {:?}",
        config.target.chat_id, config.target.topic_id
    );
    info!("  Sources: {}", config.sources.len());
    for (chat_id, kind) in config.sources.iter() {
        info!("  Source: {} ({})", chat_id, kind);
    }
    match &config.delivery {
        Delivery::Polling { timeout_secs } => info!("  Delivery: polling ({}s)", timeout_secs),
        Delivery::Webhook(hook) => info!("  Delivery: webhook {} on :{}", hook.url, hook.port),
    }
    info!("  Dispatch ordering: {:?}", config.ordering);

    let api: Arc<dyn TelegramApi> = Arc::new(TeloxideApi::new(
        config.bot_token.expose(),
        config.http_timeout(),
        config.force_ipv4,
    )?);

    match api.get_me().await {
        Ok(username) => info!("Authenticated as @{}", username),
        Err(e) => warn!(error = %e, "Could not verify bot identity"),
    }

    let pipeline = Arc::new(Pipeline::from_config(api, &config));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on(shutdown_signal(), cancel.clone()));

    diagnostics::enter(Phase::Running);
    let run = source::run(&config, pipeline, cancel.clone());
    let result = run_with_grace(run, &cancel, config.shutdown_grace).await;

    diagnostics::enter(Phase::Stopped);
    result
}

async fn cancel_on(signal: impl Future<Output = ()>, cancel: CancellationToken) {
    signal.await;
    diagnostics::enter(Phase::ShuttingDown);
    cancel.cancel();
}

/// Drive `run` to completion, but abandon it `grace` after `cancel` fires.
async fn run_with_grace<F>(run: F, cancel: &CancellationToken, grace: Duration) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => res,
        _ = grace_expired(cancel, grace) => {
            warn!(grace = ?grace, "In-flight work did not finish in time");
            Ok(())
        }
    }
}

async fn grace_expired(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(grace).await;
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
