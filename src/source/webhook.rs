//! Push delivery: Telegram POSTs each update to a public HTTPS endpoint.
//!
//! Every update is relayed before the call is acknowledged. Relay failures
//! and malformed payloads are still answered with 200 so Telegram does not
//! redeliver them.

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::diagnostics;
use crate::error::{ApiError, DecodeError};
use crate::pipeline::Pipeline;
use crate::platform::TelegramApi;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct WebhookState {
    pipeline: Arc<Pipeline>,
    secret_token: Option<Arc<str>>,
    cancel: CancellationToken,
}

pub fn router(
    pipeline: Arc<Pipeline>,
    route: &str,
    secret_token: Option<&str>,
    cancel: CancellationToken,
) -> Router {
    let state = WebhookState {
        pipeline,
        secret_token: secret_token.map(Arc::from),
        cancel,
    };

    Router::new()
        .route(route, post(receive_update))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(expected) = &state.secret_token {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_ref()) {
            warn!("Rejected webhook call with missing or wrong secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    // Telegram retries non-2xx answers, so a draining instance hands the update back
    if state.cancel.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match serde_json::from_slice(&body) {
        Ok(raw) => {
            state.pipeline.handle_raw(raw).await;
        }
        Err(e) => diagnostics::decode_failed(None, &DecodeError::Json(e)),
    }
    StatusCode::OK
}

/// Point Telegram at `hook.url`. Setting the same URL again is harmless.
pub async fn register(
    api: &dyn TelegramApi,
    hook: &WebhookConfig,
    drop_pending_updates: bool,
) -> Result<(), ApiError> {
    api.set_webhook(&hook.url, hook.secret_token.as_deref(), drop_pending_updates)
        .await?;
    info!(url = %hook.url, drop_pending_updates, "Webhook registered");
    Ok(())
}

/// Bind the listener, register the webhook, then serve until cancelled.
///
/// Bind failures are fatal. A failed registration is logged; the listener
/// stays up so a previously registered webhook keeps working.
pub async fn run(
    pipeline: Arc<Pipeline>,
    hook: &WebhookConfig,
    drop_pending_updates: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = format!("0.0.0.0:{}", hook.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener to {addr}"))?;
    info!(addr = %addr, route = %hook.route, "Webhook listener bound");

    if let Err(e) = register(pipeline.api().as_ref(), hook, drop_pending_updates).await {
        warn!(error = %e, url = %hook.url, "Webhook registration failed");
    }

    let app = router(
        pipeline,
        &hook.route,
        hook.secret_token.as_deref(),
        cancel.clone(),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Webhook listener draining");
        })
        .into_future()
        .await
        .context("Webhook server error")?;

    Ok(())
}
