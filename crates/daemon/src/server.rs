//! HTTP surface: Telegram webhook, health and Prometheus scrape endpoint.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    beacon_dispatch::Dispatcher,
    beacon_metrics::MetricsHandle,
    beacon_store::MessageStore,
    beacon_telegram::{WebhookAdapter, webhook::SECRET_HEADER},
    serde_json::json,
    tokio::{net::TcpListener, sync::watch},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, error, info, warn},
};

use crate::{Result, state::DaemonState};

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    pub adapter: Arc<WebhookAdapter>,
    pub messages: Arc<dyn MessageStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub daemon_state: watch::Receiver<DaemonState>,
    pub metrics: MetricsHandle,
    /// Dispatches started by webhook requests; drained before shutdown.
    pub dispatches: TaskTracker,
}

/// Routes: `POST {webhook_path}`, `GET /health`, `GET /metrics`.
pub fn build_router(webhook_path: &str, state: ServerState) -> Router {
    Router::new()
        .route(webhook_path, post(telegram_webhook))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` fires, then finish in-flight requests.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "webhook server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("webhook server stopped");
    Ok(())
}

/// Stop accepting webhook dispatches and wait for the running ones.
pub async fn drain_dispatches(dispatches: &TaskTracker) {
    dispatches.close();
    if !dispatches.is_empty() {
        info!(pending = dispatches.len(), "waiting for webhook dispatches to finish");
    }
    dispatches.wait().await;
}

async fn telegram_webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Value>,
) -> Response {
    let secret = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if !state.adapter.verify_secret(secret) {
        warn!("webhook request with invalid secret token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "invalid secret token" })),
        )
            .into_response();
    }

    let Some(candidate) = state.adapter.handle_webhook(update) else {
        return ok();
    };

    let outcome = match state.messages.upsert_if_absent(&candidate).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Non-2xx makes Telegram redeliver the update later.
            error!(
                source_message_id = %candidate.source_message_id,
                error = %e,
                "failed to persist webhook message"
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": "persistence unavailable" })),
            )
                .into_response();
        },
    };

    if outcome.message.notified {
        debug!(
            source_message_id = %candidate.source_message_id,
            "duplicate webhook delivery, already notified"
        );
        return ok();
    }

    let dispatcher = Arc::clone(&state.dispatcher);
    state.dispatches.spawn(async move {
        let message = outcome.message;
        if let Err(e) = dispatcher.dispatch(&message).await {
            warn!(
                source_message_id = %message.source_message_id,
                error = %e,
                "webhook dispatch failed, left for reconciliation"
            );
        }
    });

    ok()
}

fn ok() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let daemon_state = *state.daemon_state.borrow();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "state": daemon_state,
    }))
}

async fn metrics(State(state): State<ServerState>) -> Response {
    if !state.metrics.is_exporting() {
        return (StatusCode::NOT_FOUND, "metrics exporter disabled").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
