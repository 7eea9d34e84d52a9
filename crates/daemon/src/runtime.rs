//! Wiring components from configuration.

use std::{sync::Arc, time::Duration};

use {
    beacon_config::{BeaconConfig, PushConfig},
    beacon_dispatch::{DispatchSettings, Dispatcher},
    beacon_metrics::MetricsHandle,
    beacon_push::{VapidKeys, WebPushSender, WebPushSenderConfig},
    beacon_store::SqliteStore,
    beacon_telegram::{
        ChannelPoller, Normalizer, PollSettings, TelegramClient, UpdateSource, WebhookAdapter,
    },
    secrecy::ExposeSecret,
    tokio::net::TcpListener,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{info, warn},
};

use crate::{
    Error, Result,
    cycle::CycleRunner,
    scheduler::Scheduler,
    server::{self, ServerState},
};

/// Open (and migrate) the configured database.
pub async fn open_store(config: &BeaconConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::new(&config.database.url, config.database.max_connections).await?;
    Ok(Arc::new(store))
}

/// VAPID keys from configuration. The public key is derived when only the
/// private key is set.
pub fn load_vapid_keys(push: &PushConfig) -> Result<VapidKeys> {
    let private_key = push
        .vapid_private_key
        .as_ref()
        .ok_or_else(|| Error::message("push.vapid_private_key is not set"))?;

    let keys = match push.vapid_public_key.as_deref().filter(|k| !k.is_empty()) {
        Some(public_key) => VapidKeys::from_base64url(public_key, private_key.expose_secret())?,
        None => VapidKeys::from_private_key(private_key.expose_secret())?,
    };
    Ok(keys)
}

pub fn build_sender(config: &BeaconConfig) -> Result<WebPushSender> {
    let keys = load_vapid_keys(&config.push)?;
    let sender = WebPushSender::new(keys, WebPushSenderConfig {
        subject: config.push.subject.clone(),
        ttl_secs: config.push.ttl_secs,
        request_timeout: Duration::from_secs(config.push.request_timeout_secs),
    })?;
    Ok(sender)
}

/// Dispatcher over `store` for both relations.
pub fn build_dispatcher(config: &BeaconConfig, store: Arc<SqliteStore>) -> Result<Arc<Dispatcher>> {
    let sender = build_sender(config)?;
    Ok(Arc::new(Dispatcher::new(
        store.clone(),
        store,
        Arc::new(sender),
        DispatchSettings::from_config(config),
    )))
}

/// Bot API client, `None` without a token.
pub fn telegram_client(config: &BeaconConfig) -> Result<Option<TelegramClient>> {
    let Some(token) = config.telegram.token.clone() else {
        return Ok(None);
    };
    let client = TelegramClient::new(
        &config.telegram.api_base,
        token,
        Duration::from_secs(config.telegram.request_timeout_secs),
    )?;
    Ok(Some(client))
}

/// How the daemon should run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// One cycle after startup reconciliation, then exit.
    pub once: bool,
    /// Overrides `daemon.poll_interval_secs`.
    pub interval: Option<Duration>,
}

/// Build every component and run until `shutdown` fires (or after one
/// cycle with [`RunOptions::once`]).
pub async fn run(
    config: Arc<BeaconConfig>,
    options: RunOptions,
    shutdown: CancellationToken,
    metrics: MetricsHandle,
) -> Result<()> {
    let store = open_store(&config).await?;
    let dispatcher = build_dispatcher(&config, store.clone())?;
    let normalizer = Normalizer::new(Arc::clone(&config));

    let source: Option<Box<dyn UpdateSource>> = if config.telegram.mode.polls() {
        let client = telegram_client(&config)?
            .ok_or_else(|| Error::message("telegram.token is required for polling"))?;
        let settings = PollSettings {
            limit: config.telegram.batch_limit.clamp(1, 100),
            timeout_secs: config.telegram.poll_timeout_secs,
        };
        Some(Box::new(ChannelPoller::new(client, normalizer.clone(), settings)))
    } else {
        None
    };

    let runner = CycleRunner::new(
        source,
        store.clone(),
        Arc::clone(&dispatcher),
        config.daemon.reconcile_batch,
    );

    if options.once {
        let report = Scheduler::new(runner, Duration::ZERO, shutdown).run_once().await?;
        info!(
            polled = report.polled,
            new = report.new_messages,
            dispatched = report.dispatched,
            "single cycle complete"
        );
        return Ok(());
    }

    let dispatches = TaskTracker::new();
    let server_task = if config.telegram.mode.serves_webhook() {
        let listener = TcpListener::bind(&config.webhook.bind).await?;
        let state = ServerState {
            adapter: Arc::new(WebhookAdapter::new(
                normalizer,
                config.webhook.secret_token.clone(),
            )),
            messages: store.clone(),
            dispatcher: Arc::clone(&dispatcher),
            daemon_state: runner.subscribe_state(),
            metrics,
            dispatches: dispatches.clone(),
        };
        let router = server::build_router(&config.webhook.path, state);
        Some(tokio::spawn(server::serve(listener, router, shutdown.clone())))
    } else {
        None
    };

    let interval = options
        .interval
        .unwrap_or_else(|| Duration::from_secs(config.daemon.poll_interval_secs));
    let result = Scheduler::new(runner, interval, shutdown.clone()).run().await;

    shutdown.cancel();
    if let Some(task) = server_task {
        match task.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!(error = %e, "webhook server exited with error"),
            Err(e) => warn!(error = %e, "webhook server task panicked"),
        }
    }

    // Webhook fan-outs still running must mark their messages before the
    // pool goes away.
    server::drain_dispatches(&dispatches).await;

    store.pool().close().await;
    result
}
