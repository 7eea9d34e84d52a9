//! One-shot operator commands: `--test`, `--send` and `--cleanup`.

use std::{process::ExitCode, sync::Arc};

use {
    beacon_config::BeaconConfig,
    beacon_daemon::runtime::{build_dispatcher, open_store},
    beacon_dispatch::{Dispatcher, FanOutReport},
    beacon_store::SqliteStore,
};

async fn open(config: &BeaconConfig) -> anyhow::Result<(Arc<SqliteStore>, Arc<Dispatcher>)> {
    let store = open_store(config).await?;
    let dispatcher = build_dispatcher(config, store.clone())?;
    Ok((store, dispatcher))
}

fn print_report(report: &FanOutReport) -> ExitCode {
    if report.attempted == 0 {
        println!("No active subscribers.");
        return ExitCode::SUCCESS;
    }
    println!(
        "Sent {}/{} (expired {}, key mismatch {}, auth invalid {}, transient {}; removed {}).",
        report.sent,
        report.attempted,
        report.expired,
        report.key_mismatch,
        report.auth_invalid,
        report.transient,
        report.removed,
    );
    if report.sent > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

pub async fn test(config: &BeaconConfig, channel: &str) -> anyhow::Result<ExitCode> {
    let (store, dispatcher) = open(config).await?;
    let report = dispatcher.test_push(channel).await;
    store.pool().close().await;
    Ok(print_report(&report?))
}

pub async fn send(
    config: &BeaconConfig,
    channel: &str,
    title: &str,
    body: &str,
    url: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let (store, dispatcher) = open(config).await?;
    let report = dispatcher.broadcast(channel, title, body, url).await;
    store.pool().close().await;
    Ok(print_report(&report?))
}

pub async fn cleanup(config: &BeaconConfig) -> anyhow::Result<ExitCode> {
    let (store, dispatcher) = open(config).await?;
    let report = dispatcher.cleanup().await;
    store.pool().close().await;
    let report = report?;

    println!(
        "Probed {}: {} alive, {} removed, {} kept after failure.",
        report.total, report.alive, report.removed, report.kept
    );
    Ok(ExitCode::SUCCESS)
}
