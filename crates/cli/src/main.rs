mod push_commands;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use {
    beacon_config::{LoadedConfig, Requirements, Severity, discover_and_load, validate},
    beacon_daemon::{RunOptions, signal, status},
    beacon_metrics::{MetricsRecorderConfig, init_metrics},
    beacon_push::VapidKeys,
    clap::{Args, Parser, Subcommand},
    secrecy::ExposeSecret,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

/// Exit status after a shutdown signal.
const EXIT_SIGNAL: u8 = 2;

#[derive(Parser)]
#[command(
    name = "beacon",
    version,
    about = "Telegram channel posts as Web Push notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery of ./beacon.toml and ~/.config/beacon/).
    #[arg(long, global = true, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(flatten)]
    mode: ModeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest/dispatch loop (default when no subcommand is given).
    Run,
    /// Print a fresh VAPID key pair as environment assignments.
    Keygen,
}

#[derive(Args, Debug, Default)]
struct ModeArgs {
    /// Run a single cycle after startup reconciliation, then exit.
    #[arg(long, global = true, conflicts_with_all = ["test", "status", "cleanup", "send"])]
    once: bool,

    /// Send a synthetic notification to the channel's subscribers.
    #[arg(long, global = true, conflicts_with_all = ["status", "cleanup", "send"])]
    test: bool,

    /// Print a read-only health report.
    #[arg(long, global = true, conflicts_with_all = ["cleanup", "send"])]
    status: bool,

    /// Probe every subscription with a silent push and delete dead ones.
    #[arg(long, global = true, conflicts_with = "send")]
    cleanup: bool,

    /// Broadcast a notification with the given title and body.
    #[arg(long, global = true, num_args = 2, value_names = ["TITLE", "BODY"])]
    send: Option<Vec<String>>,

    /// Channel for --send and --test (defaults to notification.default_channel).
    #[arg(long, global = true)]
    channel: Option<String>,

    /// Click-through URL for --send.
    #[arg(long, global = true, requires = "send")]
    url: Option<String>,

    /// Seconds between cycles (overrides daemon.poll_interval_secs).
    #[arg(long, global = true, value_name = "SECS")]
    interval: Option<u64>,
}

/// Initialise tracing: `RUST_LOG` wins over `--log-level`.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// `.env.local` takes precedence over `.env`; neither overrides the real
/// environment.
fn load_dotenv() {
    for name in [".env.local", ".env"] {
        if let Err(e) = dotenvy::from_filename(name)
            && !e.not_found()
        {
            eprintln!("warning: failed to load {name}: {e}");
        }
    }
}

/// Load and validate configuration. Returns `None` after logging when the
/// configuration is unusable for a command with `requirements`.
fn load_config(cli: &Cli, requirements: Requirements) -> Option<LoadedConfig> {
    let loaded = match discover_and_load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return None;
        },
    };

    let result = validate(&loaded.config, requirements);
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if result.has_errors() {
        error!("configuration is invalid, refusing to start");
        return None;
    }

    if let Some(path) = &loaded.path {
        info!(path = %path.display(), "configuration loaded");
    }
    Some(loaded)
}

fn keygen() -> ExitCode {
    let keys = VapidKeys::generate();
    println!("VAPID_PUBLIC_KEY={}", keys.public_key());
    println!(
        "VAPID_PRIVATE_KEY={}",
        keys.export_private_key().expose_secret()
    );
    ExitCode::SUCCESS
}

async fn print_status(cli: &Cli) -> ExitCode {
    // Status reports invalid configuration instead of refusing to run.
    let loaded = match discover_and_load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        },
    };

    let report = status::collect(&loaded.config, loaded.path.as_deref()).await;
    println!("{report}");
    if report.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_daemon(cli: &Cli) -> anyhow::Result<ExitCode> {
    let Some(loaded) = load_config(cli, Requirements::DAEMON) else {
        return Ok(ExitCode::FAILURE);
    };
    let config = Arc::new(loaded.config);

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: vec![("service".to_string(), "beacon".to_string())],
    })?;

    let shutdown = CancellationToken::new();
    let signals = signal::install(shutdown.clone());

    let options = RunOptions {
        once: cli.mode.once,
        interval: cli.mode.interval.filter(|s| *s > 0).map(Duration::from_secs),
    };
    beacon_daemon::run(config, options, shutdown.clone(), metrics).await?;
    shutdown.cancel();

    if signals.is_raised() {
        info!("stopped by signal");
        return Ok(ExitCode::from(EXIT_SIGNAL));
    }
    Ok(ExitCode::SUCCESS)
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    if matches!(cli.command, Some(Commands::Keygen)) {
        return Ok(keygen());
    }

    if cli.mode.status {
        return Ok(print_status(&cli).await);
    }

    let mode = &cli.mode;
    if mode.test || mode.cleanup || mode.send.is_some() {
        let Some(loaded) = load_config(&cli, Requirements::PUSH_ONLY) else {
            return Ok(ExitCode::FAILURE);
        };
        let config = loaded.config;
        let channel = mode
            .channel
            .clone()
            .unwrap_or_else(|| config.notification.default_channel.clone());

        return if mode.test {
            push_commands::test(&config, &channel).await
        } else if mode.cleanup {
            push_commands::cleanup(&config).await
        } else {
            let (title, body) = match mode.send.as_deref() {
                Some([title, body]) => (title.as_str(), body.as_str()),
                _ => anyhow::bail!("--send takes exactly TITLE and BODY"),
            };
            push_commands::send(&config, &channel, title, body, mode.url.as_deref()).await
        };
    }

    run_daemon(&cli).await
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "beacon starting");

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error");
            ExitCode::FAILURE
        },
    }
}
