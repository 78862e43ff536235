/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Live order book replicas logged per symbol with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use depthbook_adapter::{DepthClient, DepthWebSocket};
use depthbook_sync::{OrderBookHub, Subscription, SubscriptionId, SyncConfig, base_asset};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "depthbook-watch", version, about = "Local order book replica from REST snapshot + diff stream")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    /// Replicate this symbol (repeatable; replaces the configured list)
    #[arg(long = "symbol", value_name = "SYMBOL")]
    symbols: Vec<String>,
    /// Levels per side shown in views
    #[arg(long = "depth", value_name = "LEVELS")]
    depth: Option<u32>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Also write logs to this file
    #[arg(long = "log-file", value_name = "PATH")]
    log_file: Option<PathBuf>,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let _log_guard = init_tracing(&args.log_level, args.log_file.as_ref())?;

    let config = load_config(&args)?;
    config
        .validate()
        .map_err(|err| anyhow!(err))
        .context("validate config")?;
    info!(
        market = ?config.market,
        symbols = ?config.symbols,
        depth = config.depth,
        rest = %config.rest_base_url(),
        ws = %config.ws_base_url(),
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let client = DepthClient::with_config_and_base_url(
        config.client_config(),
        config.market,
        config.rest_base_url(),
    )
    .context("build REST client")?;
    let transport = DepthWebSocket::with_base_url(
        config.ws_base_url(),
        config.stream_speed,
        config.stream_config(),
    );
    let mut hub = OrderBookHub::new(config.hub_config(), Arc::new(client), Arc::new(transport));

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let depth = config.depth as usize;
    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<(SubscriptionId, String)>();
    for symbol in &config.symbols {
        start_watch(&mut hub, symbol, depth, &failed_tx, &shutdown)
            .with_context(|| format!("subscribe {symbol}"))?;
    }
    info!(subscriptions = hub.subscription_count(), "replicas started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some((id, symbol)) = failed_rx.recv() => {
                hub.unsubscribe(id).await;
                warn!(%symbol, delay = ?RESUBSCRIBE_DELAY, "resubscribing after fatal failure");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                }
                if let Err(err) = start_watch(&mut hub, &symbol, depth, &failed_tx, &shutdown) {
                    error!(%symbol, error = %err, "resubscribe failed");
                }
            }
        }
    }

    info!("shutdown signal received");
    hub.shutdown_and_wait().await;
    info!("order book hub shutdown complete");
    Ok(())
}

fn start_watch(
    hub: &mut OrderBookHub,
    symbol: &str,
    depth: usize,
    failed_tx: &mpsc::UnboundedSender<(SubscriptionId, String)>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let subscription = hub.subscribe(symbol, depth).map_err(|err| anyhow!(err))?;
    tokio::spawn(report_views(subscription, failed_tx.clone(), shutdown.clone()));
    Ok(())
}

/// Log top-of-book at most once per interval, and on every stale/live flip.
async fn report_views(
    mut subscription: Subscription,
    failed_tx: mpsc::UnboundedSender<(SubscriptionId, String)>,
    shutdown: CancellationToken,
) {
    let symbol = subscription.symbol().to_string();
    let label = base_asset(&symbol).to_string();
    let mut last_report: Option<Instant> = None;
    let mut last_stale = true;

    loop {
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return,
            outcome = subscription.next_view() => outcome,
        };

        match outcome {
            Some(Ok(view)) => {
                let due = last_report.is_none_or(|at| at.elapsed() >= REPORT_INTERVAL);
                if !due && view.stale == last_stale {
                    continue;
                }
                last_report = Some(Instant::now());
                last_stale = view.stale;

                let metrics = subscription.metrics();
                info!(
                    %symbol,
                    asset = %label,
                    sequence = view.sequence,
                    stale = view.stale,
                    best_bid = ?view.best_bid,
                    best_ask = ?view.best_ask,
                    spread = ?view.spread,
                    spread_percent = ?view.spread_percent,
                    bid_depth = %view.bid_total(),
                    ask_depth = %view.ask_total(),
                    applied = metrics.events_applied,
                    resyncs = metrics.resyncs,
                    malformed = metrics.malformed_messages,
                    "book"
                );
            }
            Some(Err(err)) => {
                error!(%symbol, error = %err, "subscription failed");
                let _ = failed_tx.send((subscription.id(), symbol));
                return;
            }
            None => {
                info!(%symbol, "subscription closed");
                return;
            }
        }
    }
}

fn init_tracing(log_level: &str, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .context("log file path must name a file")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(guard)
}

fn load_config(args: &Cli) -> Result<SyncConfig> {
    let mut config = match &args.config_path {
        Some(path) => {
            let path_str = path.to_str().context("config path must be valid utf-8")?;
            SyncConfig::from_file(path_str).context("load config")?
        }
        None => SyncConfig::default(),
    };

    if !args.symbols.is_empty() {
        config.symbols = args.symbols.clone();
    }
    if let Some(depth) = args.depth {
        config.depth = depth;
    }
    Ok(config)
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
