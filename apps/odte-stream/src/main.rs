//! 0DTE Options Quote Ingestor Binary
//!
//! Starts the supervisor and the quote ingestor.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin odte-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required (one of)
//! - `SCHWAB_TOKEN_FILE`: file holding the current access token
//! - `SCHWAB_ACCESS_TOKEN`: fixed access token
//!
//! ## Optional
//! - `SCHWAB_API_BASE_URL`: REST base URL (default: <https://api.schwabapi.com>)
//! - `ODTE_UNDERLYING_SYMBOL`: chain symbol (default: $SPX)
//! - `ODTE_OPTION_ROOT`: option root (default: SPXW)
//! - `ODTE_PRICE_ALIASES`: comma-separated quote symbols (default: $SPX,$SPX.X,SPX)
//! - `ODTE_DEFAULT_PRICE`: fallback reference price (default: 5440)
//! - `ODTE_STRIKE_INCREMENT` / `ODTE_STRIKE_HALF_WIDTH`: window (default: 5 / 75)
//! - `ODTE_CHAIN_STRIKE_COUNT`: chain strikes (default: 31)
//! - `ODTE_KEEPALIVE_INTERVAL_SECS`: QOS interval (default: 30)
//! - `ODTE_READ_TIMEOUT_SECS`: read inactivity timeout (default: 90)
//! - `ODTE_LOGIN_TIMEOUT_SECS` / `ODTE_WRITE_TIMEOUT_SECS`: (default: 10 / 10)
//! - `ODTE_POLL_INTERVAL_SECS`: universe refresh interval (default: 60)
//! - `ODTE_RETRY_STRATEGY`: constant | exponential (default: constant)
//! - `ODTE_RETRY_DELAY_SECS`: retry delay (default: 5)
//! - `DATABASE_URL`: `PostgreSQL` URL (unset keeps quotes in memory)
//! - `ODTE_METRICS_PORT`: Prometheus port (default: 9090, 0 disables)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use odte_stream::application::ports::QuoteSink;
use odte_stream::application::services::ingest::{self, DEFAULT_CHANNEL_CAPACITY};
use odte_stream::infrastructure::credentials::FileTokenProvider;
use odte_stream::infrastructure::persistence::{InMemoryQuoteSink, PostgresQuoteSink};
use odte_stream::infrastructure::schwab::{
    SchwabChainSource, SchwabPriceSource, SchwabRestClient, SchwabStreamerInfo,
};
use odte_stream::infrastructure::transport::WebSocketConnector;
use odte_stream::{
    ContractUniverseResolver, EpochGate, IngestorConfig, MetricsObserver, QuoteIngestor,
    SessionSupervisor, SupervisorDeps, TokenProvider, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("telemetry setup failed")?;

    tracing::info!("Starting 0DTE quote ingestor");

    let config = IngestorConfig::from_env()?;
    log_config(&config);

    let metrics_addr = (config.server.metrics_port != 0)
        .then(|| SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port)));
    init_metrics(metrics_addr).context("metrics setup failed")?;

    let shutdown_token = CancellationToken::new();

    // Venue adapters
    let tokens: Arc<dyn TokenProvider> = Arc::new(FileTokenProvider::new(
        config.credentials.token_file.clone(),
        config.credentials.access_token.clone(),
    ));
    let rest = Arc::new(SchwabRestClient::new(config.rest_config(), Arc::clone(&tokens))?);
    let resolver = Arc::new(ContractUniverseResolver::new(
        Arc::new(SchwabPriceSource::new(Arc::clone(&rest))),
        Arc::new(SchwabChainSource::new(Arc::clone(&rest))),
        config.resolver_settings(),
    ));

    // Quote sink
    let sink: Arc<dyn QuoteSink> = match &config.database.url {
        Some(url) => Arc::new(
            PostgresQuoteSink::connect(url, config.database.max_connections)
                .await
                .context("database connection failed")?,
        ),
        None => {
            tracing::warn!("DATABASE_URL not set, quotes are kept in memory only");
            Arc::new(InMemoryQuoteSink::new())
        }
    };

    // Ingestor
    let epochs = EpochGate::new();
    let (ingest_tx, ingest_rx) = ingest::channel(DEFAULT_CHANNEL_CAPACITY);
    let ingestor_handle = QuoteIngestor::new(sink, epochs.clone())
        .with_observer(Arc::new(MetricsObserver))
        .spawn(ingest_rx, shutdown_token.clone());

    // Supervisor
    let supervisor = SessionSupervisor::new(
        config.supervisor_config(),
        SupervisorDeps {
            resolver,
            connector: Arc::new(WebSocketConnector::new()),
            tokens,
            streamer_info: Arc::new(SchwabStreamerInfo::new(rest)),
            ingest: ingest_tx,
            epochs,
        },
        config.retry_policy(),
        shutdown_token.clone(),
    );
    let supervisor_handle = tokio::spawn(supervisor.run());

    tracing::info!("Quote ingestor ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        if let Err(e) = supervisor_handle.await {
            tracing::error!(error = %e, "Supervisor task failed");
        }
        if let Err(e) = ingestor_handle.await {
            tracing::error!(error = %e, "Ingestor task failed");
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Quote ingestor stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestorConfig) {
    let persistence = if config.database.url.is_some() {
        "postgres"
    } else {
        "memory"
    };
    tracing::info!(
        underlying = %config.underlying.symbol,
        option_root = %config.underlying.option_root,
        poll_interval_secs = config.supervisor.poll_interval.as_secs(),
        retry = config.supervisor.retry.as_str(),
        persistence,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        api_base_url = %config.credentials.api_base_url,
        price_aliases = ?config.underlying.price_aliases,
        "Venue endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
