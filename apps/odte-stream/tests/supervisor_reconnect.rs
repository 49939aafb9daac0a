//! Supervisor Reconnect Integration Tests
//!
//! Faults a live session over the in-memory transport and checks that the
//! replacement session starts from an empty subscription set, and that
//! quotes flow to the sink only under the current epoch.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use odte_stream::application::services::ingest;
use odte_stream::infrastructure::persistence::InMemoryQuoteSink;
use odte_stream::infrastructure::streamer::{ConstantBackoff, KeepaliveConfig};
use odte_stream::infrastructure::transport::MemoryConnector;
use odte_stream::{
    ContractChainSource, ContractId, ContractUniverseResolver, EpochGate, PriceSource,
    QuoteIngestor, ResolverSettings, SessionConfig, SessionSupervisor, StreamerCredentials,
    StreamerInfoProvider, SupervisorConfig, SupervisorDeps, TokenProvider, UpstreamError,
};

struct FixedPrice(Decimal);

#[async_trait]
impl PriceSource for FixedPrice {
    async fn reference_price(&self) -> Result<Decimal, UpstreamError> {
        Ok(self.0)
    }
}

struct OfflineChain;

#[async_trait]
impl ContractChainSource for OfflineChain {
    async fn chain(
        &self,
        _reference_price: Decimal,
        _as_of: NaiveDate,
    ) -> Result<Vec<ContractId>, UpstreamError> {
        Err(UpstreamError::DataUnavailable("offline".into()))
    }
}

struct StaticCredentials;

#[async_trait]
impl TokenProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<String, UpstreamError> {
        Ok("token".to_string())
    }
}

#[async_trait]
impl StreamerInfoProvider for StaticCredentials {
    async fn streamer_credentials(&self) -> Result<StreamerCredentials, UpstreamError> {
        Ok(StreamerCredentials {
            socket_url: "memory://stream".into(),
            customer_id: "cust".into(),
            correl_id: "corr".into(),
            channel: "N9".into(),
            function_id: "APIAPP".into(),
        })
    }
}

struct Harness {
    connector: MemoryConnector,
    sink: Arc<InMemoryQuoteSink>,
    epochs: EpochGate,
    cancel: CancellationToken,
    supervisor: tokio::task::JoinHandle<()>,
    ingestor: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start() -> Self {
        let connector = MemoryConnector::new();
        let sink = Arc::new(InMemoryQuoteSink::new());
        let epochs = EpochGate::new();
        let cancel = CancellationToken::new();

        let (tx, rx) = ingest::channel(1024);
        let ingestor = QuoteIngestor::new(sink.clone(), epochs.clone()).spawn(rx, cancel.clone());

        let resolver = Arc::new(ContractUniverseResolver::new(
            Arc::new(FixedPrice(Decimal::from(5440))),
            Arc::new(OfflineChain),
            ResolverSettings::default(),
        ));

        let supervisor = SessionSupervisor::new(
            SupervisorConfig {
                poll_interval: Duration::from_secs(60),
                session: SessionConfig {
                    keepalive: KeepaliveConfig {
                        read_timeout: Duration::from_secs(86_400),
                        ..KeepaliveConfig::default()
                    },
                    ..SessionConfig::default()
                },
                trading_date: NaiveDate::from_ymd_opt(2025, 6, 3),
            },
            SupervisorDeps {
                resolver,
                connector: Arc::new(connector.clone()),
                tokens: Arc::new(StaticCredentials),
                streamer_info: Arc::new(StaticCredentials),
                ingest: tx,
                epochs: epochs.clone(),
            },
            Box::new(ConstantBackoff::default()),
            cancel.clone(),
        );

        Self {
            connector,
            sink,
            epochs,
            cancel,
            supervisor: tokio::spawn(supervisor.run()),
            ingestor,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.supervisor.await.unwrap();
        self.ingestor.await.unwrap();
    }
}

fn quote_frame(symbol: &str, bid: f64) -> String {
    serde_json::json!({
        "data": [{
            "service": "LEVELONE_OPTIONS",
            "content": [{ "key": symbol, "2": bid }]
        }]
    })
    .to_string()
}

async fn wait_for_row(sink: &InMemoryQuoteSink, strike: i64) -> bool {
    for _ in 0..100 {
        if sink.row(Decimal::from(strike)).is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(start_paused = true)]
async fn fault_resubscribes_full_window_on_fresh_session() {
    let harness = Harness::start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let first = harness.connector.link(0).unwrap();
    assert_eq!(first.keys_for("SUBS")[0].len(), 62);
    assert_eq!(harness.epochs.current(), 1);

    first.fail("connection reset by peer");

    // Constant backoff is 5 s.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.connector.link_count(), 2);
    assert_eq!(harness.epochs.current(), 2);

    let second = harness.connector.link(1).unwrap();
    let subs = second.keys_for("SUBS");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].len(), 62);
    assert_eq!(subs[0].iter().collect::<HashSet<_>>().len(), 62);
    assert!(second.keys_for("ADD").is_empty());
    assert!(second.keys_for("UNSUBS").is_empty());

    // The faulted session is not logged out.
    assert!(!first.commands().contains(&"LOGOUT".to_string()));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn quotes_from_the_live_session_reach_the_sink() {
    let harness = Harness::start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let link = harness.connector.link(0).unwrap();
    link.inject(quote_frame("SPXW  250603C05450000", 1.5));

    assert!(wait_for_row(&harness.sink, 5450).await);
    let row = harness.sink.row(Decimal::from(5450)).unwrap();
    assert_eq!(row.call.bid, Some(Decimal::new(15, 1)));
    assert!(row.put.is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn zero_strike_frames_never_create_rows() {
    let harness = Harness::start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let link = harness.connector.link(0).unwrap();
    link.inject(quote_frame("SPXW  250603C00000000", 1.5));
    link.inject(quote_frame("SPXW  250603P05440000", 2.5));

    assert!(wait_for_row(&harness.sink, 5440).await);
    assert_eq!(harness.sink.len(), 1);
    assert!(harness.sink.row(Decimal::ZERO).is_none());

    harness.stop().await;
}
