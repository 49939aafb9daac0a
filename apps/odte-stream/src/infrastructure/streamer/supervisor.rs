//! Session Supervisor
//!
//! Owns the streaming session across failures. Each attempt builds a fresh
//! session, resolves the universe, subscribes, and then re-resolves on every
//! polling interval, applying only the difference. When the session faults
//! it is closed, the retry policy supplies a delay, and the next attempt
//! starts from scratch with an empty subscription set.
//!
//! Cancellation is checked at every wait: the polling sleep, the backoff
//! sleep and the fault wait. An open session is always closed on exit.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::retry::RetryPolicy;
use super::session::{SessionConfig, SessionError, StreamSession};
use crate::application::ports::{StreamerInfoProvider, TokenProvider, TransportConnector};
use crate::application::services::{ContractUniverseResolver, EpochGate, IngestSender};
use crate::domain::subscription::SubscriptionDiff;
use crate::infrastructure::metrics;

/// Supervisor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time between universe refreshes.
    pub poll_interval: Duration,
    /// Session timeouts and keep-alive.
    pub session: SessionConfig,
    /// Fixed trading date; `None` uses the local date at each resolution.
    pub trading_date: Option<NaiveDate>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            session: SessionConfig::default(),
            trading_date: None,
        }
    }
}

/// External collaborators the supervisor drives.
pub struct SupervisorDeps {
    /// Universe resolver.
    pub resolver: Arc<ContractUniverseResolver>,
    /// Streaming transport.
    pub connector: Arc<dyn TransportConnector>,
    /// Bearer token source.
    pub tokens: Arc<dyn TokenProvider>,
    /// Streaming endpoint source.
    pub streamer_info: Arc<dyn StreamerInfoProvider>,
    /// Ingest channel.
    pub ingest: IngestSender,
    /// Session epoch shared with the ingestor.
    pub epochs: EpochGate,
}

/// How one session attempt ended.
#[derive(Debug)]
enum SessionExit {
    Cancelled,
    Failed(SessionError),
}

/// Runs sessions until cancelled.
pub struct SessionSupervisor {
    config: SupervisorConfig,
    deps: SupervisorDeps,
    retry: Box<dyn RetryPolicy>,
    cancel: CancellationToken,
}

impl SessionSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        deps: SupervisorDeps,
        retry: Box<dyn RetryPolicy>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            deps,
            retry,
            cancel,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Session supervisor started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let epoch = self.deps.epochs.advance();
            let trace_id = Uuid::new_v4();
            let span = tracing::info_span!("session", %trace_id, epoch);

            match self.run_session(epoch).instrument(span).await {
                SessionExit::Cancelled => break,
                SessionExit::Failed(e) => {
                    let delay = self.retry.next_delay();
                    metrics::record_reconnect();
                    tracing::warn!(
                        %trace_id,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Session ended, reconnecting after backoff"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Supervisor cancelled during backoff");
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!("Session supervisor stopped");
    }

    fn trading_date(&self) -> NaiveDate {
        self.config
            .trading_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    async fn run_session(&mut self, epoch: u64) -> SessionExit {
        let mut session = StreamSession::new(self.config.session, epoch);
        let exit = self.drive(&mut session).await;
        session.close().await;
        exit
    }

    async fn drive(&mut self, session: &mut StreamSession) -> SessionExit {
        let token = match self.deps.tokens.bearer_token().await {
            Ok(token) => token,
            Err(e) => return SessionExit::Failed(e.into()),
        };
        let credentials = match self.deps.streamer_info.streamer_credentials().await {
            Ok(credentials) => credentials,
            Err(e) => return SessionExit::Failed(e.into()),
        };

        let opened = tokio::select! {
            () = self.cancel.cancelled() => return SessionExit::Cancelled,
            opened = session.open(
                self.deps.connector.as_ref(),
                credentials,
                &token,
                self.deps.ingest.clone(),
            ) => opened,
        };
        if let Err(e) = opened {
            return SessionExit::Failed(e);
        }
        self.retry.reset();

        if let Err(e) = self.refresh(session).await {
            return SessionExit::Failed(e);
        }

        let fault = session.fault_token();
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return SessionExit::Cancelled,

                () = fault.cancelled() => {
                    let reason = session.fault_reason().unwrap_or_default();
                    return SessionExit::Failed(SessionError::Faulted(reason));
                }

                () = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.refresh(session).await {
                        return SessionExit::Failed(e);
                    }
                }
            }
        }
    }

    /// Re-resolve and apply the difference against the live subscriptions.
    async fn refresh(&self, session: &mut StreamSession) -> Result<(), SessionError> {
        let resolution = self
            .deps
            .resolver
            .resolve_current(self.trading_date())
            .await;
        metrics::record_resolution(resolution.source.as_str());

        let diff = SubscriptionDiff::between(
            session.subscriptions().iter(),
            resolution.universe.iter(),
        );

        if diff.is_empty() {
            tracing::debug!(
                reference_price = %resolution.reference_price,
                subscribed = session.subscriptions().len(),
                "Universe unchanged"
            );
            return Ok(());
        }

        tracing::info!(
            reference_price = %resolution.reference_price,
            source = resolution.source.as_str(),
            add = diff.to_add.len(),
            remove = diff.to_remove.len(),
            "Applying subscription change"
        );
        session.apply(&diff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        MockContractChainSource, MockPriceSource, MockStreamerInfoProvider, MockTokenProvider,
        StreamerCredentials, UpstreamError,
    };
    use crate::application::services::ResolverSettings;
    use crate::application::services::ingest;
    use crate::infrastructure::streamer::keepalive::KeepaliveConfig;
    use crate::infrastructure::streamer::retry::ConstantBackoff;
    use crate::infrastructure::transport::MemoryConnector;
    use rust_decimal::Decimal;

    fn credentials() -> StreamerCredentials {
        StreamerCredentials {
            socket_url: "memory://stream".into(),
            customer_id: "cust".into(),
            correl_id: "corr".into(),
            channel: "N9".into(),
            function_id: "APIAPP".into(),
        }
    }

    fn supervisor(
        connector: &MemoryConnector,
        tokens: MockTokenProvider,
        cancel: CancellationToken,
    ) -> SessionSupervisor {
        let mut prices = MockPriceSource::new();
        prices
            .expect_reference_price()
            .returning(|| Ok(Decimal::from(5440)));
        let mut chain = MockContractChainSource::new();
        chain
            .expect_chain()
            .returning(|_, _| Err(UpstreamError::DataUnavailable("offline".into())));
        let mut info = MockStreamerInfoProvider::new();
        info.expect_streamer_credentials()
            .returning(|| Ok(credentials()));

        let resolver = Arc::new(ContractUniverseResolver::new(
            Arc::new(prices),
            Arc::new(chain),
            ResolverSettings::default(),
        ));
        let (tx, _rx) = ingest::channel(64);

        SessionSupervisor::new(
            SupervisorConfig {
                poll_interval: Duration::from_secs(60),
                session: SessionConfig {
                    keepalive: KeepaliveConfig {
                        interval: Duration::from_secs(30),
                        read_timeout: Duration::from_secs(86_400),
                        qos_level: 0,
                    },
                    ..SessionConfig::default()
                },
                trading_date: NaiveDate::from_ymd_opt(2025, 6, 3),
            },
            SupervisorDeps {
                resolver,
                connector: Arc::new(connector.clone()),
                tokens: Arc::new(tokens),
                streamer_info: Arc::new(info),
                ingest: tx,
                epochs: EpochGate::new(),
            },
            Box::new(ConstantBackoff::default()),
            cancel,
        )
    }

    fn ok_tokens() -> MockTokenProvider {
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_bearer_token()
            .returning(|| Ok("token".to_string()));
        tokens
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_initial_universe_and_stops_on_cancel() {
        let connector = MemoryConnector::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor(&connector, ok_tokens(), cancel.clone()).run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let link = connector.link(0).unwrap();
        assert_eq!(link.keys_for("SUBS")[0].len(), 62);

        cancel.cancel();
        handle.await.unwrap();
        assert!(!link.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_subscription_resubscribes_on_fresh_session() {
        let connector = MemoryConnector::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor(&connector, ok_tokens(), cancel.clone()).run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = connector.link(0).unwrap();
        first.inject(
            r#"{"response":[{"service":"LEVELONE_OPTIONS","command":"SUBS","requestid":"1","content":{"code":11,"msg":"invalid keys"}}]}"#,
        );

        // Constant backoff is 5 s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.link_count(), 2);
        assert!(!first.is_open());

        let second = connector.link(1).unwrap();
        assert_eq!(second.keys_for("SUBS").len(), 1);
        assert_eq!(second.keys_for("SUBS")[0].len(), 62);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn credential_failure_backs_off_and_retries() {
        let connector = MemoryConnector::new();
        let mut tokens = MockTokenProvider::new();
        let mut calls = 0;
        tokens.expect_bearer_token().returning(move || {
            calls += 1;
            if calls == 1 {
                Err(UpstreamError::CredentialUnavailable("missing".into()))
            } else {
                Ok("token".to_string())
            }
        });

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor(&connector, tokens, cancel.clone()).run());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.link_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.link_count(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_exits_promptly() {
        let connector = MemoryConnector::new();
        connector.fail_next_connects(usize::MAX);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor(&connector, ok_tokens(), cancel.clone()).run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(connector.link_count(), 0);
    }
}
