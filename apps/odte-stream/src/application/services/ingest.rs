//! Quote Ingestor
//!
//! Consumes quote frames from the stream reader over a bounded channel,
//! normalizes them and upserts them into the sink. Runs as its own task so a
//! slow sink never stalls the reader.
//!
//! Each frame carries the epoch of the session that read it. Frames from a
//! superseded session are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{IngestObserver, PersistenceError, QuoteSink};
use crate::domain::quote::{DiscardReason, QuoteFrame, QuoteNormalizer, QuoteRecord, StrikeUpdate};

/// Default ingest channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

// =============================================================================
// Epoch Gate
// =============================================================================

/// Shared session epoch. The supervisor advances it for every new session.
#[derive(Debug, Clone, Default)]
pub struct EpochGate(Arc<AtomicU64>);

impl EpochGate {
    /// Gate starting at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move to the next epoch and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether `epoch` is the current one.
    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Frame tagged with the epoch of the session that read it.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestEnvelope {
    /// Session epoch.
    pub epoch: u64,
    /// Raw frame.
    pub frame: QuoteFrame,
}

/// Non-blocking sender used by the stream reader.
#[derive(Debug, Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<IngestEnvelope>,
}

/// Result of offering a frame to the ingest channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Offer {
    /// Queued for the ingestor.
    Queued,
    /// Dropped; the channel was full.
    Full,
    /// Dropped; the ingestor has stopped.
    Closed,
}

impl IngestSender {
    /// Offer a frame without waiting.
    pub fn offer(&self, epoch: u64, frame: QuoteFrame) -> Offer {
        match self.tx.try_send(IngestEnvelope { epoch, frame }) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    epoch,
                    symbol = %envelope.frame.symbol,
                    "Ingest channel full, dropping frame"
                );
                Offer::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(epoch, "Ingest channel closed, dropping frame");
                Offer::Closed
            }
        }
    }
}

/// Create the bounded ingest channel.
#[must_use]
pub fn channel(capacity: usize) -> (IngestSender, mpsc::Receiver<IngestEnvelope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngestSender { tx }, rx)
}

// =============================================================================
// Ingestor
// =============================================================================

/// Result of processing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteOutcome {
    /// Upserted.
    Stored,
    /// Rejected before any storage access.
    Discarded(DiscardReason),
    /// Sink rejected the write; the quote is dropped.
    Failed(PersistenceError),
}

/// Normalizes frames and writes them to the sink.
pub struct QuoteIngestor {
    sink: Arc<dyn QuoteSink>,
    normalizer: QuoteNormalizer,
    gate: EpochGate,
    observer: Option<Arc<dyn IngestObserver>>,
}

impl QuoteIngestor {
    /// Create an ingestor bound to an epoch gate.
    #[must_use]
    pub fn new(sink: Arc<dyn QuoteSink>, gate: EpochGate) -> Self {
        Self {
            sink,
            normalizer: QuoteNormalizer::new(),
            gate,
            observer: None,
        }
    }

    /// Report every processed frame to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Process one envelope. Returns `None` when the epoch is stale.
    pub async fn handle(&self, envelope: IngestEnvelope) -> Option<QuoteOutcome> {
        if !self.gate.is_current(envelope.epoch) {
            self.notify(|o| o.stale_frame());
            tracing::trace!(
                epoch = envelope.epoch,
                current = self.gate.current(),
                "Discarding frame from superseded session"
            );
            return None;
        }

        let outcome = match self.normalizer.normalize_keyed(&envelope.frame) {
            Ok(record) => self.store(&record).await,
            Err(reason) => {
                tracing::debug!(symbol = %envelope.frame.symbol, %reason, "Quote discarded");
                self.notify(|o| o.discarded(&reason));
                QuoteOutcome::Discarded(reason)
            }
        };
        Some(outcome)
    }

    /// Consume the channel until it closes or `cancel` fires.
    pub async fn run(self, mut rx: mpsc::Receiver<IngestEnvelope>, cancel: CancellationToken) {
        tracing::info!("Quote ingestor started");
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                envelope = rx.recv() => match envelope {
                    Some(envelope) => {
                        self.handle(envelope).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Quote ingestor stopped");
    }

    /// Spawn [`Self::run`] on the runtime.
    pub fn spawn(
        self,
        rx: mpsc::Receiver<IngestEnvelope>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(rx, cancel))
    }

    async fn store(&self, record: &QuoteRecord) -> QuoteOutcome {
        let update = StrikeUpdate::from(record);
        let started = Instant::now();
        let result = self.sink.upsert(&update).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.notify(|o| o.stored(elapsed));
                QuoteOutcome::Stored
            }
            Err(e) => {
                tracing::error!(
                    contract = %record.contract,
                    strike = %update.strike,
                    side = update.side.as_str(),
                    error = %e,
                    "Quote upsert failed, dropping"
                );
                self.notify(|o| o.failed(&e, elapsed));
                QuoteOutcome::Failed(e)
            }
        }
    }

    fn notify(&self, event: impl FnOnce(&dyn IngestObserver)) {
        if let Some(observer) = &self.observer {
            event(observer.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockIngestObserver, MockQuoteSink};
    use crate::domain::contract::OptionSide;
    use crate::domain::quote::fields;
    use rust_decimal::Decimal;

    fn call_frame() -> QuoteFrame {
        QuoteFrame::new("SPXW  250603C05450000").with(fields::BID, 3.2)
    }

    #[tokio::test]
    async fn stores_valid_frame() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert()
            .withf(|u| u.strike == Decimal::from(5450) && u.side == OptionSide::Call)
            .times(1)
            .returning(|_| Ok(()));

        let gate = EpochGate::new();
        let epoch = gate.advance();
        let ingestor = QuoteIngestor::new(Arc::new(sink), gate);

        let outcome = ingestor
            .handle(IngestEnvelope {
                epoch,
                frame: call_frame(),
            })
            .await;
        assert_eq!(outcome, Some(QuoteOutcome::Stored));
    }

    #[tokio::test]
    async fn zero_strike_never_touches_sink() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert().never();

        let ingestor = QuoteIngestor::new(Arc::new(sink), EpochGate::new());
        let frame = call_frame().with(fields::STRIKE, 0);
        let outcome = ingestor.handle(IngestEnvelope { epoch: 0, frame }).await;

        assert_eq!(outcome, Some(QuoteOutcome::Discarded(DiscardReason::ZeroStrike)));
    }

    #[tokio::test]
    async fn stale_epoch_is_dropped() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert().never();

        let gate = EpochGate::new();
        let old = gate.advance();
        gate.advance();
        let ingestor = QuoteIngestor::new(Arc::new(sink), gate);

        let outcome = ingestor
            .handle(IngestEnvelope {
                epoch: old,
                frame: call_frame(),
            })
            .await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn sink_failure_is_reported_not_raised() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert()
            .returning(|_| Err(PersistenceError::Write("deadlock".into())));

        let ingestor = QuoteIngestor::new(Arc::new(sink), EpochGate::new());
        let outcome = ingestor
            .handle(IngestEnvelope {
                epoch: 0,
                frame: call_frame(),
            })
            .await;

        assert_eq!(
            outcome,
            Some(QuoteOutcome::Failed(PersistenceError::Write("deadlock".into())))
        );
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let (tx, mut rx) = channel(1);
        assert_eq!(tx.offer(0, call_frame()), Offer::Queued);
        assert_eq!(tx.offer(0, call_frame()), Offer::Full);
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert_eq!(tx.offer(0, call_frame()), Offer::Closed);
    }

    #[tokio::test]
    async fn malformed_key_never_touches_sink() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert().never();

        let ingestor = QuoteIngestor::new(Arc::new(sink), EpochGate::new());
        let frame = QuoteFrame::new("not-a-contract").with(fields::BID, 1.0);
        let outcome = ingestor.handle(IngestEnvelope { epoch: 0, frame }).await;

        assert!(matches!(
            outcome,
            Some(QuoteOutcome::Discarded(DiscardReason::MalformedSymbol(_)))
        ));
    }

    #[tokio::test]
    async fn observer_sees_each_outcome() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert().times(1).returning(|_| Ok(()));

        let mut observer = MockIngestObserver::new();
        observer.expect_stale_frame().times(1).return_const(());
        observer
            .expect_discarded()
            .withf(|reason| *reason == DiscardReason::ZeroStrike)
            .times(1)
            .return_const(());
        observer.expect_stored().times(1).return_const(());
        observer.expect_failed().never();

        let gate = EpochGate::new();
        let old = gate.advance();
        let current = gate.advance();
        let ingestor =
            QuoteIngestor::new(Arc::new(sink), gate).with_observer(Arc::new(observer));

        assert_eq!(
            ingestor
                .handle(IngestEnvelope {
                    epoch: old,
                    frame: call_frame(),
                })
                .await,
            None
        );
        ingestor
            .handle(IngestEnvelope {
                epoch: current,
                frame: call_frame().with(fields::STRIKE, 0),
            })
            .await;
        ingestor
            .handle(IngestEnvelope {
                epoch: current,
                frame: call_frame(),
            })
            .await;
    }

    #[tokio::test]
    async fn observer_sees_sink_failures() {
        let mut sink = MockQuoteSink::new();
        sink.expect_upsert()
            .returning(|_| Err(PersistenceError::Connection("refused".into())));

        let mut observer = MockIngestObserver::new();
        observer
            .expect_failed()
            .withf(|error, _| matches!(error, PersistenceError::Connection(_)))
            .times(1)
            .return_const(());

        let ingestor = QuoteIngestor::new(Arc::new(sink), EpochGate::new())
            .with_observer(Arc::new(observer));
        ingestor
            .handle(IngestEnvelope {
                epoch: 0,
                frame: call_frame(),
            })
            .await;
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let sink = MockQuoteSink::new();
        let ingestor = QuoteIngestor::new(Arc::new(sink), EpochGate::new());
        let (_tx, rx) = channel(8);
        let cancel = CancellationToken::new();
        let handle = ingestor.spawn(rx, cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
