//! Keep-Alive Manager
//!
//! Sends a QOS request on a fixed interval and faults the session when no
//! inbound frame has arrived within the read timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::session::{FaultSignal, WriterHandle};

/// Shortest QOS period; `interval_at` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for keep-alive behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Interval between QOS requests.
    pub interval: Duration,
    /// Maximum silence on the inbound half before the session faults.
    pub read_timeout: Duration,
    /// QOS level sent with each keep-alive.
    pub qos_level: u8,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(90),
            qos_level: 0,
        }
    }
}

/// Inbound activity shared between the reader and the keep-alive task.
#[derive(Debug)]
pub struct ActivityState {
    last_inbound: RwLock<Instant>,
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityState {
    /// Start tracking from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record an inbound frame.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }

    /// Instant at which the session is considered idle.
    #[must_use]
    pub fn idle_deadline(&self, read_timeout: Duration) -> Instant {
        *self.last_inbound.read() + read_timeout
    }
}

/// Keep-alive task for one session.
pub struct KeepaliveManager {
    config: KeepaliveConfig,
    activity: Arc<ActivityState>,
    writer: WriterHandle,
    fault: FaultSignal,
    cancel: CancellationToken,
}

impl KeepaliveManager {
    /// Create a keep-alive manager.
    #[must_use]
    pub const fn new(
        config: KeepaliveConfig,
        activity: Arc<ActivityState>,
        writer: WriterHandle,
        fault: FaultSignal,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            activity,
            writer,
            fault,
            cancel,
        }
    }

    /// Run until cancelled, a write fails, or the session goes idle.
    pub async fn run(self) {
        let period = self.config.interval.max(MIN_INTERVAL);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let idle_deadline = self.activity.idle_deadline(self.config.read_timeout);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keep-alive cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.writer.send_qos(self.config.qos_level).await {
                        tracing::debug!(error = %e, "Keep-alive write failed");
                        self.fault.trip("keepalive", e.to_string());
                        break;
                    }
                }
                () = tokio::time::sleep_until(idle_deadline) => {
                    let idle = self.activity.idle_for();
                    if idle >= self.config.read_timeout {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.config.read_timeout.as_secs(),
                            "No inbound traffic within read timeout"
                        );
                        self.fault.trip("read_timeout", format!("no inbound traffic for {idle:?}"));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(90));
        assert_eq!(config.qos_level, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_tracks_idle_time() {
        let activity = ActivityState::new();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(activity.idle_for() >= Duration::from_secs(5));

        activity.record_inbound();
        assert!(activity.idle_for() < Duration::from_secs(1));
        assert_eq!(
            activity.idle_deadline(Duration::from_secs(90)),
            Instant::now() + Duration::from_secs(90)
        );
    }
}
