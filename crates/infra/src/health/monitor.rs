//! Storage health monitoring with explicit lifecycle
//!
//! - `HealthMonitor`: lifecycle coordinator (owns the task handles)
//! - `probe_worker()`: interval loop calling [`HealthMonitor::run_probe`]
//! - `notification_worker()`: forwards storage notifications as signals
//!
//! The monitor only reports. It never connects, disconnects or otherwise
//! mutates the storage client; the recovery manager acts on its signals.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use streamwarden_domain::{HealthSettings, HealthSignal, Result};
//! use streamwarden_infra::health::HealthMonitor;
//! use streamwarden_infra::testing::InMemoryStorage;
//!
//! # async fn example() -> Result<()> {
//! let monitor = HealthMonitor::new(Arc::new(InMemoryStorage::new()), HealthSettings::default());
//! let mut signals = monitor.subscribe();
//!
//! monitor.start_monitoring().await?;
//! if let Ok(HealthSignal::Unhealthy { consecutive_failures }) = signals.recv().await {
//!     tracing::warn!(consecutive_failures, "storage unhealthy");
//! }
//! monitor.stop_monitoring().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use streamwarden_common::collections::SampleWindow;
use streamwarden_core::StorageClient;
use streamwarden_domain::{
    AlertLevel, ConnectionStats, HealthIssue, HealthReport, HealthSettings, HealthSignal,
    HealthSnapshot, Result, StorageNotification, WardenError,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const SIGNAL_BUFFER: usize = 256;

#[derive(Debug)]
struct ProbeState {
    latencies: SampleWindow,
    error_rates: SampleWindow,
    last_latency_ms: Option<f64>,
    consecutive_failures: u32,
    consecutive_warnings: u32,
    last_stats: Option<ConnectionStats>,
    checked_at: Option<DateTime<Utc>>,
}

impl ProbeState {
    fn new(settings: &HealthSettings) -> Self {
        Self {
            latencies: SampleWindow::new(settings.latency_history),
            error_rates: SampleWindow::new(settings.error_rate_history),
            last_latency_ms: None,
            consecutive_failures: 0,
            consecutive_warnings: 0,
            last_stats: None,
            checked_at: None,
        }
    }
}

struct Inner {
    storage: Arc<dyn StorageClient>,
    settings: HealthSettings,
    state: Mutex<ProbeState>,
    signals: broadcast::Sender<HealthSignal>,
}

struct Workers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Periodic storage health monitor
pub struct HealthMonitor {
    inner: Arc<Inner>,
    workers: Mutex<Option<Workers>>,
}

impl HealthMonitor {
    pub fn new(storage: Arc<dyn StorageClient>, settings: HealthSettings) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        let state = Mutex::new(ProbeState::new(&settings));
        Self {
            inner: Arc::new(Inner { storage, settings, state, signals }),
            workers: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthSignal> {
        self.inner.signals.subscribe()
    }

    /// Spawn the probe loop and the notification forwarder
    ///
    /// Calling it while monitoring is a no-op.
    #[instrument(skip(self), fields(interval_ms = self.inner.settings.interval_ms))]
    pub async fn start_monitoring(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            debug!("Health monitor already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let notifications = self.inner.storage.notifications();
        let handles = vec![
            tokio::spawn(probe_worker(Arc::clone(&self.inner), cancel.clone())),
            tokio::spawn(notification_worker(
                notifications,
                self.inner.signals.clone(),
                cancel.clone(),
            )),
        ];

        *workers = Some(Workers { cancel, handles });
        info!("Health monitor started");
        Ok(())
    }

    /// Stop both workers; idempotent
    ///
    /// # Errors
    /// Returns `WardenError::Internal` if a worker does not stop within 5s.
    pub async fn stop_monitoring(&self) -> Result<()> {
        let Some(workers) = self.workers.lock().take() else {
            return Ok(());
        };

        workers.cancel.cancel();
        for handle in workers.handles {
            tokio::time::timeout(SHUTDOWN_TIMEOUT, handle)
                .await
                .map_err(|_| WardenError::Internal("Health monitor shutdown timeout".to_string()))?
                .map_err(|e| WardenError::Internal(format!("Task join failed: {e}")))?;
        }

        info!("Health monitor stopped");
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Run one probe now and publish the resulting signals
    pub async fn run_probe(&self) -> HealthSnapshot {
        self.inner.run_probe().await
    }

    /// Classify the last probe results without probing
    pub fn check_health(&self) -> HealthReport {
        let snapshot = self.snapshot();
        let settings = &self.inner.settings;

        let reason = if !snapshot.connected {
            Some("storage is not connected".to_string())
        } else if snapshot.consecutive_failures >= settings.unhealthy_threshold {
            Some(format!("{} consecutive probe failures", snapshot.consecutive_failures))
        } else if snapshot
            .last_latency_ms
            .is_some_and(|latency| latency > settings.critical_latency_ms as f64)
        {
            Some(format!(
                "latency {:.0}ms above critical {}ms",
                snapshot.last_latency_ms.unwrap_or_default(),
                settings.critical_latency_ms
            ))
        } else if snapshot.error_rate > settings.max_error_rate {
            Some(format!(
                "error rate {:.3} above {:.3}",
                snapshot.error_rate, settings.max_error_rate
            ))
        } else {
            None
        };

        HealthReport { healthy: reason.is_none(), reason, snapshot }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner.snapshot()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.get_mut().take() {
            workers.cancel.cancel();
        }
    }
}

impl Inner {
    fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.lock();
        HealthSnapshot {
            connected: self.storage.connection_state().is_connected(),
            avg_latency_ms: state.latencies.mean().unwrap_or(0.0),
            last_latency_ms: state.last_latency_ms,
            error_rate: state.error_rates.mean().unwrap_or(0.0),
            consecutive_failures: state.consecutive_failures,
            consecutive_warnings: state.consecutive_warnings,
            checked_at: state.checked_at,
        }
    }

    fn emit(&self, signal: HealthSignal) {
        match &signal {
            HealthSignal::Alert { level: AlertLevel::Critical, reason } => {
                error!(reason = %reason, "Storage health alert (critical)");
            }
            HealthSignal::Alert { level: AlertLevel::Warning, reason } => {
                warn!(reason = %reason, "Storage health alert");
            }
            HealthSignal::Unhealthy { consecutive_failures } => {
                warn!(consecutive_failures, "Storage unhealthy");
            }
            HealthSignal::Warning { issue } => warn!(issue = %issue, "Storage health warning"),
            HealthSignal::Recovery { after_failures } => {
                info!(after_failures, "Storage health recovered");
            }
            other => debug!(signal = other.name(), "Health signal"),
        }
        let _ = self.signals.send(signal);
    }

    async fn run_probe(&self) -> HealthSnapshot {
        let settings = &self.settings;
        let started = Instant::now();
        let outcome = tokio::time::timeout(settings.probe_timeout(), self.storage.ping()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let stats = self.storage.statistics();

        let mut pending = Vec::new();
        {
            let mut state = self.state.lock();
            let previous = state.last_stats.unwrap_or_default();
            state.error_rates.push(stats.error_rate_since(&previous));
            state.last_stats = Some(stats);
            state.checked_at = Some(Utc::now());

            match outcome {
                Ok(Ok(())) => self.classify_success(&mut state, latency_ms, &mut pending),
                Ok(Err(err)) => {
                    debug!(error = %err, "Health probe failed");
                    self.classify_failure(&mut state, &mut pending);
                }
                Err(_) => {
                    debug!(timeout_ms = settings.probe_timeout_ms, "Health probe timed out");
                    self.classify_failure(&mut state, &mut pending);
                }
            }
        }

        for signal in pending {
            self.emit(signal);
        }
        self.snapshot()
    }

    fn classify_success(
        &self,
        state: &mut ProbeState,
        latency_ms: f64,
        pending: &mut Vec<HealthSignal>,
    ) {
        let settings = &self.settings;

        if state.consecutive_failures > 0 {
            pending.push(HealthSignal::Recovery { after_failures: state.consecutive_failures });
            state.consecutive_failures = 0;
        }

        state.latencies.push(latency_ms);
        state.last_latency_ms = Some(latency_ms);

        let mut warned = false;
        let latency_threshold = settings.latency_threshold_ms as f64;
        if latency_ms > latency_threshold {
            warned = true;
            pending.push(HealthSignal::Warning {
                issue: HealthIssue::HighLatency { latency_ms, threshold_ms: latency_threshold },
            });
        }
        if latency_ms > settings.critical_latency_ms as f64 {
            pending.push(HealthSignal::Alert {
                level: AlertLevel::Critical,
                reason: format!(
                    "latency {latency_ms:.0}ms above critical {}ms",
                    settings.critical_latency_ms
                ),
            });
        }

        let error_rate = state.error_rates.mean().unwrap_or(0.0);
        if error_rate > settings.max_error_rate {
            warned = true;
            let threshold = settings.max_error_rate;
            pending.push(HealthSignal::Warning {
                issue: HealthIssue::HighErrorRate { error_rate, threshold },
            });
        }

        if !warned {
            state.consecutive_warnings = 0;
            return;
        }

        state.consecutive_warnings += 1;
        if state.consecutive_warnings >= settings.alert_threshold {
            pending.push(HealthSignal::Alert {
                level: AlertLevel::Warning,
                reason: format!("{} consecutive health warnings", state.consecutive_warnings),
            });
        }
    }

    fn classify_failure(&self, state: &mut ProbeState, pending: &mut Vec<HealthSignal>) {
        state.consecutive_failures += 1;
        let failures = state.consecutive_failures;

        if failures >= self.settings.unhealthy_threshold {
            pending.push(HealthSignal::Unhealthy { consecutive_failures: failures });
        }
        if failures >= self.settings.alert_threshold {
            pending.push(HealthSignal::Alert {
                level: AlertLevel::Critical,
                reason: format!("{failures} consecutive probe failures"),
            });
        }
    }
}

async fn probe_worker(inner: Arc<Inner>, cancel: CancellationToken) {
    let interval = inner.settings.interval();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Health probe worker shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                inner.run_probe().await;
            }
        }
    }
}

async fn notification_worker(
    mut notifications: broadcast::Receiver<StorageNotification>,
    signals: broadcast::Sender<HealthSignal>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = notifications.recv() => received,
        };

        match received {
            Ok(notification) => {
                let signal = HealthSignal::from(notification);
                info!(signal = signal.name(), "Storage notification");
                let _ = signals.send(signal);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Storage notifications lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStorage;

    fn settings() -> HealthSettings {
        HealthSettings {
            interval_ms: 20,
            probe_timeout_ms: 50,
            latency_threshold_ms: 1_000,
            critical_latency_ms: 5_000,
            unhealthy_threshold: 2,
            alert_threshold: 3,
            ..HealthSettings::default()
        }
    }

    async fn connected_storage() -> Arc<InMemoryStorage> {
        let storage = Arc::new(InMemoryStorage::new());
        storage.connect().await.expect("connect");
        storage
    }

    fn drain(rx: &mut broadcast::Receiver<HealthSignal>) -> Vec<HealthSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            out.push(signal);
        }
        out
    }

    /// Validates failure counting and recovery signalling.
    ///
    /// Assertions:
    /// - `Unhealthy` from the second failure, critical alert from the third
    /// - A success afterwards emits `Recovery` and resets the counter
    #[tokio::test]
    async fn test_failures_escalate_then_recover() {
        let storage = connected_storage().await;
        let monitor = HealthMonitor::new(storage.clone(), settings());
        let mut rx = monitor.subscribe();

        storage.set_ping_failure(Some(WardenError::Network("ping refused".into())));
        monitor.run_probe().await;
        assert!(drain(&mut rx).is_empty());

        monitor.run_probe().await;
        assert_eq!(drain(&mut rx), vec![HealthSignal::Unhealthy { consecutive_failures: 2 }]);

        monitor.run_probe().await;
        let signals = drain(&mut rx);
        assert!(signals.contains(&HealthSignal::Unhealthy { consecutive_failures: 3 }));
        assert!(signals.iter().any(|s| matches!(
            s,
            HealthSignal::Alert { level: AlertLevel::Critical, .. }
        )));

        storage.set_ping_failure(None);
        let snapshot = monitor.run_probe().await;
        assert_eq!(drain(&mut rx), vec![HealthSignal::Recovery { after_failures: 3 }]);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let storage = connected_storage().await;
        storage.set_ping_latency(Duration::from_millis(200));
        let monitor = HealthMonitor::new(storage, settings());

        let snapshot = monitor.run_probe().await;
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.last_latency_ms, None);
    }

    /// Validates latency classification against both thresholds.
    ///
    /// Assertions:
    /// - Latency above the warning threshold emits a `HighLatency` warning
    /// - Latency above the critical threshold also emits a critical alert
    #[tokio::test]
    async fn test_latency_thresholds() {
        let storage = connected_storage().await;
        storage.set_ping_latency(Duration::from_millis(30));
        let monitor = HealthMonitor::new(
            storage,
            HealthSettings {
                latency_threshold_ms: 5,
                critical_latency_ms: 10,
                probe_timeout_ms: 1_000,
                ..settings()
            },
        );
        let mut rx = monitor.subscribe();

        monitor.run_probe().await;
        let signals = drain(&mut rx);
        assert!(signals.iter().any(|s| matches!(
            s,
            HealthSignal::Warning { issue: HealthIssue::HighLatency { .. } }
        )));
        assert!(signals.iter().any(|s| matches!(
            s,
            HealthSignal::Alert { level: AlertLevel::Critical, .. }
        )));
        assert!(!monitor.check_health().healthy);
    }

    /// Validates error-rate warnings and their escalation.
    ///
    /// Assertions:
    /// - A rolling error rate above the maximum emits `HighErrorRate`
    /// - The third consecutive warning escalates to a warning-level alert
    #[tokio::test]
    async fn test_sustained_error_rate_escalates_to_alert() {
        let storage = connected_storage().await;
        let monitor = HealthMonitor::new(storage.clone(), settings());
        let mut rx = monitor.subscribe();

        for _ in 0..3 {
            storage.record_operations(10, 5);
            monitor.run_probe().await;
        }

        let signals = drain(&mut rx);
        let warnings = signals
            .iter()
            .filter(|s| {
                matches!(s, HealthSignal::Warning { issue: HealthIssue::HighErrorRate { .. } })
            })
            .count();
        assert_eq!(warnings, 3);
        assert_eq!(
            signals.last(),
            Some(&HealthSignal::Alert {
                level: AlertLevel::Warning,
                reason: "3 consecutive health warnings".to_string(),
            })
        );
        assert_eq!(monitor.snapshot().consecutive_warnings, 3);
    }

    #[tokio::test]
    async fn test_check_health_reports_disconnected() {
        let storage = Arc::new(InMemoryStorage::new());
        let monitor = HealthMonitor::new(storage.clone(), settings());

        let report = monitor.check_health();
        assert!(!report.healthy);
        assert_eq!(report.reason.as_deref(), Some("storage is not connected"));

        storage.connect().await.expect("connect");
        monitor.run_probe().await;
        let report = monitor.check_health();
        assert!(report.healthy, "unexpected reason: {:?}", report.reason);
        assert!(report.snapshot.checked_at.is_some());
    }

    /// Validates the monitoring lifecycle.
    ///
    /// Assertions:
    /// - Start and stop are idempotent
    /// - The probe loop runs on its interval
    /// - Storage notifications are forwarded as health signals
    #[tokio::test]
    async fn test_monitoring_lifecycle_and_forwarding() {
        let storage = connected_storage().await;
        let monitor = HealthMonitor::new(storage.clone(), settings());
        let mut rx = monitor.subscribe();

        monitor.start_monitoring().await.expect("start");
        monitor.start_monitoring().await.expect("second start is a no-op");
        assert!(monitor.is_monitoring());

        storage.disconnect().await.expect("disconnect");
        let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("signal in time")
            .expect("open channel");
        assert_eq!(signal, HealthSignal::Disconnected);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(storage.ping_calls() >= 1);

        monitor.stop_monitoring().await.expect("stop");
        monitor.stop_monitoring().await.expect("second stop is a no-op");
        assert!(!monitor.is_monitoring());
    }
}
