//! Runtime wiring
//!
//! Builds every component from one [`WardenConfig`] and connects them:
//!
//! - the fan-out router listens on every watched collection
//! - the recovery manager consumes health signals
//! - a successful recovery restarts change streams halted while storage was
//!   down
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use streamwarden_domain::{Result, WardenConfig};
//! use streamwarden_infra::runtime::WardenRuntime;
//! use streamwarden_infra::testing::{InMemoryLookup, InMemoryStorage, RecordingTransport};
//!
//! # async fn example() -> Result<()> {
//! let runtime = WardenRuntime::new(
//!     WardenConfig::default(),
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(RecordingTransport::new()),
//!     Arc::new(InMemoryLookup::new()),
//! )?;
//!
//! runtime.start().await?;
//! // ... serve ...
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use streamwarden_common::resilience::{Retry, RetryConfig, RetryError};
use streamwarden_core::{AudienceResolver, DocumentLookup, RealtimeTransport, StorageClient};
use streamwarden_domain::{RecoverySignal, Result, RetrySettings, WardenConfig, WardenError};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::fanout::FanoutRouter;
use crate::health::HealthMonitor;
use crate::recovery::RecoveryManager;
use crate::stream::ChangeStreamSupervisor;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct Restarter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Retry configuration for the initial connect
///
/// # Errors
/// Returns `WardenError::Config` for out-of-range values.
pub fn retry_config(settings: &RetrySettings) -> Result<RetryConfig> {
    Ok(RetryConfig::builder()
        .max_retries(settings.max_retries)
        .initial_delay(settings.initial_delay())
        .max_delay(settings.max_delay())
        .jitter_factor(settings.jitter_factor)
        .build()?)
}

/// All components, wired together
pub struct WardenRuntime {
    config: WardenConfig,
    storage: Arc<dyn StorageClient>,
    supervisor: Arc<ChangeStreamSupervisor>,
    health: Arc<HealthMonitor>,
    recovery: Arc<RecoveryManager>,
    router: Arc<FanoutRouter>,
    restarter: Mutex<Option<Restarter>>,
}

impl WardenRuntime {
    /// Validate `config` and build every component
    ///
    /// # Errors
    /// Returns `WardenError::Config` for an invalid configuration.
    pub fn new(
        config: WardenConfig,
        storage: Arc<dyn StorageClient>,
        transport: Arc<dyn RealtimeTransport>,
        lookup: Arc<dyn DocumentLookup>,
    ) -> Result<Self> {
        config.validate()?;

        let supervisor =
            Arc::new(ChangeStreamSupervisor::new(Arc::clone(&storage), config.stream.clone())?);
        let health = Arc::new(HealthMonitor::new(Arc::clone(&storage), config.health.clone()));
        let recovery = Arc::new(RecoveryManager::new(
            Arc::clone(&storage),
            config.recovery.clone(),
            config.circuit.clone(),
        )?);
        let router = Arc::new(FanoutRouter::new(
            AudienceResolver::with_default_rules(),
            transport,
            lookup,
            &config.fanout,
        ));

        let registered = supervisor.add_listener_all(router.clone());
        debug!(collections = registered.len(), "Fan-out router registered");

        Ok(Self {
            config,
            storage,
            supervisor,
            health,
            recovery,
            router,
            restarter: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<ChangeStreamSupervisor> {
        &self.supervisor
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn router(&self) -> &Arc<FanoutRouter> {
        &self.router
    }

    pub async fn is_running(&self) -> bool {
        self.restarter.lock().await.is_some()
    }

    /// Connect storage, then start streams, monitoring and recovery
    ///
    /// The connect is retried per `retry` settings. Calling `start` while
    /// running is a no-op.
    ///
    /// # Errors
    /// The final connect error once retries are exhausted or the failure is
    /// not retryable.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut restarter = self.restarter.lock().await;
        if restarter.is_some() {
            debug!("Runtime already started");
            return Ok(());
        }

        let retry = Retry::new(retry_config(&self.config.retry)?).on_retry(|err, attempt, delay| {
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Connect failed");
        });
        retry.run(|| self.storage.connect()).await.map_err(RetryError::into_source)?;
        info!("Storage connected");

        self.supervisor.start().await?;
        self.health.start_monitoring().await?;
        self.recovery.listen(self.health.subscribe());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(restart_worker(
            self.recovery.subscribe(),
            Arc::clone(&self.supervisor),
            cancel.clone(),
        ));
        *restarter = Some(Restarter { cancel, handle });

        info!(collections = self.supervisor.collections().count(), "Runtime started");
        Ok(())
    }

    /// Stop every component and disconnect storage; idempotent
    ///
    /// Every component is stopped even when an earlier one fails; the first
    /// failure is returned.
    ///
    /// # Errors
    /// Returns `WardenError::Internal` if a background task does not stop in
    /// time.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(restarter) = self.restarter.lock().await.take() else {
            return Ok(());
        };

        restarter.cancel.cancel();
        let joined = match tokio::time::timeout(SHUTDOWN_TIMEOUT, restarter.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WardenError::Internal(format!("Task join failed: {e}"))),
            Err(_) => Err(WardenError::Internal("Restart task shutdown timeout".to_string())),
        };

        let mut results = vec![joined];
        results.push(self.recovery.shutdown().await);
        results.push(self.health.stop_monitoring().await);
        results.push(self.supervisor.stop().await);
        results.push(self.storage.disconnect().await);

        info!("Runtime stopped");
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }
}

/// Restart halted change streams after every successful recovery
async fn restart_worker(
    mut signals: broadcast::Receiver<RecoverySignal>,
    supervisor: Arc<ChangeStreamSupervisor>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = signals.recv() => received,
        };

        match received {
            Ok(RecoverySignal::Succeeded { attempt }) => {
                let restarted = supervisor.restart_halted();
                info!(attempt, restarted, "Storage recovered");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Restart worker lagged behind recovery signals");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryLookup, InMemoryStorage, RecordingTransport};

    fn runtime(storage: Arc<InMemoryStorage>, config: WardenConfig) -> WardenRuntime {
        WardenRuntime::new(
            config,
            storage,
            Arc::new(RecordingTransport::new()),
            Arc::new(InMemoryLookup::new()),
        )
        .expect("valid config")
    }

    fn fast_config() -> WardenConfig {
        let mut config = WardenConfig::default();
        config.retry.max_retries = 2;
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = WardenConfig::default();
        config.recovery.max_attempts = 0;
        let result = WardenRuntime::new(
            config,
            Arc::new(InMemoryStorage::new()),
            Arc::new(RecordingTransport::new()),
            Arc::new(InMemoryLookup::new()),
        );
        assert!(matches!(result, Err(WardenError::Config(_))));
    }

    /// Validates the runtime lifecycle.
    ///
    /// Assertions:
    /// - Start connects storage and starts every component
    /// - A second start is a no-op
    /// - Shutdown stops everything, disconnects and is idempotent
    #[tokio::test]
    async fn test_start_and_shutdown() {
        let storage = Arc::new(InMemoryStorage::new());
        let runtime = runtime(storage.clone(), fast_config());

        runtime.start().await.expect("start");
        runtime.start().await.expect("second start");
        assert_eq!(storage.connect_calls(), 1);
        assert!(runtime.is_running().await);
        assert!(runtime.supervisor().is_running());
        assert!(runtime.health().is_monitoring());

        runtime.shutdown().await.expect("shutdown");
        runtime.shutdown().await.expect("second shutdown");
        assert!(!runtime.is_running().await);
        assert!(!runtime.supervisor().is_running());
        assert!(!runtime.health().is_monitoring());
        assert_eq!(storage.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_start_retries_transient_connect_failures() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_connect_failure(Some(WardenError::Network("connection refused".into())));
        let runtime = runtime(storage.clone(), fast_config());

        let err = runtime.start().await.expect_err("connect never succeeds");
        assert!(matches!(err, WardenError::Network(_)));
        assert_eq!(storage.connect_calls(), 3);
        assert!(!runtime.is_running().await);
    }
}
