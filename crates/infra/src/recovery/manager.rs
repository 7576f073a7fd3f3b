//! Recovery manager
//!
//! Acts on health signals: an `Unhealthy` signal starts a recovery episode
//! (disconnect, exponential backoff, reconnect) unless one is already running
//! or the attempt budget is spent. Exhaustion is terminal until an operator
//! calls [`RecoveryManager::reset`].
//!
//! It is also the single choke point for application storage calls:
//! [`RecoveryManager::execute_operation`] routes each call through the
//! breaker of its operation class and degrades when the breaker rejects:
//!
//! | Class | Rejected call |
//! |-------|---------------|
//! | read  | cached result (`FromCache`) if the read is cacheable and cached |
//! | write | appended to the write queue (`Queued`), replayed after recovery |
//! | query | rejected with `WardenError::CircuitOpen` |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use streamwarden_common::error::{classify, FailureKind};
use streamwarden_common::resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, JitterSource, ResilienceError,
};
use streamwarden_core::StorageClient;
use streamwarden_domain::{
    CircuitSettings, HealthSignal, OperationClass, OperationOutcome, OperationRequest,
    RecoverySettings, RecoverySignal, RecoveryState, Result, WardenError,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::degradation::{DegradationCache, ReplayFn, WriteQueue};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const SIGNAL_BUFFER: usize = 128;

/// Outcome of one write-queue replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    /// Rejected with a non-retryable error and discarded
    pub dropped: usize,
    /// Put back at the head of the queue after a transient failure
    pub requeued: usize,
}

/// Clears `is_recovering` if an attempt is dropped before it finishes
struct EpisodeGuard<'a> {
    state: &'a Mutex<RecoveryState>,
    armed: bool,
}

impl EpisodeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().is_recovering = false;
        }
    }
}

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Admission {
    Proceed(u32),
    Busy,
    Exhausted { notify: bool },
}

/// Reconnects storage after sustained failures and degrades calls meanwhile
pub struct RecoveryManager {
    storage: Arc<dyn StorageClient>,
    settings: RecoverySettings,
    breakers: [CircuitBreaker; 3],
    cache: DegradationCache,
    writes: WriteQueue,
    state: Mutex<RecoveryState>,
    signals: broadcast::Sender<RecoverySignal>,
    jitter: JitterSource,
    listener: Mutex<Option<Listener>>,
}

impl RecoveryManager {
    /// # Errors
    /// Returns `WardenError::Config` for an invalid breaker configuration.
    pub fn new(
        storage: Arc<dyn StorageClient>,
        settings: RecoverySettings,
        circuit: CircuitSettings,
    ) -> Result<Self> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(circuit.failure_threshold)
            .reset_timeout(circuit.reset_timeout())
            .build()?;
        let [read, write, query] = OperationClass::ALL;
        let breakers = [
            CircuitBreaker::new(read.as_str(), config.clone())?,
            CircuitBreaker::new(write.as_str(), config.clone())?,
            CircuitBreaker::new(query.as_str(), config)?,
        ];

        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);

        Ok(Self {
            storage,
            cache: DegradationCache::new(settings.cache_capacity, settings.cache_ttl()),
            writes: WriteQueue::new(settings.write_queue_capacity),
            state: Mutex::new(RecoveryState::new(settings.max_attempts)),
            settings,
            breakers,
            signals,
            jitter: JitterSource::from_entropy(),
            listener: Mutex::new(None),
        })
    }

    pub fn breaker(&self, class: OperationClass) -> &CircuitBreaker {
        &self.breakers[class.index()]
    }

    pub fn state(&self) -> RecoveryState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoverySignal> {
        self.signals.subscribe()
    }

    pub fn cache(&self) -> &DegradationCache {
        &self.cache
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.writes
    }

    fn emit(&self, signal: RecoverySignal) {
        let _ = self.signals.send(signal);
    }

    fn admit(&self) -> Admission {
        let mut state = self.state.lock();
        if state.is_recovering {
            return Admission::Busy;
        }
        if state.attempt_count >= state.max_attempts {
            let notify = !state.exhausted;
            state.exhausted = true;
            return Admission::Exhausted { notify };
        }

        state.is_recovering = true;
        state.attempt_count += 1;
        state.last_attempt_at = Some(Utc::now());
        Admission::Proceed(state.attempt_count)
    }

    /// Run one recovery episode
    ///
    /// Returns `false` without touching storage when an episode is already
    /// running or the attempt budget is spent. The exhaustion signal is
    /// emitted once, by the first call that finds the budget spent.
    #[instrument(skip(self))]
    pub async fn attempt_recovery(&self) -> bool {
        let attempt = match self.admit() {
            Admission::Proceed(attempt) => attempt,
            Admission::Busy => {
                debug!("Recovery already in progress");
                return false;
            }
            Admission::Exhausted { notify } => {
                if notify {
                    let attempts = self.settings.max_attempts;
                    error!(attempts, "Storage recovery exhausted, manual intervention required");
                    self.emit(RecoverySignal::MaxAttemptsExceeded { attempts });
                }
                return false;
            }
        };

        let guard = EpisodeGuard { state: &self.state, armed: true };
        self.emit(RecoverySignal::Started { attempt });

        let delay =
            BackoffPolicy::unbounded(self.settings.backoff()).delay_for(attempt, &self.jitter);
        info!(
            attempt,
            max_attempts = self.settings.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Starting storage recovery"
        );

        if let Err(err) = self.storage.disconnect().await {
            debug!(error = %err, "Disconnect before recovery failed");
        }
        tokio::time::sleep(delay).await;
        let connected = self.storage.connect().await;

        guard.disarm();
        match connected {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.is_recovering = false;
                    state.attempt_count = 0;
                    state.exhausted = false;
                    state.successes += 1;
                }
                for breaker in &self.breakers {
                    breaker.reset();
                }
                info!(attempt, "Storage recovery succeeded");
                self.emit(RecoverySignal::Succeeded { attempt });
                self.replay_queued_writes().await;
                true
            }
            Err(err) => {
                let verdict = classify(&err);
                {
                    let mut state = self.state.lock();
                    state.is_recovering = false;
                    state.failures += 1;
                    if verdict.kind == FailureKind::Fatal {
                        state.attempt_count = state.max_attempts;
                    }
                }
                warn!(
                    attempt,
                    kind = %verdict.kind,
                    error = %err,
                    "Storage recovery attempt failed"
                );
                self.emit(RecoverySignal::Failed { attempt, reason: err.to_string() });
                false
            }
        }
    }

    /// Clear the attempt budget after operator intervention
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let max_attempts = state.max_attempts;
        let (successes, failures) = (state.successes, state.failures);
        *state = RecoveryState { successes, failures, ..RecoveryState::new(max_attempts) };
        info!("Recovery state reset");
    }

    /// Start consuming health signals; `Unhealthy` triggers a recovery attempt
    ///
    /// Signals that arrive while an attempt runs are discarded. Calling it
    /// while already listening keeps the existing consumer.
    pub fn listen(self: &Arc<Self>, mut health: broadcast::Receiver<HealthSignal>) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            debug!("Recovery manager already listening");
            return;
        }

        let cancel = CancellationToken::new();
        let manager = Arc::clone(self);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    received = health.recv() => received,
                };

                match received {
                    Ok(HealthSignal::Unhealthy { consecutive_failures }) => {
                        debug!(consecutive_failures, "Unhealthy signal received");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = manager.attempt_recovery() => {}
                        }
                        while health.try_recv().is_ok() {}
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Recovery manager lagged behind health signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *listener = Some(Listener { cancel, handle });
    }

    /// Run `operation` through the breaker of `request.class`
    ///
    /// Successful cacheable reads are cached. A cacheable read that fails
    /// transiently is answered from the cache when possible.
    ///
    /// # Errors
    /// - The operation's error when no fallback applies
    /// - `WardenError::Timeout` when the operation exceeds the timeout
    /// - `WardenError::CircuitOpen` for rejected reads without a cache entry
    ///   and for rejected queries
    /// - `WardenError::Unavailable` for rejected writes when the queue is full
    pub async fn execute_operation<F, Fut>(
        &self,
        request: OperationRequest,
        operation: F,
    ) -> Result<OperationOutcome>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let operation = Arc::new(operation);
        let breaker = self.breaker(request.class);
        let limit = self.settings.operation_timeout();
        let caches = request.class == OperationClass::Read && request.cacheable;

        let call = {
            let operation = Arc::clone(&operation);
            let name = request.name.clone();
            move || run_timed((*operation)(), limit, name)
        };

        match breaker.execute(call).await {
            Ok(value) => {
                if caches {
                    self.cache.store(&request, value.clone());
                }
                Ok(OperationOutcome::live(value))
            }
            Err(ResilienceError::CircuitOpen { name, retry_after }) => {
                self.degrade(request, operation, &name, retry_after)
            }
            Err(ResilienceError::OperationFailed { source }) => {
                if caches && classify(&source).kind == FailureKind::Transient {
                    if let Some(hit) = self.cache.lookup(&request) {
                        warn!(
                            operation = %request.name,
                            error = %source,
                            "Read failed, answering from degradation cache"
                        );
                        return Ok(OperationOutcome::from_cache(hit.value, hit.captured_at));
                    }
                }
                Err(source)
            }
        }
    }

    fn degrade<F, Fut>(
        &self,
        request: OperationRequest,
        operation: Arc<F>,
        breaker: &str,
        retry_after: Option<Duration>,
    ) -> Result<OperationOutcome>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let rejected = || {
            let wait = retry_after.map(|d| format!(", retry in {}ms", d.as_millis()));
            WardenError::CircuitOpen(format!(
                "circuit '{breaker}' is open, '{}' rejected{}",
                request.name,
                wait.unwrap_or_default()
            ))
        };

        match request.class {
            OperationClass::Read => {
                let hit = request.cacheable.then(|| self.cache.lookup(&request)).flatten();
                match hit {
                    Some(hit) => {
                        debug!(operation = %request.name, "Circuit open, serving cached read");
                        Ok(OperationOutcome::from_cache(hit.value, hit.captured_at))
                    }
                    None => Err(rejected()),
                }
            }
            OperationClass::Write => {
                let replay: ReplayFn = Arc::new(move || (*operation)().boxed());
                let name = request.name.clone();
                let ticket = self.writes.enqueue(request, replay)?;
                info!(
                    operation = %name,
                    %ticket,
                    queued = self.writes.len(),
                    "Circuit open, write queued"
                );
                Ok(OperationOutcome::queued(ticket))
            }
            OperationClass::Query => Err(rejected()),
        }
    }

    /// Replay queued writes in order through the write breaker
    ///
    /// Stops at the first transient failure and requeues that write and
    /// everything behind it; non-retryable failures are dropped.
    pub async fn replay_queued_writes(&self) -> ReplaySummary {
        let pending = self.writes.drain();
        if pending.is_empty() {
            return ReplaySummary::default();
        }

        let breaker = self.breaker(OperationClass::Write);
        let limit = self.settings.operation_timeout();
        let mut summary = ReplaySummary::default();
        let mut pending = pending.into_iter();

        while let Some(write) = pending.next() {
            let replay = Arc::clone(&write.replay);
            let name = write.request.name.clone();
            match breaker.execute(move || run_timed(replay(), limit, name)).await {
                Ok(_) => summary.replayed += 1,
                Err(err) if classify(&err).retryable => {
                    warn!(
                        ticket = %write.ticket,
                        error = %err,
                        "Queued write replay failed, requeueing"
                    );
                    let mut rest = vec![write];
                    rest.extend(pending);
                    summary.requeued = rest.len();
                    self.writes.requeue_front(rest);
                    break;
                }
                Err(err) => {
                    error!(ticket = %write.ticket, error = %err, "Dropping queued write");
                    summary.dropped += 1;
                }
            }
        }

        info!(
            replayed = summary.replayed,
            dropped = summary.dropped,
            requeued = summary.requeued,
            "Queued writes replayed"
        );
        self.emit(RecoverySignal::WritesReplayed {
            replayed: summary.replayed,
            failed: summary.dropped + summary.requeued,
        });
        summary
    }

    /// Stop consuming health signals; idempotent
    ///
    /// # Errors
    /// Returns `WardenError::Internal` if the consumer does not stop within 5s.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(listener) = self.listener.lock().take() else {
            return Ok(());
        };

        listener.cancel.cancel();
        tokio::time::timeout(SHUTDOWN_TIMEOUT, listener.handle)
            .await
            .map_err(|_| WardenError::Internal("Recovery listener shutdown timeout".to_string()))?
            .map_err(|e| WardenError::Internal(format!("Task join failed: {e}")))?;

        info!("Recovery manager stopped");
        Ok(())
    }
}

impl Drop for RecoveryManager {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
        }
    }
}

async fn run_timed<Fut>(operation: Fut, limit: Duration, name: String) -> Result<Value>
where
    Fut: Future<Output = Result<Value>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(WardenError::timeout(&name, limit)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use streamwarden_common::resilience::CircuitState;

    use super::*;
    use crate::testing::InMemoryStorage;

    fn settings(max_attempts: u32) -> RecoverySettings {
        RecoverySettings {
            max_attempts,
            backoff_ms: 1,
            operation_timeout_ms: 200,
            ..RecoverySettings::default()
        }
    }

    fn circuit(threshold: u32) -> CircuitSettings {
        CircuitSettings { failure_threshold: threshold, reset_timeout_ms: 60_000 }
    }

    fn manager(storage: Arc<InMemoryStorage>, max_attempts: u32) -> RecoveryManager {
        RecoveryManager::new(storage, settings(max_attempts), circuit(3)).expect("manager")
    }

    fn drain(rx: &mut broadcast::Receiver<RecoverySignal>) -> Vec<RecoverySignal> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            out.push(signal);
        }
        out
    }

    /// Validates the fail-stop recovery budget.
    ///
    /// Assertions:
    /// - Two failed attempts each disconnect and reconnect once
    /// - The third call returns `false` without touching storage
    /// - The exhaustion signal is emitted exactly once
    #[tokio::test]
    async fn test_budget_exhaustion_is_terminal() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_connect_failure(Some(WardenError::Network("refused".into())));
        let manager = manager(storage.clone(), 2);
        let mut rx = manager.subscribe();

        assert!(!manager.attempt_recovery().await);
        assert!(!manager.attempt_recovery().await);
        assert_eq!(storage.connect_calls(), 2);
        assert_eq!(storage.disconnect_calls(), 2);

        assert!(!manager.attempt_recovery().await);
        assert!(!manager.attempt_recovery().await);
        assert_eq!(storage.connect_calls(), 2);
        assert_eq!(storage.disconnect_calls(), 2);

        let exhausted = drain(&mut rx)
            .into_iter()
            .filter(|s| matches!(s, RecoverySignal::MaxAttemptsExceeded { attempts: 2 }))
            .count();
        assert_eq!(exhausted, 1);
        assert!(manager.state().exhausted);
    }

    /// Validates a successful episode.
    ///
    /// Assertions:
    /// - Breakers are reset to closed
    /// - The attempt counter is cleared
    /// - `Started` then `Succeeded` are emitted
    #[tokio::test]
    async fn test_success_resets_breakers_and_budget() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = manager(storage.clone(), 3);
        let mut rx = manager.subscribe();

        for _ in 0..3 {
            let _ = manager
                .execute_operation(OperationRequest::query("scan", json!({})), || async {
                    Err(WardenError::Network("reset".into()))
                })
                .await;
        }
        assert_eq!(manager.breaker(OperationClass::Query).state(), CircuitState::Open);

        assert!(manager.attempt_recovery().await);
        assert_eq!(manager.breaker(OperationClass::Query).state(), CircuitState::Closed);
        assert_eq!(manager.state().attempt_count, 0);
        assert_eq!(manager.state().successes, 1);
        assert_eq!(
            drain(&mut rx),
            vec![RecoverySignal::Started { attempt: 1 }, RecoverySignal::Succeeded { attempt: 1 }]
        );
    }

    #[tokio::test]
    async fn test_fatal_connect_failure_spends_budget() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_connect_failure(Some(WardenError::Auth("bad credentials".into())));
        let manager = manager(storage.clone(), 5);

        assert!(!manager.attempt_recovery().await);
        assert_eq!(manager.state().attempts_remaining(), 0);
        assert!(!manager.attempt_recovery().await);
        assert_eq!(storage.connect_calls(), 1);

        manager.reset();
        assert_eq!(manager.state().attempts_remaining(), 5);
        assert_eq!(manager.state().failures, 1);
    }

    /// Validates the read fallback when the breaker is open.
    ///
    /// Assertions:
    /// - The underlying call count stays at the threshold
    /// - Cached reads are served with `FromCache`
    /// - Uncached reads are rejected with `CircuitOpen`
    #[tokio::test]
    async fn test_open_read_breaker_serves_cache() {
        let manager = manager(Arc::new(InMemoryStorage::new()), 3);
        let request = OperationRequest::read("find_chat", json!({"id": "c1"}));

        let live = manager
            .execute_operation(request.clone(), || async { Ok(json!({"name": "general"})) })
            .await
            .expect("live read");
        assert!(live.is_live());

        let calls = Arc::new(AtomicU32::new(0));
        let failing = {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(WardenError::Validation("bad filter".into())) }
            }
        };
        let other = OperationRequest::read("find_chat", json!({"id": "c2"}));
        for _ in 0..3 {
            let err = manager.execute_operation(other.clone(), failing.clone()).await;
            assert!(matches!(err, Err(WardenError::Validation(_))));
        }

        let cached = manager.execute_operation(request, failing.clone()).await.expect("cached");
        assert!(cached.is_from_cache());
        assert_eq!(cached.value, Some(json!({"name": "general"})));

        let rejected = manager.execute_operation(other, failing).await;
        assert!(matches!(rejected, Err(WardenError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_read_failure_falls_back_to_cache() {
        let manager = manager(Arc::new(InMemoryStorage::new()), 3);
        let request = OperationRequest::read("list_notices", json!({"hood": "n1"}));

        manager
            .execute_operation(request.clone(), || async { Ok(json!([1, 2])) })
            .await
            .expect("live");

        let outcome = manager
            .execute_operation(request, || async {
                Err::<Value, _>(WardenError::Network("socket closed".into()))
            })
            .await
            .expect("cache fallback");
        assert!(outcome.is_from_cache());
    }

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let manager = manager(Arc::new(InMemoryStorage::new()), 3);
        let result = manager
            .execute_operation(OperationRequest::query("slow", json!({})), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            })
            .await;
        assert!(matches!(result, Err(WardenError::Timeout(_))));
    }

    /// Validates write queueing and in-order replay after recovery.
    ///
    /// Assertions:
    /// - Writes rejected by an open breaker are queued with a ticket
    /// - Successful recovery replays them in enqueue order
    /// - `WritesReplayed` reports the count
    #[tokio::test]
    async fn test_queued_writes_replay_after_recovery() {
        let manager = manager(Arc::new(InMemoryStorage::new()), 3);
        let mut rx = manager.subscribe();

        for _ in 0..3 {
            let _ = manager
                .execute_operation(OperationRequest::write("w", json!({})), || async {
                    Err(WardenError::Network("down".into()))
                })
                .await;
        }

        let applied = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..2 {
            let applied = Arc::clone(&applied);
            let outcome = manager
                .execute_operation(OperationRequest::write("insert", json!({"i": i})), move || {
                    let applied = Arc::clone(&applied);
                    async move {
                        applied.lock().push(i);
                        Ok(Value::Null)
                    }
                })
                .await
                .expect("queued");
            assert!(outcome.is_queued());
        }
        assert_eq!(manager.write_queue().len(), 2);
        assert!(applied.lock().is_empty());

        assert!(manager.attempt_recovery().await);
        assert_eq!(*applied.lock(), vec![0, 1]);
        assert!(manager.write_queue().is_empty());
        let replayed = RecoverySignal::WritesReplayed { replayed: 2, failed: 0 };
        assert!(drain(&mut rx).contains(&replayed));
    }

    #[tokio::test]
    async fn test_listen_recovers_on_unhealthy() {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = Arc::new(manager(storage.clone(), 3));
        let (health_tx, health_rx) = broadcast::channel(8);
        let mut rx = manager.subscribe();

        manager.listen(health_rx);
        health_tx
            .send(HealthSignal::Unhealthy { consecutive_failures: 3 })
            .expect("receiver alive");

        let signal = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(RecoverySignal::Succeeded { attempt }) = rx.recv().await {
                    break attempt;
                }
            }
        })
        .await
        .expect("recovery in time");
        assert_eq!(signal, 1);
        assert_eq!(storage.connect_calls(), 1);

        manager.shutdown().await.expect("shutdown");
        manager.shutdown().await.expect("idempotent");
    }
}
