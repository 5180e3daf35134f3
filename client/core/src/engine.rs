//! Decision engine
//!
//! Owns the active configuration, the result cache and the signal worker
//! pool. Each request fans out four signal lookups, joins them against the
//! request deadline, consults the cache, then either applies a test mode or
//! asks the scoring service.

use crate::cache::{CacheKey, ResultCache};
use crate::config::BlockingConfig;
use crate::error::{NetworkError, StateError};
use crate::logging::{log_debug, log_error, log_info, log_warning};
use crate::pool::{WorkerPool, MAX_WORKERS, QUEUE_DEPTH};
use crate::scoring::{HttpTransport, ScoringClient, ScoringTransport};
use crate::signals::{AppContext, SignalField, SignalSet};
use crate::{BlockStatus, BlockStatusListener, BlockingMode, Decision};
use arc_swap::ArcSwapOption;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Signal lookups dispatched per request
pub const SIGNAL_COUNT: usize = SignalField::ALL.len();

type SignalResult = (SignalField, Option<String>);

/// Everything a request needs, captured atomically at dispatch
struct Binding {
    context: Weak<AppContext>,
    config: Arc<BlockingConfig>,
    pool: Arc<WorkerPool>,
}

/// Fraud decision engine. Create once per host and share by reference.
pub struct DecisionEngine {
    binding: ArcSwapOption<Binding>,
    cache: Arc<ResultCache>,
    transport: Arc<dyn ScoringTransport>,
    workers: usize,
}

impl DecisionEngine {
    /// Engine scoring over HTTP
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()))
    }

    /// Engine scoring through a custom transport
    pub fn with_transport(transport: Arc<dyn ScoringTransport>) -> Self {
        Self {
            binding: ArcSwapOption::empty(),
            cache: Arc::new(ResultCache::new()),
            transport,
            workers: MAX_WORKERS,
        }
    }

    /// Signal worker count used by the next [`initialize`](Self::initialize), clamped to 2..=4
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Bind the host context and first configuration. Clears cached results.
    ///
    /// Only a weak reference to `context` is kept. Must run inside a Tokio runtime.
    pub fn initialize(&self, context: &Arc<AppContext>, config: BlockingConfig) -> Result<(), StateError> {
        let pool = WorkerPool::new(self.workers, QUEUE_DEPTH)?;

        self.cache.clear();
        self.binding.store(Some(Arc::new(Binding {
            context: Arc::downgrade(context),
            config: Arc::new(config),
            pool: Arc::new(pool),
        })));

        log_info!("Initialized blocking for {}", context.package());
        Ok(())
    }

    /// Replace the configuration. Requests already dispatched keep the old one.
    pub fn update_config(&self, config: BlockingConfig) -> Result<(), StateError> {
        let current = self.binding.load_full().ok_or(StateError::NotInitialized)?;

        self.binding.store(Some(Arc::new(Binding {
            context: current.context.clone(),
            config: Arc::new(config),
            pool: Arc::clone(&current.pool),
        })));

        log_debug!("Updated blocking configuration");
        Ok(())
    }

    /// Active configuration, if initialized
    pub fn config(&self) -> Option<Arc<BlockingConfig>> {
        self.binding.load().as_ref().map(|binding| Arc::clone(&binding.config))
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.load().is_some()
    }

    /// Decisions currently held in the result cache
    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }

    /// Start a block status request.
    ///
    /// State errors are returned immediately. Otherwise the four signal
    /// lookups are queued on the worker pool (waiting here if the pool is
    /// saturated) and the returned [`PendingStatus`] resolves exactly once.
    pub async fn request_block_status(&self, mode: BlockingMode) -> Result<PendingStatus, StateError> {
        let binding = self.binding.load_full().ok_or(StateError::NotInitialized)?;
        let context = binding.context.upgrade().ok_or(StateError::ContextReleased)?;
        let config = Arc::clone(&binding.config);
        let started = Instant::now();

        log_debug!("Requesting block status with mode {:?}", mode);

        let (signal_tx, signal_rx) = mpsc::channel::<SignalResult>(SIGNAL_COUNT);
        for field in SignalField::ALL {
            let provider = Arc::clone(config.provider());
            let context = Arc::clone(&context);
            let signal_tx = signal_tx.clone();

            binding
                .pool
                .submit(async move {
                    let value = provider.fetch(field, context).await;
                    // Receiver is gone once the request deadline passes
                    let _ = signal_tx.send((field, value)).await;
                })
                .await?;
        }
        drop(signal_tx);

        let request = Request {
            scoring: ScoringClient::new(Arc::clone(&self.transport), config.endpoint().clone()),
            cache: Arc::clone(&self.cache),
            config,
            mode,
            started,
        };

        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(async move {
            let status = request.resolve(signal_rx).await;
            let _ = result_tx.send(status);
        });

        Ok(PendingStatus { receiver: result_rx })
    }

    /// Start a request and report the result to `listener` from a background task
    pub async fn request_block_status_with<L>(&self, mode: BlockingMode, listener: L) -> Result<(), StateError>
    where
        L: BlockStatusListener + 'static,
    {
        let pending = self.request_block_status(mode).await?;
        tokio::spawn(async move {
            pending.await.notify(&listener);
        });
        Ok(())
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of [`DecisionEngine::request_block_status`]
#[derive(Debug)]
pub struct PendingStatus {
    receiver: oneshot::Receiver<BlockStatus>,
}

impl Future for PendingStatus {
    type Output = BlockStatus;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| BlockStatus::Error {
                code: 500,
                message: "request task ended without a result".into(),
            })
        })
    }
}

/// One in-flight request, bound to the config snapshot taken at dispatch
struct Request {
    config: Arc<BlockingConfig>,
    cache: Arc<ResultCache>,
    scoring: ScoringClient,
    mode: BlockingMode,
    started: Instant,
}

impl Request {
    fn deadline(&self) -> Option<Instant> {
        let timeout = self.config.request_timeout();
        (!timeout.is_zero()).then(|| self.started + timeout)
    }

    async fn resolve(self, signal_rx: mpsc::Receiver<SignalResult>) -> BlockStatus {
        let deadline = self.deadline();
        let signals = collect_signals(signal_rx, deadline).await;
        let threshold = self.config.threshold();
        let ttl = self.config.ttl();
        let key = CacheKey::new(signals, self.mode);

        if !ttl.is_zero() {
            if let Some(cached) = self.cache.get(&key) {
                log_debug!("Using cached results");
                return cached.decision.classify(threshold);
            }
        }

        let decision = match self.mode.forced_verdict() {
            Some(verdict) => {
                log_debug!("Using custom blocking mode: {:?}", self.mode);
                Decision::forced(verdict)
            }
            None => self.score(&key.signals, deadline).await,
        };

        if let Decision::Error(e) = &decision {
            log_error!("Error getting data: {} {}", e.code(), e);
            return decision.classify(threshold);
        }

        log_debug!("Got blocking result: {:?}", decision);
        if !ttl.is_zero() {
            log_debug!("Caching result for {}ms", ttl.as_millis());
            self.cache.put(key, decision.clone(), ttl);
        }

        decision.classify(threshold)
    }

    /// Scoring round trip with the remaining budget, retried per the config
    async fn score(&self, signals: &SignalSet, deadline: Option<Instant>) -> Decision {
        let retry = self.config.retry();
        let mut attempt = 0;

        loop {
            let budget = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        log_info!("Timeout exceeded while collecting signals, aborting the request");
                        return Decision::Error(NetworkError::Timeout);
                    }
                    log_debug!("Remaining timeout after signals: {}ms", remaining.as_millis());
                    Some(remaining)
                }
                None => None,
            };

            match self.scoring.score(signals, self.config.api_key(), budget).await {
                Ok(score) => return Decision::Scored { probability: score.probability },
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    let resume_at = Instant::now().checked_add(delay);
                    if deadline.is_some_and(|deadline| resume_at.map_or(true, |at| at >= deadline)) {
                        return Decision::Error(e);
                    }
                    log_warning!("Scoring attempt {} failed: {}; retrying in {}ms", attempt + 1, e, delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Decision::Error(e),
            }
        }
    }
}

/// Wait for all lookups or the deadline, whichever comes first.
///
/// Values arriving after the deadline are dropped with the receiver.
async fn collect_signals(mut signal_rx: mpsc::Receiver<SignalResult>, deadline: Option<Instant>) -> SignalSet {
    let mut signals = SignalSet::default();
    let mut received = 0;

    while received < SIGNAL_COUNT {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, signal_rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    log_debug!("Signal deadline reached with {}/{} signals", received, SIGNAL_COUNT);
                    break;
                }
            },
            None => signal_rx.recv().await,
        };

        match next {
            Some((field, value)) => {
                signals.set(field, value);
                received += 1;
            }
            None => break,
        }
    }

    signals
}
