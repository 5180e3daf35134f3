//! Device and network signals
//!
//! A [`SignalProvider`] is four independent async lookups, one per
//! [`SignalField`]. Each lookup may be wrapped in a [`TtlMemo`] so repeated
//! requests reuse a recent value instead of hitting the platform again.
//! Lookups never fail: an unavailable signal resolves to `None`.

use crate::logging::log_debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Host application handle handed to every lookup
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    package: String,
    properties: HashMap<String, String>,
}

impl AppContext {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            properties: HashMap::new(),
        }
    }

    /// Attach a host-provided value (e.g. `user_agent`, `advertising_id`)
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// The four signals sent for scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalField {
    DeviceId,
    Ipv4,
    Ipv6,
    UserAgent,
}

impl SignalField {
    pub const ALL: [SignalField; 4] = [
        SignalField::DeviceId,
        SignalField::Ipv4,
        SignalField::Ipv6,
        SignalField::UserAgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalField::DeviceId => "device id",
            SignalField::Ipv4 => "IPv4 address",
            SignalField::Ipv6 => "IPv6 address",
            SignalField::UserAgent => "user agent",
        }
    }
}

/// Signals resolved for one request; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalSet {
    pub device_id: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub user_agent: Option<String>,
}

impl SignalSet {
    pub fn set(&mut self, field: SignalField, value: Option<String>) {
        let slot = match field {
            SignalField::DeviceId => &mut self.device_id,
            SignalField::Ipv4 => &mut self.ipv4,
            SignalField::Ipv6 => &mut self.ipv6,
            SignalField::UserAgent => &mut self.user_agent,
        };
        *slot = value;
    }

    pub fn get(&self, field: SignalField) -> Option<&str> {
        match field {
            SignalField::DeviceId => self.device_id.as_deref(),
            SignalField::Ipv4 => self.ipv4.as_deref(),
            SignalField::Ipv6 => self.ipv6.as_deref(),
            SignalField::UserAgent => self.user_agent.as_deref(),
        }
    }

    /// Number of fields that resolved
    pub fn resolved(&self) -> usize {
        SignalField::ALL.iter().filter(|f| self.get(**f).is_some()).count()
    }
}

/// Time-bounded memo of a single value
pub struct TtlMemo<T> {
    ttl: Duration,
    state: Mutex<MemoState<T>>,
}

struct MemoState<T> {
    value: Option<T>,
    next_fetch: Option<Instant>,
}

impl<T: Clone> TtlMemo<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(MemoState {
                value: None,
                next_fetch: None,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Value stored less than `ttl` ago, if any
    pub fn fresh(&self, now: Instant) -> Option<T> {
        let state = self.state.lock();
        match (&state.value, state.next_fetch) {
            (Some(value), Some(next)) if now < next => Some(value.clone()),
            _ => None,
        }
    }

    /// Record a lookup that started at `fetched_at`
    pub fn store(&self, value: T, fetched_at: Instant) {
        let mut state = self.state.lock();
        state.value = Some(value);
        state.next_fetch = Some(fetched_at + self.ttl);
    }

    /// Memoized lookup. A zero TTL bypasses the memo; `None` results are never stored.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if self.ttl.is_zero() {
            return fetch().await;
        }

        let now = Instant::now();
        if let Some(value) = self.fresh(now) {
            return Some(value);
        }

        let fetched = fetch().await;
        if let Some(value) = &fetched {
            self.store(value.clone(), now);
        }
        fetched
    }
}

pub type SignalFuture = Pin<Box<dyn Future<Output = Option<String>> + Send>>;
type LookupFn = Arc<dyn Fn(Arc<AppContext>) -> SignalFuture + Send + Sync>;

/// One signal lookup plus its optional memo
#[derive(Clone)]
pub struct SignalSource {
    lookup: LookupFn,
    memo: Option<Arc<TtlMemo<String>>>,
}

impl SignalSource {
    pub fn new<F, Fut>(lookup: F) -> Self
    where
        F: Fn(Arc<AppContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        Self {
            lookup: Arc::new(move |ctx: Arc<AppContext>| -> SignalFuture { Box::pin(lookup(ctx)) }),
            memo: None,
        }
    }

    /// Source that never resolves a value
    pub fn absent() -> Self {
        Self::new(|_| async { None })
    }

    /// Source that always resolves `value`
    pub fn fixed(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(move |_| {
            let value = value.clone();
            async move { Some(value) }
        })
    }

    /// Wrap in a fresh memo. A zero TTL removes memoization.
    pub fn memoized(mut self, ttl: Duration) -> Self {
        self.memo = (!ttl.is_zero()).then(|| Arc::new(TtlMemo::new(ttl)));
        self
    }

    pub fn is_memoized(&self) -> bool {
        self.memo.is_some()
    }

    pub async fn fetch(&self, field: SignalField, ctx: Arc<AppContext>) -> Option<String> {
        let Some(memo) = &self.memo else {
            log_debug!("Cache is disabled, fetching {}", field.as_str());
            return (self.lookup)(ctx).await;
        };

        let lookup = Arc::clone(&self.lookup);
        let value = memo
            .get_or_fetch(move || {
                log_debug!("Cache missed, fetching {}", field.as_str());
                lookup(ctx)
            })
            .await;
        log_debug!("Resolved {}: {:?}", field.as_str(), value);
        value
    }
}

/// Signal lookups bound to a configuration
#[derive(Clone)]
pub struct SignalProvider {
    device_id: SignalSource,
    ipv4: SignalSource,
    ipv6: SignalSource,
    user_agent: SignalSource,
}

impl SignalProvider {
    pub fn builder() -> SignalProviderBuilder {
        SignalProviderBuilder::default()
    }

    /// Apply one memo per field, uniformly
    pub fn memoized(self, ttl: Duration) -> Self {
        Self {
            device_id: self.device_id.memoized(ttl),
            ipv4: self.ipv4.memoized(ttl),
            ipv6: self.ipv6.memoized(ttl),
            user_agent: self.user_agent.memoized(ttl),
        }
    }

    pub fn source(&self, field: SignalField) -> &SignalSource {
        match field {
            SignalField::DeviceId => &self.device_id,
            SignalField::Ipv4 => &self.ipv4,
            SignalField::Ipv6 => &self.ipv6,
            SignalField::UserAgent => &self.user_agent,
        }
    }

    pub async fn fetch(&self, field: SignalField, ctx: Arc<AppContext>) -> Option<String> {
        self.source(field).fetch(field, ctx).await
    }

    pub async fn device_id(&self, ctx: Arc<AppContext>) -> Option<String> {
        self.fetch(SignalField::DeviceId, ctx).await
    }

    pub async fn ipv4(&self, ctx: Arc<AppContext>) -> Option<String> {
        self.fetch(SignalField::Ipv4, ctx).await
    }

    pub async fn ipv6(&self, ctx: Arc<AppContext>) -> Option<String> {
        self.fetch(SignalField::Ipv6, ctx).await
    }

    pub async fn user_agent(&self, ctx: Arc<AppContext>) -> Option<String> {
        self.fetch(SignalField::UserAgent, ctx).await
    }
}

impl fmt::Debug for SignalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalProvider")
            .field("memoized", &self.device_id.is_memoized())
            .finish_non_exhaustive()
    }
}

/// Builder for custom providers. Unset fields resolve to `None`.
#[derive(Default)]
pub struct SignalProviderBuilder {
    device_id: Option<SignalSource>,
    ipv4: Option<SignalSource>,
    ipv6: Option<SignalSource>,
    user_agent: Option<SignalSource>,
}

impl SignalProviderBuilder {
    pub fn device_id(mut self, source: SignalSource) -> Self {
        self.device_id = Some(source);
        self
    }

    pub fn ipv4(mut self, source: SignalSource) -> Self {
        self.ipv4 = Some(source);
        self
    }

    pub fn ipv6(mut self, source: SignalSource) -> Self {
        self.ipv6 = Some(source);
        self
    }

    pub fn user_agent(mut self, source: SignalSource) -> Self {
        self.user_agent = Some(source);
        self
    }

    pub fn build(self) -> SignalProvider {
        SignalProvider {
            device_id: self.device_id.unwrap_or_else(SignalSource::absent),
            ipv4: self.ipv4.unwrap_or_else(SignalSource::absent),
            ipv6: self.ipv6.unwrap_or_else(SignalSource::absent),
            user_agent: self.user_agent.unwrap_or_else(SignalSource::absent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_source(calls: Arc<AtomicUsize>, value: Option<&'static str>) -> SignalSource {
        SignalSource::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { value.map(String::from) }
        })
    }

    fn ctx() -> Arc<AppContext> {
        Arc::new(AppContext::new("com.example.app"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_memo_reuses_value_within_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(calls.clone(), Some("d1")).memoized(Duration::from_secs(60));

        assert_eq!(source.fetch(SignalField::DeviceId, ctx()).await.as_deref(), Some("d1"));
        assert_eq!(source.fetch(SignalField::DeviceId, ctx()).await.as_deref(), Some("d1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(source.fetch(SignalField::DeviceId, ctx()).await.as_deref(), Some("d1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_looks_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(calls.clone(), Some("ua")).memoized(Duration::ZERO);
        assert!(!source.is_memoized());

        for _ in 0..3 {
            source.fetch(SignalField::UserAgent, ctx()).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_absent_results_are_not_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(calls.clone(), None).memoized(Duration::from_secs(60));

        assert_eq!(source.fetch(SignalField::Ipv4, ctx()).await, None);
        assert_eq!(source.fetch(SignalField::Ipv4, ctx()).await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fields_are_memoized_independently() {
        let device_calls = Arc::new(AtomicUsize::new(0));
        let ip_calls = Arc::new(AtomicUsize::new(0));
        let provider = SignalProvider::builder()
            .device_id(counting_source(device_calls.clone(), Some("d1")))
            .ipv4(counting_source(ip_calls.clone(), Some("1.2.3.4")))
            .build()
            .memoized(Duration::from_secs(60));

        provider.device_id(ctx()).await;
        provider.device_id(ctx()).await;
        provider.ipv4(ctx()).await;

        assert_eq!(device_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ip_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.ipv6(ctx()).await, None);
        assert_eq!(provider.user_agent(ctx()).await, None);
    }

    #[test]
    fn test_signal_set_fields() {
        let mut set = SignalSet::default();
        set.set(SignalField::Ipv4, Some("1.2.3.4".into()));
        set.set(SignalField::UserAgent, Some("UA".into()));

        assert_eq!(set.get(SignalField::Ipv4), Some("1.2.3.4"));
        assert_eq!(set.get(SignalField::DeviceId), None);
        assert_eq!(set.resolved(), 2);
    }

    #[test]
    fn test_context_properties() {
        let ctx = AppContext::new("com.example.app").with_property("user_agent", "UA/1.0");
        assert_eq!(ctx.package(), "com.example.app");
        assert_eq!(ctx.property("user_agent"), Some("UA/1.0"));
        assert_eq!(ctx.property("advertising_id"), None);
    }
}
