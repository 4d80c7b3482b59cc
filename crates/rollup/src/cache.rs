//! TTL-bounded dataset cache with single-flight refresh.
//!
//! One [`DatasetCache`] per datasource, shared by cloning. At most one refresh
//! runs at a time: callers arriving while a refresh is in flight await that
//! same refresh. A failed refresh keeps the previous snapshot in place and
//! hands it back to callers inside the error so they can degrade to stale data.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::snapshot::Snapshot;
use crate::transport::{Transport, TransportError};

/// Default time-to-live of a snapshot (one hour)
pub const DEFAULT_TTL: Duration = Duration::from_millis(3_600_000);
/// Default bound on one ingestion call
pub const DEFAULT_INGEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Source of "now" for expiry decisions and record derivations
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why a refresh failed. Cloneable so every waiter receives it.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Transport(Arc<TransportError>),

    #[error("Ingestion timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Failed to project records into rows: {0}")]
    Projection(Arc<serde_json::Error>),

    #[error("Refresh task failed: {0}")]
    TaskFailed(String),
}

/// A failed refresh, with the snapshot that is still being served (if any).
#[derive(Debug, Clone, Error)]
#[error("Refresh failed: {source}")]
pub struct CacheError {
    #[source]
    pub source: RefreshError,
    pub stale: Option<Arc<Snapshot>>,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub ingest_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            ingest_timeout: DEFAULT_INGEST_TIMEOUT,
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<Snapshot>, RefreshError>>>;

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    last_refreshed: Option<DateTime<Utc>>,
    in_flight: Option<RefreshFuture>,
}

struct CacheInner {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    options: CacheOptions,
    state: Mutex<CacheState>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Critical sections never panic, so a poisoned lock still holds consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, state: &CacheState) -> bool {
        match state.last_refreshed {
            None => true,
            Some(last) => {
                let elapsed = (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO);
                elapsed > self.options.ttl
            }
        }
    }

    async fn ingest_and_build(&self) -> Result<Arc<Snapshot>, RefreshError> {
        let timeout = self.options.ingest_timeout;
        let raw = tokio::time::timeout(timeout, self.transport.ingest())
            .await
            .map_err(|_| RefreshError::TimedOut(timeout))?
            .map_err(|e| RefreshError::Transport(Arc::new(e)))?;
        let snapshot = Snapshot::build(raw, self.clock.now())
            .map_err(|e| RefreshError::Projection(Arc::new(e)))?;
        Ok(Arc::new(snapshot))
    }

    async fn run_refresh(self: Arc<Self>) -> Result<Arc<Snapshot>, RefreshError> {
        let started = Instant::now();
        let result = self.ingest_and_build().await;

        let mut state = self.lock();
        state.in_flight = None;
        match &result {
            Ok(snapshot) => {
                state.snapshot = Some(snapshot.clone());
                state.last_refreshed = Some(snapshot.refreshed_at());
                info!(
                    "Refreshed {} dataset in {:?}: {} issues, {} epics",
                    self.transport.kind(),
                    started.elapsed(),
                    snapshot.issues().len(),
                    snapshot.epics().len()
                );
            }
            Err(e) => {
                warn!(
                    "Refresh from {} failed after {:?}: {}",
                    self.transport.kind(),
                    started.elapsed(),
                    e
                );
            }
        }
        result
    }
}

/// Shared handle to one dataset cache
#[derive(Clone)]
pub struct DatasetCache {
    inner: Arc<CacheInner>,
}

impl DatasetCache {
    pub fn new(transport: Arc<dyn Transport>, options: CacheOptions) -> Self {
        Self::with_clock(transport, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: Arc<dyn Transport>,
        options: CacheOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                transport,
                clock,
                options,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.options.ttl
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Current snapshot without any I/O.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock().snapshot.clone()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_refreshed
    }

    /// The current snapshot, refreshing first when the cache is cold or expired.
    pub async fn fetch_data(&self) -> Result<Arc<Snapshot>, CacheError> {
        let refresh = {
            let mut state = self.inner.lock();
            if let Some(snapshot) = &state.snapshot {
                if !self.inner.is_expired(&state) {
                    return Ok(snapshot.clone());
                }
            }
            self.join_or_start(&mut state)
        };
        self.settle(refresh).await
    }

    /// Refresh now, joining a refresh that is already in flight.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, CacheError> {
        let refresh = {
            let mut state = self.inner.lock();
            self.join_or_start(&mut state)
        };
        self.settle(refresh).await
    }

    /// Refresh every TTL in the background regardless of demand.
    pub fn spawn_background_refresh(&self) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.ttl());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = cache.refresh().await {
                    warn!("Background refresh failed: {}", e);
                }
            }
        })
    }

    fn join_or_start(&self, state: &mut CacheState) -> RefreshFuture {
        if let Some(in_flight) = &state.in_flight {
            return in_flight.clone();
        }
        let inner = self.inner.clone();
        let task = tokio::spawn(self.inner.clone().run_refresh());
        let refresh = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task died before clearing its own slot
                    inner.lock().in_flight = None;
                    warn!("Refresh from {} aborted: {}", inner.transport.kind(), e);
                    Err(RefreshError::TaskFailed(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();
        state.in_flight = Some(refresh.clone());
        refresh
    }

    async fn settle(&self, refresh: RefreshFuture) -> Result<Arc<Snapshot>, CacheError> {
        refresh.await.map_err(|source| CacheError {
            source,
            stale: self.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawIssue;
    use crate::transport::RawDataset;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
        fail: AtomicBool,
        panic_next: AtomicBool,
        delay: Duration,
    }

    impl CountingTransport {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                panic_next: AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn ingest(&self) -> Result<RawDataset, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("transport blew up");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Status {
                    url: "http://gitlab.test".into(),
                    status: 503,
                });
            }
            Ok(RawDataset {
                issues: vec![RawIssue {
                    iid: Some(call.to_string()),
                    ..Default::default()
                }],
                epics: vec![],
            })
        }

        async fn probe(&self) -> Result<String, TransportError> {
            Ok("ok".into())
        }
    }

    struct TestClock(Mutex<DateTime<Utc>>);

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap(),
            )))
        }

        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn cache_with(transport: Arc<CountingTransport>, clock: Arc<TestClock>) -> DatasetCache {
        DatasetCache::with_clock(transport, CacheOptions::default(), clock)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_fetches_ingest_once() {
        let transport = CountingTransport::new(Duration::from_millis(50));
        let cache = cache_with(transport.clone(), TestClock::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.fetch_data().await })
            })
            .collect();

        let mut snapshots = Vec::new();
        for handle in handles {
            snapshots.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(transport.calls(), 1);
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    }

    #[tokio::test]
    async fn test_ttl_expiry_triggers_refresh() {
        let transport = CountingTransport::new(Duration::ZERO);
        let clock = TestClock::new();
        let cache = cache_with(transport.clone(), clock.clone());

        cache.fetch_data().await.unwrap();
        clock.advance(chrono::Duration::minutes(59));
        cache.fetch_data().await.unwrap();
        assert_eq!(transport.calls(), 1);

        clock.advance(chrono::Duration::minutes(2));
        let snapshot = cache.fetch_data().await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(snapshot.issues()[0].id, "2");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_snapshot() {
        let transport = CountingTransport::new(Duration::ZERO);
        let clock = TestClock::new();
        let cache = cache_with(transport.clone(), clock.clone());

        let first = cache.fetch_data().await.unwrap();
        transport.fail.store(true, Ordering::SeqCst);
        clock.advance(chrono::Duration::hours(2));

        let err = cache.fetch_data().await.unwrap_err();
        assert!(matches!(err.source, RefreshError::Transport(_)));
        let stale = err.stale.expect("stale snapshot");
        assert!(Arc::ptr_eq(&stale, &first));
        assert!(Arc::ptr_eq(&cache.snapshot().unwrap(), &first));
    }

    #[tokio::test]
    async fn test_cold_failure_is_an_error_without_data() {
        let transport = CountingTransport::new(Duration::ZERO);
        transport.fail.store(true, Ordering::SeqCst);
        let cache = cache_with(transport.clone(), TestClock::new());

        let err = cache.fetch_data().await.unwrap_err();
        assert!(err.stale.is_none());
        assert!(cache.snapshot().is_none());

        // The next call starts a fresh attempt
        transport.fail.store(false, Ordering::SeqCst);
        assert!(cache.fetch_data().await.is_ok());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_panicked_refresh_does_not_wedge_the_cache() {
        let transport = CountingTransport::new(Duration::ZERO);
        transport.panic_next.store(true, Ordering::SeqCst);
        let cache = cache_with(transport.clone(), TestClock::new());

        let err = cache.fetch_data().await.unwrap_err();
        assert!(matches!(err.source, RefreshError::TaskFailed(_)));
        assert!(err.stale.is_none());

        let snapshot = cache.fetch_data().await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(snapshot.issues()[0].id, "2");

        transport.panic_next.store(true, Ordering::SeqCst);
        assert!(cache.refresh().await.is_err());
        assert!(cache.refresh().await.is_ok());
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_transport_times_out() {
        let transport = CountingTransport::new(Duration::from_secs(3600));
        let cache = DatasetCache::with_clock(
            transport,
            CacheOptions {
                ttl: DEFAULT_TTL,
                ingest_timeout: Duration::from_secs(5),
            },
            TestClock::new(),
        );

        let err = cache.fetch_data().await.unwrap_err();
        assert!(matches!(err.source, RefreshError::TimedOut(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_forced_refresh_bypasses_ttl() {
        let transport = CountingTransport::new(Duration::ZERO);
        let cache = cache_with(transport.clone(), TestClock::new());

        cache.fetch_data().await.unwrap();
        cache.refresh().await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert!(cache.last_refreshed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_runs_every_ttl() {
        let transport = CountingTransport::new(Duration::ZERO);
        let cache = cache_with(transport.clone(), TestClock::new());

        cache.fetch_data().await.unwrap();
        let handle = cache.spawn_background_refresh();

        tokio::time::sleep(DEFAULT_TTL + Duration::from_secs(10)).await;
        assert_eq!(transport.calls(), 2);
        handle.abort();
    }
}
