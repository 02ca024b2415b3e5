//! The cache service: loader registration, reads and background refresh

use crate::entry::{CacheEntry, ReloadGuard};
use crate::error::{CacheError, LoaderError, Result};
use crate::loader::{KeyMatcher, Loader};
use crate::types::{CacheStats, EntryInfo};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const DEFAULT_REFRESH_WORKERS: usize = 4;
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(90);

struct Registration<V> {
    id: u64,
    matcher: KeyMatcher,
    loader: Arc<dyn Loader<V>>,
    ttl: Duration,
}

impl<V> Clone for Registration<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            matcher: self.matcher.clone(),
            loader: Arc::clone(&self.loader),
            ttl: self.ttl,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

/// State shared with spawned load tasks
struct Shared<V> {
    entries: RwLock<HashMap<String, Arc<CacheEntry<V>>>>,
    /// Keys whose first load is in flight, with the signal their waiters park on
    pending: Mutex<HashMap<String, Arc<Notify>>>,
    refresh_permits: Arc<Semaphore>,
    refresh_timeout: Duration,
    counters: Counters,
}

impl<V: Clone + Send + Sync + 'static> Shared<V> {
    fn entry(&self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert a freshly loaded entry unless another load won the race
    fn insert(&self, entry: CacheEntry<V>) -> Arc<CacheEntry<V>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(entry.key().to_string())
                .or_insert_with(|| Arc::new(entry)),
        )
    }

    /// Claim the first load of `key`. Only one caller at a time gets [`Claim::Owner`].
    fn claim(self: &Arc<Self>, key: &str) -> Claim<V> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(notify) = pending.get(key) {
            return Claim::Waiting(Arc::clone(notify));
        }
        // Owners insert the entry before giving up their claim.
        if let Some(entry) = self.entry(key) {
            return Claim::Loaded(entry);
        }
        pending.insert(key.to_string(), Arc::new(Notify::new()));
        Claim::Owner(PendingGuard {
            shared: Arc::clone(self),
            key: key.to_string(),
        })
    }

    fn still_pending(&self, key: &str, notify: &Arc<Notify>) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|current| Arc::ptr_eq(current, notify))
            .unwrap_or(false)
    }

    /// Park until the first load signalled by `notify` gives up its claim
    async fn wait_for(&self, key: &str, notify: Arc<Notify>) {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.still_pending(key, &notify) {
            notified.await;
        }
    }
}

enum Claim<V> {
    Owner(PendingGuard<V>),
    Waiting(Arc<Notify>),
    Loaded(Arc<CacheEntry<V>>),
}

/// Claim on a key's first load; releasing it wakes every waiter, also when the load
/// failed or its future was dropped.
struct PendingGuard<V> {
    shared: Arc<Shared<V>>,
    key: String,
}

impl<V> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        let notify = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

/// Builder for [`CacheService`]
#[derive(Debug, Clone)]
pub struct CacheServiceBuilder {
    refresh_workers: usize,
    refresh_timeout: Duration,
}

impl Default for CacheServiceBuilder {
    fn default() -> Self {
        Self {
            refresh_workers: DEFAULT_REFRESH_WORKERS,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

impl CacheServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of loaders running in the background at once (minimum 1)
    pub fn refresh_workers(mut self, workers: usize) -> Self {
        self.refresh_workers = workers.max(1);
        self
    }

    /// Upper bound on a single loader invocation
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Build the service on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn build<V: Clone + Send + Sync + 'static>(self) -> CacheService<V> {
        self.build_on(Handle::current())
    }

    /// Build the service, spawning background loads onto `runtime`
    pub fn build_on<V: Clone + Send + Sync + 'static>(self, runtime: Handle) -> CacheService<V> {
        CacheService {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                refresh_permits: Arc::new(Semaphore::new(self.refresh_workers)),
                refresh_timeout: self.refresh_timeout,
                counters: Counters::default(),
            }),
            runtime,
        }
    }
}

/// Keyed cache that serves stale values while reloading them in the background.
///
/// Loaders are registered per key (or per [`KeyMatcher`]); matchers are consulted in
/// registration order and the first match wins. [`get`](Self::get) never waits for a
/// loader: a stale read returns the held value and starts at most one background reload
/// for that key. Failed reloads keep the previous value, which stays eligible for
/// another attempt on the next stale read.
pub struct CacheService<V> {
    registrations: RwLock<Vec<Registration<V>>>,
    next_id: AtomicU64,
    shared: Arc<Shared<V>>,
    runtime: Handle,
}

impl<V: Clone + Send + Sync + 'static> CacheService<V> {
    /// Create a service with default settings (4 refresh workers, 90 second loader timeout).
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new() -> Self {
        CacheServiceBuilder::new().build()
    }

    /// Register a loader.
    ///
    /// For an exact key the value is loaded before this returns, so the key can be read
    /// right away; if that load fails the registration is dropped and the error returned.
    /// Suffix and predicate matchers are registered without loading; their keys are
    /// loaded by [`warm`](Self::warm) or on first access.
    ///
    /// Registering a matcher that is already registered returns
    /// [`CacheError::AlreadyRegistered`] and leaves the existing loader in place.
    pub async fn register_loader<L>(
        &self,
        matcher: impl Into<KeyMatcher>,
        loader: L,
        ttl: Duration,
    ) -> Result<()>
    where
        L: Loader<V> + 'static,
    {
        let matcher = matcher.into();
        let registration = Registration {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            matcher,
            loader: Arc::new(loader),
            ttl,
        };

        let guard = {
            let mut registrations = self
                .registrations
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            if registrations
                .iter()
                .any(|r| r.matcher.same_as(&registration.matcher))
            {
                warn!(matcher = %registration.matcher, "Loader already registered, ignoring");
                return Err(CacheError::AlreadyRegistered(
                    registration.matcher.to_string(),
                ));
            }

            // An exact key already loaded, or being loaded, through another matcher
            // belongs to that loader.
            let guard = match &registration.matcher {
                KeyMatcher::Exact(key) => match self.shared.claim(key) {
                    Claim::Owner(guard) => Some(guard),
                    Claim::Waiting(_) | Claim::Loaded(_) => {
                        warn!(key, "Key already loaded by another loader, ignoring");
                        return Err(CacheError::AlreadyRegistered(key.clone()));
                    }
                },
                _ => None,
            };
            registrations.push(registration.clone());
            guard
        };

        info!(matcher = %registration.matcher, ttl_secs = ttl.as_secs(), "Registered loader");

        let Some(guard) = guard else {
            return Ok(());
        };

        let loaded = self.initial_load(&guard.key, &registration).await;
        if loaded.is_err() {
            self.registrations
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|r| r.id != registration.id);
        }
        drop(guard);
        loaded.map(|_| ())
    }

    /// Read the current value for `key`.
    ///
    /// Returns `None` when no loader is registered for the key, or when a matcher accepts
    /// the key but its first load has not completed yet (that load is started here).
    /// Never blocks on a loader.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.shared.entry(key) {
            let (value, stale) = entry.read(Instant::now());
            if stale {
                self.shared
                    .counters
                    .stale_hits
                    .fetch_add(1, Ordering::Relaxed);
                match entry.try_begin_reload() {
                    Some(guard) => self.spawn_refresh(guard),
                    None => debug!(key, "Refresh already in flight"),
                }
            } else {
                self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            return Some(value);
        }

        self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
        match self.registration_for(key) {
            Some(registration) => {
                self.spawn_first_load(key, registration);
                None
            }
            None => {
                warn!(key, "No cache registered for key");
                None
            }
        }
    }

    /// Load `key` now if it has no value yet, waiting for the loader.
    ///
    /// Intended for startup warm-up of keys registered through a suffix or predicate
    /// matcher. Returns the cached value directly when one is already present.
    pub async fn warm(&self, key: &str) -> Result<V> {
        if let Some(entry) = self.shared.entry(key) {
            return Ok(entry.read(Instant::now()).0);
        }
        let registration = self
            .registration_for(key)
            .ok_or_else(|| CacheError::NotRegistered(key.to_string()))?;
        self.first_load(key, &registration).await
    }

    /// Whether a loader is registered for `key`
    pub fn is_registered(&self, key: &str) -> bool {
        self.shared.entry(key).is_some() || self.registration_for(key).is_some()
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.shared
            .entry(key)
            .map(|entry| entry.info(Instant::now()))
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.shared.counters;
        CacheStats {
            entries: self
                .shared
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            hits: counters.hits.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            refreshes: counters.refreshes.load(Ordering::Relaxed),
            refresh_failures: counters.refresh_failures.load(Ordering::Relaxed),
        }
    }

    fn registration_for(&self, key: &str) -> Option<Registration<V>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.matcher.matches(key))
            .cloned()
    }

    /// Load `key` unless another first load of it is in flight, in which case wait for
    /// that one. A waiter whose owner failed tries again itself.
    async fn first_load(&self, key: &str, registration: &Registration<V>) -> Result<V> {
        loop {
            match self.shared.claim(key) {
                Claim::Loaded(entry) => return Ok(entry.read(Instant::now()).0),
                Claim::Waiting(notify) => {
                    debug!(key, "Waiting for in-flight first load");
                    self.shared.wait_for(key, notify).await;
                }
                Claim::Owner(_guard) => return self.initial_load(key, registration).await,
            }
        }
    }

    async fn initial_load(&self, key: &str, registration: &Registration<V>) -> Result<V> {
        info!(key, "Synchronously loading data");
        let value = run_loader(
            registration.loader.as_ref(),
            key,
            self.shared.refresh_timeout,
        )
        .await
        .map_err(|source| {
            error!(key, error = %source, "Initial load failed");
            CacheError::InitialLoad {
                key: key.to_string(),
                source,
            }
        })?;

        let entry = self.shared.insert(CacheEntry::new(
            key.to_string(),
            registration.ttl,
            Arc::clone(&registration.loader),
            value,
        ));
        Ok(entry.read(Instant::now()).0)
    }

    fn spawn_first_load(&self, key: &str, registration: Registration<V>) {
        let Claim::Owner(guard) = self.shared.claim(key) else {
            debug!(key, "First load already in flight");
            return;
        };

        info!(key, matcher = %registration.matcher, "Loading matched key in the background");
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        self.runtime.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = Arc::clone(&shared.refresh_permits).acquire_owned().await else {
                return;
            };
            let result =
                run_loader(registration.loader.as_ref(), &key, shared.refresh_timeout).await;
            match result {
                Ok(value) => {
                    shared.insert(CacheEntry::new(
                        key.clone(),
                        registration.ttl,
                        registration.loader,
                        value,
                    ));
                    info!(key = %key, "Loaded matched key");
                }
                Err(e) => warn!(key = %key, error = %e, "Background first load failed"),
            }
        });
    }

    fn spawn_refresh(&self, guard: ReloadGuard<V>) {
        let shared = Arc::clone(&self.shared);
        info!(key = guard.entry().key(), "Asynchronously refreshing data");

        self.runtime.spawn(async move {
            let entry = Arc::clone(guard.entry());
            let key = entry.key().to_string();

            // Held until the task ends so the guard is released on every path.
            let _guard = guard;
            let Ok(_permit) = Arc::clone(&shared.refresh_permits).acquire_owned().await else {
                return;
            };

            let started = Instant::now();
            match run_loader(entry.loader().as_ref(), &key, shared.refresh_timeout).await {
                Ok(value) => {
                    entry.replace(value);
                    shared.counters.refreshes.fetch_add(1, Ordering::Relaxed);
                    info!(
                        key = %key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ttl_secs = entry.ttl().as_secs(),
                        "Refreshed cache entry"
                    );
                }
                Err(e) => {
                    shared
                        .counters
                        .refresh_failures
                        .fetch_add(1, Ordering::Relaxed);
                    error!(key = %key, error = %e, "Refresh failed, keeping previous value");
                }
            }
        });
    }
}

impl<V: Clone + Send + Sync + 'static> Default for CacheService<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one loader invocation with a timeout, turning panics into errors
async fn run_loader<V>(
    loader: &dyn Loader<V>,
    key: &str,
    timeout: Duration,
) -> std::result::Result<V, LoaderError> {
    let attempt = AssertUnwindSafe(tokio::time::timeout(timeout, loader.load(key)))
        .catch_unwind()
        .await;
    match attempt {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(LoaderError::Failed(e)),
        Ok(Err(_elapsed)) => Err(LoaderError::TimedOut(timeout)),
        Err(panic) => Err(LoaderError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::loader::loader_fn;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const TTL: Duration = Duration::from_secs(60);

    /// Loader returning the invocation number; invocations listed in `hold` wait on the gate
    struct CountingLoader {
        calls: AtomicUsize,
        hold: Vec<usize>,
        gate: Notify,
    }

    impl CountingLoader {
        fn new() -> Arc<Self> {
            Self::holding(vec![])
        }

        fn holding(hold: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                hold,
                gate: Notify::new(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Loader<usize> for CountingLoader {
        async fn load(&self, _key: &str) -> std::result::Result<usize, LoadError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hold.contains(&n) {
                self.gate.notified().await;
            }
            Ok(n)
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unregistered_key_is_missing() {
        let cache: CacheService<usize> = CacheService::new();
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.get("nope"), None);
        assert!(!cache.is_registered("nope"));
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_loads_synchronously() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::new();
        cache
            .register_loader("apikeys", Arc::clone(&loader), TTL)
            .await
            .unwrap();

        assert_eq!(loader.calls(), 1);
        assert_eq!(cache.get("apikeys"), Some(1));
        assert!(cache.is_registered("apikeys"));
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_never_reloads() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::new();
        cache
            .register_loader("apikeys", Arc::clone(&loader), TTL)
            .await
            .unwrap();

        for _ in 0..50 {
            assert_eq!(cache.get("apikeys"), Some(1));
        }
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert_eq!(cache.get("apikeys"), Some(1));
        settle().await;

        assert_eq!(loader.calls(), 1);
        assert_eq!(cache.stats().hits, 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reads_trigger_single_refresh() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::holding(vec![2]);
        cache
            .register_loader("apikeys", Arc::clone(&loader), TTL)
            .await
            .unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        for _ in 0..10 {
            assert_eq!(cache.get("apikeys"), Some(1));
        }
        settle().await;
        assert_eq!(loader.calls(), 2);
        assert!(cache.entry_info("apikeys").unwrap().refreshing);

        // Refresh is parked on the gate: more stale reads start nothing new.
        for _ in 0..10 {
            assert_eq!(cache.get("apikeys"), Some(1));
        }
        settle().await;
        assert_eq!(loader.calls(), 2);

        loader.gate.notify_one();
        settle().await;

        assert_eq!(cache.get("apikeys"), Some(2));
        assert_eq!(loader.calls(), 2);
        assert!(!cache.entry_info("apikeys").unwrap().refreshing);
        assert_eq!(cache.stats().refreshes, 1);
        assert_eq!(cache.stats().stale_hits, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_value_and_retries() {
        let cache: CacheService<String> = CacheService::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cache
            .register_loader(
                "gcptoken",
                loader_fn(move |_key: String| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n == 2 {
                            Err::<String, LoadError>("metadata server returned 503".into())
                        } else {
                            Ok(format!("token-{n}"))
                        }
                    }
                }),
                TTL,
            )
            .await
            .unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.get("gcptoken").as_deref(), Some("token-1"));
        settle().await;
        assert_eq!(cache.stats().refresh_failures, 1);

        // Still stale, guard released: this read retries.
        assert_eq!(cache.get("gcptoken").as_deref(), Some("token-1"));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get("gcptoken").as_deref(), Some("token-3"));
        assert_eq!(cache.stats().refreshes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_refresh_times_out_and_releases_guard() {
        let cache: CacheService<usize> = CacheServiceBuilder::new()
            .refresh_timeout(Duration::from_secs(5))
            .build();
        let loader = CountingLoader::holding(vec![2]);
        cache
            .register_loader("apikeys", Arc::clone(&loader), TTL)
            .await
            .unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.get("apikeys"), Some(1));
        settle().await;
        assert!(cache.entry_info("apikeys").unwrap().refreshing);

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(cache.stats().refresh_failures, 1);
        assert!(!cache.entry_info("apikeys").unwrap().refreshing);

        assert_eq!(cache.get("apikeys"), Some(1));
        settle().await;
        assert_eq!(loader.calls(), 3);
        assert_eq!(cache.get("apikeys"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_refresh_is_contained() {
        let cache: CacheService<usize> = CacheService::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cache
            .register_loader(
                "apikeys",
                loader_fn(move |_key: String| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n == 2 {
                            panic!("sheet row out of range");
                        }
                        Ok::<_, LoadError>(n)
                    }
                }),
                TTL,
            )
            .await
            .unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.get("apikeys"), Some(1));
        settle().await;
        assert_eq!(cache.stats().refresh_failures, 1);
        assert!(!cache.entry_info("apikeys").unwrap().refreshing);

        assert_eq!(cache.get("apikeys"), Some(1));
        settle().await;
        assert_eq!(cache.get("apikeys"), Some(3));
    }

    #[tokio::test]
    async fn test_initial_load_failure_rejects_registration() {
        let cache: CacheService<usize> = CacheService::new();
        let err = cache
            .register_loader(
                "apikeys",
                loader_fn(|_key: String| async {
                    Err::<usize, LoadError>("sheet not found".into())
                }),
                TTL,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::InitialLoad { ref key, .. } if key == "apikeys"));
        assert_eq!(cache.get("apikeys"), None);
        assert!(!cache.is_registered("apikeys"));

        // The failed registration is rolled back, so a retry is allowed.
        cache
            .register_loader("apikeys", CountingLoader::new(), TTL)
            .await
            .unwrap();
        assert_eq!(cache.get("apikeys"), Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let cache: CacheService<usize> = CacheService::new();
        let first = CountingLoader::new();
        let second = CountingLoader::new();
        cache
            .register_loader("apikeys", Arc::clone(&first), TTL)
            .await
            .unwrap();

        let err = cache
            .register_loader("apikeys", Arc::clone(&second), TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyRegistered(_)));
        assert_eq!(second.calls(), 0);
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn test_suffix_matcher_loads_on_first_access() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::new();
        cache
            .register_loader(
                KeyMatcher::Suffix("gcptoken".to_string()),
                Arc::clone(&loader),
                TTL,
            )
            .await
            .unwrap();
        assert_eq!(loader.calls(), 0);
        assert!(cache.is_registered("sheets-gcptoken"));

        assert_eq!(cache.get("sheets-gcptoken"), None);
        assert_eq!(cache.get("sheets-gcptoken"), None);
        settle().await;

        assert_eq!(loader.calls(), 1);
        assert_eq!(cache.get("sheets-gcptoken"), Some(1));
    }

    #[tokio::test]
    async fn test_warm_loads_matched_key() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::new();
        cache
            .register_loader(
                KeyMatcher::predicate(|k| k.starts_with("token:")),
                Arc::clone(&loader),
                TTL,
            )
            .await
            .unwrap();

        assert_eq!(cache.warm("token:a").await.unwrap(), 1);
        assert_eq!(cache.warm("token:a").await.unwrap(), 1);
        assert_eq!(cache.get("token:a"), Some(1));
        assert_eq!(loader.calls(), 1);

        let err = cache.warm("other").await.unwrap_err();
        assert!(matches!(err, CacheError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_first_matching_registration_wins() {
        let cache: CacheService<usize> = CacheService::new();
        let suffix = CountingLoader::new();
        let catch_all = CountingLoader::new();
        cache
            .register_loader(
                KeyMatcher::Suffix("gcptoken".to_string()),
                Arc::clone(&suffix),
                TTL,
            )
            .await
            .unwrap();
        cache
            .register_loader(KeyMatcher::predicate(|_| true), Arc::clone(&catch_all), TTL)
            .await
            .unwrap();

        cache.warm("a-gcptoken").await.unwrap();
        cache.warm("anything").await.unwrap();
        assert_eq!(suffix.calls(), 1);
        assert_eq!(catch_all.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refreshes_are_bounded() {
        let cache: CacheService<usize> = CacheServiceBuilder::new().refresh_workers(2).build();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let loads = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let (active, peak, gate, loads) = (
                Arc::clone(&active),
                Arc::clone(&peak),
                Arc::clone(&gate),
                Arc::clone(&loads),
            );
            cache
                .register_loader(
                    format!("key-{i}"),
                    loader_fn(move |_key: String| {
                        let (active, peak, gate) =
                            (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&gate));
                        let n = loads.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n >= 5 {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                gate.notified().await;
                                active.fetch_sub(1, Ordering::SeqCst);
                            }
                            Ok::<_, LoadError>(n)
                        }
                    }),
                    TTL,
                )
                .await
                .unwrap();
        }

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        for i in 0..5 {
            assert!(cache.get(&format!("key-{i}")).is_some());
        }
        settle().await;
        assert_eq!(active.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            gate.notify_waiters();
            settle().await;
        }
        assert_eq!(cache.stats().refreshes, 5);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_warms_share_one_load() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::holding(vec![1]);
        cache
            .register_loader(
                KeyMatcher::Suffix("gcptoken".to_string()),
                Arc::clone(&loader),
                TTL,
            )
            .await
            .unwrap();

        let (first, second, ()) = tokio::join!(
            cache.warm("a-gcptoken"),
            cache.warm("a-gcptoken"),
            async {
                settle().await;
                loader.gate.notify_one();
            }
        );
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 1);
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_warm_waits_for_background_first_load() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::holding(vec![1]);
        cache
            .register_loader(
                KeyMatcher::Suffix("gcptoken".to_string()),
                Arc::clone(&loader),
                TTL,
            )
            .await
            .unwrap();

        assert_eq!(cache.get("a-gcptoken"), None);
        settle().await;
        assert_eq!(loader.calls(), 1);

        let (warmed, ()) = tokio::join!(cache.warm("a-gcptoken"), async {
            settle().await;
            loader.gate.notify_one();
        });
        assert_eq!(warmed.unwrap(), 1);
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_exact_registration_rejected_while_key_is_loading() {
        let cache: CacheService<usize> = CacheService::new();
        let suffix = CountingLoader::holding(vec![1]);
        let exact = CountingLoader::new();
        cache
            .register_loader(
                KeyMatcher::Suffix("gcptoken".to_string()),
                Arc::clone(&suffix),
                TTL,
            )
            .await
            .unwrap();

        assert_eq!(cache.get("a-gcptoken"), None);
        settle().await;

        let err = cache
            .register_loader("a-gcptoken", Arc::clone(&exact), TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyRegistered(ref key) if key == "a-gcptoken"));
        assert_eq!(exact.calls(), 0);

        suffix.gate.notify_one();
        settle().await;
        assert_eq!(cache.get("a-gcptoken"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_warm_releases_key() {
        let cache: CacheService<usize> = CacheService::new();
        let loader = CountingLoader::holding(vec![1]);
        cache
            .register_loader(
                KeyMatcher::Suffix("gcptoken".to_string()),
                Arc::clone(&loader),
                TTL,
            )
            .await
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), cache.warm("a-gcptoken")).await;
        assert!(abandoned.is_err());

        assert_eq!(cache.warm("a-gcptoken").await.unwrap(), 2);
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_stale_reads_start_one_refresh() {
        const READERS: usize = 32;
        const READS: usize = 100;

        let ttl = Duration::from_millis(200);
        let cache: Arc<CacheService<usize>> = Arc::new(CacheService::new());
        let loader = CountingLoader::holding(vec![2]);
        cache
            .register_loader("apikeys", Arc::clone(&loader), ttl)
            .await
            .unwrap();
        tokio::time::sleep(ttl + Duration::from_millis(50)).await;

        let barrier = Arc::new(tokio::sync::Barrier::new(READERS));
        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
                tokio::spawn(async move {
                    barrier.wait().await;
                    (0..READS).all(|_| cache.get("apikeys") == Some(1))
                })
            })
            .collect();
        for reader in readers {
            assert!(reader.await.unwrap(), "a reader saw something other than the old value");
        }

        for _ in 0..200 {
            if loader.calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.stats().stale_hits, (READERS * READS) as u64);

        loader.gate.notify_one();
        for _ in 0..200 {
            if cache.get("apikeys") == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.get("apikeys"), Some(2));
        assert_eq!(cache.stats().refreshes, 1);
    }
}
