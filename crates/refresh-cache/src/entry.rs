//! A single cached key: current value, expiry and reload guard

use crate::loader::Loader;
use crate::types::EntryInfo;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    expires_at: Instant,
    loaded_at: DateTime<Utc>,
}

/// Cached value for one key.
///
/// Only built from a successful load, so it always holds a value. The slot is replaced
/// wholesale on refresh; readers see either the old or the new value, never a mix.
pub(crate) struct CacheEntry<V> {
    key: String,
    ttl: Duration,
    loader: Arc<dyn Loader<V>>,
    slot: RwLock<Slot<V>>,
    reloading: AtomicBool,
}

impl<V: Clone> CacheEntry<V> {
    pub(crate) fn new(key: String, ttl: Duration, loader: Arc<dyn Loader<V>>, value: V) -> Self {
        Self {
            key,
            ttl,
            loader,
            slot: RwLock::new(Slot {
                value,
                expires_at: Instant::now() + ttl,
                loaded_at: Utc::now(),
            }),
            reloading: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn loader(&self) -> Arc<dyn Loader<V>> {
        Arc::clone(&self.loader)
    }

    /// Current value and whether it is past its expiry
    pub(crate) fn read(&self, now: Instant) -> (V, bool) {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        (slot.value.clone(), now > slot.expires_at)
    }

    /// Swap in a freshly loaded value and restart the TTL
    pub(crate) fn replace(&self, value: V) {
        let fresh = Slot {
            value,
            expires_at: Instant::now() + self.ttl,
            loaded_at: Utc::now(),
        };
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    /// Take the reload guard without blocking; `None` if a reload is already running
    pub(crate) fn try_begin_reload(self: &Arc<Self>) -> Option<ReloadGuard<V>> {
        self.reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReloadGuard {
                entry: Arc::clone(self),
            })
    }

    pub(crate) fn info(&self, now: Instant) -> EntryInfo {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        let expires_in_secs = if slot.expires_at >= now {
            (slot.expires_at - now).as_secs() as i64
        } else {
            -((now - slot.expires_at).as_secs() as i64)
        };
        EntryInfo {
            key: self.key.clone(),
            loaded_at: slot.loaded_at,
            expires_in_secs,
            stale: slot.expires_at < now,
            ttl_secs: self.ttl.as_secs(),
            refreshing: self.reloading.load(Ordering::Acquire),
        }
    }
}

/// Held for the lifetime of one background reload; releases the entry on drop,
/// whether the reload succeeded, failed, timed out or panicked.
pub(crate) struct ReloadGuard<V> {
    entry: Arc<CacheEntry<V>>,
}

impl<V> ReloadGuard<V> {
    pub(crate) fn entry(&self) -> &Arc<CacheEntry<V>> {
        &self.entry
    }
}

impl<V> Drop for ReloadGuard<V> {
    fn drop(&mut self) {
        self.entry.reloading.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::loader_fn;
    use crate::LoadError;

    fn entry(value: u32, ttl: Duration) -> Arc<CacheEntry<u32>> {
        let loader: Arc<dyn Loader<u32>> =
            Arc::new(loader_fn(|_key: String| async { Ok::<_, LoadError>(0) }));
        Arc::new(CacheEntry::new("k".to_string(), ttl, loader, value))
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_turns_stale_after_ttl() {
        let e = entry(7, Duration::from_secs(60));

        assert_eq!(e.read(Instant::now()), (7, false));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(e.read(Instant::now()), (7, false));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(e.read(Instant::now()), (7, true));

        e.replace(8);
        assert_eq!(e.read(Instant::now()), (8, false));
    }

    #[tokio::test]
    async fn test_reload_guard_is_exclusive_and_released_on_drop() {
        let e = entry(1, Duration::from_secs(60));

        let guard = e.try_begin_reload().expect("first guard");
        assert!(e.try_begin_reload().is_none());
        assert!(e.info(Instant::now()).refreshing);

        drop(guard);
        assert!(!e.info(Instant::now()).refreshing);
        assert!(e.try_begin_reload().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_reports_negative_expiry_when_stale() {
        let e = entry(1, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(25)).await;

        let info = e.info(Instant::now());
        assert_eq!(info.key, "k");
        assert_eq!(info.ttl_secs, 10);
        assert_eq!(info.expires_in_secs, -15);
        assert!(info.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_flags_staleness_under_a_second() {
        let e = entry(1, Duration::from_millis(1));
        assert!(!e.info(Instant::now()).stale);

        tokio::time::advance(Duration::from_millis(20)).await;
        let info = e.info(Instant::now());
        assert_eq!(info.expires_in_secs, 0);
        assert!(info.stale);
    }
}
