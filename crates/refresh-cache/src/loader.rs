//! Loader trait and key matching

use crate::error::LoadError;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Produces a fresh value for a cache key.
///
/// The cache never runs two loads of the same key at once, but a loader registered for
/// several keys may be invoked concurrently for different keys.
#[async_trait]
pub trait Loader<V>: Send + Sync {
    async fn load(&self, key: &str) -> Result<V, LoadError>;
}

#[async_trait]
impl<V, L> Loader<V> for Arc<L>
where
    V: Send + 'static,
    L: Loader<V> + ?Sized,
{
    async fn load(&self, key: &str) -> Result<V, LoadError> {
        self.as_ref().load(key).await
    }
}

/// Adapts an async closure taking the key into a [`Loader`]
pub struct FnLoader<F>(F);

/// Wrap an async closure as a loader
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader(f)
}

#[async_trait]
impl<V, F, Fut> Loader<V> for FnLoader<F>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
{
    async fn load(&self, key: &str) -> Result<V, LoadError> {
        (self.0)(key.to_string()).await
    }
}

/// Selects which keys a registered loader is responsible for
#[derive(Clone)]
pub enum KeyMatcher {
    /// Exactly one key; loaded as part of registration
    Exact(String),
    /// Any key ending with the given suffix
    Suffix(String),
    /// Any key accepted by the predicate
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl KeyMatcher {
    pub fn predicate<P>(p: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(p))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Suffix(s) => key.ends_with(s.as_str()),
            Self::Predicate(p) => p(key),
        }
    }

    /// Whether two matchers are interchangeable. Predicates are never considered equal.
    pub(crate) fn same_as(&self, other: &KeyMatcher) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Suffix(a), Self::Suffix(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(k) => f.debug_tuple("Exact").field(k).finish(),
            Self::Suffix(s) => f.debug_tuple("Suffix").field(s).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl fmt::Display for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(k) => f.write_str(k),
            Self::Suffix(s) => write!(f, "*{}", s),
            Self::Predicate(_) => f.write_str("<predicate>"),
        }
    }
}

impl From<&str> for KeyMatcher {
    fn from(key: &str) -> Self {
        Self::Exact(key.to_string())
    }
}

impl From<String> for KeyMatcher {
    fn from(key: String) -> Self {
        Self::Exact(key)
    }
}
