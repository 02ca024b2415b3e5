//! Keyed refresh-ahead cache
//!
//! A [`CacheService`] maps string keys to values produced by pluggable [`Loader`]s.
//! Registering a loader loads the key synchronously, so a registered key always has a
//! value. Once a value outlives its TTL, the next read still returns it immediately and
//! starts a single background reload for that key; readers never wait on a loader.
//!
//! ```no_run
//! use std::time::Duration;
//! use refresh_cache::{loader_fn, CacheService};
//!
//! # async fn example() -> Result<(), refresh_cache::CacheError> {
//! let cache: CacheService<String> = CacheService::new();
//! cache
//!     .register_loader(
//!         "greeting",
//!         loader_fn(|key: String| async move {
//!             Ok::<_, refresh_cache::LoadError>(format!("hello from {key}"))
//!         }),
//!         Duration::from_secs(120),
//!     )
//!     .await?;
//!
//! assert_eq!(cache.get("greeting").as_deref(), Some("hello from greeting"));
//! # Ok(())
//! # }
//! ```

mod entry;
mod error;
mod loader;
mod service;
mod types;

pub use error::{CacheError, LoadError, LoaderError, Result};
pub use loader::{loader_fn, FnLoader, KeyMatcher, Loader};
pub use service::{CacheService, CacheServiceBuilder};
pub use types::{CacheStats, EntryInfo};
