//! Request authorization against the current key table

use crate::decision::AuthorizationDecision;
use crate::headers::{HeaderSource, AUTHORIZATION, METHOD, PATH};
use crate::table::{KeyTable, LoadedAt};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Supplies the key table current at the time of the call
pub trait KeyTableSource: Send + Sync {
    fn key_table(&self) -> Option<Arc<KeyTable>>;
}

impl<F> KeyTableSource for F
where
    F: Fn() -> Option<Arc<KeyTable>> + Send + Sync,
{
    fn key_table(&self) -> Option<Arc<KeyTable>> {
        self()
    }
}

/// Extract the key from an `APIKEY <key>` authorization value.
///
/// Anything other than exactly two space-separated parts with the `APIKEY` scheme
/// (case-insensitive) yields `None`. Trailing spaces are ignored; repeated spaces
/// between the parts are not.
pub fn presented_key(authorization: &str) -> Option<&str> {
    let mut parts = authorization.trim_end_matches(' ').split(' ');
    let scheme = parts.next()?;
    let key = parts.next()?;
    if parts.next().is_some() || key.is_empty() || !scheme.eq_ignore_ascii_case("APIKEY") {
        return None;
    }
    Some(key)
}

/// Checks requests against the key table provided by `S`
pub struct AuthorizationEngine<S> {
    source: S,
    table_ttl: Option<Duration>,
    verbose: bool,
}

impl<S: KeyTableSource> AuthorizationEngine<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            table_ttl: None,
            verbose: false,
        }
    }

    /// TTL of remotely loaded tables, used only to report table age in logs
    pub fn with_table_ttl(mut self, ttl: Duration) -> Self {
        self.table_ttl = Some(ttl);
        self
    }

    /// Log every request header (authorization values masked)
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn check<H: HeaderSource + ?Sized>(&self, headers: &H) -> AuthorizationDecision {
        if self.verbose {
            log_headers(headers);
        }

        // A malformed header is reported the same way as an absent one.
        let Some(api_key) = headers.header(AUTHORIZATION).and_then(|value| {
            let key = presented_key(value);
            if key.is_none() {
                info!("Authorization header format is invalid");
            }
            key
        }) else {
            return AuthorizationDecision::KeyMissing;
        };

        let Some(table) = self.source.key_table() else {
            warn!("Could not load API keys from cache");
            return AuthorizationDecision::InvalidKey;
        };
        self.log_table_age(table.loaded_at());

        let mut records = table.records_for(api_key).peekable();
        if records.peek().is_none() {
            info!(api_key = %mask(api_key), "Did not find that API key");
            return AuthorizationDecision::InvalidKey;
        }

        let (Some(path), Some(method)) = (headers.header(PATH), headers.header(METHOD)) else {
            warn!("Cannot find path and/or method");
            return AuthorizationDecision::InvalidKey;
        };

        if records.any(|record| record.authorizes(path, method)) {
            debug!(method, path, "Valid API key, request allowed");
            AuthorizationDecision::Authorized
        } else {
            info!(method, path, "API key is valid, but not authorized for this operation");
            AuthorizationDecision::ValidButUnauthorized
        }
    }

    fn log_table_age(&self, loaded_at: LoadedAt) {
        match (loaded_at, self.table_ttl) {
            (LoadedAt::Startup, _) => debug!("API keys were loaded at startup (no expiry)"),
            (LoadedAt::At(at), Some(ttl)) => {
                let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                let remaining = (at + ttl - Utc::now()).num_seconds();
                if remaining < 0 {
                    debug!(loaded_at = %at, expired_secs = -remaining, "API keys expired");
                } else {
                    debug!(loaded_at = %at, remaining_secs = remaining, "API keys TTL remaining");
                }
            }
            (LoadedAt::At(at), None) => debug!(loaded_at = %at, "API keys loaded"),
        }
    }
}

/// Keep a short prefix of a secret for log correlation
fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}****", prefix)
}

fn log_headers<H: HeaderSource + ?Sized>(headers: &H) {
    for (name, value) in headers.header_pairs() {
        if name.eq_ignore_ascii_case(AUTHORIZATION) {
            let scheme = value.split(' ').next().unwrap_or_default();
            info!(header = name, value = %format!("{} ****", scheme), "Request header");
        } else {
            info!(header = name, value, "Request header");
        }
    }
}
