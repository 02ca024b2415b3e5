//! The API key table

use crate::rules::{MethodSet, PathPattern};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::warn;

/// Keys served when no remote table is configured
const FIXED_KEYS: [&str; 2] = [
    "0b919f1d-e113-4d08-976c-a2e2d73f412c",
    "44a39dc0-da72-42f3-8d8d-d6d01378fe4b",
];

/// When a table was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedAt {
    /// Built-in table; its content never ages
    Startup,
    At(DateTime<Utc>),
}

impl fmt::Display for LoadedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => f.write_str("startup"),
            Self::At(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl Serialize for LoadedAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One row of the key table.
///
/// A record without a path pattern still identifies a valid key, it just never
/// authorizes a request.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub api_key: String,
    pub allowed_path: Option<PathPattern>,
    pub allowed_methods: MethodSet,
}

impl KeyRecord {
    pub fn new(api_key: &str, path_glob: &str, methods: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            api_key: api_key.to_string(),
            allowed_path: Some(PathPattern::new(path_glob)?),
            allowed_methods: MethodSet::parse(methods),
        })
    }

    fn key_only(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            allowed_path: None,
            allowed_methods: MethodSet::default(),
        }
    }

    pub fn authorizes(&self, path: &str, method: &str) -> bool {
        self.allowed_path
            .as_ref()
            .map(|p| p.matches(path))
            .unwrap_or(false)
            && self.allowed_methods.contains(method)
    }
}

/// Ordered API key records. Keys may repeat; every record for a key is consulted.
#[derive(Debug, Clone)]
pub struct KeyTable {
    records: Vec<KeyRecord>,
    loaded_at: LoadedAt,
}

impl KeyTable {
    pub fn new(records: Vec<KeyRecord>, loaded_at: LoadedAt) -> Self {
        Self { records, loaded_at }
    }

    /// The built-in table: two sample keys, each limited to `GET /status`
    pub fn fixed() -> Self {
        let records = FIXED_KEYS
            .iter()
            .filter_map(|key| KeyRecord::new(key, "/status", "GET").ok())
            .collect();
        Self::new(records, LoadedAt::Startup)
    }

    /// Build a table from spreadsheet rows of `[api key, path glob, methods]`.
    ///
    /// Empty rows and rows without a key are dropped. Rows with fewer than three cells,
    /// or whose path glob cannot be compiled, keep their key but grant nothing.
    pub fn from_rows<R, C>(rows: R, loaded_at: LoadedAt) -> Self
    where
        R: IntoIterator<Item = Vec<C>>,
        C: AsRef<str>,
    {
        let records = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| {
                let key = row.first().map(|c| c.as_ref().trim())?;
                if key.is_empty() {
                    return None;
                }
                let (path, methods) = match (row.get(1), row.get(2)) {
                    (Some(path), Some(methods)) => (path.as_ref().trim(), methods.as_ref()),
                    _ => {
                        warn!(row = index, "Key row has no path/method rule");
                        return Some(KeyRecord::key_only(key));
                    }
                };
                match KeyRecord::new(key, path, methods) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(row = index, path, error = %e, "Unusable path pattern");
                        Some(KeyRecord::key_only(key))
                    }
                }
            })
            .collect();
        Self::new(records, loaded_at)
    }

    pub fn loaded_at(&self) -> LoadedAt {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records_for<'a>(&'a self, api_key: &'a str) -> impl Iterator<Item = &'a KeyRecord> {
        self.records.iter().filter(move |r| r.api_key == api_key)
    }
}
