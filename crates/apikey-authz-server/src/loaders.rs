//! Cache loaders for the access token and the key table

use crate::config::Config;
use crate::error::Result;
use apikey_authz::{KeyTable, KeyTableSource, LoadedAt};
use async_trait::async_trait;
use chrono::Utc;
use gcp_access_token::TokenSource;
use refresh_cache::{CacheService, LoadError, Loader};
use sheets_client::SheetsClient;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub const TOKEN_KEY: &str = "gcptoken";
pub const KEY_TABLE_KEY: &str = "apikeys";

/// Values held by the service cache
#[derive(Clone)]
pub enum CachedValue {
    Token(String),
    KeyTable(Arc<KeyTable>),
}

impl CachedValue {
    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(token) => Some(token),
            Self::KeyTable(_) => None,
        }
    }

    pub fn into_key_table(self) -> Option<Arc<KeyTable>> {
        match self {
            Self::KeyTable(table) => Some(table),
            Self::Token(_) => None,
        }
    }
}

pub type ServiceCache = CacheService<CachedValue>;

/// Loads an access token for the Sheets API
pub struct TokenLoader {
    source: TokenSource,
}

impl TokenLoader {
    pub fn new(source: TokenSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Loader<CachedValue> for TokenLoader {
    async fn load(&self, _key: &str) -> std::result::Result<CachedValue, LoadError> {
        debug!(source = self.source.describe(), "Fetching access token");
        let token = self.source.access_token().await?;
        Ok(CachedValue::Token(token))
    }
}

/// Where the remote key table lives
pub struct SheetLocation {
    pub client: SheetsClient,
    pub sheet_id: String,
    pub range: String,
}

/// Loads the key table, from a sheet when one is configured.
///
/// The access token is read from the same cache, through a weak handle so the cache does
/// not keep itself alive.
pub struct KeyTableLoader {
    cache: Weak<ServiceCache>,
    sheet: Option<SheetLocation>,
}

impl KeyTableLoader {
    pub fn new(cache: Weak<ServiceCache>, sheet: Option<SheetLocation>) -> Self {
        Self { cache, sheet }
    }

    async fn fetch(&self, sheet: &SheetLocation) -> std::result::Result<KeyTable, LoadError> {
        let cache = self.cache.upgrade().ok_or("cache has been dropped")?;
        let token = cache
            .get(TOKEN_KEY)
            .and_then(|value| value.as_token().map(str::to_string))
            .ok_or("no access token available")?;

        // The read above starts the token refresh; this fetch still uses the old token.
        if let Some(info) = cache.entry_info(TOKEN_KEY).filter(|info| info.stale) {
            warn!(
                expired_secs = -info.expires_in_secs,
                "Access token is stale, the sheet may reject it until the token refreshes"
            );
        }

        let values = sheet
            .client
            .get_values(&sheet.sheet_id, &sheet.range, &token)
            .await?;
        let table = KeyTable::from_rows(values.into_rows(), LoadedAt::At(Utc::now()));
        info!(sheet_id = %sheet.sheet_id, records = table.len(), "Loaded API keys from sheet");
        Ok(table)
    }
}

#[async_trait]
impl Loader<CachedValue> for KeyTableLoader {
    async fn load(&self, _key: &str) -> std::result::Result<CachedValue, LoadError> {
        let table = match &self.sheet {
            Some(sheet) => self.fetch(sheet).await?,
            None => {
                info!("No sheet configured, using built-in API keys");
                KeyTable::fixed()
            }
        };
        Ok(CachedValue::KeyTable(Arc::new(table)))
    }
}

/// Serves the engine whatever key table the cache currently holds
pub struct CacheKeyTableSource {
    cache: Arc<ServiceCache>,
}

impl CacheKeyTableSource {
    pub fn new(cache: Arc<ServiceCache>) -> Self {
        Self { cache }
    }
}

impl KeyTableSource for CacheKeyTableSource {
    fn key_table(&self) -> Option<Arc<KeyTable>> {
        self.cache
            .get(KEY_TABLE_KEY)
            .and_then(CachedValue::into_key_table)
    }
}

/// Register the token loader (sheet configured only) and then the key table loader.
///
/// Both load synchronously, so a failure here means the service cannot start.
pub async fn register_loaders(cache: &Arc<ServiceCache>, config: &Config) -> Result<()> {
    let sheet = match &config.sheet_id {
        Some(sheet_id) => {
            let source = config.token_source()?;
            info!(source = source.describe(), "Access token source selected");
            cache
                .register_loader(TOKEN_KEY, TokenLoader::new(source), config.token_ttl)
                .await?;
            Some(SheetLocation {
                client: SheetsClient::new()?,
                sheet_id: sheet_id.clone(),
                range: config.sheet_range.clone(),
            })
        }
        None => None,
    };

    cache
        .register_loader(
            KEY_TABLE_KEY,
            KeyTableLoader::new(Arc::downgrade(cache), sheet),
            config.apikeys_ttl,
        )
        .await?;
    Ok(())
}
