//! API key authorization service
//!
//! Answers external authorization checks from a proxy: each forwarded request is
//! allowed or denied based on its `Authorization: APIKEY <key>` header and a key table
//! kept fresh in a refresh-ahead cache.

mod config;
mod error;
mod loaders;
mod server;
mod types;

use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::loaders::{register_loaders, CacheKeyTableSource, ServiceCache};
use crate::server::{start_server, ServerState, SharedState};
use apikey_authz::AuthorizationEngine;
use refresh_cache::CacheServiceBuilder;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("apikey_authz_server=info".parse()?)
        .add_directive("apikey_authz=info".parse()?)
        .add_directive("refresh_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting API key authorization service"
    );

    // Load configuration from environment
    let config = Config::from_env();
    config.validate()?;
    config.log_summary();

    let cache: Arc<ServiceCache> = Arc::new(
        CacheServiceBuilder::new()
            .refresh_workers(config.refresh_workers)
            .refresh_timeout(config.refresh_timeout)
            .build(),
    );
    register_loaders(&cache, &config).await?;

    let engine = AuthorizationEngine::new(CacheKeyTableSource::new(Arc::clone(&cache)))
        .with_table_ttl(config.apikeys_ttl)
        .verbose(config.verbose);

    // Create shared state
    let state: SharedState = Arc::new(ServerState::new(engine, cache, config.realm.clone()));

    // Start HTTP server (blocking)
    start_server(state, config.port, config.health_port)
        .await
        .map_err(ServiceError::Io)?;

    Ok(())
}
