//! HTTP server: health endpoint and the external authorization check

use crate::loaders::{CacheKeyTableSource, ServiceCache, KEY_TABLE_KEY, TOKEN_KEY};
use crate::types::{HealthResponse, KeyTableSummary};
use apikey_authz::{AuthorizationEngine, CheckResponse, HeaderSource, KeyTableSource, PATH};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub engine: AuthorizationEngine<CacheKeyTableSource>,
    pub cache: Arc<ServiceCache>,
    pub realm: String,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        engine: AuthorizationEngine<CacheKeyTableSource>,
        cache: Arc<ServiceCache>,
        realm: String,
    ) -> Self {
        Self {
            engine,
            cache,
            realm,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the authorization router: every path and method is a check
pub fn create_router(state: SharedState) -> Router {
    Router::new().fallback(check).with_state(state)
}

/// Create the health router, served on its own port so no checked path is shadowed
pub fn create_health_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// Start the authorization and health listeners; returns when either stops
pub async fn start_server(
    state: SharedState,
    port: u16,
    health_port: u16,
) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let health_addr = std::net::SocketAddr::from(([0, 0, 0, 0], health_port));
    info!("Starting HTTP server on {}", addr);
    info!("Starting health endpoint on {}", health_addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    tokio::try_join!(
        axum::serve(listener, create_router(Arc::clone(&state))).into_future(),
        axum::serve(health_listener, create_health_router(state)).into_future(),
    )?;
    Ok(())
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;
    let entries = [TOKEN_KEY, KEY_TABLE_KEY]
        .iter()
        .filter_map(|key| state.cache.entry_info(key))
        .collect();
    let key_table = state.engine.source().key_table().map(|table| KeyTableSummary {
        loaded_at: table.loaded_at(),
        records: table.len(),
    });

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.stats(),
        entries,
        key_table,
    })
}

/// Authorization check for the request the proxy forwarded
async fn check(State(state): State<SharedState>, request: Request) -> Response {
    let (head, _body) = request.into_parts();

    let decision = state.engine.check(&head);
    debug!(
        method = %head.method,
        path = head.header(PATH).unwrap_or_default(),
        decision = %decision,
        "Authorization check"
    );
    into_response(decision.to_response(&state.realm))
}

fn into_response(check: CheckResponse) -> Response {
    if check.allow {
        return StatusCode::OK.into_response();
    }

    let status = StatusCode::from_u16(check.status_code).unwrap_or(StatusCode::FORBIDDEN);
    let mut response = (status, check.body).into_response();
    for (name, value) in check.extra_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "Dropping unrepresentable response header"),
        }
    }
    response
}
