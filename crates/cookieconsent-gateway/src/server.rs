//! Gateway server: consent submission, registry CRUD, banner config, and the
//! widget bootstrap payload.

use crate::error::ApiError;
use crate::idempotency::IdempotencyCache;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use cookieconsent_core::{
    BannerConfig, BannerConfigPatch, ConsentTotals, CookieCategory, CookieDeclaration, CookieInput,
    Error, Settings, WidgetSettings,
};
use cookieconsent_store::{BannerConfigStore, ConsentCounter, CookieRegistry, Database};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotency-replayed";

/// Shared state for request handlers.
pub struct GatewayState {
    pub counter: ConsentCounter,
    pub registry: CookieRegistry,
    pub banner: BannerConfigStore,
    pub widget: WidgetSettings,
    pub idempotency: Arc<IdempotencyCache>,
    /// When the gateway started.
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(db: Database, settings: &Settings) -> Self {
        Self {
            counter: ConsentCounter::new(db.clone()),
            registry: CookieRegistry::new(db.clone()),
            banner: BannerConfigStore::new(db),
            widget: settings.widget.clone(),
            idempotency: Arc::new(IdempotencyCache::new(Duration::from_secs(
                settings.gateway.idempotency_ttl_secs,
            ))),
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/consent", get(totals_handler).post(record_handler))
        .route("/api/cookies", get(list_cookies_handler).post(create_cookie_handler))
        .route(
            "/api/cookies/:id",
            get(get_cookie_handler)
                .put(update_cookie_handler)
                .delete(delete_cookie_handler),
        )
        .route("/api/banner", get(get_banner_handler).put(update_banner_handler))
        .route("/api/widget", get(widget_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn start_gateway(settings: Settings, db: Database) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", settings.gateway.bind.to_addr(), settings.gateway.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;
    let tables = db.tables().clone();
    let state = Arc::new(GatewayState::new(db, &settings));
    let app = router(state);

    info!("Cookieconsent Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Database:     {}", settings.database.path.display());
    info!("  Tables:       {}, {}, {}", tables.totals, tables.registry, tables.banner);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run a storage call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> cookieconsent_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(Error::Internal(format!("storage task failed: {}", e))))?
        .map_err(ApiError::from)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

// ============================================================
// Consent totals
// ============================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConsentSubmission {
    pub accepted: u64,
    pub rejected: u64,
}

async fn totals_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<ConsentTotals>, ApiError> {
    let counter = state.counter.clone();
    Ok(Json(blocking(move || counter.totals()).await?))
}

async fn record_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<ConsentSubmission>,
) -> Result<impl IntoResponse, ApiError> {
    let counter = state.counter.clone();
    let record = move || blocking(move || counter.record_response(body.accepted, body.rejected));

    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let (totals, replayed) = match key {
        Some(key) => state.idempotency.run_detached(key.to_string(), record).await?,
        None => (record().await?, false),
    };

    let mut headers = HeaderMap::new();
    if replayed {
        headers.insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    Ok((headers, Json(totals)))
}

// ============================================================
// Cookie registry
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

async fn list_cookies_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CookieDeclaration>>, ApiError> {
    let category = query
        .category
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(str::parse::<CookieCategory>)
        .transpose()?;
    let registry = state.registry.clone();
    Ok(Json(blocking(move || registry.list(category)).await?))
}

async fn create_cookie_handler(
    State(state): State<Arc<GatewayState>>,
    Json(input): Json<CookieInput>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = state.registry.clone();
    let created = blocking(move || registry.create(&input)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_cookie_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<Json<CookieDeclaration>, ApiError> {
    let registry = state.registry.clone();
    blocking(move || registry.get(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(Error::NotFound(format!("cookie {}", id))))
}

async fn update_cookie_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
    Json(input): Json<CookieInput>,
) -> Result<Json<CookieDeclaration>, ApiError> {
    let registry = state.registry.clone();
    Ok(Json(blocking(move || registry.update(id, &input)).await?))
}

async fn delete_cookie_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let registry = state.registry.clone();
    if blocking(move || registry.delete(id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(Error::NotFound(format!("cookie {}", id))))
    }
}

// ============================================================
// Banner config and widget
// ============================================================

async fn get_banner_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<BannerConfig>, ApiError> {
    let banner = state.banner.clone();
    Ok(Json(blocking(move || banner.get()).await?))
}

async fn update_banner_handler(
    State(state): State<Arc<GatewayState>>,
    Json(patch): Json<BannerConfigPatch>,
) -> Result<Json<BannerConfig>, ApiError> {
    let banner = state.banner.clone();
    Ok(Json(blocking(move || banner.update(&patch)).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetCategory {
    pub category: CookieCategory,
    pub description: Option<String>,
    pub cookies: Vec<CookieDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetPayload {
    pub settings: WidgetSettings,
    pub banner: BannerConfig,
    pub categories: Vec<WidgetCategory>,
}

/// Everything the front-end widget needs to render, in one response.
async fn widget_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<WidgetPayload>, ApiError> {
    let banner = state.banner.clone();
    let registry = state.registry.clone();
    let (config, groups) = blocking(move || Ok((banner.get()?, registry.grouped()?))).await?;
    let categories = groups
        .into_iter()
        .map(|(category, cookies)| WidgetCategory {
            category,
            description: config.category_description(category).map(str::to_string),
            cookies,
        })
        .collect();
    Ok(Json(WidgetPayload {
        settings: state.widget.clone(),
        banner: config,
        categories,
    }))
}
