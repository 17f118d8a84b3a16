//! HTTP surface
//!
//! Maps the coordinator's inbound operations onto routes. Everything except
//! `/status`, `/health` and `/metrics` requires the shared secret in the
//! `Authorization` header. A CORS layer is added when browser origins are
//! configured.

use crate::coordinator::{ConnectGrant, Coordinator};
use crate::error::ShardmanError;
use crate::fleet::FleetMetadata;
use crate::shard::{HeartbeatMetrics, ShardRecord};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::error;

/// Connect / re-register response
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub identity: u32,
    pub total_shards: u32,
    pub session_token: String,
    pub wait_secs: f64,
}

impl From<ConnectGrant> for ConnectResponse {
    fn from(grant: ConnectGrant) -> Self {
        Self {
            identity: grant.record.identity,
            total_shards: grant.total_shards,
            session_token: grant.record.session_token,
            wait_secs: grant.wait.as_secs_f64(),
        }
    }
}

/// Heartbeat request
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub session_token: String,
    #[serde(flatten)]
    pub metrics: HeartbeatMetrics,
}

/// Request naming a session
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_token: String,
}

/// Re-registration request
#[derive(Debug, Serialize, Deserialize)]
pub struct ReregisterRequest {
    pub identity: u32,
    pub total_shards: u32,
}

/// Fleet status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub total_shards: u32,
    pub shards: Vec<ShardRecord>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub error_type: String,
}

/// Application state for the router
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub secret: Arc<str>,
    pub metrics: Option<PrometheusHandle>,
}

/// CORS layer for the configured origins, or `None` when there are none
pub fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>, ShardmanError> {
    if origins.is_empty() {
        return Ok(None);
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|e| ShardmanError::Config(format!("invalid CORS origin {origin:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true),
    ))
}

/// Create the router
pub fn router(state: AppState, cors: Option<CorsLayer>) -> Router {
    let protected = Router::new()
        .route("/connect", get(connect_handler))
        .route("/beat", post(heartbeat_handler))
        .route("/disconnect", post(disconnect_handler))
        .route("/re-register", post(reregister_handler))
        .route("/missing", get(missing_handler))
        .route("/total_workload", get(total_workload_handler))
        .route("/fleet_info", get(fleet_info_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_authorization,
        ));

    let router = Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Reject requests whose `Authorization` header is not the shared secret
async fn require_authorization(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|token| token == &*state.secret);

    if !authorized {
        let body = ErrorResponse {
            detail: "Invalid Token".to_string(),
            error_type: "invalid_token".to_string(),
        };
        return (StatusCode::FORBIDDEN, Json(body)).into_response();
    }

    next.run(request).await
}

/// Coordinator error rendered as an HTTP response
pub struct ApiError(pub ShardmanError);

impl From<ShardmanError> for ApiError {
    fn from(err: ShardmanError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ShardmanError::FleetFull { .. } | ShardmanError::IdentityOutOfRange { .. } => {
                StatusCode::UNAUTHORIZED
            }
            ShardmanError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            ShardmanError::IdentityNotAvailable { .. } => StatusCode::CONFLICT,
            ShardmanError::FleetSizeMismatch { .. } => StatusCode::PRECONDITION_FAILED,
            ShardmanError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, error_type = self.0.error_type_label(), "Request failed");
        }

        let body = ErrorResponse {
            detail: self.0.to_string(),
            error_type: self.0.error_type_label().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn connect_handler(
    State(state): State<AppState>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let grant = state.coordinator.connect().await?;
    Ok(Json(grant.into()))
}

async fn heartbeat_handler(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .heartbeat(&request.session_token, request.metrics)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disconnect_handler(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.disconnect(&request.session_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reregister_handler(
    State(state): State<AppState>,
    Json(request): Json<ReregisterRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let grant = state
        .coordinator
        .reregister(request.identity, request.total_shards)
        .await?;
    Ok(Json(grant.into()))
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let total_shards = state.coordinator.total_shards().await?;
    let shards = state.coordinator.status().await?;
    Ok(Json(StatusResponse {
        total_shards,
        shards,
    }))
}

async fn missing_handler(State(state): State<AppState>) -> Result<Json<Vec<u32>>, ApiError> {
    let missing = state.coordinator.missing_identities().await?;
    Ok(Json(missing.into_iter().collect()))
}

async fn total_workload_handler(State(state): State<AppState>) -> Result<Json<u64>, ApiError> {
    Ok(Json(state.coordinator.total_workload().await?))
}

async fn fleet_info_handler(
    State(state): State<AppState>,
) -> Result<Json<FleetMetadata>, ApiError> {
    Ok(Json(state.coordinator.fleet_info().await?))
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.coordinator.update_gauges().await {
        error!(error = %e, "Failed to refresh fleet gauges");
    }

    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}
