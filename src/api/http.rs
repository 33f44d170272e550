//! HTTP API Server
//!
//! REST API for peer lifecycle operations, client configuration download,
//! server status, and settings.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{PeerOrchestrator, PeerRuntimeStatus};
use crate::settings::{NetworkUpdate, ObfuscationUpdate, SettingsService};
use crate::store::{Peer, PeerUpdate};

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<PeerOrchestrator>,
    pub settings: Arc<SettingsService>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        config: ApiConfig,
        orchestrator: Arc<PeerOrchestrator>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                orchestrator,
                settings,
            }),
        }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(handle_health))
            // Peers
            .route("/api/clients", get(handle_list_clients).post(handle_create_client))
            .route(
                "/api/clients/:id",
                get(handle_get_client)
                    .patch(handle_update_client)
                    .delete(handle_delete_client),
            )
            .route("/api/clients/:id/toggle", post(handle_toggle_client))
            .route("/api/clients/:id/config", get(handle_client_config))
            // Server
            .route("/api/server", get(handle_server))
            .route("/api/server/obfuscation", get(handle_server_obfuscation))
            .route("/api/server/status", get(handle_server_status))
            // Settings
            .route("/api/settings", get(handle_settings))
            .route("/api/settings/obfuscation", put(handle_update_obfuscation))
            .route("/api/settings/network", put(handle_update_network))
            // Maintenance
            .route("/api/reconcile", post(handle_reconcile))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state));

        if self.config.cors_enabled {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Create peer request
#[derive(Debug, Deserialize, Serialize)]
pub struct CreatePeerRequest {
    pub name: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Peer as returned by the API; key material other than the public key is
/// only available through the config download
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerResponse {
    pub id: String,
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PeerRuntimeStatus>,
}

impl PeerResponse {
    fn new(peer: Peer, status: Option<PeerRuntimeStatus>) -> Self {
        Self {
            id: peer.id,
            name: peer.name,
            address: peer.address,
            public_key: peer.public_key,
            enabled: peer.enabled,
            expires_at: peer.expires_at,
            created_at: peer.created_at,
            status,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub controller: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error wrapper mapping crate errors to HTTP responses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            e if e.is_not_found() => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::PoolExhausted(_) => (StatusCode::CONFLICT, "POOL_EXHAUSTED"),
            e if e.is_client_error() => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            e if e.is_interface_error() => (StatusCode::BAD_GATEWAY, "INTERFACE_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if !self.0.is_client_error() {
            tracing::error!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn peer_not_found(id: &str) -> ApiError {
    ApiError(Error::NotFound(id.to_string()))
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        controller: state.orchestrator.controller().kind().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_list_clients(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<PeerResponse>>> {
    let peers = state.orchestrator.list_with_status().await?;
    Ok(Json(
        peers
            .into_iter()
            .map(|(peer, status)| PeerResponse::new(peer, Some(status)))
            .collect(),
    ))
}

async fn handle_create_client(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePeerRequest>,
) -> ApiResult<impl IntoResponse> {
    let peer = state.orchestrator.create(&req.name, req.expires_at).await?;
    Ok((StatusCode::CREATED, Json(PeerResponse::new(peer, None))))
}

async fn handle_get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PeerResponse>> {
    let peer = state
        .orchestrator
        .get(&id)
        .await?
        .ok_or_else(|| peer_not_found(&id))?;

    // The record is still worth returning when the interface is down
    let status = match state.orchestrator.status(&id).await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Could not read status of peer {}: {}", id, e);
            None
        }
    };

    Ok(Json(PeerResponse::new(peer, status)))
}

async fn handle_update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<PeerUpdate>,
) -> ApiResult<Json<PeerResponse>> {
    let peer = state
        .orchestrator
        .update(&id, update)
        .await?
        .ok_or_else(|| peer_not_found(&id))?;
    Ok(Json(PeerResponse::new(peer, None)))
}

async fn handle_toggle_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PeerResponse>> {
    let peer = state
        .orchestrator
        .toggle(&id)
        .await?
        .ok_or_else(|| peer_not_found(&id))?;
    Ok(Json(PeerResponse::new(peer, None)))
}

async fn handle_delete_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.orchestrator.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(peer_not_found(&id))
    }
}

async fn handle_client_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let config = state
        .orchestrator
        .render_client_config(&id)
        .await?
        .ok_or_else(|| peer_not_found(&id))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], config))
}

async fn handle_server(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.server_identity().await?))
}

async fn handle_server_obfuscation(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.obfuscation_parameters().await?))
}

async fn handle_server_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.server_status().await)
}

async fn handle_settings(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.settings.settings().await?))
}

async fn handle_update_obfuscation(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ObfuscationUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.settings.update_obfuscation(update).await?))
}

async fn handle_update_network(
    State(state): State<Arc<AppState>>,
    Json(update): Json<NetworkUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.settings.update_network(update).await?))
}

async fn handle_reconcile(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.reconcile().await?))
}
