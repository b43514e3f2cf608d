//! REST API server for the loan-support assistant
//!
//! Exposes the turn controller and chat listings via HTTP endpoints
//! Integrates with the chat front end

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::agent::TurnController;
use crate::chat::ChatGateway;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    /// Arbitrary client session key; hashed to a stable session UUID.
    pub session_id: Option<String>,
    /// Existing conversation to continue, if the UI selected one.
    pub chat_id: Option<String>,
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<TurnController>,
    pub chats: Arc<ChatGateway>,
}

/// =============================
/// Session Identity Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn session_uuid(value: Option<&str>) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => uuid::Uuid::new_v4(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.controller.session_count().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Turn Endpoint
/// =============================

async fn chat_turn(
    State(state): State<ApiState>,
    Json(req): Json<ChatTurnRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    let session_id = session_uuid(req.session_id.as_deref());
    info!(
        "chat turn => session_id={} chat_id={:?}",
        session_id, req.chat_id
    );

    match state
        .controller
        .process_turn(session_id, req.chat_id.as_deref(), &req.message)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Turn processing failed: {}", e))),
        ),
    }
}

/// =============================
/// Conversation Endpoints
/// =============================

async fn list_chats(
    State(state): State<ApiState>,
    Path(customer_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.chats.list_chats(&customer_id).await {
        Ok(chats) => (StatusCode::OK, Json(ApiResponse::success(chats))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Chat listing failed: {}", e))),
        ),
    }
}

async fn chat_detail(
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.chats.chat_detail(&chat_id).await {
        Ok(detail) => (StatusCode::OK, Json(ApiResponse::success(detail))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Chat fetch failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(controller: Arc<TurnController>, chats: Arc<ChatGateway>) -> Router {
    let state = ApiState { controller, chats };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_turn))
        .route("/api/chats/:customer_id", get(list_chats))
        .route("/api/chat/:chat_id", get(chat_detail))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    controller: Arc<TurnController>,
    chats: Arc<ChatGateway>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(controller, chats);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
