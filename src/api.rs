//! REST API server for the deliberation engine
//!
//! Thin presentation layer: parses requests, runs the phase controller,
//! exposes archived deliberations. No orchestration logic lives here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::archive::SessionArchive;
use crate::config::Config;
use crate::controller::PhaseController;
use crate::models::{ModelSelection, RoundLimits, SessionRequest};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliberateRequest {
    pub ticker: String,
    /// Analysis date, `YYYY-MM-DD`.
    pub trade_date: String,
    pub researcher_rounds: Option<u32>,
    pub risk_rounds: Option<u32>,
    pub deep_think_model: Option<String>,
    pub quick_think_model: Option<String>,
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
    pub controller: Arc<PhaseController>,
    pub archive: Arc<dyn SessionArchive>,
    pub config: Arc<Config>,
}

/// =============================
/// Handlers
/// =============================

async fn run_session(
    State(state): State<ApiState>,
    Json(request): Json<DeliberateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let trade_date = match NaiveDate::parse_from_str(&request.trade_date, "%Y-%m-%d") {
        Ok(date) => date,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!("invalid trade_date: {}", e))),
            )
        }
    };

    let session_request = SessionRequest {
        ticker: request.ticker,
        trade_date,
        round_limits: RoundLimits {
            researcher: request
                .researcher_rounds
                .unwrap_or(state.config.rounds.researcher),
            risk: request.risk_rounds.unwrap_or(state.config.rounds.risk),
        },
        models: ModelSelection {
            deep_think: request
                .deep_think_model
                .unwrap_or_else(|| state.config.models.deep_think.clone()),
            quick_think: request
                .quick_think_model
                .unwrap_or_else(|| state.config.models.quick_think.clone()),
        },
    };

    match state.controller.run(session_request).await {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.archive.get(session_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("no session {}", session_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::success(serde_json::json!({ "status": "ok" })))
}

/// Build the router with CORS for frontend integration.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/sessions", post(run_session))
        .route("/sessions/:id", get(get_session))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: ApiState, port: u16) -> std::io::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "deliberation API listening");
    axum::serve(listener, router).await
}
