use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::betting::db::NewBettingPoll;
use crate::betting::engine::BettingEngine;
use crate::betting::money::Amount;
use crate::models::{BettingPoll, ParticipationResult, PlayerAsset, SettlementResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: BettingEngine,
}

/// Create the API router
pub fn create_router(engine: BettingEngine) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/polls", post(create_poll))
        .route("/api/polls/:id", get(get_poll))
        .route("/api/polls/:id/participate", post(participate))
        .route("/api/polls/:id/settle", post(settle))
        .route(
            "/api/players/:player_id/assets/:asset_id",
            get(get_balance),
        )
        .route(
            "/api/players/:player_id/assets/:asset_id/deposit",
            post(deposit),
        )
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create a betting poll (operational surface; poll CRUD beyond this
/// lives with the poll directory, not the betting core).
async fn create_poll(
    State(state): State<AppState>,
    Json(req): Json<NewBettingPoll>,
) -> Result<Json<BettingPoll>, ApiError> {
    let poll = state.engine.db().create_poll(req).await?;
    Ok(Json(poll))
}

/// Poll snapshot: configuration, pool aggregates, settlement state
async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BettingPoll>, ApiError> {
    state
        .engine
        .db()
        .find_poll(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(format!("Poll {} not found", id)))
}

/// Place a wager. Expected rejections come back as a structured result
/// with `success: false`, not an HTTP error.
async fn participate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ParticipateRequest>,
) -> Result<Json<ParticipationResult>, ApiError> {
    let result = state
        .engine
        .participate_poll(
            &id,
            &req.player_id,
            &req.option_id,
            req.amount,
            req.token_proof.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

/// Settle a betting poll against the winning options
async fn settle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<SettlementResult>, ApiError> {
    let result = state
        .engine
        .settle_betting_poll(&id, &req.winning_option_ids)
        .await?;
    Ok(Json(result))
}

/// Current balance for one (player, asset) pair
async fn get_balance(
    State(state): State<AppState>,
    Path((player_id, asset_id)): Path<(String, String)>,
) -> Result<Json<PlayerAsset>, ApiError> {
    state
        .engine
        .db()
        .find_balance(&player_id, &asset_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(format!(
            "No balance for {}/{}",
            player_id, asset_id
        )))
}

/// Credit a balance (funding glue for deployments without a deposit flow)
async fn deposit(
    State(state): State<AppState>,
    Path((player_id, asset_id)): Path<(String, String)>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<PlayerAsset>, ApiError> {
    if req.amount.is_zero() {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }
    let balance = state
        .engine
        .db()
        .deposit(&player_id, &asset_id, req.amount, "deposit")
        .await?;
    Ok(Json(balance))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct ParticipateRequest {
    player_id: String,
    option_id: String,
    amount: Amount,
    /// Ownership proof for token-gated polls
    token_proof: Option<String>,
}

#[derive(Deserialize)]
struct SettleRequest {
    winning_option_ids: Vec<String>,
}

#[derive(Deserialize)]
struct DepositRequest {
    amount: Amount,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Database(anyhow::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Database(err) => {
                tracing::error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
