use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::coordinator::RequestCoordinator;
use crate::error::DuelError;
use crate::questions::Category;
use crate::store::PlayerRecord;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RequestCoordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/duels/request", post(request_duel))
        .route("/api/duels/accept", post(accept_duel))
        .route("/api/duels/reject", post(reject_duel))
        .route("/api/duels/categories", get(get_categories))
        .route("/api/players/{id}", get(get_player))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RequestDuelBody {
    requester_id: String,
    opponent_id: String,
    category: String,
}

#[derive(Debug, Deserialize)]
struct DuelIdBody {
    duel_id: String,
}

#[derive(Debug, Serialize)]
struct DuelResponse {
    duel_id: String,
    message: &'static str,
}

async fn request_duel(
    State(state): State<AppState>,
    Json(body): Json<RequestDuelBody>,
) -> Result<Json<DuelResponse>, ApiError> {
    let duel_id = state
        .coordinator
        .request_duel(&body.requester_id, &body.opponent_id, &body.category)
        .await?;

    Ok(Json(DuelResponse {
        duel_id: duel_id.to_string(),
        message: "Duel successfully requested",
    }))
}

async fn accept_duel(
    State(state): State<AppState>,
    Json(body): Json<DuelIdBody>,
) -> Result<Json<DuelResponse>, ApiError> {
    let duel_id = parse_duel_id(&body.duel_id)?;
    state.coordinator.accept_duel(duel_id).await?;

    Ok(Json(DuelResponse { duel_id: body.duel_id, message: "Duel accepted" }))
}

async fn reject_duel(
    State(state): State<AppState>,
    Json(body): Json<DuelIdBody>,
) -> Result<Json<DuelResponse>, ApiError> {
    let duel_id = parse_duel_id(&body.duel_id)?;
    state.coordinator.reject_duel(duel_id).await?;

    Ok(Json(DuelResponse { duel_id: body.duel_id, message: "Duel rejected" }))
}

async fn get_categories(State(state): State<AppState>) -> Json<Vec<Category>> {
    Json(state.coordinator.get_categories())
}

async fn get_player(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerRecord>, ApiError> {
    Ok(Json(state.coordinator.get_player(&player_id).await?))
}

/// Duel ids travel as decimal strings over HTTP.
fn parse_duel_id(raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError(DuelError::invalid(format!("invalid duel id {raw:?}")))),
    }
}

#[derive(Debug)]
struct ApiError(DuelError);

impl From<DuelError> for ApiError {
    fn from(err: DuelError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            DuelError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            DuelError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            DuelError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            DuelError::StoreUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
            }
        };

        if status.is_server_error() {
            error!("Request failed: {:#}", anyhow::Error::new(self.0));
            let body = ErrorBody { error_code, message: "internal error".into() };
            return (status, Json(body)).into_response();
        }

        let body = ErrorBody { error_code, message: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duel_ids_must_be_positive_decimal_strings() {
        assert_eq!(parse_duel_id("41").unwrap(), 41);
        assert!(parse_duel_id("0").is_err());
        assert!(parse_duel_id("-3").is_err());
        assert!(parse_duel_id("abc").is_err());
        assert!(parse_duel_id("12_vs_13").is_err());
    }

    #[test]
    fn error_kinds_map_to_http_statuses() {
        let cases = [
            (DuelError::invalid("x"), StatusCode::BAD_REQUEST),
            (DuelError::not_found("x"), StatusCode::NOT_FOUND),
            (DuelError::conflict("x"), StatusCode::CONFLICT),
            (DuelError::store(anyhow::anyhow!("x")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
