// Player-facing endpoints: join, leave, answer.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use quizcast_common::types::Player;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::ApiState,
    error::{ApiError, ErrorCode},
    game::code::is_valid_session_code,
    validation::{normalize_player_name, ValidatedJson},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    pub session_code: String,
    pub player_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    pub session_id: Uuid,
    pub player: Player,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub question_id: Uuid,
    pub answer_id: Uuid,
}

pub async fn join_session(
    State(state): State<ApiState>,
    ValidatedJson(body): ValidatedJson<JoinSessionRequest>,
) -> Result<(StatusCode, Json<PlayerJoined>), ApiError> {
    // Codes are displayed uppercase; accept any casing from players.
    let code = body.session_code.trim().to_ascii_uppercase();
    if !is_valid_session_code(&code) {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "session code must be 6 letters or digits",
        )
        .with_details(serde_json::json!({ "field": "sessionCode" })));
    }
    let name = normalize_player_name(&body.player_name)?;

    let player = state.coordinator.join_player(&code, &name).await?;
    Ok((
        StatusCode::CREATED,
        Json(PlayerJoined { session_id: player.session_id, player: player.to_player() }),
    ))
}

pub async fn leave_session(
    State(state): State<ApiState>,
    Path(player_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.leave_player(player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_answer(
    State(state): State<ApiState>,
    Path(player_id): Path<Uuid>,
    ValidatedJson(body): ValidatedJson<SubmitAnswerRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .submit_answer(player_id, body.question_id, body.answer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
