// Host-facing session endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use quizcast_common::types::{SessionDetail, SessionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{api::ApiState, error::ApiError, validation::ValidatedJson};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub quiz_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: Uuid,
    pub session_code: String,
    pub quiz_id: Uuid,
    pub status: SessionStatus,
}

pub async fn create_session(
    State(state): State<ApiState>,
    ValidatedJson(body): ValidatedJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let record = state.coordinator.create_session(body.quiz_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: record.id,
            session_code: record.session_code,
            quiz_id: record.quiz_id,
            status: record.status,
        }),
    ))
}

pub async fn session_detail(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
    let detail = state.coordinator.session_detail(session_id).await?;
    Ok(Json(detail))
}

pub async fn start_session(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.start_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn next_question(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.advance_question(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reveal_answer(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.reveal_answer(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn end_session(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.end_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
