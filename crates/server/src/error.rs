use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Machine-readable rejection codes returned to API callers.
///
/// Validation and not-found failures are detected before any durable
/// mutation or broadcast; `INTERNAL_ERROR` is the only code a collaborator
/// failure maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    NotFound,
    SessionNotWaiting,
    SessionNotActive,
    NoPlayersJoined,
    QuizHasNoQuestions,
    PlayerNameTaken,
    QuestionNotCurrent,
    AlreadyAnswered,
    AnswerNotInQuestion,
    CodeGenerationFailed,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::SessionNotWaiting => "SESSION_NOT_WAITING",
            Self::SessionNotActive => "SESSION_NOT_ACTIVE",
            Self::NoPlayersJoined => "NO_PLAYERS_JOINED",
            Self::QuizHasNoQuestions => "QUIZ_HAS_NO_QUESTIONS",
            Self::PlayerNameTaken => "PLAYER_NAME_TAKEN",
            Self::QuestionNotCurrent => "QUESTION_NOT_CURRENT",
            Self::AlreadyAnswered => "ALREADY_ANSWERED",
            Self::AnswerNotInQuestion => "ANSWER_NOT_IN_QUESTION",
            Self::CodeGenerationFailed => "CODE_GENERATION_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed
            | Self::SessionNotWaiting
            | Self::SessionNotActive
            | Self::NoPlayersJoined
            | Self::QuizHasNoQuestions
            | Self::QuestionNotCurrent
            | Self::AlreadyAnswered
            | Self::AnswerNotInQuestion => StatusCode::BAD_REQUEST,
            Self::PlayerNameTaken => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::CodeGenerationFailed | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::CodeGenerationFailed | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::NotFound => "requested resource not found",
            Self::SessionNotWaiting => "game has already started",
            Self::SessionNotActive => "game is not in progress",
            Self::NoPlayersJoined => "at least one player must join first",
            Self::QuizHasNoQuestions => "quiz has no questions",
            Self::PlayerNameTaken => "player name is already taken in this session",
            Self::QuestionNotCurrent => "this question is no longer active",
            Self::AlreadyAnswered => "player already answered this question",
            Self::AnswerNotInQuestion => "answer does not belong to the current question",
            Self::CodeGenerationFailed => "could not generate a unique session code",
            Self::InternalError => "internal server error",
        }
    }
}

/// Structured API error envelope.
///
/// Serialized as `{"error": {code, message, retryable, request_id, details}}`
/// so callers can distinguish bad input/state from internal failures.
#[derive(Debug, Clone)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;

    use super::{with_request_id_scope, ApiError, ErrorCode};

    #[tokio::test]
    async fn api_error_uses_scoped_request_id() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            ApiError::from_code(ErrorCode::InternalError).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");

        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["retryable"], true);
        assert_eq!(parsed["error"]["request_id"], "req-scoped-123");
    }

    #[test]
    fn validation_family_maps_to_bad_request() {
        for code in [
            ErrorCode::ValidationFailed,
            ErrorCode::SessionNotWaiting,
            ErrorCode::SessionNotActive,
            ErrorCode::QuestionNotCurrent,
            ErrorCode::AlreadyAnswered,
            ErrorCode::AnswerNotInQuestion,
        ] {
            assert_eq!(code.status(), StatusCode::BAD_REQUEST);
            assert!(!code.retryable());
        }
    }

    #[test]
    fn not_found_is_distinct_from_validation() {
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_ne!(ErrorCode::NotFound.status(), ErrorCode::ValidationFailed.status());
    }

    #[tokio::test]
    async fn custom_details_are_preserved() {
        let response = ApiError::new(ErrorCode::ValidationFailed, "bad payload")
            .with_details(serde_json::json!({ "field": "playerName" }))
            .into_response();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["details"]["field"], "playerName");
    }
}
