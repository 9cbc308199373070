// HTTP surface of the game service.
//
// Thin handlers: request parsing and response shaping live here, all game
// semantics live in [`crate::game::GameCoordinator`].

pub mod events;
pub mod players;
pub mod sessions;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::game::GameCoordinator;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: GameCoordinator,
}

pub fn router(coordinator: GameCoordinator) -> Router {
    let state = ApiState { coordinator };
    Router::new()
        .route("/v1/game/sessions", post(sessions::create_session))
        .route(
            "/v1/game/sessions/{session_id}",
            get(sessions::session_detail).delete(sessions::end_session),
        )
        .route("/v1/game/sessions/{session_id}/start", post(sessions::start_session))
        .route("/v1/game/sessions/{session_id}/next", post(sessions::next_question))
        .route("/v1/game/sessions/{session_id}/reveal", post(sessions::reveal_answer))
        .route("/v1/game/sessions/{session_id}/events", get(events::session_events))
        .route("/v1/game/players", post(players::join_session))
        .route("/v1/game/players/{player_id}", delete(players::leave_session))
        .route("/v1/game/players/{player_id}/answer", post(players::submit_answer))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body, Bytes},
        http::{Request, StatusCode},
        Router,
    };
    use futures::StreamExt;
    use quizcast_common::types::{Answer, Question, Quiz};
    use serde_json::{json, Value};
    use tokio::time::{timeout, Duration};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::game::{code, GameCoordinator};
    use crate::live::SessionRegistry;
    use crate::store::GameStore;

    async fn seeded_app() -> (Router, GameCoordinator, Quiz) {
        let store = GameStore::memory();
        let quiz = Quiz {
            id: Uuid::new_v4(),
            title: "Capitals".to_string(),
            questions: vec![
                Question {
                    id: Uuid::new_v4(),
                    text: "Capital of France?".to_string(),
                    order_index: 0,
                    answers: vec![
                        Answer {
                            id: Uuid::new_v4(),
                            text: "Paris".to_string(),
                            is_correct: true,
                            order_index: 0,
                        },
                        Answer {
                            id: Uuid::new_v4(),
                            text: "Lyon".to_string(),
                            is_correct: false,
                            order_index: 1,
                        },
                    ],
                },
                Question {
                    id: Uuid::new_v4(),
                    text: "Capital of Japan?".to_string(),
                    order_index: 1,
                    answers: vec![
                        Answer {
                            id: Uuid::new_v4(),
                            text: "Tokyo".to_string(),
                            is_correct: true,
                            order_index: 0,
                        },
                        Answer {
                            id: Uuid::new_v4(),
                            text: "Kyoto".to_string(),
                            is_correct: false,
                            order_index: 1,
                        },
                    ],
                },
            ],
        };
        store.create_quiz(&quiz).await.expect("quiz insert");
        let coordinator = GameCoordinator::new(store, Arc::new(SessionRegistry::new()));
        (super::router(coordinator.clone()), coordinator, quiz)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn create_session(app: &Router, quiz_id: Uuid) -> Value {
        let response = app
            .clone()
            .oneshot(post_json("/v1/game/sessions", json!({ "quizId": quiz_id })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    async fn join(app: &Router, code: &str, name: &str) -> Value {
        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/game/players",
                json!({ "sessionCode": code, "playerName": name }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    async fn expect_no_content(app: &Router, request: Request<Body>) {
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn create_session_returns_waiting_session_with_code() {
        let (app, _, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;

        assert_eq!(created["status"], "waiting");
        assert_eq!(created["quizId"], quiz.id.to_string());
        let session_code = created["sessionCode"].as_str().expect("code string");
        assert!(code::is_valid_session_code(session_code));
    }

    #[tokio::test]
    async fn create_session_for_unknown_quiz_is_404() {
        let (app, _, _) = seeded_app().await;
        let response = app
            .oneshot(post_json("/v1/game/sessions", json!({ "quizId": Uuid::new_v4() })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn join_rejects_invalid_player_names() {
        let (app, _, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;
        let session_code = created["sessionCode"].as_str().expect("code");

        let response = app
            .oneshot(post_json(
                "/v1/game/players",
                json!({ "sessionCode": session_code, "playerName": " a " }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(body["error"]["details"]["field"], "playerName");
    }

    #[tokio::test]
    async fn join_with_duplicate_name_is_conflict() {
        let (app, _, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;
        let session_code = created["sessionCode"].as_str().expect("code");

        join(&app, session_code, "Ada").await;
        let response = app
            .oneshot(post_json(
                "/v1/game/players",
                json!({ "sessionCode": session_code, "playerName": "ada" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "PLAYER_NAME_TAKEN");
    }

    #[tokio::test]
    async fn session_codes_are_matched_case_insensitively() {
        let (app, _, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;
        let lowered = created["sessionCode"].as_str().expect("code").to_ascii_lowercase();

        let joined = join(&app, &lowered, "Ada").await;
        assert_eq!(joined["sessionId"], created["sessionId"]);
    }

    #[tokio::test]
    async fn full_game_flow_over_http() {
        let (app, _, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;
        let session_id = created["sessionId"].as_str().expect("id");
        let session_code = created["sessionCode"].as_str().expect("code");

        let ada = join(&app, session_code, "Ada").await;
        let grace = join(&app, session_code, "Grace").await;
        let ada_id = ada["player"]["id"].as_str().expect("ada id");
        let grace_id = grace["player"]["id"].as_str().expect("grace id");

        expect_no_content(
            &app,
            post_json(&format!("/v1/game/sessions/{session_id}/start"), json!({})),
        )
        .await;

        let question = &quiz.questions[0];
        expect_no_content(
            &app,
            post_json(
                &format!("/v1/game/players/{ada_id}/answer"),
                json!({ "questionId": question.id, "answerId": question.answers[0].id }),
            ),
        )
        .await;
        expect_no_content(
            &app,
            post_json(
                &format!("/v1/game/players/{grace_id}/answer"),
                json!({ "questionId": question.id, "answerId": question.answers[1].id }),
            ),
        )
        .await;

        // Duplicate answer from the same player.
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/v1/game/players/{ada_id}/answer"),
                json!({ "questionId": question.id, "answerId": question.answers[0].id }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "ALREADY_ANSWERED");

        expect_no_content(
            &app,
            post_json(&format!("/v1/game/sessions/{session_id}/next"), json!({})),
        )
        .await;
        expect_no_content(
            &app,
            post_json(&format!("/v1/game/sessions/{session_id}/reveal"), json!({})),
        )
        .await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/game/sessions/{session_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let detail = json_body(response).await;
        assert_eq!(detail["status"], "in_progress");
        assert_eq!(detail["currentQuestion"], 1);
        assert_eq!(detail["players"][0]["playerName"], "Ada");
        assert_eq!(detail["players"][0]["score"], 1);

        expect_no_content(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/game/sessions/{session_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/game/sessions/{session_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn starting_before_any_player_joined_is_rejected() {
        let (app, _, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;
        let session_id = created["sessionId"].as_str().expect("id");

        let response = app
            .oneshot(post_json(&format!("/v1/game/sessions/{session_id}/start"), json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "NO_PLAYERS_JOINED");
    }

    #[tokio::test]
    async fn events_endpoint_is_404_for_unknown_session() {
        let (app, _, _) = seeded_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/game/sessions/{}/events", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn events_stream_sends_connected_then_live_events() {
        let (app, coordinator, quiz) = seeded_app().await;
        let created = create_session(&app, quiz.id).await;
        let session_id: Uuid =
            created["sessionId"].as_str().expect("id").parse().expect("uuid");
        let session_code = created["sessionCode"].as_str().expect("code").to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/game/sessions/{session_id}/events"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().expect("content type"),
            "text/event-stream"
        );

        let mut body = response.into_body().into_data_stream();
        let first = next_chunk(&mut body).await;
        let connected: Value = parse_sse_frame(&first);
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["sessionId"], session_id.to_string());

        coordinator.join_player(&session_code, "Ada").await.expect("join");
        let second = next_chunk(&mut body).await;
        let joined: Value = parse_sse_frame(&second);
        assert_eq!(joined["type"], "player_joined");
        assert_eq!(joined["player"]["playerName"], "Ada");

        // Ending the session terminates the stream.
        coordinator.end_session(session_id).await.expect("end");
        let ended = next_chunk(&mut body).await;
        assert_eq!(parse_sse_frame(&ended)["type"], "session_ended");
        let eof = timeout(Duration::from_secs(1), body.next()).await.expect("stream ends");
        assert!(eof.is_none());
    }

    async fn next_chunk(
        body: &mut axum::body::BodyDataStream,
    ) -> Bytes {
        timeout(Duration::from_secs(1), body.next())
            .await
            .expect("frame within deadline")
            .expect("stream still open")
            .expect("frame read")
    }

    fn parse_sse_frame(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).expect("utf8 frame");
        let json = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("sse framing");
        serde_json::from_str(json).expect("frame json")
    }
}
