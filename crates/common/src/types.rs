// Core domain types shared across all Quizcast crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a game session as held by the durable store.
///
/// `waiting → in_progress → finished`; no state is skipped. Deletion is
/// terminal and implicit (the session record is removed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Finished,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(Self::Waiting),
            "in_progress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// A player who joined a session (never the host).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: Uuid,
    pub player_name: String,
    pub score: i32,
    pub is_connected: bool,
}

/// One entry of the final leaderboard broadcast with `game_finished`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinalScore {
    pub player_id: Uuid,
    pub player_name: String,
    pub score: i32,
}

/// A quiz with its ordered questions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
}

/// A question with its ordered answer options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub order_index: i32,
    pub answers: Vec<Answer>,
}

/// One answer option of a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: Uuid,
    pub text: String,
    pub is_correct: bool,
    pub order_index: i32,
}

impl Question {
    /// The correct answer option, if the question has one.
    pub fn correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|answer| answer.is_correct)
    }
}

/// Full session view returned by `GET /v1/game/sessions/{id}`.
///
/// Reconnecting subscribers re-fetch this instead of relying on event
/// replay — events are delivered at most once and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session_id: Uuid,
    pub session_code: String,
    pub status: SessionStatus,
    pub current_question: Option<i32>,
    pub quiz: Quiz,
    /// Players ordered by score descending.
    pub players: Vec<Player>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
