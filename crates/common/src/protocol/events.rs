// Game event types for real-time fan-out, and their SSE wire framing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{FinalScore, Player};

/// All event types pushed to session subscribers.
///
/// Events are produced by the session orchestrator, delivered at most once
/// per subscriber, and never persisted. A subscriber that connects after an
/// event was broadcast has missed it permanently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Server -> Subscriber: sent once immediately after subscribing.
    #[serde(rename_all = "camelCase")]
    Connected { session_id: Uuid },

    /// A player joined the session lobby.
    PlayerJoined { player: Player },

    /// A player left the session.
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: Uuid, player_name: String },

    /// The host started the game; the first question is live.
    #[serde(rename_all = "camelCase")]
    GameStarted { question_id: Uuid, question_index: i32 },

    /// A player submitted an answer to the current question.
    #[serde(rename_all = "camelCase")]
    PlayerAnswered { player_id: Uuid, player_name: String },

    /// Every joined player has answered the current question.
    AllPlayersAnswered,

    /// The correct answer, with per-player scores keyed by player id.
    #[serde(rename_all = "camelCase")]
    RevealAnswer {
        correct_answer_id: Uuid,
        scores: HashMap<Uuid, i32>,
    },

    /// The host advanced to the next question.
    #[serde(rename_all = "camelCase")]
    NextQuestion { question_id: Uuid, question_index: i32 },

    /// No questions remain; final leaderboard sorted by score descending.
    #[serde(rename_all = "camelCase")]
    GameFinished { final_scores: Vec<FinalScore> },

    /// The session was torn down by the host.
    SessionEnded,
}

/// Keep-alive comment frame sent periodically on every subscriber stream so
/// half-open connections are detected promptly.
pub const KEEP_ALIVE_FRAME: &str = ": ping\n\n";

impl GameEvent {
    /// Encode this event as a Server-Sent-Events frame: one `data:` line
    /// holding the JSON payload, terminated by a blank line.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("data: {json}\n\n"))
    }

    /// The wire tag of this event, for logging.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerLeft { .. } => "player_left",
            Self::GameStarted { .. } => "game_started",
            Self::PlayerAnswered { .. } => "player_answered",
            Self::AllPlayersAnswered => "all_players_answered",
            Self::RevealAnswer { .. } => "reveal_answer",
            Self::NextQuestion { .. } => "next_question",
            Self::GameFinished { .. } => "game_finished",
            Self::SessionEnded => "session_ended",
        }
    }
}
