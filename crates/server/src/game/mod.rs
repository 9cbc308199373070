// Session orchestrator: the single writer of game lifecycle transitions.
//
// Every entry point follows the same shape: validate against durable state,
// apply the durable mutation, then broadcast. A rejected operation performs
// no mutation and no broadcast; a failed durable write is never followed by
// a broadcast.

pub mod code;

use std::sync::Arc;

use chrono::Utc;
use quizcast_common::protocol::events::GameEvent;
use quizcast_common::types::{FinalScore, SessionDetail, SessionStatus};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ApiError, ErrorCode};
use crate::live::SessionRegistry;
use crate::store::{AnswerSubmission, GameStore, PlayerRecord, SessionRecord};

use code::{generate_session_code, MAX_CODE_ATTEMPTS};

#[derive(Debug, Error)]
pub enum GameError {
    #[error("session not found")]
    SessionNotFound,
    #[error("quiz not found")]
    QuizNotFound,
    #[error("player not found")]
    PlayerNotFound,
    #[error("game has already started")]
    SessionNotWaiting,
    #[error("game is not in progress")]
    SessionNotActive,
    #[error("at least one player must join first")]
    NoPlayersJoined,
    #[error("quiz has no questions")]
    QuizHasNoQuestions,
    #[error("player name '{0}' is already taken in this session")]
    PlayerNameTaken(String),
    #[error("this question is no longer active")]
    QuestionNotCurrent,
    #[error("player already answered this question")]
    AlreadyAnswered,
    #[error("answer does not belong to the current question")]
    AnswerNotInQuestion,
    #[error("current question has no correct answer")]
    NoCorrectAnswer,
    #[error("could not generate a unique session code")]
    CodeGenerationFailed,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        match &err {
            GameError::SessionNotFound
            | GameError::QuizNotFound
            | GameError::PlayerNotFound => {
                ApiError::new(ErrorCode::NotFound, err.to_string())
            }
            GameError::SessionNotWaiting => ApiError::from_code(ErrorCode::SessionNotWaiting),
            GameError::SessionNotActive => ApiError::from_code(ErrorCode::SessionNotActive),
            GameError::NoPlayersJoined => ApiError::from_code(ErrorCode::NoPlayersJoined),
            GameError::QuizHasNoQuestions => {
                ApiError::from_code(ErrorCode::QuizHasNoQuestions)
            }
            GameError::PlayerNameTaken(_) => {
                ApiError::new(ErrorCode::PlayerNameTaken, err.to_string())
            }
            GameError::QuestionNotCurrent => ApiError::from_code(ErrorCode::QuestionNotCurrent),
            GameError::AlreadyAnswered => ApiError::from_code(ErrorCode::AlreadyAnswered),
            GameError::AnswerNotInQuestion => {
                ApiError::from_code(ErrorCode::AnswerNotInQuestion)
            }
            GameError::NoCorrectAnswer => {
                ApiError::new(ErrorCode::ValidationFailed, err.to_string())
            }
            GameError::CodeGenerationFailed => {
                ApiError::from_code(ErrorCode::CodeGenerationFailed)
            }
            GameError::Store(source) => {
                error!(error = %source, "durable store operation failed");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

/// Orchestrates game sessions across the durable store and the live
/// registry. Cheap to clone; handlers share one instance via app state.
#[derive(Clone)]
pub struct GameCoordinator {
    store: GameStore,
    registry: Arc<SessionRegistry>,
}

impl GameCoordinator {
    pub fn new(store: GameStore, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Create a `waiting` session for a quiz and register it live.
    pub async fn create_session(&self, quiz_id: Uuid) -> Result<SessionRecord, GameError> {
        let quiz = self
            .store
            .quiz_with_questions(quiz_id)
            .await?
            .ok_or(GameError::QuizNotFound)?;
        if quiz.questions.is_empty() {
            return Err(GameError::QuizHasNoQuestions);
        }

        let mut session = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = generate_session_code();
            if self.store.session_code_exists(&candidate).await? {
                continue;
            }
            session = Some(self.store.create_session(quiz_id, &candidate).await?);
            break;
        }
        let session = session.ok_or(GameError::CodeGenerationFailed)?;

        self.registry.init_session(session.id).await;
        info!(
            session_id = %session.id,
            session_code = %session.session_code,
            quiz_id = %quiz_id,
            "session created"
        );
        Ok(session)
    }

    /// Join a player into a waiting session, looked up by its code.
    /// `name` must already be normalized (trimmed, length-checked).
    pub async fn join_player(&self, code: &str, name: &str) -> Result<PlayerRecord, GameError> {
        let session = self
            .store
            .session_by_code(code)
            .await?
            .ok_or(GameError::SessionNotFound)?;
        if session.status != SessionStatus::Waiting {
            return Err(GameError::SessionNotWaiting);
        }

        // Case-insensitive over the full character set, not just ASCII.
        let lowered = name.to_lowercase();
        let players = self.store.players_for_session(session.id).await?;
        if players
            .iter()
            .any(|player| player.player_name.to_lowercase() == lowered)
        {
            return Err(GameError::PlayerNameTaken(name.to_string()));
        }

        let player = self.store.create_player(session.id, name).await?;

        // Idempotent; covers sessions created before a process restart.
        self.registry.init_session(session.id).await;
        self.registry
            .broadcast(session.id, &GameEvent::PlayerJoined { player: player.to_player() })
            .await;

        info!(session_id = %session.id, player_id = %player.id, "player joined");
        Ok(player)
    }

    /// Remove a player from their session.
    pub async fn leave_player(&self, player_id: Uuid) -> Result<(), GameError> {
        let removed = self
            .store
            .delete_player(player_id)
            .await?
            .ok_or(GameError::PlayerNotFound)?;

        self.registry
            .broadcast(
                removed.session_id,
                &GameEvent::PlayerLeft {
                    player_id: removed.id,
                    player_name: removed.player_name.clone(),
                },
            )
            .await;

        info!(session_id = %removed.session_id, player_id = %removed.id, "player left");
        Ok(())
    }

    /// Start a waiting session at its first question.
    pub async fn start_session(&self, session_id: Uuid) -> Result<(), GameError> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(GameError::SessionNotFound)?;
        if session.status != SessionStatus::Waiting {
            return Err(GameError::SessionNotWaiting);
        }

        let players = self.store.players_for_session(session_id).await?;
        if players.is_empty() {
            return Err(GameError::NoPlayersJoined);
        }

        let quiz = self
            .store
            .quiz_with_questions(session.quiz_id)
            .await?
            .ok_or(GameError::QuizNotFound)?;
        let first = quiz.questions.first().ok_or(GameError::QuizHasNoQuestions)?;

        self.store.mark_session_started(session_id, Utc::now()).await?;
        self.registry.reset_answers(session_id).await;
        self.registry
            .broadcast(
                session_id,
                &GameEvent::GameStarted { question_id: first.id, question_index: 0 },
            )
            .await;

        info!(session_id = %session_id, "session started");
        Ok(())
    }

    /// Record a player's answer to the current question.
    ///
    /// When the last outstanding player answers, `all_players_answered` and
    /// `reveal_answer` are broadcast in the same call.
    pub async fn submit_answer(
        &self,
        player_id: Uuid,
        question_id: Uuid,
        answer_id: Uuid,
    ) -> Result<(), GameError> {
        let player = self
            .store
            .player_by_id(player_id)
            .await?
            .ok_or(GameError::PlayerNotFound)?;
        let session = self
            .store
            .session_by_id(player.session_id)
            .await?
            .ok_or(GameError::SessionNotFound)?;
        if session.status != SessionStatus::InProgress {
            return Err(GameError::SessionNotActive);
        }

        let quiz = self
            .store
            .quiz_with_questions(session.quiz_id)
            .await?
            .ok_or(GameError::QuizNotFound)?;
        let current = quiz
            .questions
            .get(session.current_question_index() as usize)
            .ok_or(GameError::QuestionNotCurrent)?;
        if current.id != question_id {
            return Err(GameError::QuestionNotCurrent);
        }

        let answer = current
            .answers
            .iter()
            .find(|answer| answer.id == answer_id)
            .ok_or(GameError::AnswerNotInQuestion)?;

        let accepted = self
            .store
            .try_record_answer(&AnswerSubmission {
                session_id: session.id,
                player_id: player.id,
                question_id,
                answer_id,
                is_correct: answer.is_correct,
                answered_at: Utc::now(),
            })
            .await?;
        if !accepted {
            return Err(GameError::AlreadyAnswered);
        }

        if answer.is_correct {
            self.store.increment_score(player.id).await?;
        }

        self.registry.mark_answered(session.id, player.id).await;
        self.registry
            .broadcast(
                session.id,
                &GameEvent::PlayerAnswered {
                    player_id: player.id,
                    player_name: player.player_name.clone(),
                },
            )
            .await;

        let total_players = self.store.players_for_session(session.id).await?.len();
        if self.registry.have_all_answered(session.id, total_players).await {
            self.registry.broadcast(session.id, &GameEvent::AllPlayersAnswered).await;
            if let Some(correct) = current.correct_answer() {
                let scores = self.store.scores_for_session(session.id).await?;
                self.registry
                    .broadcast(
                        session.id,
                        &GameEvent::RevealAnswer { correct_answer_id: correct.id, scores },
                    )
                    .await;
            }
        }

        Ok(())
    }

    /// Advance to the next question, or finish the game when none remain.
    pub async fn advance_question(&self, session_id: Uuid) -> Result<(), GameError> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(GameError::SessionNotFound)?;
        if session.status != SessionStatus::InProgress {
            return Err(GameError::SessionNotActive);
        }

        let quiz = self
            .store
            .quiz_with_questions(session.quiz_id)
            .await?
            .ok_or(GameError::QuizNotFound)?;

        let next_index = session.current_question_index() + 1;
        match quiz.questions.get(next_index as usize) {
            Some(question) => {
                self.store.set_current_question(session_id, next_index).await?;
                self.registry.reset_answers(session_id).await;
                self.registry
                    .broadcast(
                        session_id,
                        &GameEvent::NextQuestion {
                            question_id: question.id,
                            question_index: next_index,
                        },
                    )
                    .await;
                info!(session_id = %session_id, question_index = next_index, "question advanced");
            }
            None => {
                self.store.mark_session_finished(session_id, Utc::now()).await?;
                let final_scores: Vec<FinalScore> = self
                    .store
                    .players_for_session(session_id)
                    .await?
                    .into_iter()
                    .map(|player| FinalScore {
                        player_id: player.id,
                        player_name: player.player_name,
                        score: player.score,
                    })
                    .collect();
                self.registry
                    .broadcast(session_id, &GameEvent::GameFinished { final_scores })
                    .await;
                info!(session_id = %session_id, "game finished");
            }
        }
        Ok(())
    }

    /// Broadcast the current question's correct answer and fresh scores.
    /// Read-only; the host may call it repeatedly.
    pub async fn reveal_answer(&self, session_id: Uuid) -> Result<(), GameError> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(GameError::SessionNotFound)?;
        if session.status != SessionStatus::InProgress {
            return Err(GameError::SessionNotActive);
        }

        let quiz = self
            .store
            .quiz_with_questions(session.quiz_id)
            .await?
            .ok_or(GameError::QuizNotFound)?;
        let current = quiz
            .questions
            .get(session.current_question_index() as usize)
            .ok_or(GameError::QuestionNotCurrent)?;
        let correct = current.correct_answer().ok_or(GameError::NoCorrectAnswer)?;

        let scores = self.store.scores_for_session(session_id).await?;
        self.registry
            .broadcast(
                session_id,
                &GameEvent::RevealAnswer { correct_answer_id: correct.id, scores },
            )
            .await;
        Ok(())
    }

    /// Tear down a session in any state.
    ///
    /// Subscribers receive `session_ended` before their channels close, then
    /// the durable record is deleted (players and answers cascade).
    pub async fn end_session(&self, session_id: Uuid) -> Result<(), GameError> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(GameError::SessionNotFound)?;

        self.registry.broadcast(session_id, &GameEvent::SessionEnded).await;
        self.registry.cleanup_session(session_id).await;
        self.store.delete_session(session_id).await?;

        info!(session_id = %session_id, session_code = %session.session_code, "session ended");
        Ok(())
    }

    /// Full session view for polling clients and reconnection resync.
    pub async fn session_detail(&self, session_id: Uuid) -> Result<SessionDetail, GameError> {
        let session = self
            .store
            .session_by_id(session_id)
            .await?
            .ok_or(GameError::SessionNotFound)?;
        let quiz = self
            .store
            .quiz_with_questions(session.quiz_id)
            .await?
            .ok_or(GameError::QuizNotFound)?;
        let players = self
            .store
            .players_for_session(session_id)
            .await?
            .iter()
            .map(PlayerRecord::to_player)
            .collect();

        Ok(SessionDetail {
            session_id: session.id,
            session_code: session.session_code,
            status: session.status,
            current_question: session.current_question,
            quiz,
            players,
            created_at: session.created_at,
            started_at: session.started_at,
            finished_at: session.finished_at,
        })
    }

    /// Whether a session exists in the durable store.
    pub async fn session_exists(&self, session_id: Uuid) -> Result<bool, GameError> {
        Ok(self.store.session_by_id(session_id).await?.is_some())
    }

    /// Used by the events endpoint: make sure the live entry exists for a
    /// durable session before attaching a subscriber.
    pub async fn ensure_live(&self, session_id: Uuid) -> Result<(), GameError> {
        if self.store.session_by_id(session_id).await?.is_none() {
            return Err(GameError::SessionNotFound);
        }
        self.registry.init_session(session_id).await;
        Ok(())
    }
}
