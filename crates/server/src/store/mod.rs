// Durable store collaborator: quizzes, sessions, players and answers.
//
// The live engine treats this as the single source of truth for session
// lifecycle status and scores. Two backends behind one method surface:
// PostgreSQL for deployments, an in-memory map for development and tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quizcast_common::types::{Answer, Player, Question, Quiz, SessionStatus};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable record of one game session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub session_code: String,
    pub status: SessionStatus,
    pub current_question: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// A missing current-question index is read as the first question.
    pub fn current_question_index(&self) -> i32 {
        self.current_question.unwrap_or(0)
    }
}

/// Durable record of one joined player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub player_name: String,
    pub score: i32,
    pub is_connected: bool,
    pub joined_at: DateTime<Utc>,
}

impl PlayerRecord {
    pub fn to_player(&self) -> Player {
        Player {
            id: self.id,
            player_name: self.player_name.clone(),
            score: self.score,
            is_connected: self.is_connected,
        }
    }
}

/// One accepted answer submission.
#[derive(Debug, Clone)]
pub struct AnswerSubmission {
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub question_id: Uuid,
    pub answer_id: Uuid,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

/// Backing maps of the in-memory store. Fields stay private to this
/// module; all access goes through [`GameStore`].
#[derive(Default)]
pub struct MemoryGameStore {
    quizzes: HashMap<Uuid, Quiz>,
    sessions: HashMap<Uuid, SessionRecord>,
    players: HashMap<Uuid, PlayerRecord>,
    /// (player_id, question_id) pairs with a recorded answer.
    answers: HashMap<(Uuid, Uuid), AnswerSubmission>,
}

/// The durable store, backed by PostgreSQL or an in-memory map.
#[derive(Clone)]
pub enum GameStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryGameStore>>),
}

impl GameStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryGameStore::default())))
    }

    // ── quizzes ────────────────────────────────────────────────────

    /// Insert a quiz with its questions and answers. Admin CRUD lives
    /// outside this service; tests and seeding tools call this directly.
    pub async fn create_quiz(&self, quiz: &Quiz) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                let mut tx = pool.begin().await.context("failed to begin quiz insert")?;
                sqlx::query("INSERT INTO quizzes (id, title) VALUES ($1, $2)")
                    .bind(quiz.id)
                    .bind(&quiz.title)
                    .execute(&mut *tx)
                    .await
                    .context("failed to insert quiz")?;
                for question in &quiz.questions {
                    sqlx::query(
                        "INSERT INTO questions (id, quiz_id, text, order_index) VALUES ($1, $2, $3, $4)",
                    )
                    .bind(question.id)
                    .bind(quiz.id)
                    .bind(&question.text)
                    .bind(question.order_index)
                    .execute(&mut *tx)
                    .await
                    .context("failed to insert question")?;
                    for answer in &question.answers {
                        sqlx::query(
                            "INSERT INTO answers (id, question_id, text, is_correct, order_index) VALUES ($1, $2, $3, $4, $5)",
                        )
                        .bind(answer.id)
                        .bind(question.id)
                        .bind(&answer.text)
                        .bind(answer.is_correct)
                        .bind(answer.order_index)
                        .execute(&mut *tx)
                        .await
                        .context("failed to insert answer")?;
                    }
                }
                tx.commit().await.context("failed to commit quiz insert")?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let mut quiz = quiz.clone();
                quiz.questions.sort_by_key(|q| q.order_index);
                for question in &mut quiz.questions {
                    question.answers.sort_by_key(|a| a.order_index);
                }
                guard.quizzes.insert(quiz.id, quiz);
                Ok(())
            }
        }
    }

    /// Fetch a quiz with questions and answers in order, or `None`.
    pub async fn quiz_with_questions(&self, quiz_id: Uuid) -> Result<Option<Quiz>> {
        match self {
            Self::Postgres(pool) => {
                let title = sqlx::query_scalar::<_, String>(
                    "SELECT title FROM quizzes WHERE id = $1",
                )
                .bind(quiz_id)
                .fetch_optional(pool)
                .await
                .context("failed to load quiz")?;

                let Some(title) = title else {
                    return Ok(None);
                };

                let question_rows = sqlx::query_as::<_, (Uuid, String, i32)>(
                    "SELECT id, text, order_index FROM questions WHERE quiz_id = $1 ORDER BY order_index ASC",
                )
                .bind(quiz_id)
                .fetch_all(pool)
                .await
                .context("failed to load questions")?;

                let mut questions = Vec::with_capacity(question_rows.len());
                for (id, text, order_index) in question_rows {
                    let answer_rows = sqlx::query_as::<_, (Uuid, String, bool, i32)>(
                        "SELECT id, text, is_correct, order_index FROM answers WHERE question_id = $1 ORDER BY order_index ASC",
                    )
                    .bind(id)
                    .fetch_all(pool)
                    .await
                    .context("failed to load answers")?;

                    questions.push(Question {
                        id,
                        text,
                        order_index,
                        answers: answer_rows
                            .into_iter()
                            .map(|(id, text, is_correct, order_index)| Answer {
                                id,
                                text,
                                is_correct,
                                order_index,
                            })
                            .collect(),
                    });
                }

                Ok(Some(Quiz { id: quiz_id, title, questions }))
            }
            Self::Memory(store) => Ok(store.read().await.quizzes.get(&quiz_id).cloned()),
        }
    }

    // ── sessions ───────────────────────────────────────────────────

    pub async fn session_code_exists(&self, code: &str) -> Result<bool> {
        match self {
            Self::Postgres(pool) => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM game_sessions WHERE session_code = $1)",
                )
                .bind(code)
                .fetch_one(pool)
                .await
                .context("failed to check session code")?;
                Ok(exists)
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .sessions
                .values()
                .any(|session| session.session_code == code)),
        }
    }

    /// Create a session record with status `waiting`. The unique index on
    /// `session_code` makes concurrent creation with the same code fail
    /// rather than silently overwrite.
    pub async fn create_session(&self, quiz_id: Uuid, code: &str) -> Result<SessionRecord> {
        let record = SessionRecord {
            id: Uuid::new_v4(),
            quiz_id,
            session_code: code.to_string(),
            status: SessionStatus::Waiting,
            current_question: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO game_sessions (id, quiz_id, session_code, status, created_at) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(record.id)
                .bind(record.quiz_id)
                .bind(&record.session_code)
                .bind(record.status.as_str())
                .bind(record.created_at)
                .execute(pool)
                .await
                .context("failed to insert game session")?;
                Ok(record)
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                anyhow::ensure!(
                    !guard.sessions.values().any(|s| s.session_code == code),
                    "session code collision"
                );
                guard.sessions.insert(record.id, record.clone());
                Ok(record)
            }
        }
    }

    pub async fn session_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SessionRow>(
                    "SELECT id, quiz_id, session_code, status, current_question, created_at, started_at, finished_at FROM game_sessions WHERE id = $1",
                )
                .bind(session_id)
                .fetch_optional(pool)
                .await
                .context("failed to load game session")?;
                row.map(SessionRow::into_record).transpose()
            }
            Self::Memory(store) => Ok(store.read().await.sessions.get(&session_id).cloned()),
        }
    }

    pub async fn session_by_code(&self, code: &str) -> Result<Option<SessionRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SessionRow>(
                    "SELECT id, quiz_id, session_code, status, current_question, created_at, started_at, finished_at FROM game_sessions WHERE session_code = $1",
                )
                .bind(code)
                .fetch_optional(pool)
                .await
                .context("failed to load game session by code")?;
                row.map(SessionRow::into_record).transpose()
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .sessions
                .values()
                .find(|session| session.session_code == code)
                .cloned()),
        }
    }

    pub async fn mark_session_started(
        &self,
        session_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "UPDATE game_sessions SET status = 'in_progress', started_at = $2, current_question = 0 WHERE id = $1",
                )
                .bind(session_id)
                .bind(started_at)
                .execute(pool)
                .await
                .context("failed to mark session started")?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if let Some(session) = guard.sessions.get_mut(&session_id) {
                    session.status = SessionStatus::InProgress;
                    session.started_at = Some(started_at);
                    session.current_question = Some(0);
                }
                Ok(())
            }
        }
    }

    pub async fn set_current_question(&self, session_id: Uuid, index: i32) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query("UPDATE game_sessions SET current_question = $2 WHERE id = $1")
                    .bind(session_id)
                    .bind(index)
                    .execute(pool)
                    .await
                    .context("failed to update current question")?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if let Some(session) = guard.sessions.get_mut(&session_id) {
                    session.current_question = Some(index);
                }
                Ok(())
            }
        }
    }

    pub async fn mark_session_finished(
        &self,
        session_id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "UPDATE game_sessions SET status = 'finished', finished_at = $2 WHERE id = $1",
                )
                .bind(session_id)
                .bind(finished_at)
                .execute(pool)
                .await
                .context("failed to mark session finished")?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if let Some(session) = guard.sessions.get_mut(&session_id) {
                    session.status = SessionStatus::Finished;
                    session.finished_at = Some(finished_at);
                }
                Ok(())
            }
        }
    }

    /// Delete a session; players and answers cascade. Returns whether a
    /// record existed.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM game_sessions WHERE id = $1")
                    .bind(session_id)
                    .execute(pool)
                    .await
                    .context("failed to delete game session")?;
                Ok(result.rows_affected() > 0)
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let existed = guard.sessions.remove(&session_id).is_some();
                guard.players.retain(|_, player| player.session_id != session_id);
                guard.answers.retain(|_, answer| answer.session_id != session_id);
                Ok(existed)
            }
        }
    }

    // ── players ────────────────────────────────────────────────────

    pub async fn create_player(&self, session_id: Uuid, name: &str) -> Result<PlayerRecord> {
        let record = PlayerRecord {
            id: Uuid::new_v4(),
            session_id,
            player_name: name.to_string(),
            score: 0,
            is_connected: true,
            joined_at: Utc::now(),
        };

        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO players (id, session_id, player_name, joined_at) VALUES ($1, $2, $3, $4)",
                )
                .bind(record.id)
                .bind(record.session_id)
                .bind(&record.player_name)
                .bind(record.joined_at)
                .execute(pool)
                .await
                .context("failed to insert player")?;
                Ok(record)
            }
            Self::Memory(store) => {
                store.write().await.players.insert(record.id, record.clone());
                Ok(record)
            }
        }
    }

    pub async fn player_by_id(&self, player_id: Uuid) -> Result<Option<PlayerRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, PlayerRow>(
                    "SELECT id, session_id, player_name, score, is_connected, joined_at FROM players WHERE id = $1",
                )
                .bind(player_id)
                .fetch_optional(pool)
                .await
                .context("failed to load player")?;
                Ok(row.map(PlayerRow::into_record))
            }
            Self::Memory(store) => Ok(store.read().await.players.get(&player_id).cloned()),
        }
    }

    pub async fn delete_player(&self, player_id: Uuid) -> Result<Option<PlayerRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, PlayerRow>(
                    "DELETE FROM players WHERE id = $1 RETURNING id, session_id, player_name, score, is_connected, joined_at",
                )
                .bind(player_id)
                .fetch_optional(pool)
                .await
                .context("failed to delete player")?;
                Ok(row.map(PlayerRow::into_record))
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let removed = guard.players.remove(&player_id);
                if removed.is_some() {
                    guard.answers.retain(|(pid, _), _| *pid != player_id);
                }
                Ok(removed)
            }
        }
    }

    /// Players of a session ordered by score descending.
    pub async fn players_for_session(&self, session_id: Uuid) -> Result<Vec<PlayerRecord>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, PlayerRow>(
                    "SELECT id, session_id, player_name, score, is_connected, joined_at FROM players WHERE session_id = $1 ORDER BY score DESC, joined_at ASC",
                )
                .bind(session_id)
                .fetch_all(pool)
                .await
                .context("failed to load session players")?;
                Ok(rows.into_iter().map(PlayerRow::into_record).collect())
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut players: Vec<PlayerRecord> = guard
                    .players
                    .values()
                    .filter(|player| player.session_id == session_id)
                    .cloned()
                    .collect();
                players.sort_by(|a, b| b.score.cmp(&a.score).then(a.joined_at.cmp(&b.joined_at)));
                Ok(players)
            }
        }
    }

    /// Atomically increment a player's score by one.
    pub async fn increment_score(&self, player_id: Uuid) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query("UPDATE players SET score = score + 1 WHERE id = $1")
                    .bind(player_id)
                    .execute(pool)
                    .await
                    .context("failed to increment player score")?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if let Some(player) = guard.players.get_mut(&player_id) {
                    player.score += 1;
                }
                Ok(())
            }
        }
    }

    /// Current scores of a session keyed by player id.
    pub async fn scores_for_session(&self, session_id: Uuid) -> Result<HashMap<Uuid, i32>> {
        let players = self.players_for_session(session_id).await?;
        Ok(players.into_iter().map(|player| (player.id, player.score)).collect())
    }

    // ── answers ────────────────────────────────────────────────────

    /// Record an answer unless the player already answered this question.
    ///
    /// Returns `true` when the submission was accepted. Concurrent
    /// duplicates resolve to exactly one acceptance: Postgres via the
    /// unique index + `ON CONFLICT DO NOTHING`, memory via check-and-insert
    /// under the write lock.
    pub async fn try_record_answer(&self, submission: &AnswerSubmission) -> Result<bool> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "INSERT INTO player_answers (id, session_id, player_id, question_id, answer_id, is_correct, answered_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     ON CONFLICT (player_id, question_id) DO NOTHING",
                )
                .bind(Uuid::new_v4())
                .bind(submission.session_id)
                .bind(submission.player_id)
                .bind(submission.question_id)
                .bind(submission.answer_id)
                .bind(submission.is_correct)
                .bind(submission.answered_at)
                .execute(pool)
                .await
                .context("failed to record player answer")?;
                Ok(result.rows_affected() > 0)
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let key = (submission.player_id, submission.question_id);
                if guard.answers.contains_key(&key) {
                    return Ok(false);
                }
                guard.answers.insert(key, submission.clone());
                Ok(true)
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    quiz_id: Uuid,
    session_code: String,
    status: String,
    current_question: Option<i32>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord> {
        let status = SessionStatus::from_db_value(self.status.trim())
            .with_context(|| format!("invalid session status '{}' in database", self.status))?;
        Ok(SessionRecord {
            id: self.id,
            quiz_id: self.quiz_id,
            session_code: self.session_code.trim().to_string(),
            status,
            current_question: self.current_question,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PlayerRow {
    id: Uuid,
    session_id: Uuid,
    player_name: String,
    score: i32,
    is_connected: bool,
    joined_at: DateTime<Utc>,
}

impl PlayerRow {
    fn into_record(self) -> PlayerRecord {
        PlayerRecord {
            id: self.id,
            session_id: self.session_id,
            player_name: self.player_name,
            score: self.score,
            is_connected: self.is_connected,
            joined_at: self.joined_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz_with_one_question() -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            title: "Capitals".to_string(),
            questions: vec![Question {
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
            }],
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_quiz_and_session() {
        let store = GameStore::memory();
        let quiz = quiz_with_one_question();
        store.create_quiz(&quiz).await.expect("quiz insert");

        let loaded = store
            .quiz_with_questions(quiz.id)
            .await
            .expect("quiz lookup")
            .expect("quiz should exist");
        assert_eq!(loaded.questions.len(), 1);

        let session = store.create_session(quiz.id, "ABC123").await.expect("session insert");
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(store.session_code_exists("ABC123").await.expect("code check"));

        let by_code = store
            .session_by_code("ABC123")
            .await
            .expect("code lookup")
            .expect("session should exist");
        assert_eq!(by_code.id, session.id);
    }

    #[tokio::test]
    async fn duplicate_answer_is_rejected_once_recorded() {
        let store = GameStore::memory();
        let submission = AnswerSubmission {
            session_id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            answer_id: Uuid::new_v4(),
            is_correct: true,
            answered_at: Utc::now(),
        };

        assert!(store.try_record_answer(&submission).await.expect("first submission"));
        assert!(!store.try_record_answer(&submission).await.expect("second submission"));
    }

    #[tokio::test]
    async fn racing_answer_submissions_resolve_to_one_acceptance() {
        let store = GameStore::memory();
        let submission = AnswerSubmission {
            session_id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            answer_id: Uuid::new_v4(),
            is_correct: false,
            answered_at: Utc::now(),
        };

        let mut attempts = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let store = store.clone();
            let submission = submission.clone();
            attempts.spawn(async move { store.try_record_answer(&submission).await });
        }

        let mut accepted = 0;
        while let Some(result) = attempts.join_next().await {
            if result.expect("task completed").expect("submission result") {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn score_increment_is_visible_in_session_scores() {
        let store = GameStore::memory();
        let quiz = quiz_with_one_question();
        store.create_quiz(&quiz).await.expect("quiz insert");
        let session = store.create_session(quiz.id, "XYZ789").await.expect("session insert");
        let player = store.create_player(session.id, "Ada").await.expect("player insert");

        store.increment_score(player.id).await.expect("increment");
        let scores = store.scores_for_session(session.id).await.expect("scores");
        assert_eq!(scores.get(&player.id), Some(&1));
    }

    #[tokio::test]
    async fn delete_session_cascades_players_and_answers() {
        let store = GameStore::memory();
        let quiz = quiz_with_one_question();
        store.create_quiz(&quiz).await.expect("quiz insert");
        let session = store.create_session(quiz.id, "DEL001").await.expect("session insert");
        let player = store.create_player(session.id, "Ada").await.expect("player insert");

        assert!(store.delete_session(session.id).await.expect("delete"));
        assert!(store.player_by_id(player.id).await.expect("player lookup").is_none());
        assert!(!store.delete_session(session.id).await.expect("second delete"));
    }

    #[tokio::test]
    async fn players_are_ordered_by_score_descending() {
        let store = GameStore::memory();
        let quiz = quiz_with_one_question();
        store.create_quiz(&quiz).await.expect("quiz insert");
        let session = store.create_session(quiz.id, "SRT001").await.expect("session insert");
        let low = store.create_player(session.id, "Low").await.expect("player insert");
        let high = store.create_player(session.id, "High").await.expect("player insert");

        store.increment_score(high.id).await.expect("increment");
        store.increment_score(high.id).await.expect("increment");
        store.increment_score(low.id).await.expect("increment");

        let players = store.players_for_session(session.id).await.expect("players");
        assert_eq!(players[0].id, high.id);
        assert_eq!(players[1].id, low.id);
    }
}
