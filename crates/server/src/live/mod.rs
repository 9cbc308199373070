// In-memory live state for active sessions.
//
// Tracks, per session, which players answered the current question and the
// set of subscriber push-channels, and fans events out to subscribers. This
// state is transient coordination data only — the durable store remains
// authoritative for lifecycle status and scores.

pub mod sink;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::body::Bytes;
use quizcast_common::protocol::events::GameEvent;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;
use sink::EventSink;

struct LiveSession {
    /// Players who answered the current question; cleared on transition.
    answered: HashSet<Uuid>,
    /// Push channels of currently connected subscribers.
    subscribers: HashMap<Uuid, Arc<dyn EventSink>>,
}

impl LiveSession {
    fn new() -> Self {
        Self { answered: HashSet::new(), subscribers: HashMap::new() }
    }
}

/// Read-only view of one session's live state, for handlers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSessionSnapshot {
    pub answered: HashSet<Uuid>,
    pub subscriber_count: usize,
}

/// Process-wide registry mapping session id to live state.
///
/// Operations on sessions that were never initialized (or already cleaned
/// up) are silent no-ops, never errors.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, LiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Idempotent: an existing entry is left untouched,
    /// including its answered-set and subscribers.
    pub async fn init_session(&self, session_id: Uuid) {
        let mut guard = self.sessions.write().await;
        guard.entry(session_id).or_insert_with(LiveSession::new);
    }

    /// Read-only snapshot, or `None` for an unregistered session.
    pub async fn session_snapshot(&self, session_id: Uuid) -> Option<LiveSessionSnapshot> {
        let guard = self.sessions.read().await;
        guard.get(&session_id).map(|session| LiveSessionSnapshot {
            answered: session.answered.clone(),
            subscriber_count: session.subscribers.len(),
        })
    }

    /// Close every subscriber channel (best-effort) and drop the entry.
    pub async fn cleanup_session(&self, session_id: Uuid) {
        let removed = self.sessions.write().await.remove(&session_id);
        if let Some(session) = removed {
            for (_, sink) in session.subscribers {
                sink.close();
                metrics::subscriber_disconnected();
            }
        }
    }

    /// Mark a player as having answered the current question. Idempotent.
    pub async fn mark_answered(&self, session_id: Uuid, player_id: Uuid) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.get_mut(&session_id) {
            session.answered.insert(player_id);
        }
    }

    /// Whether at least `total_players` distinct players have answered.
    ///
    /// Deliberately `>=`, not `==`: if a player leaves after others already
    /// answered, the drop in the total must not block progress.
    pub async fn have_all_answered(&self, session_id: Uuid, total_players: usize) -> bool {
        let guard = self.sessions.read().await;
        guard
            .get(&session_id)
            .map(|session| session.answered.len() >= total_players)
            .unwrap_or(false)
    }

    /// Clear the answered-set for the next question. Must run before the
    /// new question's events are broadcast.
    pub async fn reset_answers(&self, session_id: Uuid) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.get_mut(&session_id) {
            session.answered.clear();
        }
    }

    /// Register a subscriber channel. Returns `false` (and drops the sink)
    /// when the session is not registered — the handle is not remembered.
    pub async fn add_subscriber(
        &self,
        session_id: Uuid,
        subscriber_id: Uuid,
        sink: Arc<dyn EventSink>,
    ) -> bool {
        let mut guard = self.sessions.write().await;
        match guard.get_mut(&session_id) {
            Some(session) => {
                session.subscribers.insert(subscriber_id, sink);
                metrics::subscriber_connected();
                true
            }
            None => false,
        }
    }

    /// Unregister a subscriber. No-op if session or subscriber is missing.
    pub async fn remove_subscriber(&self, session_id: Uuid, subscriber_id: Uuid) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.get_mut(&session_id) {
            if session.subscribers.remove(&subscriber_id).is_some() {
                metrics::subscriber_disconnected();
            }
        }
    }

    /// Encode `event` once and deliver it to every subscriber of the
    /// session. Subscribers whose delivery fails are removed and closed in
    /// the same call; failures never surface to the caller. Broadcasting to
    /// an unregistered session is a no-op.
    ///
    /// Per-subscriber ordering: sinks are FIFO and the orchestrator issues
    /// broadcasts for a session sequentially, so each subscriber observes
    /// events in broadcast order.
    pub async fn broadcast(&self, session_id: Uuid, event: &GameEvent) {
        let frame = match event.to_sse_frame() {
            Ok(frame) => Bytes::from(frame),
            Err(error) => {
                warn!(event_type = event.event_type(), %error, "failed to encode event");
                return;
            }
        };

        let recipients: Vec<(Uuid, Arc<dyn EventSink>)> = {
            let guard = self.sessions.read().await;
            match guard.get(&session_id) {
                Some(session) => session
                    .subscribers
                    .iter()
                    .map(|(id, sink)| (*id, Arc::clone(sink)))
                    .collect(),
                None => return,
            }
        };

        let mut failed = Vec::new();
        for (subscriber_id, sink) in &recipients {
            if let Err(error) = sink.send(frame.clone()) {
                warn!(
                    session_id = %session_id,
                    subscriber_id = %subscriber_id,
                    %error,
                    "dropping subscriber after failed delivery"
                );
                failed.push(*subscriber_id);
            }
        }

        debug!(
            session_id = %session_id,
            event_type = event.event_type(),
            recipients = recipients.len(),
            dropped = failed.len(),
            "broadcast event"
        );
        metrics::record_broadcast(failed.len() as u64);

        if !failed.is_empty() {
            let mut guard = self.sessions.write().await;
            if let Some(session) = guard.get_mut(&session_id) {
                for subscriber_id in failed {
                    if let Some(sink) = session.subscribers.remove(&subscriber_id) {
                        sink.close();
                        metrics::subscriber_disconnected();
                    }
                }
            }
        }
    }
}
