// SSE subscription endpoint.
//
// One bounded channel per subscriber; the response body drains it. The
// stream ends on the close sentinel or receiver teardown, and a drop guard
// deregisters the subscriber however the connection ends.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures::Stream;
use quizcast_common::protocol::events::{GameEvent, KEEP_ALIVE_FRAME};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};
use tracing::debug;
use uuid::Uuid;

use crate::{
    api::ApiState,
    error::{ApiError, ErrorCode},
    live::{sink::ChannelSink, SessionRegistry},
};

/// How often a comment frame is pushed on an otherwise idle stream.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(30);

pub async fn session_events(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state.coordinator.ensure_live(session_id).await?;

    let (sink, rx) = ChannelSink::new();
    let subscriber_id = Uuid::new_v4();
    let registry = Arc::clone(state.coordinator.registry());
    if !registry.add_subscriber(session_id, subscriber_id, Arc::new(sink)).await {
        // Session was torn down between the lookup and registration.
        return Err(ApiError::from_code(ErrorCode::NotFound));
    }

    let connected = GameEvent::Connected { session_id }
        .to_sse_frame()
        .map_err(|_| ApiError::from_code(ErrorCode::InternalError))?;

    debug!(session_id = %session_id, subscriber_id = %subscriber_id, "subscriber attached");

    let stream = EventStream {
        rx,
        pending: Some(Bytes::from(connected)),
        keep_alive: interval_at(Instant::now() + KEEP_ALIVE_PERIOD, KEEP_ALIVE_PERIOD),
        finished: false,
        _guard: SubscriberGuard { registry, session_id, subscriber_id },
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|_| ApiError::from_code(ErrorCode::InternalError))
}

/// Response body stream over one subscriber's channel, with keep-alive
/// comments interleaved while the channel is idle.
struct EventStream {
    rx: mpsc::Receiver<Bytes>,
    /// The `connected` frame, emitted before anything else.
    pending: Option<Bytes>,
    keep_alive: Interval,
    finished: bool,
    _guard: SubscriberGuard,
}

impl Stream for EventStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(frame) = this.pending.take() {
            return Poll::Ready(Some(Ok(frame)));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                // Zero-length sentinel: the registry closed this channel.
                if frame.is_empty() {
                    this.finished = true;
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(frame)))
                }
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => match this.keep_alive.poll_tick(cx) {
                Poll::Ready(_) => {
                    Poll::Ready(Some(Ok(Bytes::from_static(KEEP_ALIVE_FRAME.as_bytes()))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Deregisters the subscriber when the stream is dropped, whether the
/// client aborted or the stream ended normally.
struct SubscriberGuard {
    registry: Arc<SessionRegistry>,
    session_id: Uuid,
    subscriber_id: Uuid,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let session_id = self.session_id;
        let subscriber_id = self.subscriber_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.remove_subscriber(session_id, subscriber_id).await;
                debug!(
                    session_id = %session_id,
                    subscriber_id = %subscriber_id,
                    "subscriber detached"
                );
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn stream_yields_pending_frame_first() {
        let registry = Arc::new(SessionRegistry::new());
        let session_id = Uuid::new_v4();
        let subscriber_id = Uuid::new_v4();
        registry.init_session(session_id).await;

        let (sink, rx) = ChannelSink::new();
        let mut stream = EventStream {
            rx,
            pending: Some(Bytes::from_static(b"data: {\"type\":\"connected\"}\n\n")),
            keep_alive: interval_at(Instant::now() + KEEP_ALIVE_PERIOD, KEEP_ALIVE_PERIOD),
            finished: false,
            _guard: SubscriberGuard {
                registry: Arc::clone(&registry),
                session_id,
                subscriber_id,
            },
        };

        let first = stream.next().await.expect("pending frame").expect("ok");
        assert!(first.starts_with(b"data: "));

        use crate::live::sink::EventSink;
        sink.send(Bytes::from_static(b"data: {\"type\":\"session_ended\"}\n\n"))
            .expect("send");
        let second = stream.next().await.expect("live frame").expect("ok");
        assert!(second.ends_with(b"\n\n"));
    }

    #[tokio::test]
    async fn stream_ends_on_close_sentinel() {
        let registry = Arc::new(SessionRegistry::new());
        let (sink, rx) = ChannelSink::new();
        let mut stream = EventStream {
            rx,
            pending: None,
            keep_alive: interval_at(Instant::now() + KEEP_ALIVE_PERIOD, KEEP_ALIVE_PERIOD),
            finished: false,
            _guard: SubscriberGuard {
                registry,
                session_id: Uuid::new_v4(),
                subscriber_id: Uuid::new_v4(),
            },
        };

        use crate::live::sink::EventSink;
        sink.close();
        let eof = timeout(Duration::from_secs(1), stream.next()).await.expect("ends");
        assert!(eof.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_emits_keep_alive_comments() {
        let registry = Arc::new(SessionRegistry::new());
        let (_sink, rx) = ChannelSink::new();
        let mut stream = EventStream {
            rx,
            pending: None,
            keep_alive: interval_at(Instant::now() + KEEP_ALIVE_PERIOD, KEEP_ALIVE_PERIOD),
            finished: false,
            _guard: SubscriberGuard {
                registry,
                session_id: Uuid::new_v4(),
                subscriber_id: Uuid::new_v4(),
            },
        };

        let frame = stream.next().await.expect("keep-alive").expect("ok");
        assert_eq!(frame, KEEP_ALIVE_FRAME.as_bytes());
    }

    #[tokio::test]
    async fn dropping_the_stream_deregisters_the_subscriber() {
        let registry = Arc::new(SessionRegistry::new());
        let session_id = Uuid::new_v4();
        let subscriber_id = Uuid::new_v4();
        registry.init_session(session_id).await;

        let (sink, rx) = ChannelSink::new();
        registry.add_subscriber(session_id, subscriber_id, Arc::new(sink)).await;
        let stream = EventStream {
            rx,
            pending: None,
            keep_alive: interval_at(Instant::now() + KEEP_ALIVE_PERIOD, KEEP_ALIVE_PERIOD),
            finished: false,
            _guard: SubscriberGuard {
                registry: Arc::clone(&registry),
                session_id,
                subscriber_id,
            },
        };
        drop(stream);

        // Deregistration happens on a spawned task.
        tokio::task::yield_now().await;
        let snapshot = registry
            .session_snapshot(session_id)
            .await
            .expect("session still registered");
        assert_eq!(snapshot.subscriber_count, 0);
    }
}
