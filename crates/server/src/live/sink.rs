// Subscriber push-channel capability.
//
// Any transport that can accept ordered byte frames and be closed can carry
// session events; the SSE endpoint wires one `ChannelSink` per connection.

use axum::body::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// A subscriber's channel could not accept a frame.
///
/// Both causes are treated identically by the registry: the subscriber is
/// pruned and receives no further events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The remote end went away (receiver dropped).
    #[error("subscriber channel closed")]
    Closed,
    /// The bounded queue is full — the subscriber is too slow to keep up.
    #[error("subscriber channel full")]
    Full,
}

/// Capability interface for one subscriber connection.
///
/// `send` must be non-blocking with bounded buffering so one slow or dead
/// subscriber can never stall delivery to the others.
pub trait EventSink: Send + Sync {
    fn send(&self, frame: Bytes) -> Result<(), SinkError>;

    /// Ask the transport to terminate the connection. Best-effort; errors
    /// are ignored by callers.
    fn close(&self);
}

/// Frames the subscriber stream interprets as "close the connection".
/// Zero-length payloads never occur for real events or keep-alives.
pub const CLOSE_FRAME: Bytes = Bytes::new();

/// Queue capacity per subscriber. A subscriber that falls this many frames
/// behind is pruned rather than buffered indefinitely.
pub const SINK_CAPACITY: usize = 64;

/// `EventSink` over a bounded in-process channel; the receiving half is
/// drained by the subscriber's SSE response stream.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink plus the receiver its connection should drain.
    pub fn new() -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&self) {
        // The stream ends on the sentinel; if the queue is already full or
        // the receiver is gone the connection is tearing down anyway.
        let _ = self.tx.try_send(CLOSE_FRAME);
    }
}
