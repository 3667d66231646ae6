//! The transport engine seam
//!
//! Decoding and audio output live behind [`TransportEngine`]. The session
//! drives the engine with plain commands and learns about the engine's state
//! only through the callbacks it sends to its [`TransportListener`].

use std::fmt;
use std::sync::Arc;
use storystream_core::{AppError, PlaybackRate, Segment};
use thiserror::Error;

/// Where the engine should read a segment's audio from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// The segment has been downloaded to local storage
    Downloaded,
    /// The segment is played directly from its remote link
    Streaming,
}

/// Raw playback state as reported by an engine
///
/// Engines may emit spurious intermediate states; see
/// [`TransportReconciler`](crate::TransportReconciler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTransportState {
    /// Nothing prepared, or stopped
    Idle,
    /// Waiting for data
    Buffering,
    /// Able to produce audio immediately
    Ready,
    /// Reached the end of the prepared segment
    Ended,
}

/// Callback payloads sent by an engine
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged {
        state: RawTransportState,
        /// The engine is actually producing samples
        transporting: bool,
        /// The engine is still loading data
        loading: bool,
    },
    PlayWhenReadyChanged {
        play_when_ready: bool,
        transporting: bool,
        loading: bool,
    },
    Error {
        message: String,
        /// The engine cannot continue with the prepared segment
        permanent: bool,
    },
}

/// A failed engine command
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportFault {
    pub message: String,
    pub permanent: bool,
}

impl TransportFault {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

impl From<TransportFault> for AppError {
    fn from(fault: TransportFault) -> Self {
        if fault.permanent {
            AppError::TransportFailed {
                message: fault.message,
            }
        } else {
            AppError::transport("transport engine command failed", fault)
        }
    }
}

pub type TransportResult<T> = Result<T, TransportFault>;

/// Receives engine callbacks
///
/// Cheap to clone. Calling it never blocks and never re-enters the session:
/// every callback is queued behind the commands already submitted.
#[derive(Clone)]
pub struct TransportListener {
    sink: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportListener {
    pub fn new(sink: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn notify(&self, event: TransportEvent) {
        (self.sink)(event);
    }

    pub fn state_changed(&self, state: RawTransportState, transporting: bool, loading: bool) {
        self.notify(TransportEvent::StateChanged {
            state,
            transporting,
            loading,
        });
    }

    pub fn error(&self, message: impl Into<String>, permanent: bool) {
        self.notify(TransportEvent::Error {
            message: message.into(),
            permanent,
        });
    }
}

impl fmt::Debug for TransportListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportListener")
    }
}

/// An audio engine able to play one segment at a time
///
/// Owned by exactly one session, which calls it from a single task.
pub trait TransportEngine: Send + 'static {
    /// Installs the callback sink; called once when a session opens
    fn attach(&mut self, listener: TransportListener);

    /// Loads `segment` and positions it at `offset_ms`, without starting it
    fn prepare(&mut self, segment: &Segment, offset_ms: u64, mode: SourceMode)
        -> TransportResult<()>;

    fn play(&mut self) -> TransportResult<()>;

    fn pause(&mut self) -> TransportResult<()>;

    /// Stops and unloads the current segment
    fn stop(&mut self) -> TransportResult<()>;

    fn seek_to(&mut self, offset_ms: u64) -> TransportResult<()>;

    fn set_rate(&mut self, rate: PlaybackRate) -> TransportResult<()>;

    /// Offset into the prepared segment
    fn position_ms(&self) -> u64;

    /// Duration of the prepared segment, once the engine knows it
    fn duration_ms(&self) -> Option<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listener_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = TransportListener::new(move |event| {
            sink.lock().unwrap().push(event);
        });

        listener.state_changed(RawTransportState::Ready, true, false);
        listener.error("decoder hiccup", false);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            TransportEvent::StateChanged {
                state: RawTransportState::Ready,
                transporting: true,
                loading: false,
            }
        );
        assert!(matches!(seen[1], TransportEvent::Error { permanent: false, .. }));
    }

    #[test]
    fn test_fault_constructors() {
        assert!(TransportFault::permanent("gone").permanent);
        assert!(!TransportFault::transient("retry").permanent);
        assert_eq!(TransportFault::transient("retry").to_string(), "retry");
    }

    #[test]
    fn test_fault_into_app_error() {
        use std::error::Error as _;
        use storystream_core::RecoveryAction;

        let transient: AppError = TransportFault::transient("buffer underrun").into();
        assert_eq!(transient.recovery_action(), RecoveryAction::RetryImmediate);
        assert_eq!(transient.source().map(|s| s.to_string()).as_deref(), Some("buffer underrun"));

        let permanent: AppError = TransportFault::permanent("decoder crashed").into();
        assert_eq!(permanent.recovery_action(), RecoveryAction::ReopenSession);
        assert!(permanent.to_string().contains("decoder crashed"));
    }
}
