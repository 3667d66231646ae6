//! Turns raw engine callbacks into canonical playback status transitions

use crate::transport::RawTransportState;
use std::fmt;

/// What the transport is actually doing, as far as the session is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Initial,
    Preparing,
    Buffering,
    Playing,
    Paused,
    SegmentEnded,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::Preparing => "preparing",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::SegmentEnded => "segment-ended",
        };
        f.write_str(name)
    }
}

/// A change of [`PlaybackStatus`]; never produced for `from == to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: PlaybackStatus,
    pub to: PlaybackStatus,
}

impl StatusTransition {
    /// True only when entering `Playing` from any other status
    pub fn started_playing(&self) -> bool {
        self.to == PlaybackStatus::Playing && self.from != PlaybackStatus::Playing
    }
}

/// How an engine error affects the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Reported, then ignored
    Transient,
    /// Playback of the current segment cannot continue
    Permanent,
}

/// Debounces raw engine states into [`StatusTransition`]s
///
/// Engines report `Buffering` and then, while still loading, may briefly
/// report `Ready` without producing audio. The reconciler keeps a buffering
/// flag across such callbacks so those do not flicker into `Paused`.
#[derive(Debug)]
pub struct TransportReconciler {
    status: PlaybackStatus,
    buffering: bool,
}

impl TransportReconciler {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Initial,
            buffering: false,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Records that a segment is being loaded into the engine
    pub fn preparing(&mut self) -> Option<StatusTransition> {
        self.buffering = false;
        self.transition(PlaybackStatus::Preparing)
    }

    /// Forgets engine state after a stop
    pub fn reset(&mut self) -> Option<StatusTransition> {
        self.buffering = false;
        self.transition(PlaybackStatus::Initial)
    }

    pub fn on_state_changed(
        &mut self,
        state: RawTransportState,
        transporting: bool,
        loading: bool,
    ) -> Option<StatusTransition> {
        let next = match state {
            RawTransportState::Buffering => {
                self.buffering = true;
                PlaybackStatus::Buffering
            }
            RawTransportState::Ready => {
                if transporting {
                    self.buffering = false;
                    PlaybackStatus::Playing
                } else if self.buffering && loading {
                    PlaybackStatus::Buffering
                } else {
                    self.buffering = false;
                    PlaybackStatus::Paused
                }
            }
            RawTransportState::Ended => {
                self.buffering = false;
                PlaybackStatus::SegmentEnded
            }
            RawTransportState::Idle => {
                self.buffering = false;
                PlaybackStatus::Initial
            }
        };
        self.transition(next)
    }

    pub fn on_play_when_ready_changed(
        &mut self,
        play_when_ready: bool,
        transporting: bool,
        loading: bool,
    ) -> Option<StatusTransition> {
        if !play_when_ready {
            return self.transition(PlaybackStatus::Paused);
        }

        if transporting {
            self.buffering = false;
            self.transition(PlaybackStatus::Playing)
        } else if loading {
            self.buffering = true;
            self.transition(PlaybackStatus::Buffering)
        } else {
            None
        }
    }

    pub fn on_error(&self, permanent: bool) -> ErrorDisposition {
        if permanent {
            ErrorDisposition::Permanent
        } else {
            ErrorDisposition::Transient
        }
    }

    fn transition(&mut self, to: PlaybackStatus) -> Option<StatusTransition> {
        if self.status == to {
            return None;
        }

        let transition = StatusTransition {
            from: self.status,
            to,
        };
        log::debug!("playback status: {} -> {}", transition.from, transition.to);
        self.status = to;
        Some(transition)
    }
}

impl Default for TransportReconciler {
    fn default() -> Self {
        Self::new()
    }
}
