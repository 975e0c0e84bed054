use serde::Serialize;
use std::fmt;

/// Playback state machine of the player loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackState {
    Idle,
    Buffering,
    Ready,
    End,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "IDLE",
            PlaybackState::Buffering => "BUFFERING",
            PlaybackState::Ready => "READY",
            PlaybackState::End => "END",
        };
        write!(f, "{}", name)
    }
}
