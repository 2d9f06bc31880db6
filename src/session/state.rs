use std::fmt;

/// Externally visible lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No engine handle created yet
    Uninitialized,
    /// Image predictor loaded, video state not requested or failed
    PreviewReady,
    /// Video state initialisation running in the background
    VideoLoading,
    /// Video state loaded, `render` accepted
    VideoReady,
    Rendering,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::PreviewReady => "preview ready",
            SessionState::VideoLoading => "video loading",
            SessionState::VideoReady => "video ready",
            SessionState::Rendering => "rendering",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
