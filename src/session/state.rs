use serde::Serialize;
use std::fmt;

/// Lifecycle of the local actor's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session
    Idle,
    /// Broadcasting as the creator
    Hosting,
    /// Watching someone else's session
    Watching,
    /// Teardown in progress
    Ending,
    /// Torn down; recycled to `Idle` immediately
    Ended,
}

impl SessionState {
    /// A session is live locally
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Hosting | SessionState::Watching)
    }

    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle, Hosting)
                | (Idle, Watching)
                | (Hosting, Ending)
                | (Watching, Ending)
                | (Ending, Ended)
                | (Ended, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Hosting => "hosting",
            SessionState::Watching => "watching",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_path_is_the_only_way_back_to_idle() {
        assert!(SessionState::Hosting.can_transition(SessionState::Ending));
        assert!(SessionState::Ending.can_transition(SessionState::Ended));
        assert!(SessionState::Ended.can_transition(SessionState::Idle));
        assert!(!SessionState::Hosting.can_transition(SessionState::Idle));
        assert!(!SessionState::Hosting.can_transition(SessionState::Watching));
        assert!(!SessionState::Ending.can_transition(SessionState::Hosting));
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(SessionState::Watching.to_string(), "watching");
        assert!(SessionState::Hosting.is_active());
        assert!(!SessionState::Ending.is_active());
    }
}
