//! Tracks whether a browsing context is still usable. One guard per search
//! term; state transitions must observe snapshots in page-visit order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    AwaitingIntervention,
    Resuming,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::AwaitingIntervention => "awaiting_intervention",
            SessionState::Resuming => "resuming",
        }
    }

    pub fn parse(s: &str) -> Option<SessionState> {
        match s {
            "active" => Some(SessionState::Active),
            "awaiting_intervention" => Some(SessionState::AwaitingIntervention),
            "resuming" => Some(SessionState::Resuming),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    state: SessionState,
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGuard {
    pub fn new() -> Self {
        SessionGuard {
            state: SessionState::Active,
        }
    }

    /// Restore a guard persisted across invocations.
    pub fn from_state(state: SessionState) -> Self {
        SessionGuard { state }
    }

    pub fn current_state(&self) -> SessionState {
        self.state
    }

    /// While a challenge is unresolved, no snapshot may reach the extractor;
    /// anything scraped behind a block page would be garbage recorded as data.
    pub fn should_extract(&self) -> bool {
        self.state != SessionState::AwaitingIntervention
    }

    /// Challenge anomaly signal from the router.
    pub fn challenge_detected(&mut self) {
        self.state = SessionState::AwaitingIntervention;
    }

    /// Explicit operator confirmation that the challenge has been cleared.
    /// Only leaves `AwaitingIntervention`; the guard never resumes on its own.
    pub fn intervention_confirmed(&mut self) {
        if self.state == SessionState::AwaitingIntervention {
            self.state = SessionState::Resuming;
        }
    }

    /// A snapshot classified as normal or empty-result confirms the context
    /// is healthy again.
    pub fn snapshot_cleared(&mut self) {
        if self.state == SessionState::Resuming {
            self.state = SessionState::Active;
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_active() {
        let guard = SessionGuard::new();
        assert_eq!(guard.current_state(), SessionState::Active);
        assert!(guard.should_extract());
    }

    #[test]
    fn challenge_suspends_extraction() {
        let mut guard = SessionGuard::new();
        guard.challenge_detected();
        assert_eq!(guard.current_state(), SessionState::AwaitingIntervention);
        assert!(!guard.should_extract());
    }

    #[test]
    fn stays_suspended_without_confirmation() {
        // [normal, challenge, challenge, normal] with no operator event.
        let mut guard = SessionGuard::new();
        guard.snapshot_cleared();
        assert_eq!(guard.current_state(), SessionState::Active);
        guard.challenge_detected();
        guard.challenge_detected();
        guard.snapshot_cleared();
        assert_eq!(guard.current_state(), SessionState::AwaitingIntervention);
    }

    #[test]
    fn resumes_only_after_confirmation_and_clean_snapshot() {
        let mut guard = SessionGuard::new();
        guard.challenge_detected();
        guard.intervention_confirmed();
        assert_eq!(guard.current_state(), SessionState::Resuming);
        assert!(guard.should_extract());
        guard.snapshot_cleared();
        assert_eq!(guard.current_state(), SessionState::Active);
    }

    #[test]
    fn challenge_while_resuming_suspends_again() {
        let mut guard = SessionGuard::new();
        guard.challenge_detected();
        guard.intervention_confirmed();
        guard.challenge_detected();
        assert_eq!(guard.current_state(), SessionState::AwaitingIntervention);
    }

    #[test]
    fn confirmation_outside_suspension_is_a_no_op() {
        let mut guard = SessionGuard::new();
        guard.intervention_confirmed();
        assert_eq!(guard.current_state(), SessionState::Active);
    }

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            SessionState::Active,
            SessionState::AwaitingIntervention,
            SessionState::Resuming,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
    }
}
