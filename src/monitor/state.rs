//! Per-user helper state machine
//!
//! | current     | observed  | next        | action  |
//! |-------------|-----------|-------------|---------|
//! | NotActive   | LoginGUI  | RunningGUI  | Enable  |
//! | NotActive   | LoginText | RunningText | Enable  |
//! | RunningGUI  | NotActive | NotActive   | Stop    |
//! | RunningText | NotActive | NotActive   | Stop    |
//! | RunningGUI  | LoginText | RunningText | Restart |
//! | RunningText | LoginGUI  | RunningGUI  | -       |
//!
//! Every other pair is a noop. The helper only activates its tray icon at
//! startup, so losing the last graphical session needs a restart while gaining
//! one does not.

use crate::accounts::LoginKind;

/// Helper lifecycle state for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NorduserState {
    /// No helper running, or no session observed
    NotActive,
    /// Graphical login observed (transition input only)
    LoginGUI,
    /// Text login observed (transition input only)
    LoginText,
    /// Helper running for a graphical session
    RunningGUI,
    /// Helper running for a text session
    RunningText,
}

impl NorduserState {
    /// Observed signal for a login kind
    pub fn observed(kind: LoginKind) -> Self {
        match kind {
            LoginKind::None => NorduserState::NotActive,
            LoginKind::TextLogin => NorduserState::LoginText,
            LoginKind::GraphicalLogin => NorduserState::LoginGUI,
        }
    }

    /// Whether the helper is believed to be running in this state
    pub fn is_running(self) -> bool {
        matches!(self, NorduserState::RunningGUI | NorduserState::RunningText)
    }
}

impl std::fmt::Display for NorduserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotActive => write!(f, "not-active"),
            Self::LoginGUI => write!(f, "login-gui"),
            Self::LoginText => write!(f, "login-text"),
            Self::RunningGUI => write!(f, "running-gui"),
            Self::RunningText => write!(f, "running-text"),
        }
    }
}

/// Backend operation requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the helper
    Enable,
    /// Stop the helper
    Stop,
    /// Restart the helper
    Restart,
    /// Nothing to do on the backend
    None,
}

/// Next state and action for `current` given the observed login kind
pub fn transition(current: NorduserState, observed: LoginKind) -> (NorduserState, Action) {
    transition_signal(current, NorduserState::observed(observed))
}

/// Transition on an already-mapped observed signal
pub fn transition_signal(
    current: NorduserState,
    signal: NorduserState,
) -> (NorduserState, Action) {
    use NorduserState::{LoginGUI, LoginText, NotActive, RunningGUI, RunningText};

    match (current, signal) {
        (NotActive, LoginGUI) => (RunningGUI, Action::Enable),
        (NotActive, LoginText) => (RunningText, Action::Enable),
        (RunningGUI, NotActive) | (RunningText, NotActive) => (NotActive, Action::Stop),
        (RunningGUI, LoginText) => (RunningText, Action::Restart),
        (RunningText, LoginGUI) => (RunningGUI, Action::None),
        _ => (current, Action::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use NorduserState::{LoginGUI, LoginText, NotActive, RunningGUI, RunningText};

    const ALL: [NorduserState; 5] = [NotActive, LoginGUI, LoginText, RunningGUI, RunningText];

    const LISTED: [(NorduserState, NorduserState); 6] = [
        (NotActive, LoginGUI),
        (NotActive, LoginText),
        (RunningGUI, NotActive),
        (RunningText, NotActive),
        (RunningGUI, LoginText),
        (RunningText, LoginGUI),
    ];

    #[test]
    fn test_table() {
        let cases = [
            (NotActive, LoginKind::GraphicalLogin, RunningGUI, Action::Enable),
            (NotActive, LoginKind::TextLogin, RunningText, Action::Enable),
            (RunningGUI, LoginKind::None, NotActive, Action::Stop),
            (RunningText, LoginKind::None, NotActive, Action::Stop),
            (RunningGUI, LoginKind::TextLogin, RunningText, Action::Restart),
            (RunningText, LoginKind::GraphicalLogin, RunningGUI, Action::None),
            (RunningGUI, LoginKind::GraphicalLogin, RunningGUI, Action::None),
            (RunningText, LoginKind::TextLogin, RunningText, Action::None),
            (NotActive, LoginKind::None, NotActive, Action::None),
        ];

        for (current, observed, next, action) in cases {
            assert_eq!(
                transition(current, observed),
                (next, action),
                "{current} observing {observed}"
            );
        }
    }

    #[test]
    fn test_running_states() {
        assert!(RunningGUI.is_running());
        assert!(RunningText.is_running());
        assert!(!NotActive.is_running());
        assert!(!LoginGUI.is_running());
    }

    fn any_state() -> impl Strategy<Value = NorduserState> {
        proptest::sample::select(ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_unlisted_pairs_are_noops(current in any_state(), signal in any_state()) {
            prop_assume!(!LISTED.contains(&(current, signal)));
            prop_assert_eq!(transition_signal(current, signal), (current, Action::None));
        }
    }
}
