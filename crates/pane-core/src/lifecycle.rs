use serde::{Deserialize, Serialize};

use crate::error::PaneError;

/// Lifecycle of the conversation session owned by the pane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionLifecycle {
    /// No conversation selected yet.
    Detached,
    /// Initial page for the selected conversation is in flight.
    Loading,
    /// Timeline is loaded; pagination commands are accepted.
    Ready,
    /// Initial load failed; selecting the conversation again retries.
    Failed,
    /// View was torn down.
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionLifecycle,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionLifecycle::Detached,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionLifecycle {
        self.state
    }

    /// Selecting a conversation is valid from every state, including `Closed`.
    pub fn on_select(&mut self) {
        self.state = SessionLifecycle::Loading;
    }

    pub fn on_initial_loaded(&mut self) -> Result<(), PaneError> {
        self.transition_from_state(
            SessionLifecycle::Loading,
            SessionLifecycle::Ready,
            "initial_loaded",
        )
    }

    pub fn on_initial_failed(&mut self) -> Result<(), PaneError> {
        self.transition_from_state(
            SessionLifecycle::Loading,
            SessionLifecycle::Failed,
            "initial_failed",
        )
    }

    pub fn on_close(&mut self) {
        self.state = SessionLifecycle::Closed;
    }

    /// Guard for commands that need a loaded timeline.
    pub fn require_ready(&self, action: &str) -> Result<(), PaneError> {
        if self.state == SessionLifecycle::Ready {
            Ok(())
        } else {
            Err(PaneError::invalid_state(self.state, action))
        }
    }

    fn transition_from_state(
        &mut self,
        expected: SessionLifecycle,
        next: SessionLifecycle,
        action: &str,
    ) -> Result<(), PaneError> {
        if self.state != expected {
            return Err(PaneError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(())
    }
}
