//! Turn state machine
//!
//! Records the current phase of a dialogue turn and announces changes to a
//! single registered handler. It does not validate transitions; the
//! orchestrator's call sequence decides which moves are legal.

use std::fmt;

/// Phase of the current dialogue turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TurnState {
    /// Nothing in progress
    #[default]
    Idle,
    /// User speech is being captured
    Listening,
    /// Captured speech is waiting for a transcript
    Transcribing,
    /// The model request is in flight and nothing has been spoken yet
    Thinking,
    /// At least one sentence has been handed to synthesis
    Speaking,
}

impl TurnState {
    /// Lowercase name used in logs and UI payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change as seen by the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub current: TurnState,
    pub previous: TurnState,
}

type ChangeHandler = Box<dyn FnMut(StateChange) + Send>;

/// Five-state turn model with a single change subscriber
pub struct StateMachine {
    current: TurnState,
    on_change: Option<ChangeHandler>,
}

impl StateMachine {
    /// Create a state machine in [`TurnState::Idle`] with no subscriber
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: TurnState::Idle,
            on_change: None,
        }
    }

    /// Register the change handler, replacing any previous one
    pub fn subscribe(&mut self, handler: impl FnMut(StateChange) + Send + 'static) {
        self.on_change = Some(Box::new(handler));
    }

    /// Move to `next`. Returns `false` (and fires nothing) when already there.
    pub fn transition(&mut self, next: TurnState) -> bool {
        if next == self.current {
            return false;
        }

        let previous = self.current;
        self.current = next;
        tracing::debug!("state: {previous} -> {next}");

        if let Some(handler) = self.on_change.as_mut() {
            handler(StateChange {
                current: next,
                previous,
            });
        }

        true
    }

    /// Whether the machine is currently in `state`
    #[must_use]
    pub fn is(&self, state: TurnState) -> bool {
        self.current == state
    }

    #[must_use]
    pub const fn current(&self) -> TurnState {
        self.current
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("subscribed", &self.on_change.is_some())
            .finish()
    }
}
