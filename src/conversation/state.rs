//! Conversation turn state machine.

use serde::{Deserialize, Serialize};

/// Where a conversation is in its turn cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    /// No turn in flight.
    #[default]
    Idle,
    /// One invocation dispatched.
    Running,
    /// Turn ceiling reached; no further turns are accepted.
    Closed,
}

/// State machine tracking turns against an optional ceiling.
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    state: ConversationState,
    turn_count: u32,
    max_turns: Option<u32>,
    succeeded: u32,
    failed: u32,
}

impl TurnStateMachine {
    #[must_use]
    pub fn new(max_turns: Option<u32>) -> Self {
        Self {
            state: ConversationState::Idle,
            turn_count: 0,
            max_turns,
            succeeded: 0,
            failed: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Turns dispatched so far, failed ones included.
    #[must_use]
    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    #[must_use]
    pub fn max_turns(&self) -> Option<u32> {
        self.max_turns
    }

    /// Whether the ceiling has been reached.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.max_turns.is_some_and(|max| self.turn_count >= max)
    }

    /// Dispatch a turn: Idle → Running, counting it against the ceiling.
    ///
    /// Returns the state that prevented the transition on failure.
    pub fn begin(&mut self) -> Result<u32, ConversationState> {
        if self.state != ConversationState::Idle || self.exhausted() {
            return Err(self.state);
        }
        self.turn_count = self.turn_count.saturating_add(1);
        self.transition(ConversationState::Running);
        Ok(self.turn_count)
    }

    /// Complete the running turn: Running → Idle, or Closed at the ceiling.
    pub fn complete(&mut self, success: bool) {
        if self.state != ConversationState::Running {
            return;
        }
        if success {
            self.succeeded = self.succeeded.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
        let next = if self.exhausted() {
            ConversationState::Closed
        } else {
            ConversationState::Idle
        };
        self.transition(next);
    }

    #[must_use]
    pub fn stats(&self) -> TurnStats {
        TurnStats {
            turns: self.turn_count,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }

    fn transition(&mut self, new_state: ConversationState) {
        tracing::debug!(
            from = ?self.state,
            to = ?new_state,
            turn = self.turn_count,
            "Conversation state transition"
        );
        self.state = new_state;
    }
}

/// Turn statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnStats {
    pub turns: u32,
    pub succeeded: u32,
    pub failed: u32,
}
