//! Per-language-pair batch state machine: Idle → Armed → Dispatching → Idle.
//! Re-arming within the debounce window stays in Armed; words arriving while a
//! batch is in flight start a fresh Armed accumulation.

use std::fmt;

use serde::Serialize;

/// Lifecycle of one language pair inside the batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PairState {
    /// No pending words, no timer.
    Idle,
    /// Words pending, debounce timer armed.
    Armed,
    /// Timer fired; the detached batch is being sent to the backend.
    Dispatching,
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairState::Idle => write!(f, "Idle"),
            PairState::Armed => write!(f, "Armed"),
            PairState::Dispatching => write!(f, "Dispatching"),
        }
    }
}

impl PairState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: PairState) -> bool {
        matches!(
            (self, next),
            (PairState::Idle, PairState::Armed)
                | (PairState::Armed, PairState::Armed) // timer reset
                | (PairState::Armed, PairState::Dispatching)
                | (PairState::Armed, PairState::Idle) // cancelled
                | (PairState::Dispatching, PairState::Idle)
                | (PairState::Dispatching, PairState::Armed) // new words mid-flight
        )
    }

    /// Apply a transition, returning the rejected pair on an invalid move.
    pub fn transition(&mut self, next: PairState) -> Result<PairState, String> {
        if !self.can_transition_to(next) {
            return Err(format!("invalid transition: {} -> {}", self, next));
        }
        *self = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_is_valid() {
        let mut state = PairState::Idle;
        state.transition(PairState::Armed).unwrap();
        state.transition(PairState::Armed).unwrap();
        state.transition(PairState::Dispatching).unwrap();
        state.transition(PairState::Armed).unwrap();
        state.transition(PairState::Dispatching).unwrap();
        state.transition(PairState::Idle).unwrap();
        assert_eq!(state, PairState::Idle);
    }

    #[test]
    fn idle_cannot_dispatch() {
        let mut state = PairState::Idle;
        assert!(state.transition(PairState::Dispatching).is_err());
        assert_eq!(state, PairState::Idle);
    }
}
