//! Player state machine
//!
//! Validates requested lifecycle transitions. Requests outside the current
//! state's allowed set are ignored. `Finished → Playing` (replay or seek
//! after the end) is applied silently so the host does not flicker through
//! a visible state change.
//!
//! ```text
//! Unknown → Ready → Playing ⇄ {Paused, Stopped, Stalled}
//!                   Playing → Finished → {Playing (silent), Stopped}
//! any → Error (terminal, via fail())
//! ```

use avsync_common::events::PlayerState;

/// Outcome of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed; `silent` transitions must not be announced
    Changed {
        old: PlayerState,
        new: PlayerState,
        silent: bool,
    },
    /// Not allowed from the current state, or already there
    Ignored,
}

/// Explicit lifecycle state graph
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PlayerState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Unknown,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Whether `from → to` is allowed, and if so whether it is silent
    pub fn check(from: PlayerState, to: PlayerState) -> Option<bool> {
        use PlayerState::*;
        match (from, to) {
            (Unknown, Ready) => Some(false),
            (Ready, Playing) => Some(false),
            (Playing, Stalled | Paused | Stopped | Finished) => Some(false),
            (Paused, Stopped | Playing) => Some(false),
            (Stopped, Playing | Paused) => Some(false),
            (Stalled, Stopped | Paused | Playing) => Some(false),
            (Finished, Playing) => Some(true),
            (Finished, Stopped) => Some(false),
            _ => None,
        }
    }

    /// Apply `to` if allowed
    pub fn request(&mut self, to: PlayerState) -> Transition {
        match Self::check(self.state, to) {
            Some(silent) => {
                let old = self.state;
                self.state = to;
                Transition::Changed { old, new: to, silent }
            }
            None => Transition::Ignored,
        }
    }

    /// Enter the terminal error state
    pub fn fail(&mut self) -> Transition {
        if self.state == PlayerState::Error {
            return Transition::Ignored;
        }
        let old = self.state;
        self.state = PlayerState::Error;
        Transition::Changed {
            old,
            new: PlayerState::Error,
            silent: false,
        }
    }
}
