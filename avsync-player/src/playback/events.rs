//! Host notification
//!
//! [`StateNotifier`] owns the state machine and the session's event sender.
//! Engine threads publish through it; every send is non-blocking. A failed
//! delivery is counted, logged, and reported as its own error; the state
//! change itself is kept.

use super::state_machine::{StateMachine, Transition};
use crate::error::{Error, Result};
use avsync_common::events::{EmitError, ErrorCode, EventSender, PlayerEventKind, PlayerState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Publishes lifecycle transitions and errors to the host
#[derive(Debug)]
pub struct StateNotifier {
    machine: Mutex<StateMachine>,
    sender: EventSender,
    failures: AtomicU64,
}

impl StateNotifier {
    pub fn new(sender: EventSender) -> Self {
        Self {
            machine: Mutex::new(StateMachine::new()),
            sender,
            failures: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.sender.session_id()
    }

    pub fn state(&self) -> PlayerState {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner).state()
    }

    /// Undeliverable notifications so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Request a transition and announce it unless it is ignored or silent
    pub fn publish(&self, to: PlayerState) -> Result<Transition> {
        let transition = self
            .machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request(to);
        self.announce(transition)?;
        Ok(transition)
    }

    /// Enter the terminal error state
    pub fn fail(&self, code: ErrorCode, message: &str) -> Result<()> {
        let transition = self.machine.lock().unwrap_or_else(PoisonError::into_inner).fail();
        self.send(PlayerEventKind::Error {
            code,
            message: message.to_string(),
        })?;
        self.announce(transition).map(|_| ())
    }

    fn announce(&self, transition: Transition) -> Result<()> {
        match transition {
            Transition::Changed { old, new, silent: false } => {
                info!("Player state: {} -> {}", old, new);
                let delivered = self.send(PlayerEventKind::StateChanged {
                    old_state: old,
                    new_state: new,
                });
                if delivered.is_err() {
                    // Best effort: the error event may not fit either
                    let _ = self.sender.try_emit(PlayerEventKind::Error {
                        code: ErrorCode::NotificationFailed,
                        message: format!("state change {} -> {} not delivered", old, new),
                    });
                }
                delivered
            }
            Transition::Changed { old, new, silent: true } => {
                debug!("Player state: {} -> {} (silent)", old, new);
                Ok(())
            }
            Transition::Ignored => Ok(()),
        }
    }

    /// Report an error to the host without changing state
    pub fn report_error(&self, error: &Error) -> Result<()> {
        self.send(PlayerEventKind::Error {
            code: error.code(),
            message: error.to_string(),
        })
    }

    pub fn step_requested(&self) -> Result<()> {
        self.send(PlayerEventKind::StepRequested)
    }

    pub fn session_terminated(&self, reason: &str) -> Result<()> {
        self.send(PlayerEventKind::SessionTerminated {
            reason: reason.to_string(),
        })
    }

    fn send(&self, kind: PlayerEventKind) -> Result<()> {
        self.sender.try_emit(kind).map_err(|e| {
            self.failures.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                EmitError::Full => "event channel full",
                EmitError::Closed => "event receiver dropped",
            };
            warn!("Notification not delivered: {}", reason);
            Error::Notification(reason.to_string())
        })
    }
}
