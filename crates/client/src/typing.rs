//! Typing indicator coordination
//!
//! The local side is a two-state machine (`Idle`, `Typing`) owning a single idle
//! deadline. The first keystroke emits `true`; every keystroke pushes the deadline
//! out; reaching the deadline, sending the draft or tearing down emits `false`. The remote side mirrors explicit
//! `typing_indicator` events for the counterpart with no local expiry.

use std::time::Duration;

use supportdesk_shared::ParticipantRole;
use tokio::time::Instant;

/// Local typing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingPhase {
    Idle,
    Typing,
}

#[derive(Debug)]
pub struct TypingCoordinator {
    local_role: ParticipantRole,
    idle_timeout: Duration,
    phase: TypingPhase,
    deadline: Option<Instant>,
    remote_customer: bool,
    remote_agent: bool,
}

impl TypingCoordinator {
    pub fn new(local_role: ParticipantRole, idle_timeout: Duration) -> Self {
        Self {
            local_role,
            idle_timeout,
            phase: TypingPhase::Idle,
            deadline: None,
            remote_customer: false,
            remote_agent: false,
        }
    }

    pub fn phase(&self) -> TypingPhase {
        self.phase
    }

    /// When the idle timer fires, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Register a local keystroke. Returns `Some(true)` when the indicator must be sent.
    pub fn on_keystroke(&mut self, now: Instant) -> Option<bool> {
        self.deadline = Some(now + self.idle_timeout);
        match self.phase {
            TypingPhase::Typing => None,
            TypingPhase::Idle => {
                self.phase = TypingPhase::Typing;
                Some(true)
            }
        }
    }

    /// Check the idle timer. Returns `Some(false)` when the indicator must be cleared.
    pub fn on_deadline(&mut self, now: Instant) -> Option<bool> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                if self.phase == TypingPhase::Typing {
                    self.phase = TypingPhase::Idle;
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// End the burst early (the draft was sent). Returns `Some(false)` if typing.
    pub fn finish(&mut self) -> Option<bool> {
        self.deadline = None;
        match self.phase {
            TypingPhase::Idle => None,
            TypingPhase::Typing => {
                self.phase = TypingPhase::Idle;
                Some(false)
            }
        }
    }

    /// Apply an inbound indicator. Returns true if the displayed state changed.
    ///
    /// Indicators carrying our own role are echoes and are ignored.
    pub fn apply_remote(&mut self, sender: ParticipantRole, is_typing: bool) -> bool {
        if sender == self.local_role {
            return false;
        }
        let slot = match sender {
            ParticipantRole::Customer => &mut self.remote_customer,
            ParticipantRole::Agent => &mut self.remote_agent,
        };
        let changed = *slot != is_typing;
        *slot = is_typing;
        changed
    }

    pub fn is_remote_typing(&self, role: ParticipantRole) -> bool {
        match role {
            ParticipantRole::Customer => self.remote_customer,
            ParticipantRole::Agent => self.remote_agent,
        }
    }
}
