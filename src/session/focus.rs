//! Audio focus arbiter
//!
//! Tracks the single session allowed to drive the device's physical audio
//! path. Granting focus to a new session first asks the current holder to
//! yield: a cooperative preemption that pauses (or stops, per policy) the
//! holder before the grant completes. At most one grant is outstanding
//! system-wide, across both session kinds.
//!
//! Lock order: the arbiter mutex is taken before any session mutex, and no
//! caller may hold a session mutex while calling in here.

use std::sync::{Mutex, Weak};

use log::{debug, warn};

use crate::error::SessionError;

use super::{Session, SessionKind};

/// How a current focus holder is interrupted when it loses focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptionPolicy {
    /// Pause the holder's engine; stop it only if it cannot pause.
    #[default]
    Pause,
    /// Stop the holder's engine outright.
    Stop,
}

impl InterruptionPolicy {
    pub const fn code(self) -> u8 {
        match self {
            InterruptionPolicy::Pause => 0,
            InterruptionPolicy::Stop => 1,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => InterruptionPolicy::Stop,
            _ => InterruptionPolicy::Pause,
        }
    }
}

/// Reference to the session a grant was issued to.
///
/// The arbiter keeps only a weak handle; a closed session simply fails to
/// upgrade and its stale grant is overwritten.
pub struct HolderRef {
    pub kind: SessionKind,
    pub slot_no: usize,
    pub session: Weak<Mutex<Session>>,
}

pub struct FocusArbiter {
    holder: Mutex<Option<HolderRef>>,
}

impl FocusArbiter {
    pub fn new() -> Self {
        Self {
            holder: Mutex::new(None),
        }
    }

    /// Grant focus to `requester`, preempting the current holder first.
    ///
    /// Preemption is cooperative: the holder's engine is paused (or
    /// stopped, per `policy`) and its focus flag cleared before the new
    /// grant is recorded. Re-requesting focus already held is a no-op.
    ///
    /// # Returns
    /// Whether the grant was issued. Grants are never refused here; the
    /// boolean mirrors the request/grant boundary shape.
    pub fn acquire(
        &self,
        requester: HolderRef,
        policy: InterruptionPolicy,
    ) -> Result<bool, SessionError> {
        let mut holder = self.holder.lock().map_err(|_| SessionError::LockPoisoned {
            component: "focus_arbiter",
        })?;

        if let Some(current) = holder.as_ref() {
            if current.kind == requester.kind && current.slot_no == requester.slot_no {
                return Ok(true);
            }
            if let Some(session) = current.session.upgrade() {
                debug!(
                    "revoking focus from {:?} slot {} for {:?} slot {}",
                    current.kind, current.slot_no, requester.kind, requester.slot_no
                );
                match session.lock() {
                    Ok(mut session) => session.yield_focus(policy),
                    Err(_) => warn!(
                        "focus holder slot {} mutex poisoned during revocation",
                        current.slot_no
                    ),
                }
            }
        }

        *holder = Some(requester);
        Ok(true)
    }

    /// Clear focus if held by this slot; no-op otherwise.
    pub fn release(&self, kind: SessionKind, slot_no: usize) {
        if let Ok(mut holder) = self.holder.lock() {
            let matches = holder
                .as_ref()
                .is_some_and(|h| h.kind == kind && h.slot_no == slot_no);
            if matches {
                debug!("released focus from {:?} slot {}", kind, slot_no);
                *holder = None;
            }
        }
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<(SessionKind, usize)> {
        self.holder
            .lock()
            .ok()
            .and_then(|h| h.as_ref().map(|h| (h.kind, h.slot_no)))
    }
}

impl Default for FocusArbiter {
    fn default() -> Self {
        Self::new()
    }
}
