//! Session state shared by player and recorder kinds
//!
//! A session is the addressable unit behind one slot. The two kinds share
//! only status/focus bookkeeping, so they are a tagged variant over a
//! common `SessionCore` rather than a class hierarchy. The core's fields
//! are atomics: the hardware callback domain reads and transitions them
//! without ever taking the session mutex.

pub mod events;
pub mod focus;
pub mod slots;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::TimeSource;
use crate::player::PlayerEngine;
use crate::recorder::RecorderEngine;

use self::events::{EventSink, SessionEvent, Throttle};
use self::focus::InterruptionPolicy;

/// Which kind of engine a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Player,
    Recorder,
}

/// Player status, with stable wire ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Closed,
    Opened,
    Playing,
    Paused,
}

impl PlayerStatus {
    pub const fn code(self) -> u8 {
        match self {
            PlayerStatus::Closed => 0,
            PlayerStatus::Opened => 1,
            PlayerStatus::Playing => 2,
            PlayerStatus::Paused => 3,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PlayerStatus::Opened,
            2 => PlayerStatus::Playing,
            3 => PlayerStatus::Paused,
            _ => PlayerStatus::Closed,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PlayerStatus::Closed => "closed",
            PlayerStatus::Opened => "opened",
            PlayerStatus::Playing => "playing",
            PlayerStatus::Paused => "paused",
        }
    }
}

/// Recorder status, with stable wire ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStatus {
    Closed,
    Opened,
    Recording,
    Paused,
}

impl RecorderStatus {
    pub const fn code(self) -> u8 {
        match self {
            RecorderStatus::Closed => 0,
            RecorderStatus::Opened => 1,
            RecorderStatus::Recording => 2,
            RecorderStatus::Paused => 3,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => RecorderStatus::Opened,
            2 => RecorderStatus::Recording,
            3 => RecorderStatus::Paused,
            _ => RecorderStatus::Closed,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RecorderStatus::Closed => "closed",
            RecorderStatus::Opened => "opened",
            RecorderStatus::Recording => "recording",
            RecorderStatus::Paused => "paused",
        }
    }
}

/// Bookkeeping shared between the caller domain, the engine and the
/// hardware callback bridge.
///
/// Invariant: after `mark_closed`, no further events leave this session;
/// late callbacks observe the flag and are discarded.
pub struct SessionCore {
    slot_no: usize,
    kind: SessionKind,
    status: AtomicU8,
    has_focus: AtomicBool,
    closed: AtomicBool,
    focus_policy: AtomicU8,
    throttle: Throttle,
    events: EventSink,
    clock: Arc<dyn TimeSource>,
    epoch: Instant,
}

impl SessionCore {
    pub fn new(
        slot_no: usize,
        kind: SessionKind,
        events: EventSink,
        clock: Arc<dyn TimeSource>,
        subscription: Duration,
    ) -> Self {
        let epoch = clock.now();
        Self {
            slot_no,
            kind,
            status: AtomicU8::new(0),
            has_focus: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            focus_policy: AtomicU8::new(InterruptionPolicy::Pause.code()),
            throttle: Throttle::new(subscription),
            events,
            clock,
            epoch,
        }
    }

    pub fn slot_no(&self) -> usize {
        self.slot_no
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn status_code(&self) -> u8 {
        self.status.load(Ordering::SeqCst)
    }

    pub fn set_status_code(&self, code: u8) {
        self.status.store(code, Ordering::SeqCst);
    }

    pub fn has_focus(&self) -> bool {
        self.has_focus.load(Ordering::SeqCst)
    }

    pub fn grant_focus(&self) {
        self.has_focus.store(true, Ordering::SeqCst);
    }

    /// Clear the focus flag, reporting whether it was held.
    pub fn take_focus(&self) -> bool {
        self.has_focus.swap(false, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn focus_policy(&self) -> InterruptionPolicy {
        InterruptionPolicy::from_code(self.focus_policy.load(Ordering::SeqCst))
    }

    pub fn set_focus_policy(&self, policy: InterruptionPolicy) {
        self.focus_policy.store(policy.code(), Ordering::SeqCst);
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Milliseconds on the session clock since the session was created.
    pub fn now_ms(&self) -> u64 {
        self.clock.now().duration_since(self.epoch).as_millis() as u64
    }

    /// Emit an event toward the caller, unless the session already closed.
    pub fn emit(&self, event: SessionEvent) {
        if self.is_closed() {
            return;
        }
        self.events
            .emit(self.slot_no, self.status_code() as i32, event);
    }
}

/// One open session: the kind discriminant plus its engine.
pub enum Session {
    Player(PlayerEngine),
    Recorder(RecorderEngine),
}

impl Session {
    pub fn core(&self) -> &Arc<SessionCore> {
        match self {
            Session::Player(engine) => engine.core(),
            Session::Recorder(engine) => engine.core(),
        }
    }

    /// Cooperatively give up focus ahead of another session's grant.
    pub fn yield_focus(&mut self, policy: InterruptionPolicy) {
        match self {
            Session::Player(engine) => engine.yield_focus(policy),
            Session::Recorder(engine) => engine.yield_focus(policy),
        }
    }

    /// Best-effort teardown; always succeeds.
    pub fn close(&mut self) {
        match self {
            Session::Player(engine) => engine.close(),
            Session::Recorder(engine) => engine.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ManualTimeSource;

    fn test_core() -> (SessionCore, tokio::sync::mpsc::UnboundedReceiver<events::EventEnvelope>) {
        let (sink, rx) = EventSink::channel();
        let clock = Arc::new(ManualTimeSource::new());
        let core = SessionCore::new(
            0,
            SessionKind::Player,
            sink,
            clock,
            Duration::from_millis(0),
        );
        (core, rx)
    }

    #[test]
    fn test_status_ordinals_are_stable() {
        assert_eq!(PlayerStatus::Closed.code(), 0);
        assert_eq!(PlayerStatus::Opened.code(), 1);
        assert_eq!(PlayerStatus::Playing.code(), 2);
        assert_eq!(PlayerStatus::Paused.code(), 3);
        assert_eq!(RecorderStatus::Recording.code(), 2);
        assert_eq!(
            PlayerStatus::from_code(PlayerStatus::Paused.code()),
            PlayerStatus::Paused
        );
        assert_eq!(RecorderStatus::from_code(99), RecorderStatus::Closed);
    }

    #[test]
    fn test_focus_flag_roundtrip() {
        let (core, _rx) = test_core();
        assert!(!core.has_focus());
        core.grant_focus();
        assert!(core.take_focus());
        assert!(!core.take_focus());
    }

    #[test]
    fn test_emit_after_close_is_discarded() {
        let (core, mut rx) = test_core();
        core.emit(SessionEvent::PlayerFinished { success: true });
        assert!(rx.try_recv().is_ok());

        core.mark_closed();
        core.emit(SessionEvent::PlayerFinished { success: true });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_default_focus_policy_is_pause() {
        let (core, _rx) = test_core();
        assert_eq!(core.focus_policy(), InterruptionPolicy::Pause);
        core.set_focus_policy(InterruptionPolicy::Stop);
        assert_eq!(core.focus_policy(), InterruptionPolicy::Stop);
    }
}
