//! Session managers
//!
//! One manager per kind resolves inbound slot-scoped calls to a session
//! and runs the matching engine operation. Focus coordination lives here:
//! operations that need exclusive hardware access ask the shared arbiter
//! before locking their own session, so the arbiter can preempt another
//! slot without lock-order inversions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::config::BridgeConfig;
use crate::device::{AudioBackend, AudioSource, Codec, TimeSource};
use crate::error::SessionError;
use crate::player::PlayerEngine;
use crate::recorder::RecorderEngine;
use crate::session::events::{EventSink, SessionEvent};
use crate::session::focus::{FocusArbiter, HolderRef, InterruptionPolicy};
use crate::session::slots::{SlotEntry, SlotTable};
use crate::session::{PlayerStatus, RecorderStatus, Session, SessionCore, SessionKind};

/// State common to both manager kinds.
struct ManagerInner {
    kind: SessionKind,
    slots: SlotTable,
    focus: Arc<FocusArbiter>,
    backend: Arc<dyn AudioBackend>,
    clock: Arc<dyn TimeSource>,
    events: EventSink,
    config: BridgeConfig,
}

impl ManagerInner {
    fn new(
        kind: SessionKind,
        focus: Arc<FocusArbiter>,
        backend: Arc<dyn AudioBackend>,
        clock: Arc<dyn TimeSource>,
        events: EventSink,
        config: BridgeConfig,
    ) -> Self {
        Self {
            kind,
            slots: SlotTable::new(config.slots.max_slots),
            focus,
            backend,
            clock,
            events,
            config,
        }
    }

    fn new_core(&self, slot_no: usize) -> Arc<SessionCore> {
        Arc::new(SessionCore::new(
            slot_no,
            self.kind,
            self.events.clone(),
            Arc::clone(&self.clock),
            Duration::from_millis(self.config.events.default_subscription_ms),
        ))
    }

    /// Grant focus to this slot, preempting any current holder first.
    fn acquire_focus(&self, entry: &SlotEntry) -> Result<bool, SessionError> {
        let requester = HolderRef {
            kind: self.kind,
            slot_no: entry.core.slot_no(),
            session: Arc::downgrade(&entry.session),
        };
        let granted = self.focus.acquire(requester, entry.core.focus_policy())?;
        if granted && !entry.core.has_focus() {
            entry.core.grant_focus();
            entry.core.emit(SessionEvent::FocusChanged { has_focus: true });
        }
        Ok(granted)
    }

    fn release_focus(&self, entry: &SlotEntry) {
        if entry.core.take_focus() {
            self.focus.release(self.kind, entry.core.slot_no());
            entry
                .core
                .emit(SessionEvent::FocusChanged { has_focus: false });
        }
    }

    /// Tear down a slot. Always succeeds; closing an unknown or already
    /// closed slot is a no-op.
    fn close_slot(&self, slot_no: usize) {
        let Ok(entry) = self.slots.lookup(slot_no) else {
            return;
        };
        if let Ok(mut session) = entry.session.lock() {
            session.close();
        }
        if entry.core.take_focus() {
            self.focus.release(self.kind, slot_no);
        }
        self.slots.free(slot_no);
        info!("closed {:?} slot {}", self.kind, slot_no);
    }

    fn set_subscription(&self, slot_no: usize, interval: Duration) -> Result<(), SessionError> {
        let entry = self.slots.lookup(slot_no)?;
        entry.core.throttle().set_interval(interval);
        Ok(())
    }

    fn request_focus(
        &self,
        slot_no: usize,
        policy: InterruptionPolicy,
    ) -> Result<bool, SessionError> {
        let entry = self.slots.lookup(slot_no)?;
        entry.core.set_focus_policy(policy);
        self.acquire_focus(&entry)
    }

    fn abandon_focus(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.slots.lookup(slot_no)?;
        self.release_focus(&entry);
        Ok(())
    }

    fn reset(&self) {
        for (slot_no, _) in self.slots.occupied() {
            self.close_slot(slot_no);
        }
    }

    fn lookup(&self, slot_no: usize) -> Result<SlotEntry, SessionError> {
        self.slots.lookup(slot_no)
    }
}

fn with_player<T>(
    entry: &SlotEntry,
    f: impl FnOnce(&mut PlayerEngine) -> Result<T, SessionError>,
) -> Result<T, SessionError> {
    let mut session = entry
        .session
        .lock()
        .map_err(|_| SessionError::LockPoisoned {
            component: "session",
        })?;
    match &mut *session {
        Session::Player(engine) => f(engine),
        Session::Recorder(_) => Err(SessionError::UnknownSlot {
            slot_no: entry.core.slot_no(),
        }),
    }
}

fn with_recorder<T>(
    entry: &SlotEntry,
    f: impl FnOnce(&mut RecorderEngine) -> Result<T, SessionError>,
) -> Result<T, SessionError> {
    let mut session = entry
        .session
        .lock()
        .map_err(|_| SessionError::LockPoisoned {
            component: "session",
        })?;
    match &mut *session {
        Session::Recorder(engine) => f(engine),
        Session::Player(_) => Err(SessionError::UnknownSlot {
            slot_no: entry.core.slot_no(),
        }),
    }
}

/// Process-wide player manager.
pub struct PlayerManager {
    inner: ManagerInner,
}

impl PlayerManager {
    pub(crate) fn new(
        focus: Arc<FocusArbiter>,
        backend: Arc<dyn AudioBackend>,
        clock: Arc<dyn TimeSource>,
        events: EventSink,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: ManagerInner::new(SessionKind::Player, focus, backend, clock, events, config),
        }
    }

    /// Open a new player session on the lowest free slot.
    ///
    /// # Errors
    /// `CapacityExceeded`; device open failures, in which case no slot is
    /// consumed.
    pub fn open(&self) -> Result<usize, SessionError> {
        let inner = &self.inner;
        let (slot_no, entry) = inner.slots.allocate(|slot_no| {
            let core = inner.new_core(slot_no);
            let engine = PlayerEngine::new(Arc::clone(&core), Arc::clone(&inner.focus));
            Ok((core, Session::Player(engine)))
        })?;

        if let Err(err) = with_player(&entry, |engine| engine.open(inner.backend.as_ref())) {
            inner.slots.free(slot_no);
            return Err(err);
        }
        info!("opened player slot {}", slot_no);
        Ok(slot_no)
    }

    /// Close the session and free the slot. Always succeeds; idempotent.
    pub fn close(&self, slot_no: usize) {
        self.inner.close_slot(slot_no);
    }

    /// Start playback, acquiring focus first.
    pub fn start(
        &self,
        slot_no: usize,
        source: AudioSource,
        codec: Codec,
    ) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        let had_focus = entry.core.has_focus();
        self.inner.acquire_focus(&entry)?;

        let result = with_player(&entry, |engine| engine.start(source, codec));
        if result.is_err() && !had_focus {
            // A session that failed to start does not keep a fresh grant.
            self.inner.release_focus(&entry);
        }
        result
    }

    /// Stop playback, returning the session to Opened and releasing focus.
    pub fn stop(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| {
            engine.stop();
            Ok(())
        })?;
        self.inner.release_focus(&entry);
        Ok(())
    }

    pub fn pause(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| engine.pause())
    }

    /// Resume playback, re-acquiring focus (a preempted session lost it).
    pub fn resume(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        let had_focus = entry.core.has_focus();
        self.inner.acquire_focus(&entry)?;

        let result = with_player(&entry, |engine| engine.resume());
        if result.is_err() && !had_focus {
            self.inner.release_focus(&entry);
        }
        result
    }

    pub fn seek(&self, slot_no: usize, position: Duration) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| engine.seek(position))
    }

    pub fn set_volume(&self, slot_no: usize, volume: f64) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| {
            engine.set_volume(volume);
            Ok(())
        })
    }

    pub fn set_speed(&self, slot_no: usize, speed: f64) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| {
            engine.set_speed(speed);
            Ok(())
        })
    }

    /// Push PCM into a running `Stream` source.
    pub fn feed(&self, slot_no: usize, bytes: &[u8]) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| engine.feed(bytes))
    }

    /// Last known position and duration.
    pub fn get_progress(&self, slot_no: usize) -> Result<(Duration, Duration), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| Ok(engine.progress()))
    }

    pub fn is_decoder_supported(
        &self,
        slot_no: usize,
        codec: Codec,
    ) -> Result<bool, SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_player(&entry, |engine| engine.is_codec_supported(codec))
    }

    /// Current status, readable without the session mutex.
    pub fn get_state(&self, slot_no: usize) -> Result<PlayerStatus, SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        Ok(PlayerStatus::from_code(entry.core.status_code()))
    }

    pub fn set_subscription_duration(
        &self,
        slot_no: usize,
        interval: Duration,
    ) -> Result<(), SessionError> {
        self.inner.set_subscription(slot_no, interval)
    }

    /// Explicitly request focus with the given interruption policy.
    pub fn request_focus(
        &self,
        slot_no: usize,
        policy: InterruptionPolicy,
    ) -> Result<bool, SessionError> {
        self.inner.request_focus(slot_no, policy)
    }

    /// Explicitly give up focus, if held.
    pub fn release_focus(&self, slot_no: usize) -> Result<(), SessionError> {
        self.inner.abandon_focus(slot_no)
    }

    /// Close every open slot.
    pub fn reset(&self) {
        self.inner.reset();
    }
}

/// Process-wide recorder manager.
pub struct RecorderManager {
    inner: ManagerInner,
}

impl RecorderManager {
    pub(crate) fn new(
        focus: Arc<FocusArbiter>,
        backend: Arc<dyn AudioBackend>,
        clock: Arc<dyn TimeSource>,
        events: EventSink,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: ManagerInner::new(SessionKind::Recorder, focus, backend, clock, events, config),
        }
    }

    /// Open a new recorder session on the lowest free slot.
    ///
    /// # Errors
    /// `CapacityExceeded`; device open failures, in which case no slot is
    /// consumed.
    pub fn open(&self) -> Result<usize, SessionError> {
        let inner = &self.inner;
        let (slot_no, entry) = inner.slots.allocate(|slot_no| {
            let core = inner.new_core(slot_no);
            Ok((Arc::clone(&core), Session::Recorder(RecorderEngine::new(core))))
        })?;

        if let Err(err) = with_recorder(&entry, |engine| {
            engine.open(inner.backend.as_ref(), &inner.config.capture)
        }) {
            inner.slots.free(slot_no);
            return Err(err);
        }
        info!("opened recorder slot {}", slot_no);
        Ok(slot_no)
    }

    /// Close the session and free the slot. Always succeeds; idempotent.
    pub fn close(&self, slot_no: usize) {
        self.inner.close_slot(slot_no);
    }

    /// Start recording, acquiring focus first. `destination: None` selects
    /// streaming mode.
    pub fn start(
        &self,
        slot_no: usize,
        destination: Option<PathBuf>,
        codec: Codec,
    ) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        let had_focus = entry.core.has_focus();
        self.inner.acquire_focus(&entry)?;

        let result = with_recorder(&entry, |engine| engine.start(destination, codec));
        if result.is_err() && !had_focus {
            self.inner.release_focus(&entry);
        }
        result
    }

    /// Stop recording, returning the session to Opened and releasing focus.
    pub fn stop(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_recorder(&entry, |engine| {
            engine.stop();
            Ok(())
        })?;
        self.inner.release_focus(&entry);
        Ok(())
    }

    pub fn pause(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_recorder(&entry, |engine| engine.pause())
    }

    /// Resume recording, re-acquiring focus (a preempted session lost it).
    pub fn resume(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        let had_focus = entry.core.has_focus();
        self.inner.acquire_focus(&entry)?;

        let result = with_recorder(&entry, |engine| engine.resume());
        if result.is_err() && !had_focus {
            self.inner.release_focus(&entry);
        }
        result
    }

    /// Delete the recorded file of an idle session.
    pub fn delete_record(&self, slot_no: usize) -> Result<(), SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_recorder(&entry, |engine| engine.delete_record())
    }

    /// Destination of the last file-mode recording, if any.
    pub fn get_record_url(&self, slot_no: usize) -> Result<Option<PathBuf>, SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_recorder(&entry, |engine| Ok(engine.record_url()))
    }

    pub fn is_encoder_supported(
        &self,
        slot_no: usize,
        codec: Codec,
    ) -> Result<bool, SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        with_recorder(&entry, |engine| engine.is_codec_supported(codec))
    }

    /// Current status, readable without the session mutex.
    pub fn get_state(&self, slot_no: usize) -> Result<RecorderStatus, SessionError> {
        let entry = self.inner.lookup(slot_no)?;
        Ok(RecorderStatus::from_code(entry.core.status_code()))
    }

    pub fn set_subscription_duration(
        &self,
        slot_no: usize,
        interval: Duration,
    ) -> Result<(), SessionError> {
        self.inner.set_subscription(slot_no, interval)
    }

    /// Explicitly request focus with the given interruption policy.
    pub fn request_focus(
        &self,
        slot_no: usize,
        policy: InterruptionPolicy,
    ) -> Result<bool, SessionError> {
        self.inner.request_focus(slot_no, policy)
    }

    /// Explicitly give up focus, if held.
    pub fn release_focus(&self, slot_no: usize) -> Result<(), SessionError> {
        self.inner.abandon_focus(slot_no)
    }

    /// Close every open slot.
    pub fn reset(&self) {
        self.inner.reset();
    }
}
