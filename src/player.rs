//! Player engine
//!
//! State machine wrapping one player device:
//! Closed → Opened → Playing ⇄ Paused → Closed. Engine methods run in the
//! caller domain under the session mutex and never touch the focus
//! arbiter; the callback bridge runs in the hardware domain and touches
//! only shared atomics, the event sink and the arbiter's release path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::device::{AudioBackend, AudioSource, Codec, PlayerCallback, PlayerDevice};
use crate::error::SessionError;
use crate::session::events::SessionEvent;
use crate::session::focus::{FocusArbiter, InterruptionPolicy};
use crate::session::{PlayerStatus, SessionCore};

/// State shared between the engine and its callback bridge.
pub struct PlayerShared {
    core: Arc<SessionCore>,
    position_ms: AtomicU64,
    duration_ms: AtomicU64,
    finished_emitted: AtomicBool,
}

impl PlayerShared {
    fn new(core: Arc<SessionCore>) -> Self {
        Self {
            core,
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
            finished_emitted: AtomicBool::new(false),
        }
    }
}

/// Callback bridge handed to the player device at open time.
///
/// Owned by the hardware adapter; invocations after `close` observe the
/// closed flag and are discarded.
struct PlayerCallbackBridge {
    shared: Arc<PlayerShared>,
    focus: Arc<FocusArbiter>,
}

impl PlayerCallback for PlayerCallbackBridge {
    fn on_progress(&mut self, position: Duration, duration: Duration) {
        let core = &self.shared.core;
        if core.is_closed() {
            return;
        }

        self.shared
            .position_ms
            .store(position.as_millis() as u64, Ordering::Relaxed);
        self.shared
            .duration_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);

        if core.status_code() != PlayerStatus::Playing.code() {
            return;
        }
        if !core.throttle().ready(core.now_ms()) {
            return;
        }
        core.emit(SessionEvent::Progress {
            position_ms: position.as_millis() as u64,
            duration_ms: duration.as_millis() as u64,
            peak_db: None,
        });
    }

    fn on_finished(&mut self, success: bool) {
        let core = &self.shared.core;
        if core.is_closed() {
            return;
        }
        // One terminal event per started playback.
        if self.shared.finished_emitted.swap(true, Ordering::SeqCst) {
            return;
        }

        core.set_status_code(PlayerStatus::Opened.code());
        if core.take_focus() {
            self.focus.release(core.kind(), core.slot_no());
            core.emit(SessionEvent::FocusChanged { has_focus: false });
        }
        core.emit(SessionEvent::PlayerFinished { success });
    }
}

pub struct PlayerEngine {
    shared: Arc<PlayerShared>,
    focus: Arc<FocusArbiter>,
    device: Option<Box<dyn PlayerDevice>>,
    source: Option<AudioSource>,
    staged_volume: Option<f64>,
    staged_speed: Option<f64>,
}

impl PlayerEngine {
    pub fn new(core: Arc<SessionCore>, focus: Arc<FocusArbiter>) -> Self {
        Self {
            shared: Arc::new(PlayerShared::new(core)),
            focus,
            device: None,
            source: None,
            staged_volume: None,
            staged_speed: None,
        }
    }

    pub fn core(&self) -> &Arc<SessionCore> {
        &self.shared.core
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus::from_code(self.shared.core.status_code())
    }

    fn device_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Box<dyn PlayerDevice>, SessionError> {
        let status = self.status();
        self.device
            .as_mut()
            .ok_or_else(|| SessionError::invalid_state(operation, status.name()))
    }

    /// Open the player device for this slot.
    ///
    /// # Errors
    /// `AlreadyOpen` if called twice without an intervening close;
    /// device open failures from the backend.
    pub fn open(&mut self, backend: &dyn AudioBackend) -> Result<(), SessionError> {
        if self.status() != PlayerStatus::Closed {
            return Err(SessionError::AlreadyOpen {
                slot_no: self.shared.core.slot_no(),
            });
        }
        let bridge = PlayerCallbackBridge {
            shared: Arc::clone(&self.shared),
            focus: Arc::clone(&self.focus),
        };
        let device = backend.open_player(Box::new(bridge))?;
        self.device = Some(device);
        self.shared.core.set_status_code(PlayerStatus::Opened.code());
        Ok(())
    }

    /// Start (or restart) playback of `source`.
    ///
    /// Staged volume/speed from a previous non-playing state are applied
    /// once the device is running.
    ///
    /// # Errors
    /// `UnsupportedCodec`; `InvalidState` outside Opened/Paused.
    pub fn start(&mut self, source: AudioSource, codec: Codec) -> Result<(), SessionError> {
        let status = self.status();
        if !matches!(status, PlayerStatus::Opened | PlayerStatus::Paused) {
            return Err(SessionError::invalid_state("startPlayer", status.name()));
        }
        let staged_volume = self.staged_volume;
        let staged_speed = self.staged_speed;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SessionError::invalid_state("startPlayer", status.name()))?;

        if !device.is_codec_supported(codec) {
            return Err(SessionError::UnsupportedCodec { codec });
        }
        device.start(&source, codec)?;

        if let Some(volume) = staged_volume {
            device.set_volume(volume);
        }
        if let Some(speed) = staged_speed {
            device.set_speed(speed);
        }
        let duration = device.duration();

        self.staged_volume = None;
        self.staged_speed = None;
        if let Some(duration) = duration {
            self.shared
                .duration_ms
                .store(duration.as_millis() as u64, Ordering::Relaxed);
        }
        self.shared.position_ms.store(0, Ordering::Relaxed);
        self.shared.finished_emitted.store(false, Ordering::SeqCst);
        self.source = Some(source);

        let core = &self.shared.core;
        core.throttle().reset(core.now_ms());
        core.set_status_code(PlayerStatus::Playing.code());
        Ok(())
    }

    /// # Errors
    /// `InvalidState` outside Playing.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        let status = self.status();
        if status != PlayerStatus::Playing {
            return Err(SessionError::invalid_state("pausePlayer", status.name()));
        }
        self.device_mut("pausePlayer")?.pause()?;
        self.shared.core.set_status_code(PlayerStatus::Paused.code());
        Ok(())
    }

    /// # Errors
    /// `InvalidState` outside Paused.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        let status = self.status();
        if status != PlayerStatus::Paused {
            return Err(SessionError::invalid_state("resumePlayer", status.name()));
        }
        self.device_mut("resumePlayer")?.resume()?;
        self.shared.core.set_status_code(PlayerStatus::Playing.code());
        Ok(())
    }

    /// Stop playback and return to Opened. Idempotent; focus release is
    /// the manager's follow-up.
    pub fn stop(&mut self) {
        match self.status() {
            PlayerStatus::Playing | PlayerStatus::Paused => {
                if let Some(device) = self.device.as_mut() {
                    device.stop();
                }
                self.shared.core.set_status_code(PlayerStatus::Opened.code());
            }
            PlayerStatus::Opened | PlayerStatus::Closed => {}
        }
    }

    /// Seek within the current source, clamped to `[0, duration]`.
    ///
    /// # Errors
    /// `InvalidState` unless Playing or Paused.
    pub fn seek(&mut self, position: Duration) -> Result<(), SessionError> {
        let status = self.status();
        if !matches!(status, PlayerStatus::Playing | PlayerStatus::Paused) {
            return Err(SessionError::invalid_state("seekToPlayer", status.name()));
        }

        let duration_ms = self.shared.duration_ms.load(Ordering::Relaxed);
        let mut target_ms = position.as_millis() as u64;
        if duration_ms > 0 {
            target_ms = target_ms.min(duration_ms);
        }
        let target = Duration::from_millis(target_ms);

        self.device_mut("seekToPlayer")?.seek(target)?;
        self.shared.position_ms.store(target_ms, Ordering::Relaxed);
        Ok(())
    }

    /// Apply immediately while Playing, otherwise stage for the next start.
    pub fn set_volume(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        if self.status() == PlayerStatus::Playing {
            if let Some(device) = self.device.as_mut() {
                device.set_volume(volume);
                return;
            }
        }
        self.staged_volume = Some(volume);
    }

    /// Apply immediately while Playing, otherwise stage for the next start.
    pub fn set_speed(&mut self, speed: f64) {
        let speed = speed.max(0.0);
        if self.status() == PlayerStatus::Playing {
            if let Some(device) = self.device.as_mut() {
                device.set_speed(speed);
                return;
            }
        }
        self.staged_speed = Some(speed);
    }

    /// Push PCM into a running `Stream` source.
    ///
    /// # Errors
    /// `InvalidState` unless Playing from a `Stream` source.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let status = self.status();
        if status != PlayerStatus::Playing || !matches!(self.source, Some(AudioSource::Stream)) {
            return Err(SessionError::invalid_state("feed", status.name()));
        }
        self.device_mut("feed")?.feed(bytes)
    }

    /// Last known playback position and source duration.
    pub fn progress(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.shared.position_ms.load(Ordering::Relaxed)),
            Duration::from_millis(self.shared.duration_ms.load(Ordering::Relaxed)),
        )
    }

    /// # Errors
    /// `InvalidState` before the device is open.
    pub fn is_codec_supported(&self, codec: Codec) -> Result<bool, SessionError> {
        let status = self.status();
        self.device
            .as_ref()
            .map(|device| device.is_codec_supported(codec))
            .ok_or_else(|| SessionError::invalid_state("isDecoderSupported", status.name()))
    }

    /// Cooperatively give up focus to another session.
    pub fn yield_focus(&mut self, policy: InterruptionPolicy) {
        if self.status() == PlayerStatus::Playing {
            let paused = match policy {
                InterruptionPolicy::Pause => self
                    .device
                    .as_mut()
                    .map(|device| device.pause().is_ok())
                    .unwrap_or(false),
                InterruptionPolicy::Stop => false,
            };
            if paused {
                self.shared.core.set_status_code(PlayerStatus::Paused.code());
            } else {
                if let Some(device) = self.device.as_mut() {
                    device.stop();
                }
                self.shared.core.set_status_code(PlayerStatus::Opened.code());
            }
        }
        if self.shared.core.take_focus() {
            self.shared
                .core
                .emit(SessionEvent::FocusChanged { has_focus: false });
        }
    }

    /// Best-effort teardown. Tolerates being called while hardware
    /// callbacks are still in flight.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
        let core = &self.shared.core;
        core.mark_closed();
        core.set_status_code(PlayerStatus::Closed.code());
        self.source = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ManualTimeSource, StubBackend};
    use crate::session::events::{EventEnvelope, EventSink};
    use crate::session::SessionKind;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: PlayerEngine,
        backend: Arc<StubBackend>,
        clock: Arc<ManualTimeSource>,
        rx: UnboundedReceiver<EventEnvelope>,
    }

    fn open_engine() -> Fixture {
        let (sink, rx) = EventSink::channel();
        let clock = Arc::new(ManualTimeSource::new());
        let core = Arc::new(SessionCore::new(
            0,
            SessionKind::Player,
            sink,
            Arc::clone(&clock) as Arc<dyn crate::device::TimeSource>,
            Duration::ZERO,
        ));
        let backend = Arc::new(StubBackend::new());
        let mut engine = PlayerEngine::new(core, Arc::new(FocusArbiter::new()));
        engine.open(backend.as_ref()).unwrap();
        Fixture {
            engine,
            backend,
            clock,
            rx,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<EventEnvelope>) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope);
        }
        events
    }

    #[test]
    fn test_open_twice_fails_already_open() {
        let mut fixture = open_engine();
        match fixture.engine.open(fixture.backend.as_ref()) {
            Err(SessionError::AlreadyOpen { slot_no }) => assert_eq!(slot_no, 0),
            other => panic!("expected AlreadyOpen, got {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut fixture = open_engine();
        assert_eq!(fixture.engine.status(), PlayerStatus::Opened);

        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();
        assert_eq!(fixture.engine.status(), PlayerStatus::Playing);

        fixture.engine.pause().unwrap();
        assert_eq!(fixture.engine.status(), PlayerStatus::Paused);

        fixture.engine.resume().unwrap();
        assert_eq!(fixture.engine.status(), PlayerStatus::Playing);

        fixture.engine.stop();
        assert_eq!(fixture.engine.status(), PlayerStatus::Opened);
        // Idempotent.
        fixture.engine.stop();
        assert_eq!(fixture.engine.status(), PlayerStatus::Opened);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut fixture = open_engine();

        assert!(matches!(
            fixture.engine.pause(),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            fixture.engine.resume(),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            fixture.engine.seek(Duration::from_secs(1)),
            Err(SessionError::InvalidState { .. })
        ));

        fixture
            .engine
            .start(AudioSource::Stream, Codec::Pcm16)
            .unwrap();
        assert!(matches!(
            fixture.engine.resume(),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_unsupported_codec_rejected() {
        let mut fixture = open_engine();
        fixture.backend.reject_codec(Codec::Flac);
        match fixture
            .engine
            .start(AudioSource::File("take.flac".into()), Codec::Flac)
        {
            Err(SessionError::UnsupportedCodec { codec }) => assert_eq!(codec, Codec::Flac),
            other => panic!("expected UnsupportedCodec, got {:?}", other),
        }
        assert_eq!(fixture.engine.status(), PlayerStatus::Opened);
    }

    #[test]
    fn test_staged_volume_and_speed_apply_on_start() {
        let mut fixture = open_engine();
        fixture.engine.set_volume(0.25);
        fixture.engine.set_speed(1.5);

        let handle = fixture.backend.player(0).unwrap();
        assert_eq!(handle.volume(), 1.0);

        fixture
            .engine
            .start(AudioSource::Buffer(vec![0, 1, 2]), Codec::Pcm16)
            .unwrap();
        assert_eq!(handle.volume(), 0.25);
        assert_eq!(handle.speed(), 1.5);
    }

    #[test]
    fn test_volume_applied_immediately_while_playing() {
        let mut fixture = open_engine();
        fixture
            .engine
            .start(AudioSource::Stream, Codec::Pcm16)
            .unwrap();
        fixture.engine.set_volume(0.5);
        assert_eq!(fixture.backend.player(0).unwrap().volume(), 0.5);
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let mut fixture = open_engine();
        let handle = fixture.backend.player(0).unwrap();
        handle.set_duration(Duration::from_secs(10));

        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();
        fixture.engine.seek(Duration::from_secs(99)).unwrap();
        assert_eq!(handle.last_seek(), Duration::from_secs(10));

        fixture.engine.seek(Duration::from_secs(4)).unwrap();
        assert_eq!(handle.last_seek(), Duration::from_secs(4));
    }

    #[test]
    fn test_feed_requires_playing_stream_source() {
        let mut fixture = open_engine();
        assert!(matches!(
            fixture.engine.feed(&[1, 2, 3]),
            Err(SessionError::InvalidState { .. })
        ));

        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();
        assert!(matches!(
            fixture.engine.feed(&[1, 2, 3]),
            Err(SessionError::InvalidState { .. })
        ));

        fixture.engine.stop();
        fixture
            .engine
            .start(AudioSource::Stream, Codec::Pcm16)
            .unwrap();
        fixture.engine.feed(&[1, 2, 3]).unwrap();
        assert_eq!(fixture.backend.player(0).unwrap().fed_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn test_progress_events_throttled() {
        let mut fixture = open_engine();
        fixture
            .engine
            .core()
            .throttle()
            .set_interval(Duration::from_millis(500));
        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();

        let handle = fixture.backend.player(0).unwrap();
        let total = Duration::from_secs(10);
        // Simulate 2.3s of playback with a 100ms hardware tick.
        for tick in 1..=23u64 {
            fixture.clock.advance(Duration::from_millis(100));
            handle.drive_progress(Duration::from_millis(tick * 100), total);
        }

        let events = drain(&mut fixture.rx);
        let positions: Vec<u64> = events
            .iter()
            .filter_map(|envelope| match envelope.event {
                SessionEvent::Progress { position_ms, .. } => Some(position_ms),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![500, 1000, 1500, 2000]);
    }

    #[test]
    fn test_progress_positions_monotonic_and_unthrottled_by_default() {
        let mut fixture = open_engine();
        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();

        let handle = fixture.backend.player(0).unwrap();
        for tick in 1..=5u64 {
            handle.drive_progress(Duration::from_millis(tick * 40), Duration::from_secs(1));
        }

        let events = drain(&mut fixture.rx);
        let positions: Vec<u64> = events
            .iter()
            .filter_map(|envelope| match envelope.event {
                SessionEvent::Progress { position_ms, .. } => Some(position_ms),
                _ => None,
            })
            .collect();
        assert_eq!(positions.len(), 5);
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_finished_emitted_exactly_once() {
        let mut fixture = open_engine();
        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();

        let handle = fixture.backend.player(0).unwrap();
        handle.finish(true);
        handle.finish(true);

        assert_eq!(fixture.engine.status(), PlayerStatus::Opened);
        let events = drain(&mut fixture.rx);
        let finished: Vec<&EventEnvelope> = events
            .iter()
            .filter(|envelope| matches!(envelope.event, SessionEvent::PlayerFinished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);

        // A later playback gets its own terminal event.
        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();
        handle.finish(false);
        let events = drain(&mut fixture.rx);
        assert!(events
            .iter()
            .any(|envelope| matches!(envelope.event, SessionEvent::PlayerFinished { success: false })));
    }

    #[test]
    fn test_callback_after_close_is_discarded() {
        let mut fixture = open_engine();
        fixture
            .engine
            .start(AudioSource::File("song.mp3".into()), Codec::Mp3)
            .unwrap();
        let handle = fixture.backend.player(0).unwrap();
        drain(&mut fixture.rx);

        fixture.engine.close();
        assert_eq!(fixture.engine.status(), PlayerStatus::Closed);

        handle.drive_progress(Duration::from_millis(100), Duration::from_secs(1));
        handle.finish(true);
        assert!(drain(&mut fixture.rx).is_empty());
    }
}
