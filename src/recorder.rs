//! Recorder engine
//!
//! State machine wrapping one recorder device:
//! Closed → Opened → Recording ⇄ Paused → Closed. Recording goes either to
//! a destination file or, with no destination, into streaming mode where
//! captured buffers are forwarded to the caller.
//!
//! The capture path is the one real-time-critical producer in the crate:
//! `on_data` runs on the hardware thread and only pushes into a bounded
//! lock-free SPSC ring. A per-session pump thread in the caller domain
//! drains the ring and emits ordered `recordingData` events; when the ring
//! is full the incoming chunk is shed and counted rather than blocking.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::config::CaptureConfig;
use crate::device::{AudioBackend, Codec, RecorderCallback, RecorderDevice};
use crate::error::SessionError;
use crate::session::events::SessionEvent;
use crate::session::focus::InterruptionPolicy;
use crate::session::{RecorderStatus, SessionCore};

/// State shared between the engine, its callback bridge and the pump.
pub struct RecorderShared {
    core: Arc<SessionCore>,
    streaming: AtomicBool,
    shed_chunks: AtomicU64,
    started_ms: AtomicU64,
    paused_elapsed_ms: AtomicU64,
}

impl RecorderShared {
    fn new(core: Arc<SessionCore>) -> Self {
        Self {
            core,
            streaming: AtomicBool::new(false),
            shed_chunks: AtomicU64::new(0),
            started_ms: AtomicU64::new(0),
            paused_elapsed_ms: AtomicU64::new(0),
        }
    }

    /// Elapsed recording time on the session clock, net of pauses.
    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        match RecorderStatus::from_code(self.core.status_code()) {
            RecorderStatus::Recording => {
                now_ms.saturating_sub(self.started_ms.load(Ordering::Relaxed))
            }
            RecorderStatus::Paused => self.paused_elapsed_ms.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    fn note_started(&self, now_ms: u64) {
        self.started_ms.store(now_ms, Ordering::Relaxed);
        self.paused_elapsed_ms.store(0, Ordering::Relaxed);
    }

    fn note_paused(&self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.started_ms.load(Ordering::Relaxed));
        self.paused_elapsed_ms.store(elapsed, Ordering::Relaxed);
    }

    fn note_resumed(&self, now_ms: u64) {
        let paused_elapsed = self.paused_elapsed_ms.load(Ordering::Relaxed);
        self.started_ms
            .store(now_ms.saturating_sub(paused_elapsed), Ordering::Relaxed);
    }
}

/// Callback bridge handed to the recorder device at open time.
struct RecorderCallbackBridge {
    shared: Arc<RecorderShared>,
    producer: Producer<Vec<u8>>,
}

impl RecorderCallback for RecorderCallbackBridge {
    fn on_peak_level(&mut self, peak_db: f64) {
        let core = &self.shared.core;
        if core.is_closed() {
            return;
        }
        if core.status_code() != RecorderStatus::Recording.code() {
            return;
        }
        let now_ms = core.now_ms();
        if !core.throttle().ready(now_ms) {
            return;
        }
        let elapsed = self.shared.elapsed_ms(now_ms);
        core.emit(SessionEvent::Progress {
            position_ms: elapsed,
            duration_ms: elapsed,
            peak_db: Some(peak_db),
        });
    }

    fn on_data(&mut self, bytes: Vec<u8>) {
        let shared = &self.shared;
        if shared.core.is_closed() || !shared.streaming.load(Ordering::Relaxed) {
            return;
        }
        // Bounded hand-off; never block the hardware thread.
        if self.producer.push(bytes).is_err() {
            shared.shed_chunks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Drain captured chunks into the caller's event channel.
///
/// Runs until the session closes; chunks popped after close are dropped
/// without dispatch.
fn spawn_capture_pump(
    shared: Arc<RecorderShared>,
    mut consumer: Consumer<Vec<u8>>,
    idle: Duration,
) -> JoinHandle<()> {
    let slot_no = shared.core.slot_no();
    thread::Builder::new()
        .name(format!("capture-pump-{}", slot_no))
        .spawn(move || {
            let mut reported_shed = 0u64;
            loop {
                let mut drained = false;
                while let Ok(bytes) = consumer.pop() {
                    drained = true;
                    if shared.core.is_closed() {
                        continue;
                    }
                    shared.core.emit(SessionEvent::RecordingData { bytes });
                }

                let shed = shared.shed_chunks.load(Ordering::Relaxed);
                if shed > reported_shed {
                    warn!(
                        "recorder slot {} capture ring overflow, {} chunks shed",
                        slot_no,
                        shed - reported_shed
                    );
                    reported_shed = shed;
                }

                if shared.core.is_closed() {
                    break;
                }
                if !drained {
                    thread::sleep(idle);
                }
            }
        })
        .expect("failed to spawn capture pump thread")
}

pub struct RecorderEngine {
    shared: Arc<RecorderShared>,
    device: Option<Box<dyn RecorderDevice>>,
    destination: Option<PathBuf>,
    pump: Option<JoinHandle<()>>,
}

impl RecorderEngine {
    pub fn new(core: Arc<SessionCore>) -> Self {
        Self {
            shared: Arc::new(RecorderShared::new(core)),
            device: None,
            destination: None,
            pump: None,
        }
    }

    pub fn core(&self) -> &Arc<SessionCore> {
        &self.shared.core
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus::from_code(self.shared.core.status_code())
    }

    fn device_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Box<dyn RecorderDevice>, SessionError> {
        let status = self.status();
        self.device
            .as_mut()
            .ok_or_else(|| SessionError::invalid_state(operation, status.name()))
    }

    /// Open the recorder device and its capture pump.
    ///
    /// # Errors
    /// `AlreadyOpen` if called twice without an intervening close;
    /// device open failures from the backend.
    pub fn open(
        &mut self,
        backend: &dyn AudioBackend,
        capture: &CaptureConfig,
    ) -> Result<(), SessionError> {
        if self.status() != RecorderStatus::Closed {
            return Err(SessionError::AlreadyOpen {
                slot_no: self.shared.core.slot_no(),
            });
        }

        let (producer, consumer) = RingBuffer::new(capture.ring_capacity);
        let bridge = RecorderCallbackBridge {
            shared: Arc::clone(&self.shared),
            producer,
        };
        let device = backend.open_recorder(Box::new(bridge))?;

        self.pump = Some(spawn_capture_pump(
            Arc::clone(&self.shared),
            consumer,
            Duration::from_millis(capture.pump_idle_ms),
        ));
        self.device = Some(device);
        self.shared
            .core
            .set_status_code(RecorderStatus::Opened.code());
        Ok(())
    }

    /// Start recording to `destination`, or in streaming mode when none is
    /// given. The two modes are mutually exclusive per recording.
    ///
    /// # Errors
    /// `UnsupportedCodec`; `InvalidState` if not Opened.
    pub fn start(
        &mut self,
        destination: Option<PathBuf>,
        codec: Codec,
    ) -> Result<(), SessionError> {
        let status = self.status();
        if status != RecorderStatus::Opened {
            return Err(SessionError::invalid_state("startRecorder", status.name()));
        }
        let device = self.device_mut("startRecorder")?;

        if !device.is_codec_supported(codec) {
            return Err(SessionError::UnsupportedCodec { codec });
        }
        device.start(destination.as_deref(), codec)?;

        let streaming = destination.is_none();
        self.destination = destination;
        self.shared.streaming.store(streaming, Ordering::Relaxed);

        let core = &self.shared.core;
        let now_ms = core.now_ms();
        self.shared.note_started(now_ms);
        core.throttle().reset(now_ms);
        core.set_status_code(RecorderStatus::Recording.code());
        Ok(())
    }

    /// # Errors
    /// `InvalidState` outside Recording.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        let status = self.status();
        if status != RecorderStatus::Recording {
            return Err(SessionError::invalid_state("pauseRecorder", status.name()));
        }
        self.device_mut("pauseRecorder")?.pause()?;
        let now_ms = self.shared.core.now_ms();
        self.shared.note_paused(now_ms);
        self.shared
            .core
            .set_status_code(RecorderStatus::Paused.code());
        Ok(())
    }

    /// # Errors
    /// `InvalidState` outside Paused.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        let status = self.status();
        if status != RecorderStatus::Paused {
            return Err(SessionError::invalid_state("resumeRecorder", status.name()));
        }
        self.device_mut("resumeRecorder")?.resume()?;
        let now_ms = self.shared.core.now_ms();
        self.shared.note_resumed(now_ms);
        self.shared
            .core
            .set_status_code(RecorderStatus::Recording.code());
        Ok(())
    }

    /// Stop the recording and return to Opened. Idempotent; focus release
    /// is the manager's follow-up.
    pub fn stop(&mut self) {
        match self.status() {
            RecorderStatus::Recording | RecorderStatus::Paused => {
                if let Some(device) = self.device.as_mut() {
                    device.stop();
                }
                self.shared.streaming.store(false, Ordering::Relaxed);
                self.shared
                    .core
                    .set_status_code(RecorderStatus::Opened.code());
            }
            RecorderStatus::Opened | RecorderStatus::Closed => {}
        }
    }

    /// Delete the recorded file.
    ///
    /// # Errors
    /// `InvalidState` while Recording/Paused; `NotFound` if the last
    /// recording was streaming-mode or the file is already gone.
    pub fn delete_record(&mut self) -> Result<(), SessionError> {
        let status = self.status();
        if matches!(status, RecorderStatus::Recording | RecorderStatus::Paused) {
            return Err(SessionError::invalid_state("deleteRecord", status.name()));
        }

        let path = self.destination.clone().ok_or_else(|| SessionError::NotFound {
            detail: "no recorded file for this session".to_string(),
        })?;

        match fs::remove_file(&path) {
            Ok(()) => {
                self.destination = None;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(SessionError::NotFound {
                detail: path.display().to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Destination of the last file-mode recording, if any.
    pub fn record_url(&self) -> Option<PathBuf> {
        self.destination.clone()
    }

    /// # Errors
    /// `InvalidState` before the device is open.
    pub fn is_codec_supported(&self, codec: Codec) -> Result<bool, SessionError> {
        let status = self.status();
        self.device
            .as_ref()
            .map(|device| device.is_codec_supported(codec))
            .ok_or_else(|| SessionError::invalid_state("isEncoderSupported", status.name()))
    }

    /// Cooperatively give up focus to another session.
    pub fn yield_focus(&mut self, policy: InterruptionPolicy) {
        if self.status() == RecorderStatus::Recording {
            let paused = match policy {
                InterruptionPolicy::Pause => self
                    .device
                    .as_mut()
                    .map(|device| device.pause().is_ok())
                    .unwrap_or(false),
                InterruptionPolicy::Stop => false,
            };
            if paused {
                let now_ms = self.shared.core.now_ms();
                self.shared.note_paused(now_ms);
                self.shared
                    .core
                    .set_status_code(RecorderStatus::Paused.code());
            } else {
                if let Some(device) = self.device.as_mut() {
                    device.stop();
                }
                self.shared.streaming.store(false, Ordering::Relaxed);
                self.shared
                    .core
                    .set_status_code(RecorderStatus::Opened.code());
            }
        }
        if self.shared.core.take_focus() {
            self.shared
                .core
                .emit(SessionEvent::FocusChanged { has_focus: false });
        }
    }

    /// Best-effort teardown. Tolerates being called while hardware
    /// callbacks are still in flight; the pump drains and exits.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
        let core = &self.shared.core;
        core.mark_closed();
        core.set_status_code(RecorderStatus::Closed.code());
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("capture pump for slot {} panicked", core.slot_no());
            }
        }
    }
}

impl Drop for RecorderEngine {
    fn drop(&mut self) {
        // The pump thread must not outlive the engine.
        if self.pump.is_some() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ManualTimeSource, StubBackend, TimeSource};
    use crate::session::events::{EventEnvelope, EventSink};
    use crate::session::SessionKind;
    use std::time::Instant;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: RecorderEngine,
        backend: Arc<StubBackend>,
        clock: Arc<ManualTimeSource>,
        rx: UnboundedReceiver<EventEnvelope>,
    }

    fn open_engine() -> Fixture {
        open_engine_with_capture(&CaptureConfig::default())
    }

    fn open_engine_with_capture(capture: &CaptureConfig) -> Fixture {
        let (sink, rx) = EventSink::channel();
        let clock = Arc::new(ManualTimeSource::new());
        let core = Arc::new(SessionCore::new(
            0,
            SessionKind::Recorder,
            sink,
            Arc::clone(&clock) as Arc<dyn TimeSource>,
            Duration::ZERO,
        ));
        let backend = Arc::new(StubBackend::new());
        let mut engine = RecorderEngine::new(core);
        engine.open(backend.as_ref(), capture).unwrap();
        Fixture {
            engine,
            backend,
            clock,
            rx,
        }
    }

    /// Collect recordingData payloads, waiting for the pump to flush.
    fn wait_for_chunks(rx: &mut UnboundedReceiver<EventEnvelope>, expected: usize) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut chunks = Vec::new();
        while chunks.len() < expected && Instant::now() < deadline {
            while let Ok(envelope) = rx.try_recv() {
                if let SessionEvent::RecordingData { bytes } = envelope.event {
                    chunks.push(bytes);
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        chunks
    }

    fn drain(rx: &mut UnboundedReceiver<EventEnvelope>) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope);
        }
        events
    }

    fn temp_record_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("playrec-{}-{}.wav", tag, std::process::id()))
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut fixture = open_engine();
        assert_eq!(fixture.engine.status(), RecorderStatus::Opened);

        fixture.engine.start(None, Codec::Pcm16).unwrap();
        assert_eq!(fixture.engine.status(), RecorderStatus::Recording);

        fixture.engine.pause().unwrap();
        assert_eq!(fixture.engine.status(), RecorderStatus::Paused);

        fixture.engine.resume().unwrap();
        assert_eq!(fixture.engine.status(), RecorderStatus::Recording);

        fixture.engine.stop();
        assert_eq!(fixture.engine.status(), RecorderStatus::Opened);
        fixture.engine.stop();
        assert_eq!(fixture.engine.status(), RecorderStatus::Opened);
    }

    #[test]
    fn test_start_requires_opened() {
        let mut fixture = open_engine();
        fixture.engine.start(None, Codec::Pcm16).unwrap();
        assert!(matches!(
            fixture.engine.start(None, Codec::Pcm16),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_unsupported_codec_rejected() {
        let mut fixture = open_engine();
        fixture.backend.reject_codec(Codec::OpusOgg);
        assert!(matches!(
            fixture.engine.start(None, Codec::OpusOgg),
            Err(SessionError::UnsupportedCodec { .. })
        ));
    }

    #[test]
    fn test_streaming_chunks_delivered_in_order() {
        let mut fixture = open_engine();
        fixture.engine.start(None, Codec::Pcm16).unwrap();

        let handle = fixture.backend.recorder(0).unwrap();
        for i in 0..8u8 {
            handle.drive_data(vec![i; 4]);
        }

        let chunks = wait_for_chunks(&mut fixture.rx, 8);
        assert_eq!(chunks.len(), 8);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk, &vec![i as u8; 4]);
        }
    }

    #[test]
    fn test_file_mode_discards_data_callbacks() {
        let mut fixture = open_engine();
        let path = temp_record_path("filemode");
        fixture
            .engine
            .start(Some(path.clone()), Codec::Pcm16Wav)
            .unwrap();

        let handle = fixture.backend.recorder(0).unwrap();
        handle.drive_data(vec![1, 2, 3]);
        thread::sleep(Duration::from_millis(30));

        let events = drain(&mut fixture.rx);
        assert!(events
            .iter()
            .all(|envelope| !matches!(envelope.event, SessionEvent::RecordingData { .. })));
    }

    #[test]
    fn test_ring_overflow_sheds_without_reordering() {
        let mut fixture = open_engine_with_capture(&CaptureConfig {
            ring_capacity: 4,
            pump_idle_ms: 1,
        });
        fixture.engine.start(None, Codec::Pcm16).unwrap();

        let handle = fixture.backend.recorder(0).unwrap();
        for i in 0..100u8 {
            handle.drive_data(vec![i]);
        }

        thread::sleep(Duration::from_millis(50));
        let chunks: Vec<u8> = wait_for_chunks(&mut fixture.rx, 1)
            .into_iter()
            .map(|c| c[0])
            .collect();
        assert!(!chunks.is_empty());
        // Survivors keep push order even when some chunks were shed.
        assert!(chunks.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_peak_level_throttled_and_carries_elapsed() {
        let mut fixture = open_engine();
        fixture
            .engine
            .core()
            .throttle()
            .set_interval(Duration::from_millis(500));
        fixture.engine.start(None, Codec::Pcm16).unwrap();

        let handle = fixture.backend.recorder(0).unwrap();
        for _ in 0..23 {
            fixture.clock.advance(Duration::from_millis(100));
            handle.drive_peak_level(-6.0);
        }

        let events = drain(&mut fixture.rx);
        let peaks: Vec<(u64, f64)> = events
            .iter()
            .filter_map(|envelope| match envelope.event {
                SessionEvent::Progress {
                    position_ms,
                    peak_db: Some(db),
                    ..
                } => Some((position_ms, db)),
                _ => None,
            })
            .collect();
        assert_eq!(peaks.len(), 4);
        assert_eq!(peaks[0], (500, -6.0));
        assert_eq!(peaks[3].0, 2000);
    }

    #[test]
    fn test_delete_record_file_mode() {
        let mut fixture = open_engine();
        let path = temp_record_path("delete");
        fs::write(&path, b"fake wav").unwrap();

        fixture
            .engine
            .start(Some(path.clone()), Codec::Pcm16Wav)
            .unwrap();
        assert!(matches!(
            fixture.engine.delete_record(),
            Err(SessionError::InvalidState { .. })
        ));

        fixture.engine.stop();
        assert_eq!(fixture.engine.record_url(), Some(path.clone()));
        fixture.engine.delete_record().unwrap();
        assert!(!path.exists());

        // Path forgotten after a successful delete.
        assert!(matches!(
            fixture.engine.delete_record(),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_record_streaming_mode_not_found() {
        let mut fixture = open_engine();
        fixture.engine.start(None, Codec::Pcm16).unwrap();
        fixture.engine.stop();
        assert_eq!(fixture.engine.record_url(), None);
        assert!(matches!(
            fixture.engine.delete_record(),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_record_missing_file_not_found() {
        let mut fixture = open_engine();
        let path = temp_record_path("missing");
        fixture
            .engine
            .start(Some(path.clone()), Codec::Pcm16Wav)
            .unwrap();
        fixture.engine.stop();

        // Never created on disk by the stub.
        assert!(matches!(
            fixture.engine.delete_record(),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_callbacks_after_close_discarded() {
        let mut fixture = open_engine();
        fixture.engine.start(None, Codec::Pcm16).unwrap();
        let handle = fixture.backend.recorder(0).unwrap();
        drain(&mut fixture.rx);

        fixture.engine.close();
        assert_eq!(fixture.engine.status(), RecorderStatus::Closed);

        handle.drive_peak_level(-3.0);
        handle.drive_data(vec![9, 9]);
        thread::sleep(Duration::from_millis(20));
        assert!(drain(&mut fixture.rx).is_empty());
    }

    #[test]
    fn test_elapsed_excludes_paused_time() {
        let fixture = open_engine();
        let mut engine = fixture.engine;
        engine.start(None, Codec::Pcm16).unwrap();

        fixture.clock.advance(Duration::from_millis(1000));
        engine.pause().unwrap();
        fixture.clock.advance(Duration::from_millis(5000));
        engine.resume().unwrap();
        fixture.clock.advance(Duration::from_millis(500));

        let now_ms = engine.core().now_ms();
        assert_eq!(engine.shared.elapsed_ms(now_ms), 1500);
    }
}
