//! Stub backend for desktop use and tests
//!
//! Implements the hardware capability traits without touching real audio
//! hardware. Tests script it: every opened device exposes a handle that can
//! flip device state and invoke the session's callback bridge the way a
//! platform engine would, from whichever thread the test chooses.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{
    AudioBackend, AudioSource, Codec, PlayerCallback, PlayerDevice, RecorderCallback,
    RecorderDevice, TimeSource,
};
use crate::error::SessionError;

/// Manually advanced time source for deterministic throttle tests.
pub struct ManualTimeSource {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Advance the simulated clock.
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

struct StubPlayerInner {
    callback: Mutex<Option<Box<dyn PlayerCallback>>>,
    supported: Arc<Mutex<Vec<Codec>>>,
    started: AtomicBool,
    paused: AtomicBool,
    stop_calls: AtomicU32,
    fail_start: AtomicBool,
    duration_ms: AtomicU64,
    last_seek_ms: AtomicU64,
    volume_milli: AtomicU64,
    speed_milli: AtomicU64,
    fed: Mutex<Vec<u8>>,
    last_source: Mutex<Option<AudioSource>>,
}

/// Test-side handle onto one stub player device.
#[derive(Clone)]
pub struct StubPlayerHandle {
    inner: Arc<StubPlayerInner>,
}

impl StubPlayerHandle {
    /// Deliver a progress tick the way the hardware layer would.
    pub fn drive_progress(&self, position: Duration, duration: Duration) {
        if let Some(cb) = self.inner.callback.lock().unwrap().as_mut() {
            cb.on_progress(position, duration);
        }
    }

    /// Deliver the terminal completion callback.
    pub fn finish(&self, success: bool) {
        if let Some(cb) = self.inner.callback.lock().unwrap().as_mut() {
            cb.on_finished(success);
        }
    }

    /// Pre-set the source duration the device will report after start.
    pub fn set_duration(&self, duration: Duration) {
        self.inner
            .duration_ms
            .store(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next start call fail at the device.
    pub fn fail_next_start(&self) {
        self.inner.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    pub fn last_seek(&self) -> Duration {
        Duration::from_millis(self.inner.last_seek_ms.load(Ordering::SeqCst))
    }

    pub fn volume(&self) -> f64 {
        self.inner.volume_milli.load(Ordering::SeqCst) as f64 / 1000.0
    }

    pub fn speed(&self) -> f64 {
        self.inner.speed_milli.load(Ordering::SeqCst) as f64 / 1000.0
    }

    pub fn fed_bytes(&self) -> Vec<u8> {
        self.inner.fed.lock().unwrap().clone()
    }
}

struct StubPlayer {
    inner: Arc<StubPlayerInner>,
}

impl PlayerDevice for StubPlayer {
    fn start(&mut self, source: &AudioSource, _codec: Codec) -> Result<(), SessionError> {
        if self.inner.fail_start.swap(false, Ordering::SeqCst) {
            return Err(SessionError::DeviceFailure {
                details: "stub start failure".to_string(),
            });
        }
        *self.inner.last_source.lock().unwrap() = Some(source.clone());
        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        self.inner.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        self.inner.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.started.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn seek(&mut self, position: Duration) -> Result<(), SessionError> {
        self.inner
            .last_seek_ms
            .store(position.as_millis() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn set_volume(&mut self, volume: f64) {
        self.inner
            .volume_milli
            .store((volume * 1000.0) as u64, Ordering::SeqCst);
    }

    fn set_speed(&mut self, speed: f64) {
        self.inner
            .speed_milli
            .store((speed * 1000.0) as u64, Ordering::SeqCst);
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.inner.fed.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        let ms = self.inner.duration_ms.load(Ordering::SeqCst);
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    fn is_codec_supported(&self, codec: Codec) -> bool {
        self.inner.supported.lock().unwrap().contains(&codec)
    }
}

struct StubRecorderInner {
    callback: Mutex<Option<Box<dyn RecorderCallback>>>,
    supported: Arc<Mutex<Vec<Codec>>>,
    recording: AtomicBool,
    paused: AtomicBool,
    stop_calls: AtomicU32,
    destination: Mutex<Option<PathBuf>>,
}

/// Test-side handle onto one stub recorder device.
#[derive(Clone)]
pub struct StubRecorderHandle {
    inner: Arc<StubRecorderInner>,
}

impl StubRecorderHandle {
    /// Deliver a peak-level tick the way the hardware layer would.
    pub fn drive_peak_level(&self, peak_db: f64) {
        if let Some(cb) = self.inner.callback.lock().unwrap().as_mut() {
            cb.on_peak_level(peak_db);
        }
    }

    /// Deliver one captured buffer.
    pub fn drive_data(&self, bytes: Vec<u8>) {
        if let Some(cb) = self.inner.callback.lock().unwrap().as_mut() {
            cb.on_data(bytes);
        }
    }

    pub fn recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    pub fn destination(&self) -> Option<PathBuf> {
        self.inner.destination.lock().unwrap().clone()
    }
}

struct StubRecorder {
    inner: Arc<StubRecorderInner>,
}

impl RecorderDevice for StubRecorder {
    fn start(&mut self, destination: Option<&Path>, _codec: Codec) -> Result<(), SessionError> {
        *self.inner.destination.lock().unwrap() = destination.map(Path::to_path_buf);
        self.inner.recording.store(true, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        self.inner.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        self.inner.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.recording.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_codec_supported(&self, codec: Codec) -> bool {
        self.inner.supported.lock().unwrap().contains(&codec)
    }
}

/// Scriptable backend handing out stub devices.
pub struct StubBackend {
    supported: Arc<Mutex<Vec<Codec>>>,
    fail_next_open: AtomicBool,
    players: Mutex<Vec<StubPlayerHandle>>,
    recorders: Mutex<Vec<StubRecorderHandle>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            supported: Arc::new(Mutex::new(Codec::ALL.to_vec())),
            fail_next_open: AtomicBool::new(false),
            players: Mutex::new(Vec::new()),
            recorders: Mutex::new(Vec::new()),
        }
    }

    /// Make the backend report `codec` as unsupported.
    pub fn reject_codec(&self, codec: Codec) {
        self.supported.lock().unwrap().retain(|c| *c != codec);
    }

    /// Make the next open call fail.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Handle onto the n-th opened player device.
    pub fn player(&self, index: usize) -> Option<StubPlayerHandle> {
        self.players.lock().unwrap().get(index).cloned()
    }

    /// Handle onto the n-th opened recorder device.
    pub fn recorder(&self, index: usize) -> Option<StubRecorderHandle> {
        self.recorders.lock().unwrap().get(index).cloned()
    }

    pub fn opened_players(&self) -> usize {
        self.players.lock().unwrap().len()
    }

    pub fn opened_recorders(&self) -> usize {
        self.recorders.lock().unwrap().len()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for StubBackend {
    fn open_player(
        &self,
        callback: Box<dyn PlayerCallback>,
    ) -> Result<Box<dyn PlayerDevice>, SessionError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(SessionError::DeviceFailure {
                details: "stub open failure".to_string(),
            });
        }
        let inner = Arc::new(StubPlayerInner {
            callback: Mutex::new(Some(callback)),
            supported: Arc::clone(&self.supported),
            started: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop_calls: AtomicU32::new(0),
            fail_start: AtomicBool::new(false),
            duration_ms: AtomicU64::new(0),
            last_seek_ms: AtomicU64::new(0),
            volume_milli: AtomicU64::new(1000),
            speed_milli: AtomicU64::new(1000),
            fed: Mutex::new(Vec::new()),
            last_source: Mutex::new(None),
        });
        self.players.lock().unwrap().push(StubPlayerHandle {
            inner: Arc::clone(&inner),
        });
        Ok(Box::new(StubPlayer { inner }))
    }

    fn open_recorder(
        &self,
        callback: Box<dyn RecorderCallback>,
    ) -> Result<Box<dyn RecorderDevice>, SessionError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(SessionError::DeviceFailure {
                details: "stub open failure".to_string(),
            });
        }
        let inner = Arc::new(StubRecorderInner {
            callback: Mutex::new(Some(callback)),
            supported: Arc::clone(&self.supported),
            recording: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop_calls: AtomicU32::new(0),
            destination: Mutex::new(None),
        });
        self.recorders.lock().unwrap().push(StubRecorderHandle {
            inner: Arc::clone(&inner),
        });
        Ok(Box::new(StubRecorder { inner }))
    }
}
