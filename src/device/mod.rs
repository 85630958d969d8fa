//! Hardware capability boundary
//!
//! The core drives the platform audio engine through the traits in this
//! module and never learns how they are implemented. A backend hands out
//! one device per open session; the device owns the callback bridge it was
//! given and invokes it from the hardware's own threads.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

mod stub;
pub use stub::{ManualTimeSource, StubBackend, StubPlayerHandle, StubRecorderHandle};

/// Codecs negotiable with the platform engine.
///
/// The set mirrors what real devices commonly expose; support is always
/// queried per device via `is_codec_supported`, never assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    DefaultCodec,
    AacAdts,
    OpusOgg,
    Mp3,
    VorbisOgg,
    Pcm16,
    Pcm16Wav,
    Pcm16Aiff,
    Flac,
    AacMp4,
}

impl Codec {
    /// All codecs the bridge knows how to name.
    pub const ALL: [Codec; 10] = [
        Codec::DefaultCodec,
        Codec::AacAdts,
        Codec::OpusOgg,
        Codec::Mp3,
        Codec::VorbisOgg,
        Codec::Pcm16,
        Codec::Pcm16Wav,
        Codec::Pcm16Aiff,
        Codec::Flac,
        Codec::AacMp4,
    ];

    /// MIME type used when describing a recording to the caller.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::DefaultCodec => "audio/aac",
            Codec::AacAdts => "audio/aac",
            Codec::OpusOgg => "audio/opus;codecs=opus",
            Codec::Mp3 => "audio/mp3",
            Codec::VorbisOgg => "audio/ogg;codecs=vorbis",
            Codec::Pcm16 => "audio/pcm",
            Codec::Pcm16Wav => "audio/wav;codecs=1",
            Codec::Pcm16Aiff => "audio/aiff",
            Codec::Flac => "audio/x-flac",
            Codec::AacMp4 => "audio/mp4",
        }
    }
}

/// Where a player pulls its audio from.
///
/// `Stream` sources are fed incrementally by the caller through
/// `feed` while playback is running.
#[derive(Debug, Clone)]
pub enum AudioSource {
    File(PathBuf),
    Buffer(Vec<u8>),
    Stream,
}

/// Callback interface a player device invokes from the hardware domain.
///
/// The device owns the callback object; invocations may arrive on any
/// thread at any time, including after the session started closing.
pub trait PlayerCallback: Send {
    fn on_progress(&mut self, position: Duration, duration: Duration);
    fn on_finished(&mut self, success: bool);
}

/// Callback interface a recorder device invokes from the hardware domain.
pub trait RecorderCallback: Send {
    fn on_peak_level(&mut self, peak_db: f64);
    fn on_data(&mut self, bytes: Vec<u8>);
}

/// One open player on the platform engine.
pub trait PlayerDevice: Send {
    fn start(&mut self, source: &AudioSource, codec: Codec) -> Result<(), SessionError>;
    fn pause(&mut self) -> Result<(), SessionError>;
    fn resume(&mut self) -> Result<(), SessionError>;
    /// Best-effort; never fails.
    fn stop(&mut self);
    fn seek(&mut self, position: Duration) -> Result<(), SessionError>;
    fn set_volume(&mut self, volume: f64);
    fn set_speed(&mut self, speed: f64);
    /// Push PCM into a `Stream` source.
    fn feed(&mut self, bytes: &[u8]) -> Result<(), SessionError>;
    /// Total duration of the current source, once known.
    fn duration(&self) -> Option<Duration>;
    fn is_codec_supported(&self, codec: Codec) -> bool;
}

/// One open recorder on the platform engine.
pub trait RecorderDevice: Send {
    /// `destination: None` selects streaming mode; captured buffers are
    /// delivered through `RecorderCallback::on_data` instead of written
    /// to storage.
    fn start(&mut self, destination: Option<&Path>, codec: Codec) -> Result<(), SessionError>;
    fn pause(&mut self) -> Result<(), SessionError>;
    fn resume(&mut self) -> Result<(), SessionError>;
    /// Best-effort; never fails.
    fn stop(&mut self);
    fn is_codec_supported(&self, codec: Codec) -> bool;
}

/// Factory for platform devices, one per open session.
pub trait AudioBackend: Send + Sync {
    fn open_player(
        &self,
        callback: Box<dyn PlayerCallback>,
    ) -> Result<Box<dyn PlayerDevice>, SessionError>;

    fn open_recorder(
        &self,
        callback: Box<dyn RecorderCallback>,
    ) -> Result<Box<dyn RecorderDevice>, SessionError>;
}

/// Monotonic time source used for event throttling.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
