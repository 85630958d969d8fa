//! Outbound event channel
//!
//! Every session pushes its events through one unbounded channel per
//! manager. Sends never block, so the hardware callback domain can emit
//! directly; per-slot ordering follows from the channel being FIFO.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Event emitted by a session toward the caller.
///
/// Wire names match what the caller side subscribes on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Periodic playback/recording progress, throttled to the subscription
    /// interval. `peak_db` is only present for recorders.
    Progress {
        position_ms: u64,
        duration_ms: u64,
        peak_db: Option<f64>,
    },
    /// One captured buffer from a streaming-mode recorder. Ownership of the
    /// bytes transfers to the caller.
    RecordingData { bytes: Vec<u8> },
    /// Terminal playback event, exactly once per started playback.
    PlayerFinished { success: bool },
    /// Focus grant/revocation notification.
    #[serde(rename = "updateFocus")]
    FocusChanged { has_focus: bool },
}

impl SessionEvent {
    /// Wire name of the event, as the caller channel keys on it.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Progress { .. } => "progress",
            SessionEvent::RecordingData { .. } => "recordingData",
            SessionEvent::PlayerFinished { .. } => "playerFinished",
            SessionEvent::FocusChanged { .. } => "updateFocus",
        }
    }
}

/// Envelope delivered on the caller channel, keyed by slot number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub slot_no: usize,
    /// Status ordinal of the session at emission time.
    pub status: i32,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Sending half of a manager's outbound event channel.
///
/// Cheap to clone; a send after the caller dropped the receiver is
/// discarded, matching best-effort event delivery.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, slot_no: usize, status: i32, event: SessionEvent) {
        let name = event.name();
        if self
            .tx
            .send(EventEnvelope {
                slot_no,
                status,
                event,
            })
            .is_err()
        {
            log::debug!(
                "event channel closed; dropping {} event for slot {}",
                name,
                slot_no
            );
        }
    }
}

/// Adapt an event receiver into a `futures` stream.
pub fn event_stream(
    rx: mpsc::UnboundedReceiver<EventEnvelope>,
) -> UnboundedReceiverStream<EventEnvelope> {
    UnboundedReceiverStream::new(rx)
}

/// Coalesces high-frequency hardware ticks into at most one emission per
/// configured interval.
///
/// Lock-free; safe to consult from the hardware callback domain. An
/// interval of zero disables throttling.
pub struct Throttle {
    interval_ms: AtomicU64,
    last_emit_ms: AtomicU64,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            last_emit_ms: AtomicU64::new(0),
        }
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Restart the interval window, e.g. when playback starts.
    pub fn reset(&self, now_ms: u64) {
        self.last_emit_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Whether an emission is due at `now_ms`; claims the window if so.
    pub fn ready(&self, now_ms: u64) -> bool {
        let interval = self.interval_ms.load(Ordering::Relaxed);
        if interval == 0 {
            return true;
        }
        let last = self.last_emit_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) >= interval {
            self.last_emit_ms.store(now_ms, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}
