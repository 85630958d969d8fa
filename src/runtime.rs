//! Bridge runtime
//!
//! Bundles the two managers around one shared focus arbiter and hands the
//! caller its event receivers at construction. The runtime is the explicit
//! registry handle every entry point takes; nothing in the core reaches
//! for ambient globals.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::BridgeConfig;
use crate::device::{AudioBackend, SystemTimeSource, TimeSource};
use crate::manager::{PlayerManager, RecorderManager};
use crate::session::events::{EventEnvelope, EventSink};
use crate::session::focus::FocusArbiter;
use crate::session::SessionKind;

/// Receiving halves of the per-manager outbound event channels.
///
/// Owned by the caller; events for one slot arrive in emission order,
/// events across slots may interleave.
pub struct EventChannels {
    pub player_events: UnboundedReceiver<EventEnvelope>,
    pub recorder_events: UnboundedReceiver<EventEnvelope>,
}

pub struct BridgeRuntime {
    players: PlayerManager,
    recorders: RecorderManager,
    focus: Arc<FocusArbiter>,
}

impl BridgeRuntime {
    /// Build a runtime over `backend` with the system clock.
    pub fn new(backend: Arc<dyn AudioBackend>, config: BridgeConfig) -> (Arc<Self>, EventChannels) {
        Self::with_clock(backend, config, Arc::new(SystemTimeSource::default()))
    }

    /// Build a runtime with an explicit clock (tests use a manual one).
    pub fn with_clock(
        backend: Arc<dyn AudioBackend>,
        config: BridgeConfig,
        clock: Arc<dyn TimeSource>,
    ) -> (Arc<Self>, EventChannels) {
        let focus = Arc::new(FocusArbiter::new());
        let (player_sink, player_events) = EventSink::channel();
        let (recorder_sink, recorder_events) = EventSink::channel();

        let players = PlayerManager::new(
            Arc::clone(&focus),
            Arc::clone(&backend),
            Arc::clone(&clock),
            player_sink,
            config.clone(),
        );
        let recorders = RecorderManager::new(
            Arc::clone(&focus),
            backend,
            clock,
            recorder_sink,
            config,
        );

        let runtime = Arc::new(Self {
            players,
            recorders,
            focus,
        });
        (
            runtime,
            EventChannels {
                player_events,
                recorder_events,
            },
        )
    }

    pub fn players(&self) -> &PlayerManager {
        &self.players
    }

    pub fn recorders(&self) -> &RecorderManager {
        &self.recorders
    }

    /// Which slot currently holds hardware focus, if any.
    pub fn focus_holder(&self) -> Option<(SessionKind, usize)> {
        self.focus.holder()
    }

    /// Close every open session in both managers. Idempotent.
    pub fn reset(&self) {
        self.players.reset();
        self.recorders.reset();
    }
}
