// playrec - native audio session bridge
// Slot-multiplexed player/recorder sessions over an abstract audio backend

// Module declarations
pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod player;
pub mod recorder;
pub mod runtime;
pub mod session;

// Re-exports for convenience
pub use config::BridgeConfig;
pub use device::{AudioBackend, AudioSource, Codec};
pub use error::{ErrorCode, SessionError};
pub use runtime::{BridgeRuntime, EventChannels};
pub use session::events::{EventEnvelope, SessionEvent};
pub use session::focus::InterruptionPolicy;
pub use session::{PlayerStatus, RecorderStatus, SessionKind};

/// Initialize logging for host embeddings that do not install their own
/// subscriber. Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
