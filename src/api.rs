//! Process-wide plugin surface
//!
//! The core works purely through an explicit [`BridgeRuntime`] handle; this
//! module adds the registration-time convenience a host embedding expects:
//! attach once at plugin registration, resolve the shared runtime from any
//! entry point, and tear everything down explicitly on detach.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::config::BridgeConfig;
use crate::device::AudioBackend;
use crate::error::{log_session_error, SessionError};
use crate::runtime::{BridgeRuntime, EventChannels};

static RUNTIME: Lazy<RwLock<Option<Arc<BridgeRuntime>>>> = Lazy::new(|| RwLock::new(None));

/// Get the version of the session bridge
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Attach the bridge to a backend, creating the process-wide runtime.
///
/// Returns the caller-owned event channels for both kinds.
///
/// # Errors
/// `InvalidState` if a runtime is already attached; detach first.
pub fn attach(
    backend: Arc<dyn AudioBackend>,
    config: BridgeConfig,
) -> Result<EventChannels, SessionError> {
    let mut slot = RUNTIME.write().map_err(|_| SessionError::LockPoisoned {
        component: "plugin_runtime",
    })?;
    if slot.is_some() {
        let err = SessionError::invalid_state("attach", "attached");
        log_session_error(&err, "attach");
        return Err(err);
    }
    let (runtime, channels) = BridgeRuntime::new(backend, config);
    *slot = Some(runtime);
    Ok(channels)
}

/// Resolve the attached runtime.
///
/// # Errors
/// `InvalidState` if no runtime is attached.
pub fn runtime() -> Result<Arc<BridgeRuntime>, SessionError> {
    RUNTIME
        .read()
        .map_err(|_| SessionError::LockPoisoned {
            component: "plugin_runtime",
        })?
        .as_ref()
        .cloned()
        .ok_or_else(|| SessionError::invalid_state("runtime", "detached"))
}

/// Close every open session in both managers, keeping the runtime attached.
pub fn reset_plugin() -> Result<(), SessionError> {
    runtime()?.reset();
    Ok(())
}

/// Tear the runtime down: close all sessions and drop the registration.
/// Safe to call when nothing is attached.
pub fn detach() -> Result<(), SessionError> {
    let mut slot = RUNTIME.write().map_err(|_| SessionError::LockPoisoned {
        component: "plugin_runtime",
    })?;
    if let Some(runtime) = slot.take() {
        runtime.reset();
    }
    Ok(())
}
