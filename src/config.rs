//! Configuration for the session bridge
//!
//! Runtime configuration is loaded from a JSON file when present, falling
//! back to defaults otherwise. Covers slot capacity, event subscription
//! defaults and the real-time capture hand-off sizing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub slots: SlotConfig,
    pub events: EventConfig,
    pub capture: CaptureConfig,
}

/// Slot table sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Maximum number of concurrently open sessions per kind
    pub max_slots: usize,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self { max_slots: 16 }
    }
}

/// Outbound event behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Default progress/peak subscription interval in milliseconds.
    /// 0 forwards every hardware tick until the caller sets an interval.
    pub default_subscription_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            default_subscription_ms: 0,
        }
    }
}

/// Real-time capture hand-off sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capacity of the per-recorder SPSC capture ring, in chunks
    pub ring_capacity: usize,
    /// Pump thread idle sleep in milliseconds when the ring is empty
    pub pump_idle_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 32,
            pump_idle_ms: 2,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            slots: SlotConfig::default(),
            events: EventConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// Falls back to defaults (with a warning) if the file is missing or
    /// does not parse.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}
