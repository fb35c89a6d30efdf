//! Transfer configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for a transfer engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct TransferConfig {
    /// Progress throttle window per task, in milliseconds (0 = no throttling).
    #[builder(default = "16")]
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Yield to the runtime after this many directory children while scanning.
    #[builder(default = "10")]
    #[serde(default = "default_scan_yield_every")]
    pub scan_yield_every: usize,

    /// Send folder bundles as one compressed archive when the bridge supports it.
    #[builder(default = "false")]
    #[serde(default)]
    pub compress_folders: bool,

    /// Stat the destination before writing each file.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub check_conflicts: bool,

    /// The caller guarantees the destination is empty.
    #[builder(default = "false")]
    #[serde(default)]
    pub destination_known_empty: bool,

    /// Estimated transfer rate used for the simulated progress ramp, in bytes per second.
    #[builder(default = "8 * 1024 * 1024")]
    #[serde(default = "default_simulated_rate")]
    pub simulated_rate: u64,

    /// Interval between simulated progress samples, in milliseconds.
    #[builder(default = "50")]
    #[serde(default = "default_simulated_tick_ms")]
    pub simulated_tick_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_scan_yield_every() -> usize {
    10
}

fn default_simulated_rate() -> u64 {
    8 * 1024 * 1024
}

fn default_simulated_tick_ms() -> u64 {
    50
}

impl TransferConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.scan_yield_every == Some(0) {
            return Err("scan_yield_every must be greater than zero".to_string());
        }
        if self.simulated_rate == Some(0) {
            return Err("simulated_rate must be greater than zero".to_string());
        }
        if self.simulated_tick_ms == Some(0) {
            return Err("simulated_tick_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl TransferConfig {
    /// Create a new config builder.
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }

    /// Progress throttle window.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Interval between simulated progress samples.
    pub fn simulated_tick(&self) -> Duration {
        Duration::from_millis(self.simulated_tick_ms.max(1))
    }

    /// Whether a file should be checked for a destination collision before writing.
    pub fn should_check_conflicts(&self) -> bool {
        self.check_conflicts && !self.destination_known_empty
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            scan_yield_every: default_scan_yield_every(),
            compress_folders: false,
            check_conflicts: true,
            destination_known_empty: false,
            simulated_rate: default_simulated_rate(),
            simulated_tick_ms: default_simulated_tick_ms(),
        }
    }
}
