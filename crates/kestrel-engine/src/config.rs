//! Engine configuration.
//!
//! Every key is optional. Missing keys take their default value and unknown
//! keys are ignored, so a config file written for a newer engine still loads.
//!
//! ```
//! use kestrel_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "workerCount": 2, "fixedUpdateRate": 50 }"#)
//!     .unwrap();
//! assert_eq!(config.worker_count, 2);
//! assert!(config.use_parallel);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::worker::hardware_parallelism;

/// Reasons a configuration is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A key holds a value the engine cannot run with.
    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Worker threads; `0` means one per hardware thread.
    pub worker_count: usize,
    /// Dispatch phases to the worker pool instead of the main thread.
    pub use_parallel: bool,
    pub default_pool_capacity: usize,
    pub track_allocations: bool,
    pub target_frame_rate: f32,
    pub fixed_update_rate: f32,
    /// Sleep out the rest of each frame to hold `target_frame_rate`.
    pub enable_frame_pacing: bool,
    /// Pause on focus loss. Applied through
    /// [`HostHandle::focus_changed`](crate::host::HostHandle::focus_changed).
    pub pause_when_unfocused: bool,
    pub enable_perf_logging: bool,
    pub enable_mem_logging: bool,
    pub enable_statistics: bool,
    pub enable_debug_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            use_parallel: true,
            default_pool_capacity: 100,
            track_allocations: true,
            target_frame_rate: 60.0,
            fixed_update_rate: 60.0,
            enable_frame_pacing: true,
            pause_when_unfocused: true,
            enable_perf_logging: false,
            enable_mem_logging: false,
            enable_statistics: true,
            enable_debug_output: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every value the engine depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("targetFrameRate", self.target_frame_rate)?;
        positive("fixedUpdateRate", self.fixed_update_rate)?;
        if self.default_pool_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "defaultPoolCapacity",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    /// Worker threads to spawn, with `0` resolved to the hardware count.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            hardware_parallelism()
        } else {
            self.worker_count
        }
    }

    /// Seconds per rendered frame.
    pub fn target_frame_time(&self) -> f64 {
        1.0 / f64::from(self.target_frame_rate)
    }

    // -- presets --------------------------------------------------------------

    /// Parallel, 120 fps unpaced, no tracking or debug output.
    pub fn high_performance() -> Self {
        Self {
            worker_count: 0,
            use_parallel: true,
            target_frame_rate: 120.0,
            fixed_update_rate: 60.0,
            track_allocations: false,
            enable_frame_pacing: false,
            enable_debug_output: false,
            ..Self::default()
        }
    }

    /// One worker, sequential phases at 30 fps, every log on.
    pub fn debug() -> Self {
        Self {
            worker_count: 1,
            use_parallel: false,
            target_frame_rate: 30.0,
            track_allocations: true,
            enable_perf_logging: true,
            enable_mem_logging: true,
            enable_debug_output: true,
            enable_statistics: true,
            ..Self::default()
        }
    }

    /// Small pools, two workers, allocation tracking and memory logs on.
    pub fn low_memory() -> Self {
        Self {
            worker_count: 2,
            default_pool_capacity: 50,
            track_allocations: true,
            enable_mem_logging: true,
            ..Self::default()
        }
    }
}

fn positive(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("must be positive and finite, got {value}"),
        })
    }
}
