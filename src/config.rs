//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for surface reuse and eviction.
///
/// The defaults mirror the values the engine was tuned with; both are
/// empirical constants, not derived quantities.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// A main surface may serve a request for a slightly larger scale:
    /// `surface_scale + scale_tolerance >= requested_scale`. Downscaling a
    /// bitmap loses no needed precision; upscaling would.
    #[serde(default = "default_scale_tolerance")]
    pub scale_tolerance: f32,

    /// How long an unreferenced main surface is kept around before its
    /// buffer is destroyed. A new reference taken within the grace period
    /// cancels the pending destruction.
    #[serde(default = "default_eviction_grace")]
    pub eviction_grace: Duration,
}

fn default_scale_tolerance() -> f32 {
    0.001
}

fn default_eviction_grace() -> Duration {
    Duration::from_secs(10)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scale_tolerance: default_scale_tolerance(),
            eviction_grace: default_eviction_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.scale_tolerance, 0.001);
        assert_eq!(config.eviction_grace, Duration::from_secs(10));
    }
}
