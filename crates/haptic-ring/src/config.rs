//! Configuration types for the coordination engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HapticError, Result};
use crate::participant::Intensity;

/// Top-level engine configuration.
///
/// Loaded from JSON at runtime; every field has a default so partial files work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Detector polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Cadence patterns per intensity tier
    pub cadence: CadenceConfig,

    /// Parameters for the spatial proximity sensor
    pub detection: DetectionConfig,
}

/// Cadence pattern for each intensity tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    pub normal: CadencePattern,
    pub strong: CadencePattern,
}

/// One cycle of continuous feedback: a burst of pulses followed by a rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadencePattern {
    /// Pulses per burst
    pub pulses: u32,
    /// Gap between pulses inside a burst (milliseconds)
    pub pulse_interval_ms: u64,
    /// Rest after the burst (milliseconds)
    pub rest_ms: u64,
    /// Pulse amplitude (0.0 to 1.0)
    pub amplitude: f32,
    /// Pulse sharpness (0.0 to 1.0)
    pub sharpness: f32,
    /// Send each pulse twice (transient plus short continuous event)
    #[serde(default)]
    pub doubled: bool,
}

impl CadencePattern {
    /// Length of one burst-plus-rest cycle.
    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms * u64::from(self.pulses) + self.rest_ms)
    }

    /// Pulses sent to the sink per cycle, doubled pulses counted twice.
    pub fn pulses_per_cycle(&self) -> u32 {
        if self.doubled { self.pulses * 2 } else { self.pulses }
    }

    /// Average pulses per second over a whole cycle, rest included.
    pub fn pulse_rate_hz(&self) -> f64 {
        let cycle = self.cycle().as_secs_f64();
        if cycle == 0.0 {
            return 0.0;
        }
        f64::from(self.pulses_per_cycle()) / cycle
    }
}

/// Spatial detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Radius around a participant within which an object counts as near
    pub radius: f32,
    /// Tag an object must carry to count
    pub target_tag: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            cadence: CadenceConfig::default(),
            detection: DetectionConfig::default(),
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            normal: CadencePattern {
                pulses: 4,
                pulse_interval_ms: 150,
                rest_ms: 300,
                amplitude: 0.8,
                sharpness: 0.1,
                doubled: false,
            },
            strong: CadencePattern {
                pulses: 6,
                pulse_interval_ms: 80,
                rest_ms: 200,
                amplitude: 1.0,
                sharpness: 0.3,
                doubled: true,
            },
        }
    }
}

impl CadenceConfig {
    pub fn pattern(&self, intensity: Intensity) -> &CadencePattern {
        match intensity {
            Intensity::Normal => &self.normal,
            Intensity::Strong => &self.strong,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            radius: 0.5,
            target_tag: "InteractiveObject".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| HapticError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            HapticError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check intervals are usable and that `Strong` pulses faster than `Normal`.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(HapticError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        for (tier, pattern) in [("normal", &self.cadence.normal), ("strong", &self.cadence.strong)] {
            if pattern.pulses == 0 || pattern.pulse_interval_ms == 0 {
                return Err(HapticError::InvalidConfig(format!(
                    "{tier} cadence needs at least one pulse and a positive pulse interval"
                )));
            }
            if !(0.0..=1.0).contains(&pattern.amplitude) || !(0.0..=1.0).contains(&pattern.sharpness) {
                return Err(HapticError::InvalidConfig(format!(
                    "{tier} cadence amplitude and sharpness must lie in 0.0..=1.0"
                )));
            }
        }
        if self.cadence.strong.pulse_rate_hz() <= self.cadence.normal.pulse_rate_hz() {
            return Err(HapticError::InvalidConfig(
                "strong cadence must pulse faster than normal".to_string(),
            ));
        }
        if self.detection.radius <= 0.0 {
            return Err(HapticError::InvalidConfig(
                "detection radius must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
