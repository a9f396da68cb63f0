//! Simulated haptic motor: counts pulses per tier and traces each one.

use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::trace;

use haptic_ring::{ActuationSink, Intensity, ParticipantId, Pulse};

/// Pulse totals for one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseCounts {
    pub normal: u64,
    pub strong: u64,
}

impl Add for PulseCounts {
    type Output = PulseCounts;

    fn add(self, other: PulseCounts) -> PulseCounts {
        PulseCounts {
            normal: self.normal + other.normal,
            strong: self.strong + other.strong,
        }
    }
}

/// Sink standing in for a device motor.
#[derive(Debug)]
pub struct LoggingSink {
    name: String,
    normal: AtomicU64,
    strong: AtomicU64,
}

impl LoggingSink {
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            name: format!("motor:{owner}"),
            normal: AtomicU64::new(0),
            strong: AtomicU64::new(0),
        }
    }

    pub fn counts(&self) -> PulseCounts {
        PulseCounts {
            normal: self.normal.load(Ordering::Relaxed),
            strong: self.strong.load(Ordering::Relaxed),
        }
    }
}

impl ActuationSink for LoggingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn pulse(&self, pulse: &Pulse) {
        match pulse.intensity {
            Intensity::Normal => self.normal.fetch_add(1, Ordering::Relaxed),
            Intensity::Strong => self.strong.fetch_add(1, Ordering::Relaxed),
        };
        trace!(
            sink = %self.name,
            intensity = %pulse.intensity,
            amplitude = pulse.amplitude,
            sharpness = pulse.sharpness,
            "pulse"
        );
    }
}
