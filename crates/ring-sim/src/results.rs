//! Results collection and output for ring simulations.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use haptic_ring::{EngineSnapshot, Intensity, ParticipantId, RegistryStats};

use crate::sink::PulseCounts;

/// One applied or rejected membership change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Milliseconds since the simulation started
    pub at_ms: u64,
    /// "joined", "left" or "rejected"
    pub kind: String,
    pub rank: u32,
    /// Ring after the change (empty for rejections)
    pub ring: Vec<ParticipantId>,
}

/// Who was engaged and who was vibrating, recorded whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at_ms: u64,
    pub engaged: Vec<ParticipantId>,
    pub feedback: Vec<(ParticipantId, Intensity)>,
}

impl TimelineEntry {
    /// Same observable state, ignoring the timestamp.
    pub fn same_state(&self, other: &TimelineEntry) -> bool {
        self.engaged == other.engaged && self.feedback == other.feedback
    }
}

/// Results from a single simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub participants: u32,
    pub observer: bool,
    pub duration_ms: u64,
    /// Rank that left and rejoined mid-run, if churn was enabled
    pub churned: Option<u32>,
    pub membership: Vec<MembershipRecord>,
    pub timeline: Vec<TimelineEntry>,
    /// Pulses each participant's motor played
    pub pulses: BTreeMap<u32, PulseCounts>,
    pub registry: RegistryStats,
    pub final_snapshot: EngineSnapshot,
}

impl SimulationResult {
    /// Number of distinct times anyone started feeling feedback.
    pub fn activations(&self) -> usize {
        let mut count = 0;
        let mut previous: Vec<ParticipantId> = Vec::new();
        for entry in &self.timeline {
            let current: Vec<ParticipantId> = entry.feedback.iter().map(|(id, _)| *id).collect();
            count += current.iter().filter(|id| !previous.contains(id)).count();
            previous = current;
        }
        count
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
