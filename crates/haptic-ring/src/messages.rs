//! Message types for the acton-reactive membership feed.

use std::sync::Arc;

use crate::actuation::ActuationSink;
use crate::engine::EngineSnapshot;
use crate::participant::ParticipantId;
use crate::sensing::ProximitySensor;

/// A participant with the given rank joined the experience.
///
/// With a sensor the engine also starts a detector for it; without one,
/// proximity is fed to the engine directly.
#[derive(Clone)]
pub struct ParticipantJoined {
    pub rank: u32,
    pub sink: Arc<dyn ActuationSink>,
    pub sensor: Option<Arc<dyn ProximitySensor>>,
}

impl std::fmt::Debug for ParticipantJoined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantJoined")
            .field("rank", &self.rank)
            .field("sink", &self.sink.name())
            .field("sensor", &self.sensor.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// A participant with the given rank left.
#[derive(Debug, Clone)]
pub struct ParticipantLeft {
    pub rank: u32,
}

/// What changed in a [`MembershipChanged`] broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(ParticipantId),
    Left(ParticipantId),
}

/// Broadcast after every applied membership change, with the new ring.
#[derive(Debug, Clone)]
pub struct MembershipChanged {
    pub change: MembershipChange,
    pub ring: Vec<ParticipantId>,
}

/// Broadcast when a join or leave could not be applied.
#[derive(Debug, Clone)]
pub struct MembershipRejected {
    pub rank: u32,
    pub reason: String,
}

/// Request for a diagnostics snapshot. Answered with a [`SnapshotReport`]
/// broadcast.
#[derive(Debug, Clone)]
pub struct RequestSnapshot;

/// Engine state at the time the request was handled.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub snapshot: EngineSnapshot,
}
