//! Error types for the haptic ring.

use thiserror::Error;

use crate::participant::ParticipantId;

/// Errors surfaced by the topology, the engine and configuration loading.
///
/// Registry operations never return these: an unknown target there is a
/// logged no-op.
#[derive(Debug, Error)]
pub enum HapticError {
    /// Neighbor lookup for an id that is not a ring member.
    #[error("participant {0} is not in the ring")]
    NotInRing(ParticipantId),

    /// Two ring members share a rank. The rebuild is abandoned.
    #[error("duplicate rank {rank} in ring membership")]
    DuplicateRank { rank: u32 },

    /// Operation on a participant that never joined (or already left).
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Configuration failed validation or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HapticError>;
