//! Participant identity and intensity types: the vocabulary shared by the ring,
//! the registry and the actuation channels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rank reserved for the observer role. Observers never join the ring.
pub const OBSERVER_RANK: u32 = 0;

/// Identifier of a participant, derived from its integer rank.
///
/// Ordering follows the rank, which is what the ring is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(u32);

impl ParticipantId {
    /// Create an id from a rank.
    pub const fn from_rank(rank: u32) -> Self {
        Self(rank)
    }

    /// The rank this id was derived from.
    pub const fn rank(self) -> u32 {
        self.0
    }

    /// Whether this id holds the observer role (excluded from the ring).
    pub const fn is_observer(self) -> bool {
        self.0 == OBSERVER_RANK
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{:02}", self.0)
    }
}

impl From<u32> for ParticipantId {
    fn from(rank: u32) -> Self {
        Self::from_rank(rank)
    }
}

/// Feedback tier requested on a target.
///
/// Variant order is severity order, so `max()` over a set of requests yields
/// the tier that should be felt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Normal,
    Strong,
}

impl Intensity {
    /// Tier a source requests on one of its neighbors.
    ///
    /// Lower-ranked neighbors get `Normal`, higher-ranked ones `Strong`.
    /// Returns `None` when both ids are the same participant.
    pub fn for_neighbor(source: ParticipantId, neighbor: ParticipantId) -> Option<Self> {
        match neighbor.rank().cmp(&source.rank()) {
            std::cmp::Ordering::Less => Some(Self::Normal),
            std::cmp::Ordering::Greater => Some(Self::Strong),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Strong => f.write_str("strong"),
        }
    }
}

/// Resolved state of a target: inactive, or active at some tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationLevel {
    #[default]
    Inactive,
    Normal,
    Strong,
}

impl ActivationLevel {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Inactive)
    }

    pub fn intensity(self) -> Option<Intensity> {
        match self {
            Self::Inactive => None,
            Self::Normal => Some(Intensity::Normal),
            Self::Strong => Some(Intensity::Strong),
        }
    }
}

impl From<Option<Intensity>> for ActivationLevel {
    fn from(value: Option<Intensity>) -> Self {
        match value {
            None => Self::Inactive,
            Some(Intensity::Normal) => Self::Normal,
            Some(Intensity::Strong) => Self::Strong,
        }
    }
}

impl fmt::Display for ActivationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => f.write_str("inactive"),
            Self::Normal => f.write_str("normal"),
            Self::Strong => f.write_str("strong"),
        }
    }
}
