//! Ring topology: circular neighbor relation over participants ordered by rank.

use tracing::{debug, warn};

use crate::error::{HapticError, Result};
use crate::participant::ParticipantId;

/// The two ring-neighbors of a participant.
///
/// `left` is the previous member in rank order and `right` the next one,
/// both wrapping around the ends of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbors {
    pub left: ParticipantId,
    pub right: ParticipantId,
}

impl Neighbors {
    /// Distinct neighbors other than `owner`, left first.
    ///
    /// A ring of one yields nothing, a ring of two yields the other member once.
    pub fn distinct_excluding(&self, owner: ParticipantId) -> Vec<ParticipantId> {
        let mut out = Vec::with_capacity(2);
        for id in [self.left, self.right] {
            if id != owner && !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}

/// Participants sorted ascending by rank, treated as a circle.
#[derive(Debug, Clone, Default)]
pub struct RingTopology {
    ring: Vec<ParticipantId>,
}

impl RingTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the ring from the current membership.
    ///
    /// Observer ids are skipped. A duplicated rank aborts the rebuild and the
    /// previous ring stays in place.
    pub fn rebuild<I>(&mut self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        let mut next: Vec<ParticipantId> = ids.into_iter().filter(|id| !id.is_observer()).collect();
        next.sort_unstable();

        if let Some(pair) = next.windows(2).find(|pair| pair[0] == pair[1]) {
            let rank = pair[0].rank();
            warn!(rank, "Ring rebuild rejected: duplicate rank, keeping previous ring");
            return Err(HapticError::DuplicateRank { rank });
        }

        debug!(size = next.len(), previous = self.ring.len(), "Ring rebuilt");
        self.ring = next;
        Ok(())
    }

    /// Left and right neighbors of `id`.
    pub fn neighbors(&self, id: ParticipantId) -> Result<Neighbors> {
        let idx = self
            .ring
            .binary_search(&id)
            .map_err(|_| HapticError::NotInRing(id))?;
        let n = self.ring.len();
        Ok(Neighbors {
            left: self.ring[(idx + n - 1) % n],
            right: self.ring[(idx + 1) % n],
        })
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.ring.binary_search(&id).is_ok()
    }

    pub fn members(&self) -> &[ParticipantId] {
        &self.ring
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
