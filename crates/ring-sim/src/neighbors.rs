//! Neighbor table: the ring and the tier each participant would request.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use haptic_ring::{Intensity, ParticipantId, RingTopology};

/// What one participant asks of its neighbors when it enters proximity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborRow {
    pub id: ParticipantId,
    pub left: ParticipantId,
    pub right: ParticipantId,
    /// Requests that would reach the registry; empty for a ring of one
    pub requests: Vec<(ParticipantId, Intensity)>,
}

/// Build the ring from `ranks` and resolve every member's neighbors.
///
/// Rank 0 is treated as the observer and left out; a duplicated rank is an
/// error.
pub fn neighbor_table(ranks: &[u32]) -> Result<Vec<NeighborRow>> {
    let mut topology = RingTopology::new();
    topology.rebuild(ranks.iter().copied().map(ParticipantId::from_rank))?;

    let mut rows = Vec::with_capacity(topology.len());
    for id in topology.members() {
        let neighbors = topology.neighbors(*id)?;
        let requests = neighbors
            .distinct_excluding(*id)
            .into_iter()
            .filter_map(|n| Intensity::for_neighbor(*id, n).map(|i| (n, i)))
            .collect();
        rows.push(NeighborRow {
            id: *id,
            left: neighbors.left,
            right: neighbors.right,
            requests,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(rank: u32) -> ParticipantId {
        ParticipantId::from_rank(rank)
    }

    #[test]
    fn test_three_ring_table() {
        let rows = neighbor_table(&[2, 3, 1]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[1].requests,
            vec![(id(1), Intensity::Normal), (id(3), Intensity::Strong)]
        );
        // 1 wraps to 3 on the left.
        assert_eq!(
            rows[0].requests,
            vec![(id(3), Intensity::Strong), (id(2), Intensity::Strong)]
        );
    }

    #[test]
    fn test_single_member_requests_nothing() {
        let rows = neighbor_table(&[0, 4]).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].requests.is_empty());
    }

    #[test]
    fn test_duplicate_rank_fails() {
        assert!(neighbor_table(&[1, 2, 2]).is_err());
    }
}
