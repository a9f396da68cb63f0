//! CoordinationEngine: wires detectors, the ring and the trigger registry.
//!
//! ```text
//! detector ──Entered──▶ engine ──neighbors()──▶ RingTopology (read lock)
//!                         │
//!                         └──request_activate──▶ TriggerRegistry ──start/stop──▶ ActuationChannel
//! ```
//!
//! Membership changes take the topology write lock, rebuild the ring and
//! reconcile the edges of engaged participants before releasing it. Proximity
//! edges take the read lock for the whole resolve-and-mutate step, so an event
//! never resolves neighbors against a half-updated ring.
//!
//! Every join starts a new generation of its participant. Detector edges carry
//! the generation they were spawned for and are dropped once the participant
//! has left or rejoined, so a departed detector's final `Left` never touches
//! the next incarnation of the same rank.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actuation::{ActuationChannel, ActuationSink, ChannelStatus};
use crate::config::EngineConfig;
use crate::detector::{DetectorHandle, ProximityEdge, ProximityListener, spawn_detector};
use crate::error::{HapticError, Result};
use crate::participant::{ActivationLevel, Intensity, ParticipantId};
use crate::registry::TriggerRegistry;
use crate::sensing::ProximitySensor;
use crate::topology::{Neighbors, RingTopology};

/// Per-participant wiring owned by the engine.
struct Participant {
    channel: Arc<ActuationChannel>,
    generation: u64,
    /// Owned here so the detector's weak reference dies with this entry
    listener: Option<Arc<dyn ProximityListener>>,
    detector: Option<DetectorHandle>,
}

/// Diagnostics row for one ring member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub engaged: bool,
    pub sources: Vec<ParticipantId>,
    pub level: ActivationLevel,
    pub suppressed: bool,
    pub channel: ChannelStatus,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub ring: Vec<ParticipantId>,
    pub observers: Vec<ParticipantId>,
    pub participants: Vec<ParticipantSnapshot>,
}

impl EngineSnapshot {
    /// Members currently feeling feedback.
    pub fn vibrating(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| matches!(p.channel, ChannelStatus::Running(_)))
            .map(|p| p.id)
            .collect()
    }
}

/// The neighbor haptic coordination engine.
///
/// One instance per ring. The registry is shared explicitly so independent
/// rings never interfere.
pub struct CoordinationEngine {
    config: EngineConfig,
    registry: Arc<TriggerRegistry>,
    topology: RwLock<RingTopology>,
    participants: DashMap<ParticipantId, Participant>,
    observers: DashSet<ParticipantId>,
    engaged: DashSet<ParticipantId>,
    generations: AtomicU64,
}

impl std::fmt::Debug for CoordinationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationEngine")
            .field("ring", &self.ring())
            .field("observers", &self.observers.len())
            .field("engaged", &self.engaged.len())
            .finish()
    }
}

impl CoordinationEngine {
    /// Build an engine with its own registry. Fails if `config` does not
    /// validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(TriggerRegistry::new()))
    }

    pub fn with_registry(config: EngineConfig, registry: Arc<TriggerRegistry>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            topology: RwLock::new(RingTopology::new()),
            participants: DashMap::new(),
            observers: DashSet::new(),
            engaged: DashSet::new(),
            generations: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    fn read_topology(&self) -> RwLockReadGuard<'_, RingTopology> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topology(&self) -> RwLockWriteGuard<'_, RingTopology> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a participant with its feedback sink, without a detector.
    ///
    /// Proximity can then be fed through [`on_entered`](Self::on_entered) /
    /// [`on_left`](Self::on_left). Rank 0 joins as an observer: accepted, but
    /// kept out of the ring and the registry.
    pub fn join(&self, rank: u32, sink: Arc<dyn ActuationSink>) -> Result<ParticipantId> {
        self.admit(rank, sink).map(|(id, _)| id)
    }

    /// Join and return the generation assigned to this incarnation
    /// (`None` for observers).
    fn admit(
        &self,
        rank: u32,
        sink: Arc<dyn ActuationSink>,
    ) -> Result<(ParticipantId, Option<u64>)> {
        let id = ParticipantId::from_rank(rank);
        if id.is_observer() {
            self.observers.insert(id);
            info!(%id, "Observer joined");
            return Ok((id, None));
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::new(ActuationChannel::new(id, sink, self.config.cadence.clone()));
        let mut topology = self.write_topology();

        match self.participants.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(rank, "Join rejected: rank already in ring");
                return Err(HapticError::DuplicateRank { rank });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Participant {
                    channel: channel.clone(),
                    generation,
                    listener: None,
                    detector: None,
                });
            }
        }
        self.registry.register_target(id, channel);

        if let Err(e) = topology.rebuild(self.member_ids()) {
            self.participants.remove(&id);
            self.registry.unregister_target(id);
            return Err(e);
        }
        self.reconcile(&topology);

        info!(%id, generation, ring_size = topology.len(), "Participant joined");
        Ok((id, Some(generation)))
    }

    /// Participant factory: join and start a detector polling `sensor`.
    ///
    /// Must be called from within a Tokio runtime. Observers get no detector.
    pub fn spawn_participant(
        self: &Arc<Self>,
        rank: u32,
        sensor: Arc<dyn ProximitySensor>,
        sink: Arc<dyn ActuationSink>,
    ) -> Result<ParticipantId> {
        let (id, Some(generation)) = self.admit(rank, sink)? else {
            return Ok(ParticipantId::from_rank(rank));
        };

        let listener: Arc<dyn ProximityListener> = Arc::new(DetectorListener {
            engine: Arc::downgrade(self),
            generation,
        });
        let handle = spawn_detector(
            id,
            sensor,
            Arc::downgrade(&listener),
            self.config.poll_interval(),
        );
        match self.participants.get_mut(&id) {
            Some(mut participant) if participant.generation == generation => {
                participant.listener = Some(listener);
                if let Some(previous) = participant.detector.replace(handle) {
                    previous.stop();
                }
            }
            _ => {
                debug!(%id, generation, "Participant gone before its detector started");
                handle.stop();
            }
        }
        Ok(id)
    }

    /// Remove a participant: release every edge it sourced, stop and forget
    /// its channel, rebuild the ring and stop its detector.
    pub fn leave(&self, rank: u32) -> Result<()> {
        let id = ParticipantId::from_rank(rank);
        if id.is_observer() {
            return match self.observers.remove(&id) {
                Some(_) => {
                    info!(%id, "Observer left");
                    Ok(())
                }
                None => Err(HapticError::UnknownParticipant(id)),
            };
        }

        let detector = {
            let mut topology = self.write_topology();
            let Some((_, participant)) = self.participants.remove(&id) else {
                return Err(HapticError::UnknownParticipant(id));
            };
            self.engaged.remove(&id);

            // Removing a member never introduces a duplicate.
            if let Err(e) = topology.rebuild(self.member_ids()) {
                warn!(%id, error = %e, "Ring rebuild failed on leave");
            }
            let released = self.registry.release_all_from(id);
            self.registry.unregister_target(id);
            self.reconcile(&topology);

            info!(%id, released = released.len(), ring_size = topology.len(), "Participant left");
            participant.detector
        };

        if let Some(detector) = detector {
            detector.stop();
        }
        Ok(())
    }

    /// Handle an `Entered` edge for `id`.
    pub fn on_entered(&self, id: ParticipantId) {
        let topology = self.read_topology();
        self.enter(&topology, id);
    }

    /// Handle a `Left` edge for `id`. Safe to call without a prior `Entered`.
    pub fn on_left(&self, id: ParticipantId) {
        let _topology = self.read_topology();
        self.exit(id);
    }

    /// Apply an edge from the detector spawned for `generation` of `id`,
    /// dropping it if that participant has since left or rejoined.
    fn on_detector_edge(&self, id: ParticipantId, generation: u64, edge: ProximityEdge) {
        let topology = self.read_topology();
        let current = self.participants.get(&id).map(|p| p.generation);
        if current != Some(generation) {
            debug!(%id, generation, current = ?current, ?edge, "Stale detector edge dropped");
            return;
        }
        match edge {
            ProximityEdge::Entered => self.enter(&topology, id),
            ProximityEdge::Left => self.exit(id),
        }
    }

    fn enter(&self, topology: &RingTopology, id: ParticipantId) {
        if !self.participants.contains_key(&id) {
            debug!(%id, "Entered from non-member ignored");
            return;
        }
        if !self.engaged.insert(id) {
            debug!(%id, "Duplicate entered ignored");
            return;
        }

        self.registry.suppress(id);
        let targets = self.activate_neighbors(topology, id);
        info!(%id, targets = ?targets, "Proximity entered");
    }

    fn exit(&self, id: ParticipantId) {
        let was_engaged = self.engaged.remove(&id).is_some();

        self.registry.unsuppress(id);
        let targets = self.registry.targets_of(id);
        for target in &targets {
            self.registry.request_release(id, *target);
        }

        if was_engaged {
            info!(%id, released = ?targets, "Proximity left");
        } else {
            debug!(%id, "Left without entered");
        }
    }

    /// Ask each distinct neighbor of `source` to activate at its tier.
    fn activate_neighbors(&self, topology: &RingTopology, source: ParticipantId) -> Vec<ParticipantId> {
        let neighbors = match topology.neighbors(source) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                debug!(%source, error = %e, "Skipping neighbor activation");
                return Vec::new();
            }
        };

        let mut targets = Vec::with_capacity(2);
        for neighbor in neighbors.distinct_excluding(source) {
            if let Some(intensity) = Intensity::for_neighbor(source, neighbor) {
                self.registry.request_activate(source, neighbor, intensity);
                targets.push(neighbor);
            }
        }
        targets
    }

    /// Re-resolve every engaged source against the current ring: release
    /// edges to former neighbors and activate new ones.
    fn reconcile(&self, topology: &RingTopology) {
        let engaged: Vec<ParticipantId> = self.engaged.iter().map(|id| *id).collect();
        for source in engaged {
            let wanted: Vec<ParticipantId> = topology
                .neighbors(source)
                .map(|n| n.distinct_excluding(source))
                .unwrap_or_default();

            for target in self.registry.targets_of(source) {
                if !wanted.contains(&target) {
                    self.registry.request_release(source, target);
                }
            }
            let activated = self.activate_neighbors(topology, source);
            debug!(%source, targets = ?activated, "Edges reconciled");
        }
    }

    fn member_ids(&self) -> Vec<ParticipantId> {
        self.participants.iter().map(|entry| *entry.key()).collect()
    }

    /// Current ring in rank order.
    pub fn ring(&self) -> Vec<ParticipantId> {
        self.read_topology().members().to_vec()
    }

    pub fn neighbors(&self, rank: u32) -> Result<Neighbors> {
        self.read_topology().neighbors(ParticipantId::from_rank(rank))
    }

    pub fn contains(&self, rank: u32) -> bool {
        let id = ParticipantId::from_rank(rank);
        self.participants.contains_key(&id) || self.observers.contains(&id)
    }

    pub fn is_engaged(&self, id: ParticipantId) -> bool {
        self.engaged.contains(&id)
    }

    pub fn channel_status(&self, id: ParticipantId) -> Option<ChannelStatus> {
        self.participants.get(&id).map(|p| p.channel.status())
    }

    pub fn channel(&self, id: ParticipantId) -> Option<Arc<ActuationChannel>> {
        self.participants.get(&id).map(|p| p.channel.clone())
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let ring = self.ring();
        let targets = self.registry.snapshot();

        let participants = ring
            .iter()
            .map(|id| {
                let target = targets.iter().find(|t| t.target == *id);
                ParticipantSnapshot {
                    id: *id,
                    engaged: self.is_engaged(*id),
                    sources: target.map(|t| t.sources.clone()).unwrap_or_default(),
                    level: target.map(|t| t.level).unwrap_or_default(),
                    suppressed: target.is_some_and(|t| t.suppressed),
                    channel: self.channel_status(*id).unwrap_or_default(),
                }
            })
            .collect();

        let mut observers: Vec<ParticipantId> = self.observers.iter().map(|id| *id).collect();
        observers.sort_unstable();

        EngineSnapshot {
            ring,
            observers,
            participants,
        }
    }

    /// Stop every detector and wait for their final edges.
    pub async fn shutdown(&self) {
        let handles: Vec<DetectorHandle> = self
            .participants
            .iter_mut()
            .filter_map(|mut entry| entry.value_mut().detector.take())
            .collect();
        debug!(detectors = handles.len(), "Shutting down detectors");
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Routes one detector's edges back to the engine, tagged with the
/// generation the detector was spawned for.
struct DetectorListener {
    engine: Weak<CoordinationEngine>,
    generation: u64,
}

impl ProximityListener for DetectorListener {
    fn on_proximity(&self, owner: ParticipantId, edge: ProximityEdge) {
        if let Some(engine) = self.engine.upgrade() {
            engine.on_detector_edge(owner, self.generation, edge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::NullSink;
    use crate::sensing::ManualSensor;
    use std::time::Duration;

    fn engine_with(ranks: &[u32]) -> CoordinationEngine {
        let engine = CoordinationEngine::new(EngineConfig::default()).unwrap();
        for rank in ranks {
            engine.join(*rank, Arc::new(NullSink)).unwrap();
        }
        engine
    }

    fn id(rank: u32) -> ParticipantId {
        ParticipantId::from_rank(rank)
    }

    #[test]
    fn test_join_builds_ring_and_rejects_duplicates() {
        let engine = engine_with(&[3, 1, 2]);
        assert_eq!(engine.ring(), vec![id(1), id(2), id(3)]);

        let err = engine.join(2, Arc::new(NullSink)).unwrap_err();
        assert!(matches!(err, HapticError::DuplicateRank { rank: 2 }));
        assert_eq!(engine.ring(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_observer_kept_out_of_ring() {
        let engine = engine_with(&[0, 1, 2]);
        assert_eq!(engine.ring(), vec![id(1), id(2)]);
        assert!(engine.contains(0));
        assert!(!engine.registry().is_registered(id(0)));
        engine.leave(0).unwrap();
        assert!(!engine.contains(0));
    }

    #[test]
    fn test_entered_suppresses_own_channel() {
        let engine = engine_with(&[1, 2, 3]);
        engine.on_entered(id(1));
        assert_eq!(engine.channel_status(id(2)), Some(ChannelStatus::Running(Intensity::Strong)));

        // 2 is being triggered by 1, then engages itself.
        engine.on_entered(id(2));
        assert_eq!(engine.channel_status(id(2)), Some(ChannelStatus::Stopped));
        assert!(engine.registry().is_active(id(2)));

        engine.on_left(id(2));
        assert_eq!(engine.channel_status(id(2)), Some(ChannelStatus::Running(Intensity::Strong)));
    }

    #[test]
    fn test_duplicate_entered_is_ignored() {
        let engine = engine_with(&[1, 2, 3]);
        engine.on_entered(id(2));
        let before = engine.registry().stats().activate_requests;
        engine.on_entered(id(2));
        assert_eq!(engine.registry().stats().activate_requests, before);
    }

    #[test]
    fn test_join_reconciles_engaged_edges() {
        let engine = engine_with(&[1, 3]);
        engine.on_entered(id(1));
        assert_eq!(engine.registry().targets_of(id(1)), vec![id(3)]);

        // 2 slots in between 1 and 3.
        engine.join(2, Arc::new(NullSink)).unwrap();
        assert_eq!(engine.registry().targets_of(id(1)), vec![id(2), id(3)]);

        engine.join(4, Arc::new(NullSink)).unwrap();
        assert_eq!(engine.registry().targets_of(id(1)), vec![id(2), id(4)]);
        assert!(!engine.registry().is_active(id(3)));
        assert_eq!(engine.channel_status(id(3)), Some(ChannelStatus::Stopped));
    }

    #[test]
    fn test_leave_unknown_participant() {
        let engine = engine_with(&[1]);
        assert!(matches!(
            engine.leave(7),
            Err(HapticError::UnknownParticipant(p)) if p == id(7)
        ));
    }

    #[test]
    fn test_snapshot_reports_vibrating_members() {
        let engine = engine_with(&[1, 2, 3]);
        engine.on_entered(id(2));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.vibrating(), vec![id(1), id(3)]);
        let me = snapshot.participants.iter().find(|p| p.id == id(2)).unwrap();
        assert!(me.engaged);
        assert!(me.suppressed);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.poll_interval_ms = 0;
        assert!(matches!(
            CoordinationEngine::new(config),
            Err(HapticError::InvalidConfig(_))
        ));

        let mut config = EngineConfig::default();
        config.cadence.strong.pulse_interval_ms = 0;
        assert!(matches!(
            CoordinationEngine::with_registry(config, Arc::new(TriggerRegistry::new())),
            Err(HapticError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_detector_cannot_release_rejoined_participant() {
        let engine = Arc::new(engine_with(&[1, 3]));
        let sensor = Arc::new(ManualSensor::new("manual-2"));
        sensor.set_near(true);
        engine.spawn_participant(2, sensor, Arc::new(NullSink)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(engine.is_engaged(id(2)));

        engine.leave(2).unwrap();
        engine.join(2, Arc::new(NullSink)).unwrap();
        engine.on_entered(id(2));
        assert_eq!(engine.registry().targets_of(id(2)), vec![id(1), id(3)]);

        // The old detector now sees its shutdown and emits its final left.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.is_engaged(id(2)));
        assert_eq!(engine.registry().targets_of(id(2)), vec![id(1), id(3)]);
        assert_eq!(
            engine.channel_status(id(3)),
            Some(ChannelStatus::Running(Intensity::Strong))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_respawned_participant_keeps_its_own_edges() {
        let engine = Arc::new(engine_with(&[1, 3]));
        let first = Arc::new(ManualSensor::new("manual-2a"));
        first.set_near(true);
        engine.spawn_participant(2, first, Arc::new(NullSink)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        engine.leave(2).unwrap();
        let second = Arc::new(ManualSensor::new("manual-2b"));
        second.set_near(true);
        engine.spawn_participant(2, second, Arc::new(NullSink)).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(engine.is_engaged(id(2)));
        assert_eq!(engine.registry().targets_of(id(2)), vec![id(1), id(3)]);
        engine.shutdown().await;
        assert!(!engine.is_engaged(id(2)));
    }
}
