//! TriggerRegistry: reference-counted activation of each participant's feedback.
//!
//! Every target keeps the set of sources currently asking it to vibrate, each
//! with the tier that source requested:
//!
//! ```text
//! target p03 ── sources { p02: Strong, p04: Normal } ── resolved: Strong
//! target p01 ── sources { }                           ── resolved: Inactive
//! ```
//!
//! The resolved tier is always recomputed from the live edge set (maximum
//! severity), so the outcome depends only on which edges exist, never on the
//! order requests arrived in.
//!
//! ## Serialization
//!
//! Targets live in a `DashMap`. Each operation holds the target's entry lock
//! for the whole read-modify-emit step, so requests on one target are applied
//! in a total order and actuator commands leave in that same order. Requests
//! on different targets proceed in parallel.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::actuation::Actuator;
use crate::participant::{ActivationLevel, Intensity, ParticipantId};

/// Activation state of one target.
struct TargetState {
    /// Active trigger edges: source -> requested tier
    edges: HashMap<ParticipantId, Intensity>,
    /// Held silent while the target is itself engaged
    suppressed: bool,
    /// Last command sent to the actuator (`None` = stopped)
    emitted: Option<Intensity>,
    actuator: Arc<dyn Actuator>,
}

impl TargetState {
    fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            edges: HashMap::new(),
            suppressed: false,
            emitted: None,
            actuator,
        }
    }

    fn resolved(&self) -> Option<Intensity> {
        self.edges.values().copied().max()
    }

    fn level(&self) -> ActivationLevel {
        self.resolved().into()
    }

    /// Bring the actuator in line with the edge set. Returns true if a
    /// command was sent.
    fn sync(&mut self, target: ParticipantId, commands: &AtomicU64) -> bool {
        let desired = if self.suppressed { None } else { self.resolved() };
        if desired == self.emitted {
            return false;
        }

        match desired {
            Some(intensity) => {
                self.actuator.start(intensity);
                info!(%target, %intensity, sources = self.edges.len(), "Target feedback on");
            }
            None => {
                self.actuator.stop();
                info!(%target, suppressed = self.suppressed, "Target feedback off");
            }
        }
        self.emitted = desired;
        commands.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Point-in-time view of one target, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub target: ParticipantId,
    pub sources: Vec<ParticipantId>,
    pub level: ActivationLevel,
    pub suppressed: bool,
}

/// Request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub activate_requests: u64,
    pub release_requests: u64,
    pub commands_emitted: u64,
}

/// Registry of trigger edges and per-target activation state.
///
/// Shared by reference (`Arc<TriggerRegistry>`) between the engine and every
/// detector task; there is no global instance.
#[derive(Default)]
pub struct TriggerRegistry {
    targets: DashMap<ParticipantId, TargetState>,
    activate_requests: AtomicU64,
    release_requests: AtomicU64,
    commands_emitted: AtomicU64,
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("targets", &self.targets.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `target` known to the registry with the actuator it drives.
    ///
    /// Re-registering replaces the actuator and keeps existing edges.
    pub fn register_target(&self, target: ParticipantId, actuator: Arc<dyn Actuator>) {
        match self.targets.entry(target) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                let state = existing.get_mut();
                if state.emitted.take().is_some() {
                    state.actuator.stop();
                    self.commands_emitted.fetch_add(1, Ordering::Relaxed);
                }
                state.actuator = actuator;
                state.sync(target, &self.commands_emitted);
                debug!(%target, "Target re-registered");
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(TargetState::new(actuator));
                debug!(%target, "Target registered");
            }
        }
    }

    /// Forget `target`, stopping its actuator if it was running.
    ///
    /// Edges it sourced on other targets are untouched; use
    /// [`release_all_from`](Self::release_all_from) for those.
    pub fn unregister_target(&self, target: ParticipantId) -> bool {
        let Some((_, state)) = self.targets.remove(&target) else {
            debug!(%target, "Unregister of unknown target ignored");
            return false;
        };
        if state.emitted.is_some() {
            state.actuator.stop();
            self.commands_emitted.fetch_add(1, Ordering::Relaxed);
        }
        debug!(%target, dropped_edges = state.edges.len(), "Target unregistered");
        true
    }

    /// Record that `source` wants `target` active at `intensity`.
    ///
    /// Returns the target's resolved level, or `None` if the target is unknown.
    pub fn request_activate(
        &self,
        source: ParticipantId,
        target: ParticipantId,
        intensity: Intensity,
    ) -> Option<ActivationLevel> {
        self.activate_requests.fetch_add(1, Ordering::Relaxed);
        let Some(mut state) = self.targets.get_mut(&target) else {
            debug!(%source, %target, "Activate for unknown target ignored");
            return None;
        };

        if state.edges.insert(source, intensity) == Some(intensity) {
            trace!(%source, %target, %intensity, "Duplicate activate");
            return Some(state.level());
        }
        state.sync(target, &self.commands_emitted);
        Some(state.level())
    }

    /// Withdraw `source`'s request on `target`.
    ///
    /// Releasing an edge that does not exist is a no-op. Returns the target's
    /// resolved level, or `None` if the target is unknown.
    pub fn request_release(
        &self,
        source: ParticipantId,
        target: ParticipantId,
    ) -> Option<ActivationLevel> {
        self.release_requests.fetch_add(1, Ordering::Relaxed);
        let Some(mut state) = self.targets.get_mut(&target) else {
            debug!(%source, %target, "Release for unknown target ignored");
            return None;
        };

        if state.edges.remove(&source).is_none() {
            debug!(%source, %target, "Release of absent edge ignored");
            return Some(state.level());
        }
        state.sync(target, &self.commands_emitted);
        Some(state.level())
    }

    /// Remove every edge sourced by `source`. Returns the affected targets.
    pub fn release_all_from(&self, source: ParticipantId) -> Vec<ParticipantId> {
        let mut affected = Vec::new();
        for mut entry in self.targets.iter_mut() {
            let target = *entry.key();
            let state = entry.value_mut();
            if state.edges.remove(&source).is_some() {
                self.release_requests.fetch_add(1, Ordering::Relaxed);
                state.sync(target, &self.commands_emitted);
                affected.push(target);
            }
        }
        affected.sort_unstable();
        if !affected.is_empty() {
            debug!(%source, targets = ?affected, "Released all edges from source");
        }
        affected
    }

    /// Hold `target`'s feedback off while it is itself engaged.
    pub fn suppress(&self, target: ParticipantId) {
        self.set_suppressed(target, true);
    }

    /// Let `target` feel its edges again.
    pub fn unsuppress(&self, target: ParticipantId) {
        self.set_suppressed(target, false);
    }

    fn set_suppressed(&self, target: ParticipantId, suppressed: bool) {
        let Some(mut state) = self.targets.get_mut(&target) else {
            debug!(%target, suppressed, "Suppression change for unknown target ignored");
            return;
        };
        if state.suppressed != suppressed {
            state.suppressed = suppressed;
            state.sync(target, &self.commands_emitted);
        }
    }

    pub fn is_active(&self, target: ParticipantId) -> bool {
        self.targets
            .get(&target)
            .is_some_and(|state| !state.edges.is_empty())
    }

    pub fn sources(&self, target: ParticipantId) -> BTreeSet<ParticipantId> {
        self.targets
            .get(&target)
            .map(|state| state.edges.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn resolved_intensity(&self, target: ParticipantId) -> ActivationLevel {
        self.targets
            .get(&target)
            .map(|state| state.level())
            .unwrap_or_default()
    }

    pub fn is_suppressed(&self, target: ParticipantId) -> bool {
        self.targets.get(&target).is_some_and(|state| state.suppressed)
    }

    pub fn is_registered(&self, target: ParticipantId) -> bool {
        self.targets.contains_key(&target)
    }

    pub fn is_triggering(&self, source: ParticipantId, target: ParticipantId) -> bool {
        self.targets
            .get(&target)
            .is_some_and(|state| state.edges.contains_key(&source))
    }

    /// Targets `source` currently holds an edge on, ascending.
    pub fn targets_of(&self, source: ParticipantId) -> Vec<ParticipantId> {
        let mut targets: Vec<ParticipantId> = self
            .targets
            .iter()
            .filter(|entry| entry.value().edges.contains_key(&source))
            .map(|entry| *entry.key())
            .collect();
        targets.sort_unstable();
        targets
    }

    /// Targets with at least one edge, ascending.
    pub fn active_targets(&self) -> Vec<ParticipantId> {
        let mut targets: Vec<ParticipantId> = self
            .targets
            .iter()
            .filter(|entry| !entry.value().edges.is_empty())
            .map(|entry| *entry.key())
            .collect();
        targets.sort_unstable();
        targets
    }

    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        let mut out: Vec<TargetSnapshot> = self
            .targets
            .iter()
            .map(|entry| {
                let state = entry.value();
                let mut sources: Vec<ParticipantId> = state.edges.keys().copied().collect();
                sources.sort_unstable();
                TargetSnapshot {
                    target: *entry.key(),
                    sources,
                    level: state.level(),
                    suppressed: state.suppressed,
                }
            })
            .collect();
        out.sort_unstable_by_key(|snap| snap.target);
        out
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            activate_requests: self.activate_requests.load(Ordering::Relaxed),
            release_requests: self.release_requests.load(Ordering::Relaxed),
            commands_emitted: self.commands_emitted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Command {
        Start(Intensity),
        Stop,
    }

    #[derive(Default)]
    struct RecordingActuator {
        commands: Mutex<Vec<Command>>,
    }

    impl RecordingActuator {
        fn commands(&self) -> Vec<Command> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl Actuator for RecordingActuator {
        fn start(&self, intensity: Intensity) {
            self.commands.lock().unwrap().push(Command::Start(intensity));
        }

        fn stop(&self) {
            self.commands.lock().unwrap().push(Command::Stop);
        }
    }

    fn p(rank: u32) -> ParticipantId {
        ParticipantId::from_rank(rank)
    }

    fn registry_with(ranks: &[u32]) -> (TriggerRegistry, HashMap<u32, Arc<RecordingActuator>>) {
        let registry = TriggerRegistry::new();
        let mut actuators = HashMap::new();
        for &rank in ranks {
            let actuator = Arc::new(RecordingActuator::default());
            registry.register_target(p(rank), actuator.clone());
            actuators.insert(rank, actuator);
        }
        (registry, actuators)
    }

    fn assert_active_iff_sources(registry: &TriggerRegistry, ranks: &[u32]) {
        for &rank in ranks {
            assert_eq!(
                registry.is_active(p(rank)),
                !registry.sources(p(rank)).is_empty(),
                "invariant broken for {}",
                p(rank)
            );
        }
    }

    #[test]
    fn test_activate_emits_single_start() {
        let (registry, actuators) = registry_with(&[1, 2]);
        let level = registry.request_activate(p(2), p(1), Intensity::Normal);
        assert_eq!(level, Some(ActivationLevel::Normal));
        assert!(registry.is_active(p(1)));
        assert_eq!(registry.sources(p(1)), BTreeSet::from([p(2)]));
        assert_eq!(actuators[&1].commands(), vec![Command::Start(Intensity::Normal)]);
    }

    #[test]
    fn test_activate_is_idempotent() {
        let (registry, actuators) = registry_with(&[1, 2]);
        registry.request_activate(p(2), p(1), Intensity::Strong);
        registry.request_activate(p(2), p(1), Intensity::Strong);
        assert_eq!(registry.sources(p(1)).len(), 1);
        assert_eq!(actuators[&1].commands(), vec![Command::Start(Intensity::Strong)]);

        registry.request_release(p(2), p(1));
        assert!(!registry.is_active(p(1)));
    }

    #[test]
    fn test_release_keeps_target_active_while_other_sources_remain() {
        let (registry, actuators) = registry_with(&[1, 2, 3]);
        registry.request_activate(p(1), p(2), Intensity::Strong);
        registry.request_activate(p(3), p(2), Intensity::Normal);

        registry.request_release(p(1), p(2));
        assert!(registry.is_active(p(2)));
        assert_eq!(registry.resolved_intensity(p(2)), ActivationLevel::Normal);

        registry.request_release(p(3), p(2));
        assert!(!registry.is_active(p(2)));
        assert_eq!(
            actuators[&2].commands(),
            vec![
                Command::Start(Intensity::Strong),
                Command::Start(Intensity::Normal),
                Command::Stop,
            ]
        );
    }

    #[test]
    fn test_adding_weaker_edge_sends_nothing() {
        let (registry, actuators) = registry_with(&[1, 2, 3]);
        registry.request_activate(p(1), p(2), Intensity::Strong);
        registry.request_activate(p(3), p(2), Intensity::Normal);
        assert_eq!(actuators[&2].commands(), vec![Command::Start(Intensity::Strong)]);
        assert_eq!(registry.resolved_intensity(p(2)), ActivationLevel::Strong);
    }

    #[test]
    fn test_reregister_moves_feedback_to_new_actuator() {
        let (registry, actuators) = registry_with(&[1, 2]);
        registry.request_activate(p(2), p(1), Intensity::Normal);
        assert!(registry.is_triggering(p(2), p(1)));
        assert!(!registry.is_triggering(p(1), p(2)));
        assert_eq!(registry.stats().commands_emitted, 1);

        let replacement = Arc::new(RecordingActuator::default());
        registry.register_target(p(1), replacement.clone());

        assert!(registry.is_triggering(p(2), p(1)));
        assert_eq!(
            actuators[&1].commands(),
            vec![Command::Start(Intensity::Normal), Command::Stop]
        );
        assert_eq!(replacement.commands(), vec![Command::Start(Intensity::Normal)]);
        // start, stop on the old actuator, start on the new one
        assert_eq!(registry.stats().commands_emitted, 3);
    }

    #[test]
    fn test_release_of_absent_edge_is_noop() {
        let (registry, actuators) = registry_with(&[1]);
        assert_eq!(registry.request_release(p(5), p(1)), Some(ActivationLevel::Inactive));
        assert!(actuators[&1].commands().is_empty());
    }

    #[test]
    fn test_unknown_target_is_ignored() {
        let (registry, _) = registry_with(&[1]);
        assert_eq!(registry.request_activate(p(1), p(9), Intensity::Normal), None);
        assert_eq!(registry.request_release(p(1), p(9)), None);
        assert!(!registry.is_active(p(9)));
        assert!(registry.sources(p(9)).is_empty());
    }

    #[test]
    fn test_order_independence() {
        #[derive(Clone, Copy)]
        enum Op {
            StrongFrom1,
            NormalFrom2,
            Release1,
        }
        // Every interleaving that keeps source 1's own activate before its release.
        let interleavings = [
            [Op::StrongFrom1, Op::NormalFrom2, Op::Release1],
            [Op::StrongFrom1, Op::Release1, Op::NormalFrom2],
            [Op::NormalFrom2, Op::StrongFrom1, Op::Release1],
        ];

        for ops in interleavings {
            let (registry, _) = registry_with(&[3]);
            for op in ops {
                match op {
                    Op::StrongFrom1 => {
                        registry.request_activate(p(1), p(3), Intensity::Strong);
                    }
                    Op::NormalFrom2 => {
                        registry.request_activate(p(2), p(3), Intensity::Normal);
                    }
                    Op::Release1 => {
                        registry.request_release(p(1), p(3));
                    }
                }
                assert_active_iff_sources(&registry, &[3]);
            }
            assert_eq!(registry.sources(p(3)), BTreeSet::from([p(2)]));
            assert_eq!(registry.resolved_intensity(p(3)), ActivationLevel::Normal);
        }
    }

    #[test]
    fn test_spurious_release_before_activate_does_not_cancel_it() {
        let (registry, _) = registry_with(&[3]);
        registry.request_release(p(1), p(3));
        registry.request_activate(p(1), p(3), Intensity::Strong);
        assert_eq!(registry.resolved_intensity(p(3)), ActivationLevel::Strong);
    }

    #[test]
    fn test_release_all_from_stops_each_emptied_target_once() {
        let (registry, actuators) = registry_with(&[1, 2, 3, 4]);
        registry.request_activate(p(2), p(1), Intensity::Normal);
        registry.request_activate(p(2), p(3), Intensity::Strong);
        registry.request_activate(p(4), p(3), Intensity::Normal);

        let affected = registry.release_all_from(p(2));
        assert_eq!(affected, vec![p(1), p(3)]);
        assert!(registry.targets_of(p(2)).is_empty());

        assert_eq!(
            actuators[&1].commands(),
            vec![Command::Start(Intensity::Normal), Command::Stop]
        );
        assert_eq!(
            actuators[&3].commands(),
            vec![Command::Start(Intensity::Strong), Command::Start(Intensity::Normal)]
        );
        assert_active_iff_sources(&registry, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_suppression_holds_feedback_without_losing_edges() {
        let (registry, actuators) = registry_with(&[1, 2]);
        registry.request_activate(p(2), p(1), Intensity::Normal);
        registry.suppress(p(1));
        assert!(registry.is_active(p(1)));
        assert!(registry.is_suppressed(p(1)));

        registry.request_activate(p(3), p(1), Intensity::Strong);
        registry.unsuppress(p(1));
        assert_eq!(
            actuators[&1].commands(),
            vec![
                Command::Start(Intensity::Normal),
                Command::Stop,
                Command::Start(Intensity::Strong),
            ]
        );
    }

    #[test]
    fn test_unregister_stops_running_target() {
        let (registry, actuators) = registry_with(&[1, 2]);
        registry.request_activate(p(2), p(1), Intensity::Normal);
        assert!(registry.unregister_target(p(1)));
        assert!(!registry.unregister_target(p(1)));
        assert_eq!(
            actuators[&1].commands(),
            vec![Command::Start(Intensity::Normal), Command::Stop]
        );
        assert!(!registry.is_registered(p(1)));
    }

    #[test]
    fn test_concurrent_sources_converge() {
        let (registry, _) = registry_with(&[100]);
        let registry = Arc::new(registry);
        let handles: Vec<_> = (1..=16u32)
            .map(|rank| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        registry.request_activate(p(rank), p(100), Intensity::Normal);
                        if rank % 2 == 0 {
                            registry.request_release(p(rank), p(100));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected: BTreeSet<ParticipantId> = (1..=16u32).filter(|r| r % 2 == 1).map(p).collect();
        assert_eq!(registry.sources(p(100)), expected);
        assert_eq!(registry.resolved_intensity(p(100)), ActivationLevel::Normal);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let (registry, _) = registry_with(&[3, 1, 2]);
        registry.request_activate(p(3), p(2), Intensity::Normal);
        registry.request_activate(p(1), p(2), Intensity::Strong);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[1].target, p(2));
        assert_eq!(snapshot[1].sources, vec![p(1), p(3)]);
        assert_eq!(snapshot[1].level, ActivationLevel::Strong);
    }
}
