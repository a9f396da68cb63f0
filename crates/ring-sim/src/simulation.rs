//! Ring simulation: participants on a circle, one interactive object orbiting
//! past them.
//!
//! ```text
//!            p01
//!        p04  ·  p02        ● orbits the circle at `orbit_speed` rad/s;
//!            p03            whoever it passes within the detection radius
//!                           engages, and that participant's neighbors vibrate
//! ```
//!
//! Membership flows through the MembershipActor like an external join/leave
//! feed would; proximity comes from spatial sensors reading the shared scene.

use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::{Duration, Instant};

use acton_reactive::prelude::*;
use anyhow::{Result, anyhow, bail};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use haptic_ring::actors::MembershipActor;
use haptic_ring::messages::{MembershipChange, ParticipantJoined, ParticipantLeft};
use haptic_ring::{
    ChannelStatus, CoordinationEngine, EngineConfig, EngineSnapshot, NullSink, OBSERVER_RANK,
    ParticipantId, Position, Scene, SharedScene, SpatialProximitySensor,
};

use crate::membership_watcher::{MembershipEvent, MembershipWatcher};
use crate::results::{MembershipRecord, SimulationResult, TimelineEntry};
use crate::sink::{LoggingSink, PulseCounts};

/// Radius of the circle participants stand on.
pub const RING_RADIUS: f32 = 1.0;

/// Simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Ring members, ranked 1..=participants
    pub participants: u32,
    /// Also join an observer (rank 0)
    pub observer: bool,
    pub duration_ms: u64,
    /// Scene update interval
    pub step_ms: u64,
    /// Angular speed of the object (radians per second)
    pub orbit_speed: f32,
    /// Have one participant leave a third of the way in and rejoin at two thirds
    pub churn: bool,
    pub seed: Option<u64>,
    pub engine: EngineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            participants: 4,
            observer: false,
            duration_ms: 10_000,
            step_ms: 50,
            orbit_speed: 1.0,
            churn: false,
            seed: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Position of a participant's seat on the circle.
pub fn seat(rank: u32, participants: u32) -> Position {
    let angle = TAU * (rank.saturating_sub(1)) as f32 / participants.max(1) as f32;
    Position::new(RING_RADIUS * angle.cos(), RING_RADIUS * angle.sin(), 0.0)
}

/// Runs one simulation.
pub struct Simulation {
    config: SimulationConfig,
}

struct Churn {
    rank: u32,
    leave_at: u64,
    rejoin_at: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<SimulationResult> {
        let config = &self.config;
        if config.participants == 0 {
            bail!("need at least one participant");
        }
        if config.step_ms == 0 {
            bail!("step_ms must be positive");
        }

        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut angle: f32 = rng.random_range(0.0..TAU);

        let steps = config.duration_ms / config.step_ms;
        let churn = (config.churn && config.participants >= 2).then(|| Churn {
            rank: rng.random_range(1..=config.participants),
            leave_at: steps / 3,
            rejoin_at: 2 * steps / 3,
        });

        info!(
            seed,
            participants = config.participants,
            observer = config.observer,
            steps,
            churn = churn.as_ref().map(|c| c.rank),
            "Starting ring simulation"
        );

        let engine = Arc::new(CoordinationEngine::new(config.engine.clone())?);
        let mut scene = Scene::new();
        let object = scene.add_object(
            config.engine.detection.target_tag.clone(),
            Position::new(RING_RADIUS * angle.cos(), RING_RADIUS * angle.sin(), 0.0),
        );
        for rank in 1..=config.participants {
            scene.place_participant(ParticipantId::from_rank(rank), seat(rank, config.participants));
        }
        let scene = scene.shared();

        let mut runtime = ActonApp::launch_async().await;
        let (tx, mut rx) = mpsc::channel::<MembershipEvent>(256);
        MembershipWatcher::new(tx).spawn(&mut runtime).await;
        let membership = MembershipActor::spawn(&mut runtime, engine.clone()).await;

        let started = Instant::now();
        let mut records = Vec::new();
        let mut sinks: BTreeMap<u32, Vec<Arc<LoggingSink>>> = BTreeMap::new();

        let mut expected = 0usize;
        if config.observer {
            membership
                .send(ParticipantJoined {
                    rank: OBSERVER_RANK,
                    sink: Arc::new(NullSink),
                    sensor: None,
                })
                .await;
            expected += 1;
        }
        for rank in 1..=config.participants {
            self.send_join(&membership, &scene, &mut sinks, rank).await;
            expected += 1;
        }
        self.await_membership(&mut rx, &mut records, started, expected)
            .await?;

        let step = Duration::from_millis(config.step_ms);
        let mut timeline: Vec<TimelineEntry> = Vec::new();

        for i in 0..steps {
            angle = (angle + config.orbit_speed * step.as_secs_f32()) % TAU;
            scene
                .write()
                .map_err(|e| anyhow!("Lock error: {}", e))?
                .move_object(
                    object,
                    Position::new(RING_RADIUS * angle.cos(), RING_RADIUS * angle.sin(), 0.0),
                );

            if let Some(churn) = &churn {
                if i == churn.leave_at {
                    info!(rank = churn.rank, "Churn: participant leaving");
                    membership.send(ParticipantLeft { rank: churn.rank }).await;
                } else if i == churn.rejoin_at {
                    info!(rank = churn.rank, "Churn: participant rejoining");
                    self.send_join(&membership, &scene, &mut sinks, churn.rank)
                        .await;
                }
            }

            tokio::time::sleep(step).await;

            while let Ok(event) = rx.try_recv() {
                records.push(record(event, started));
            }

            let entry = timeline_entry(&engine.snapshot(), started);
            if timeline.last().is_none_or(|last| !last.same_state(&entry)) {
                debug!(
                    at_ms = entry.at_ms,
                    engaged = ?entry.engaged,
                    feedback = ?entry.feedback,
                    "Ring state changed"
                );
                timeline.push(entry);
            }
        }

        engine.shutdown().await;
        let final_snapshot = engine.snapshot();
        let registry = engine.registry().stats();
        let _ = runtime.shutdown_all().await;

        let pulses = sinks
            .into_iter()
            .map(|(rank, sinks)| {
                let total = sinks
                    .iter()
                    .map(|sink| sink.counts())
                    .fold(PulseCounts::default(), |acc, counts| acc + counts);
                (rank, total)
            })
            .collect();

        info!(
            entries = timeline.len(),
            commands = registry.commands_emitted,
            "Simulation finished"
        );

        Ok(SimulationResult {
            seed,
            participants: config.participants,
            observer: config.observer,
            duration_ms: config.duration_ms,
            churned: churn.map(|c| c.rank),
            membership: records,
            timeline,
            pulses,
            registry,
            final_snapshot,
        })
    }

    async fn send_join(
        &self,
        membership: &ActorHandle,
        scene: &SharedScene,
        sinks: &mut BTreeMap<u32, Vec<Arc<LoggingSink>>>,
        rank: u32,
    ) {
        let id = ParticipantId::from_rank(rank);
        let sink = Arc::new(LoggingSink::new(id));
        sinks.entry(rank).or_default().push(sink.clone());
        let sensor = SpatialProximitySensor::new(id, scene.clone(), &self.config.engine.detection);
        membership
            .send(ParticipantJoined {
                rank,
                sink,
                sensor: Some(Arc::new(sensor)),
            })
            .await;
    }

    async fn await_membership(
        &self,
        rx: &mut mpsc::Receiver<MembershipEvent>,
        records: &mut Vec<MembershipRecord>,
        started: Instant,
        expected: usize,
    ) -> Result<()> {
        let deadline = Duration::from_secs(5);
        for _ in 0..expected {
            match tokio::time::timeout(deadline, rx.recv()).await {
                Ok(Some(event)) => records.push(record(event, started)),
                Ok(None) => bail!("membership feed closed"),
                Err(_) => {
                    warn!(received = records.len(), expected, "Timed out waiting for joins");
                    bail!("timed out waiting for participants to join");
                }
            }
        }
        Ok(())
    }
}

fn record(event: MembershipEvent, started: Instant) -> MembershipRecord {
    let at_ms = started.elapsed().as_millis() as u64;
    match event {
        MembershipEvent::Changed(changed) => {
            let (kind, id) = match changed.change {
                MembershipChange::Joined(id) => ("joined", id),
                MembershipChange::Left(id) => ("left", id),
            };
            MembershipRecord {
                at_ms,
                kind: kind.to_string(),
                rank: id.rank(),
                ring: changed.ring,
            }
        }
        MembershipEvent::Rejected(rejected) => MembershipRecord {
            at_ms,
            kind: "rejected".to_string(),
            rank: rejected.rank,
            ring: Vec::new(),
        },
    }
}

fn timeline_entry(snapshot: &EngineSnapshot, started: Instant) -> TimelineEntry {
    TimelineEntry {
        at_ms: started.elapsed().as_millis() as u64,
        engaged: snapshot
            .participants
            .iter()
            .filter(|p| p.engaged)
            .map(|p| p.id)
            .collect(),
        feedback: snapshot
            .participants
            .iter()
            .filter_map(|p| match p.channel {
                ChannelStatus::Running(intensity) => Some((p.id, intensity)),
                ChannelStatus::Stopped => None,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(participants: u32) -> SimulationConfig {
        let mut engine = EngineConfig::default();
        engine.poll_interval_ms = 20;
        SimulationConfig {
            participants,
            observer: true,
            duration_ms: 1500,
            step_ms: 20,
            orbit_speed: TAU,
            churn: false,
            seed: Some(42),
            engine,
        }
    }

    #[test]
    fn test_seats_are_spread_on_the_circle() {
        let a = seat(1, 4);
        let b = seat(3, 4);
        assert!((a.distance(&b) - 2.0 * RING_RADIUS).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_orbit_triggers_neighbors() {
        let result = Simulation::new(fast_config(3)).run().await.unwrap();

        assert_eq!(result.final_snapshot.ring.len(), 3);
        assert_eq!(result.final_snapshot.observers, vec![ParticipantId::from_rank(0)]);
        assert!(result.activations() > 0);
        assert!(result.registry.commands_emitted > 0);
        // Detectors were shut down, so nothing is left vibrating.
        assert!(result.final_snapshot.vibrating().is_empty());
    }

    #[tokio::test]
    async fn test_churn_leaves_and_rejoins() {
        let mut config = fast_config(4);
        config.churn = true;
        let result = Simulation::new(config).run().await.unwrap();

        let churned = result.churned.unwrap();
        let kinds: Vec<&str> = result
            .membership
            .iter()
            .filter(|r| r.rank == churned)
            .map(|r| r.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["joined", "left", "joined"]);
        assert_eq!(result.final_snapshot.ring.len(), 4);
    }

    #[tokio::test]
    async fn test_rejects_empty_ring() {
        let mut config = fast_config(1);
        config.participants = 0;
        assert!(Simulation::new(config).run().await.is_err());
    }
}
