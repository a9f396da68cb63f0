//! MembershipActor: serializes the external join/leave feed.
//!
//! Join and leave notifications can arrive from anywhere (network callbacks,
//! a host loop, tests). Routing them through one mailbox applies them to the
//! engine one at a time, in arrival order, and lets interested actors follow
//! the ring through broadcasts.
//!
//! ```text
//! ParticipantJoined ──▶ MembershipActor ──spawn_participant / join──▶ CoordinationEngine
//! ParticipantLeft   ──▶       │        ──leave──────────────────────▶
//!                             ├── MembershipChanged (broadcast) on success
//!                             └── MembershipRejected (broadcast) on error
//! RequestSnapshot   ──▶ MembershipActor ──SnapshotReport (broadcast)
//! ```

use std::sync::Arc;

use acton_reactive::prelude::*;

use crate::engine::CoordinationEngine;
use crate::messages::{
    MembershipChange, MembershipChanged, MembershipRejected, ParticipantJoined, ParticipantLeft,
    RequestSnapshot, SnapshotReport,
};
use crate::participant::ParticipantId;

/// Actor state for MembershipActor.
#[derive(Default, Clone)]
pub struct MembershipActorState {
    engine: Option<Arc<CoordinationEngine>>,
    /// Changes applied since start
    applied: usize,
    /// Changes rejected since start
    rejected: usize,
}

impl std::fmt::Debug for MembershipActorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipActorState")
            .field("has_engine", &self.engine.is_some())
            .field("applied", &self.applied)
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// Actor that applies membership changes to a [`CoordinationEngine`].
pub struct MembershipActor;

impl MembershipActor {
    /// Spawn the actor for `engine` in the given runtime.
    ///
    /// Joins and leaves are sent directly to the returned handle.
    pub async fn spawn(runtime: &mut ActorRuntime, engine: Arc<CoordinationEngine>) -> ActorHandle {
        let mut actor =
            runtime.new_actor_with_name::<MembershipActorState>("MembershipActor".to_string());
        actor.model.engine = Some(engine);

        actor.mutate_on::<ParticipantJoined>(|actor, context| {
            let msg = context.message().clone();
            let broker = actor.broker().clone();

            let Some(engine) = actor.model.engine.clone() else {
                return Reply::ready();
            };
            let result = match msg.sensor {
                Some(sensor) => engine.spawn_participant(msg.rank, sensor, msg.sink),
                None => engine.join(msg.rank, msg.sink),
            };

            match result {
                Ok(id) => {
                    actor.model.applied += 1;
                    let ring = engine.ring();
                    tracing::debug!(%id, ring_size = ring.len(), "MembershipActor: join applied");
                    Reply::pending(async move {
                        broker
                            .broadcast(MembershipChanged {
                                change: MembershipChange::Joined(id),
                                ring,
                            })
                            .await;
                    })
                }
                Err(e) => {
                    actor.model.rejected += 1;
                    tracing::warn!(rank = msg.rank, error = %e, "MembershipActor: join rejected");
                    let rejected = MembershipRejected {
                        rank: msg.rank,
                        reason: e.to_string(),
                    };
                    Reply::pending(async move {
                        broker.broadcast(rejected).await;
                    })
                }
            }
        });

        actor.mutate_on::<ParticipantLeft>(|actor, context| {
            let rank = context.message().rank;
            let broker = actor.broker().clone();

            let Some(engine) = actor.model.engine.clone() else {
                return Reply::ready();
            };

            match engine.leave(rank) {
                Ok(()) => {
                    actor.model.applied += 1;
                    let ring = engine.ring();
                    tracing::debug!(rank, ring_size = ring.len(), "MembershipActor: leave applied");
                    Reply::pending(async move {
                        broker
                            .broadcast(MembershipChanged {
                                change: MembershipChange::Left(ParticipantId::from_rank(rank)),
                                ring,
                            })
                            .await;
                    })
                }
                Err(e) => {
                    actor.model.rejected += 1;
                    tracing::warn!(rank, error = %e, "MembershipActor: leave rejected");
                    let rejected = MembershipRejected {
                        rank,
                        reason: e.to_string(),
                    };
                    Reply::pending(async move {
                        broker.broadcast(rejected).await;
                    })
                }
            }
        });

        actor.act_on::<RequestSnapshot>(|actor, _context| {
            let broker = actor.broker().clone();
            let Some(engine) = actor.model.engine.clone() else {
                return Reply::ready();
            };
            let report = SnapshotReport {
                snapshot: engine.snapshot(),
            };

            Reply::pending(async move {
                broker.broadcast(report).await;
            })
        });

        actor.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::NullSink;
    use crate::config::EngineConfig;
    use acton_reactive::prelude::ActonApp;

    #[tokio::test]
    async fn test_membership_actor_applies_joins_in_order() {
        let mut runtime = ActonApp::launch_async().await;
        let engine = Arc::new(CoordinationEngine::new(EngineConfig::default()).unwrap());
        let handle = MembershipActor::spawn(&mut runtime, engine.clone()).await;

        for rank in [3, 1, 2] {
            handle
                .send(ParticipantJoined {
                    rank,
                    sink: Arc::new(NullSink),
                    sensor: None,
                })
                .await;
        }
        handle.send(ParticipantLeft { rank: 3 }).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(
            engine.ring(),
            vec![ParticipantId::from_rank(1), ParticipantId::from_rank(2)]
        );

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_membership_actor_survives_rejected_join() {
        let mut runtime = ActonApp::launch_async().await;
        let engine = Arc::new(CoordinationEngine::new(EngineConfig::default()).unwrap());
        let handle = MembershipActor::spawn(&mut runtime, engine.clone()).await;

        for rank in [1, 1, 2] {
            handle
                .send(ParticipantJoined {
                    rank,
                    sink: Arc::new(NullSink),
                    sensor: None,
                })
                .await;
        }
        handle.send(ParticipantLeft { rank: 9 }).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(engine.ring().len(), 2);

        let _ = runtime.shutdown_all().await;
    }
}
