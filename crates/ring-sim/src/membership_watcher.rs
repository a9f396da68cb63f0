//! Watcher actor for receiving MembershipChanged broadcasts.
//!
//! Bridges the engine's actor-based membership feed with the simulation loop
//! by forwarding every MembershipChanged to an mpsc channel.

use acton_reactive::prelude::*;
use tokio::sync::mpsc;

use haptic_ring::messages::{MembershipChanged, MembershipRejected};

/// What the watcher forwards.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    Changed(MembershipChanged),
    Rejected(MembershipRejected),
}

/// State for the membership watcher actor.
#[derive(Default, Clone)]
pub struct MembershipWatcherState {
    /// Channel sender for forwarding membership events
    pub tx: Option<mpsc::Sender<MembershipEvent>>,
}

impl std::fmt::Debug for MembershipWatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipWatcherState")
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Actor that subscribes to membership broadcasts and forwards them.
pub struct MembershipWatcher {
    tx: mpsc::Sender<MembershipEvent>,
}

impl MembershipWatcher {
    pub fn new(tx: mpsc::Sender<MembershipEvent>) -> Self {
        Self { tx }
    }

    /// Spawn the actor in the runtime. Must run before the membership feed
    /// starts, or early broadcasts are missed.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor =
            runtime.new_actor_with_name::<MembershipWatcherState>("MembershipWatcher".to_string());
        actor.model.tx = Some(self.tx);

        actor.handle().subscribe::<MembershipChanged>().await;
        actor.handle().subscribe::<MembershipRejected>().await;

        actor.mutate_on::<MembershipChanged>(|actor, context| {
            let event = MembershipEvent::Changed(context.message().clone());
            let tx = actor.model.tx.clone();

            Reply::pending(async move {
                if let Some(tx) = tx {
                    // Receiver may have been dropped
                    let _ = tx.send(event).await;
                }
            })
        });

        actor.mutate_on::<MembershipRejected>(|actor, context| {
            let event = MembershipEvent::Rejected(context.message().clone());
            let tx = actor.model.tx.clone();

            Reply::pending(async move {
                if let Some(tx) = tx {
                    let _ = tx.send(event).await;
                }
            })
        });

        actor.start().await
    }
}
