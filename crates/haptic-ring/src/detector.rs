//! ProximityDetector: turns a sampled proximity boolean into entered/left edges.
//!
//! ```text
//!            near
//!   Clear ─────────▶ Engaged   (emits Entered)
//!     ▲                 │
//!     └─────────────────┘      (emits Left)
//!        lost / sensor error / shutdown
//! ```
//!
//! Repeated "still near" samples do not re-fire. A sensor error while `Clear`
//! keeps the detector `Clear`; a sensor error while `Engaged` counts as loss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace, warn};

use crate::participant::ParticipantId;
use crate::sensing::ProximitySensor;

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    #[default]
    Clear,
    Engaged,
}

/// Edge emitted on a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityEdge {
    Entered,
    Left,
}

/// Receiver of detector edges. Implemented by the coordination engine.
pub trait ProximityListener: Send + Sync {
    fn on_proximity(&self, owner: ParticipantId, edge: ProximityEdge);
}

/// Edge-triggered state machine for one participant.
#[derive(Debug, Clone)]
pub struct ProximityDetector {
    owner: ParticipantId,
    state: DetectorState,
}

impl ProximityDetector {
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            owner,
            state: DetectorState::Clear,
        }
    }

    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Feed one sensor sample. Returns the edge, if this sample caused one.
    pub fn observe(&mut self, sample: anyhow::Result<bool>) -> Option<ProximityEdge> {
        let near = match sample {
            Ok(near) => near,
            Err(e) => {
                if self.state == DetectorState::Engaged {
                    warn!(owner = %self.owner, error = %e, "Sensor failed while engaged, treating as loss");
                } else {
                    trace!(owner = %self.owner, error = %e, "Sensor unavailable");
                }
                false
            }
        };

        match (self.state, near) {
            (DetectorState::Clear, true) => {
                self.state = DetectorState::Engaged;
                Some(ProximityEdge::Entered)
            }
            (DetectorState::Engaged, false) => {
                self.state = DetectorState::Clear;
                Some(ProximityEdge::Left)
            }
            _ => None,
        }
    }

    /// Force the detector back to `Clear`, returning the synthetic `Left` if
    /// it was engaged.
    pub fn reset(&mut self) -> Option<ProximityEdge> {
        self.observe(Ok(false))
    }
}

/// Handle to a running detector task.
pub struct DetectorHandle {
    owner: ParticipantId,
    engaged: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle")
            .field("owner", &self.owner)
            .field("engaged", &self.is_engaged())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl DetectorHandle {
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the task to stop without waiting. It emits a final `Left` if engaged.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the task and wait until its final `Left` has been delivered.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            debug!(owner = %self.owner, error = %e, "Detector task ended abnormally");
        }
    }
}

/// Spawn the polling task for `owner`.
///
/// The task samples `sensor` every `poll_interval` and forwards edges to
/// `listener`. It ends when shut down through the handle or when the
/// listener has been dropped. Must be called from within a Tokio runtime.
pub fn spawn_detector(
    owner: ParticipantId,
    sensor: Arc<dyn ProximitySensor>,
    listener: Weak<dyn ProximityListener>,
    poll_interval: Duration,
) -> DetectorHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let engaged = Arc::new(AtomicBool::new(false));
    let flag = engaged.clone();

    let task = tokio::spawn(async move {
        let mut detector = ProximityDetector::new(owner);
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(%owner, sensor = sensor.name(), interval_ms = poll_interval.as_millis() as u64, "Detector started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let Some(edge) = detector.observe(sensor.sample()) else {
                        continue;
                    };
                    flag.store(detector.state() == DetectorState::Engaged, Ordering::SeqCst);
                    let Some(listener) = listener.upgrade() else {
                        debug!(%owner, "Listener gone, detector exiting");
                        return;
                    };
                    debug!(%owner, ?edge, "Proximity edge");
                    listener.on_proximity(owner, edge);
                }
            }
        }

        if let Some(edge) = detector.reset() {
            flag.store(false, Ordering::SeqCst);
            if let Some(listener) = listener.upgrade() {
                debug!(%owner, "Detector stopping while engaged, emitting final left");
                listener.on_proximity(owner, edge);
            }
        }
        debug!(%owner, "Detector stopped");
    });

    DetectorHandle {
        owner,
        engaged,
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}
