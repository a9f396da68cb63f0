//! Actuation: the per-participant feedback channel and the physical sink seam.
//!
//! The registry drives targets through the [`Actuator`] trait. The production
//! implementation, [`ActuationChannel`], turns `start`/`stop` into a continuous
//! pulse cadence played on an [`ActuationSink`]:
//!
//! ```text
//! start(Normal) ──▶ [pulse ·150ms· pulse ·150ms· pulse ·150ms· pulse] ·300ms· repeat
//! start(Strong) ──▶ [pulse ·80ms· … ×6] ·200ms· repeat
//! stop()        ──▶ cadence task aborted
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::{CadenceConfig, CadencePattern};
use crate::participant::{Intensity, ParticipantId};

/// A single tactile pulse handed to the physical backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    pub intensity: Intensity,
    pub amplitude: f32,
    pub sharpness: f32,
}

/// Physical haptic backend.
///
/// Implementations must be cheap and non-blocking: `pulse` is called from the
/// cadence task on every beat.
pub trait ActuationSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether the device can actually vibrate. Unsupported sinks never
    /// receive pulses.
    fn is_supported(&self) -> bool {
        true
    }

    /// Play one pulse.
    fn pulse(&self, pulse: &Pulse);
}

/// Sink for devices without haptics: accepts everything, does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActuationSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn pulse(&self, _pulse: &Pulse) {}
}

/// Start/stop seam between the registry and a target's feedback channel.
pub trait Actuator: Send + Sync {
    fn start(&self, intensity: Intensity);
    fn stop(&self);
}

/// Whether a channel is currently producing feedback, and at which tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "intensity")]
pub enum ChannelStatus {
    #[default]
    Stopped,
    Running(Intensity),
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    /// `start` calls received, redundant ones included
    pub start_requests: u64,
    /// `stop` calls received, redundant ones included
    pub stop_requests: u64,
    /// Times a cadence was (re)started at a new tier
    pub cadence_starts: u64,
}

#[derive(Default)]
struct ChannelInner {
    status: ChannelStatus,
    task: Option<JoinHandle<()>>,
    stats: ChannelStats,
}

/// Feedback channel owned by one participant.
///
/// Redundant starts at the running tier are collapsed; a tier change restarts
/// the cadence immediately with a pulse, so the gap never exceeds one cycle.
pub struct ActuationChannel {
    owner: ParticipantId,
    sink: Arc<dyn ActuationSink>,
    cadence: CadenceConfig,
    inner: Mutex<ChannelInner>,
}

impl std::fmt::Debug for ActuationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuationChannel")
            .field("owner", &self.owner)
            .field("sink", &self.sink.name())
            .field("status", &self.status())
            .finish()
    }
}

impl ActuationChannel {
    pub fn new(owner: ParticipantId, sink: Arc<dyn ActuationSink>, cadence: CadenceConfig) -> Self {
        Self {
            owner,
            sink,
            cadence,
            inner: Mutex::new(ChannelInner::default()),
        }
    }

    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn status(&self) -> ChannelStatus {
        self.lock().status
    }

    pub fn stats(&self) -> ChannelStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_cadence(&self, intensity: Intensity) -> Option<JoinHandle<()>> {
        if !self.sink.is_supported() {
            trace!(owner = %self.owner, sink = self.sink.name(), "Sink unsupported, discarding start");
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(owner = %self.owner, "No async runtime, cadence not driven");
            return None;
        };
        let pattern = *self.cadence.pattern(intensity);
        let sink = self.sink.clone();
        Some(runtime.spawn(run_cadence(sink, pattern, intensity)))
    }
}

impl Actuator for ActuationChannel {
    fn start(&self, intensity: Intensity) {
        let mut inner = self.lock();
        inner.stats.start_requests += 1;
        if inner.status == ChannelStatus::Running(intensity) {
            return;
        }

        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.task = self.spawn_cadence(intensity);
        inner.status = ChannelStatus::Running(intensity);
        inner.stats.cadence_starts += 1;
        debug!(owner = %self.owner, %intensity, "Feedback started");
    }

    fn stop(&self) {
        let mut inner = self.lock();
        inner.stats.stop_requests += 1;
        if inner.status == ChannelStatus::Stopped {
            return;
        }

        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.status = ChannelStatus::Stopped;
        debug!(owner = %self.owner, "Feedback stopped");
    }
}

impl Drop for ActuationChannel {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = inner.task.take() {
            task.abort();
        }
    }
}

async fn run_cadence(sink: Arc<dyn ActuationSink>, pattern: CadencePattern, intensity: Intensity) {
    let pulse = Pulse {
        intensity,
        amplitude: pattern.amplitude,
        sharpness: pattern.sharpness,
    };
    let gap = Duration::from_millis(pattern.pulse_interval_ms);
    let rest = Duration::from_millis(pattern.rest_ms);

    loop {
        for _ in 0..pattern.pulses {
            sink.pulse(&pulse);
            if pattern.doubled {
                sink.pulse(&pulse);
            }
            tokio::time::sleep(gap).await;
        }
        tokio::time::sleep(rest).await;
    }
}
