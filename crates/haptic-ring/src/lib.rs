//! Haptic Ring: neighbor haptic coordination over a ring of participants.
//!
//! Each participant detects proximity to an interactive object on its own.
//! When it does, its two ring-neighbors are asked to vibrate: the lower-ranked
//! neighbor at `Normal`, the higher-ranked one at `Strong`. A target keeps
//! vibrating while any source still wants it and stops once all have released
//! it, no matter how the concurrent requests interleave.
//!
//! ```text
//! ProximityDetector ──▶ CoordinationEngine ──▶ RingTopology (read)
//!                                          └─▶ TriggerRegistry (mutate) ──▶ ActuationChannel
//! ```

pub mod actors;
pub mod actuation;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod messages;
pub mod participant;
pub mod registry;
pub mod sensing;
pub mod topology;

pub use actuation::{ActuationChannel, ActuationSink, Actuator, ChannelStatus, NullSink, Pulse};
pub use config::{CadenceConfig, CadencePattern, DetectionConfig, EngineConfig};
pub use detector::{DetectorState, ProximityDetector, ProximityEdge, ProximityListener};
pub use engine::{CoordinationEngine, EngineSnapshot, ParticipantSnapshot};
pub use error::{HapticError, Result};
pub use participant::{ActivationLevel, Intensity, OBSERVER_RANK, ParticipantId};
pub use registry::{RegistryStats, TargetSnapshot, TriggerRegistry};
pub use sensing::{ManualSensor, Position, ProximitySensor, Scene, SharedScene, SpatialProximitySensor};
pub use topology::{Neighbors, RingTopology};
