//! Proximity sensors: the boolean "is an interactive object near me" feed.
//!
//! The engine only cares about edges of this boolean. Two implementations are
//! provided:
//! - [`ManualSensor`]: the host pushes the current reading.
//! - [`SpatialProximitySensor`]: sphere-overlap test against a shared scene of
//!   tagged objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::participant::ParticipantId;

/// A proximity sensor, sampled by a detector at a fixed interval.
///
/// Sampling must be local and fast. An `Err` means the sensor is unavailable;
/// the detector treats it as "nothing near".
pub trait ProximitySensor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether a qualifying object is within range right now.
    fn sample(&self) -> Result<bool>;
}

/// Sensor whose reading is set from outside.
#[derive(Debug)]
pub struct ManualSensor {
    name: String,
    near: AtomicBool,
    available: AtomicBool,
}

impl ManualSensor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            near: AtomicBool::new(false),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_near(&self, near: bool) {
        self.near.store(near, Ordering::SeqCst);
    }

    /// Simulate the sensor dropping out (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl ProximitySensor for ManualSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> Result<bool> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("sensor {} unavailable", self.name);
        }
        Ok(self.near.load(Ordering::SeqCst))
    }
}

/// A point in scene space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// An object participants can come close to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub tag: String,
    pub position: Position,
}

/// Positions of participants and tagged objects.
#[derive(Debug, Default, Clone)]
pub struct Scene {
    objects: Vec<SceneObject>,
    participants: HashMap<ParticipantId, Position>,
}

/// Scene shared between the host that moves things and the sensors that read it.
pub type SharedScene = Arc<RwLock<Scene>>;

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedScene {
        Arc::new(RwLock::new(self))
    }

    /// Add an object and return its index.
    pub fn add_object(&mut self, tag: impl Into<String>, position: Position) -> usize {
        self.objects.push(SceneObject {
            tag: tag.into(),
            position,
        });
        self.objects.len() - 1
    }

    /// Move an object. Returns false if the index is unknown.
    pub fn move_object(&mut self, index: usize, position: Position) -> bool {
        match self.objects.get_mut(index) {
            Some(object) => {
                object.position = position;
                true
            }
            None => false,
        }
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn place_participant(&mut self, id: ParticipantId, position: Position) {
        self.participants.insert(id, position);
    }

    pub fn remove_participant(&mut self, id: ParticipantId) {
        self.participants.remove(&id);
    }

    pub fn participant_position(&self, id: ParticipantId) -> Option<Position> {
        self.participants.get(&id).copied()
    }

    /// Whether any object tagged `tag` lies within `radius` of `id`.
    pub fn is_near(&self, id: ParticipantId, radius: f32, tag: &str) -> Option<bool> {
        let me = self.participants.get(&id)?;
        Some(
            self.objects
                .iter()
                .any(|object| object.tag == tag && object.position.distance(me) <= radius),
        )
    }
}

/// Sphere-overlap sensor for one participant.
pub struct SpatialProximitySensor {
    name: String,
    participant: ParticipantId,
    scene: SharedScene,
    radius: f32,
    target_tag: String,
}

impl SpatialProximitySensor {
    pub fn new(participant: ParticipantId, scene: SharedScene, detection: &DetectionConfig) -> Self {
        Self {
            name: format!("spatial:{participant}"),
            participant,
            scene,
            radius: detection.radius,
            target_tag: detection.target_tag.clone(),
        }
    }
}

impl ProximitySensor for SpatialProximitySensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> Result<bool> {
        let scene = self
            .scene
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        scene
            .is_near(self.participant, self.radius, &self.target_tag)
            .ok_or_else(|| anyhow::anyhow!("participant {} not placed in scene", self.participant))
    }
}
