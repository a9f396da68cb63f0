//! Ring Sim: a simulation harness for the haptic ring coordination engine.
//!
//! This crate drives a `CoordinationEngine` the way a live experience would:
//! - Membership arrives as join/leave messages through the MembershipActor
//! - Proximity comes from spatial sensors reading a shared scene
//! - Feedback lands on simulated motors that count pulses

pub mod membership_watcher;
pub mod neighbors;
pub mod results;
pub mod simulation;
pub mod sink;
