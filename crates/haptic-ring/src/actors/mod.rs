//! Acton-reactive actors around the coordination engine.
//!
//! The engine itself is plain shared state driven by detector tasks; actors
//! sit at the edge where external feeds arrive:
//!
//! ```text
//! host / network ──ParticipantJoined / ParticipantLeft──▶ MembershipActor ──▶ CoordinationEngine
//!                                                             │
//!                                                             └─ MembershipChanged (broadcast)
//! ```

mod membership_actor;

pub use membership_actor::{MembershipActor, MembershipActorState};
