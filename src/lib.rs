//! Tank Arena Simulation Library
//!
//! A headless tank arena: an octree-backed broad phase, a Patrol/Hunt/Attack
//! agent FSM that steers around obstacles, projectiles and chain-reacting
//! barrels, all driven by a fixed-step tick loop.
//!
//! # Features
//!
//! - `workers` - Offload the agent FSM and/or the broad phase to background threads (enabled by default)
//! - `minimal` - Build without optional features for testing/debugging

pub mod config;
pub mod util;
pub mod game;
pub mod metrics;

// Feature-gated modules (enabled by default)
#[cfg(feature = "workers")]
pub mod worker;
