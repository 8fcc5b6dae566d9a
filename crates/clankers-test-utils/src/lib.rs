//! Shared test fixtures and utilities for Clankers crates.
//!
//! Provides stand-ins for the injected collaborators (kinematics, dynamics)
//! and the sample task files under `config/`.

pub mod fixtures;
pub mod mocks;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{standing_state, target_command_config, task_config};
pub use mocks::{FailingKinematics, KinematicsFailure, PointFootKinematics, ZeroDynamics};
