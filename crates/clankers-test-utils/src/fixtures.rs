//! The sample configuration shipped in `config/`, parsed and validated.

use clankers_core::config::{TargetCommandConfig, TaskConfig};
use nalgebra::DVector;

/// Raw text of `config/task.toml`.
pub const TASK_TOML: &str = include_str!("../../../config/task.toml");

/// Raw text of `config/reference.toml`.
pub const REFERENCE_TOML: &str = include_str!("../../../config/reference.toml");

/// Quadruped task: four point feet, twelve joints.
///
/// # Panics
/// If the shipped file no longer parses.
pub fn task_config() -> TaskConfig {
    TaskConfig::from_toml_str(TASK_TOML).expect("config/task.toml must be valid")
}

/// # Panics
/// If the shipped file no longer parses.
pub fn target_command_config() -> TargetCommandConfig {
    TargetCommandConfig::from_toml_str(REFERENCE_TOML).expect("config/reference.toml must be valid")
}

/// Initial state of the sample task.
pub fn standing_state() -> DVector<f64> {
    DVector::from_column_slice(&task_config().initial_state)
}
