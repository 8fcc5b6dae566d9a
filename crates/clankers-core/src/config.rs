use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{CentroidalModelInfo, ContactNames};

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_position_error_gain() -> f64 {
    20.0
}
const fn default_phase_transition_stance_time() -> f64 {
    0.4
}
const fn default_time_horizon() -> f64 {
    1.0
}
const fn default_mpc_frequency() -> f64 {
    100.0
}
const fn default_max_iterations() -> usize {
    1
}
const fn default_min_rel_cost() -> f64 {
    0.1
}
const fn default_constraint_tolerance() -> f64 {
    5e-3
}
const fn default_time_step() -> f64 {
    0.015
}
const fn default_num_threads() -> usize {
    3
}
const fn default_true() -> bool {
    true
}
const fn default_abs_tol() -> f64 {
    1e-5
}
const fn default_rel_tol() -> f64 {
    1e-3
}
const fn default_max_steps_per_second() -> usize {
    10_000
}
const fn default_friction_coefficient() -> f64 {
    0.3
}
const fn default_barrier_mu() -> f64 {
    0.1
}
const fn default_barrier_delta() -> f64 {
    5.0
}
const fn default_cone_regularization() -> f64 {
    25.0
}
const fn default_hessian_diagonal_shift() -> f64 {
    1e-6
}
const fn default_swing_height() -> f64 {
    0.1
}
const fn default_swing_time_scale() -> f64 {
    0.15
}

// ---------------------------------------------------------------------------
// ModelSettings
// ---------------------------------------------------------------------------

/// Robot model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Contact frame names, one per foot (e.g. `LF_FOOT`).
    pub contact_names: Vec<String>,

    /// Number of actuated joints.
    pub num_joints: usize,

    /// Total robot mass in kg.
    pub robot_mass: f64,

    /// Feedback gain on foot height error in the normal-velocity constraint.
    #[serde(default = "default_position_error_gain")]
    pub position_error_gain: f64,

    /// Duration of the all-stance phase inserted before a newly commanded gait.
    #[serde(default = "default_phase_transition_stance_time")]
    pub phase_transition_stance_time: f64,

    /// Use kinematics-provided Jacobians instead of finite differences
    /// for end-effector constraints.
    #[serde(default)]
    pub use_analytical_gradients_constraints: bool,
}

impl ModelSettings {
    pub fn contact_names(&self) -> Result<ContactNames, ConfigError> {
        ContactNames::from_frames(&self.contact_names)
    }

    pub fn model_info(&self) -> CentroidalModelInfo {
        CentroidalModelInfo {
            num_contacts: self.contact_names.len(),
            num_joints: self.num_joints,
            robot_mass: self.robot_mass,
        }
    }
}

// ---------------------------------------------------------------------------
// MpcSettings
// ---------------------------------------------------------------------------

/// Receding-horizon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpcSettings {
    /// Prediction horizon in seconds.
    #[serde(default = "default_time_horizon")]
    pub time_horizon: f64,

    /// Desired MPC loop rate in Hz. Non-positive means as fast as possible.
    #[serde(default = "default_mpc_frequency")]
    pub desired_frequency: f64,

    /// Discard the previous solution instead of warm-starting from it.
    #[serde(default)]
    pub cold_start: bool,

    #[serde(default)]
    pub debug_print: bool,
}

impl Default for MpcSettings {
    fn default() -> Self {
        Self {
            time_horizon: default_time_horizon(),
            desired_frequency: default_mpc_frequency(),
            cold_start: false,
            debug_print: false,
        }
    }
}

// ---------------------------------------------------------------------------
// DdpSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DdpAlgorithm {
    #[default]
    Slq,
    Ilqr,
}

/// Settings handed to the injected DDP solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdpSettings {
    #[serde(default)]
    pub algorithm: DdpAlgorithm,

    /// Iterations per MPC cycle.
    #[serde(default = "default_max_iterations")]
    pub max_num_iterations: usize,

    /// Relative cost change below which the solver stops.
    #[serde(default = "default_min_rel_cost")]
    pub min_rel_cost: f64,

    #[serde(default = "default_constraint_tolerance")]
    pub constraint_tolerance: f64,

    /// Discretization step of the backward pass in seconds.
    #[serde(default = "default_time_step")]
    pub time_step: f64,

    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    #[serde(default = "default_true")]
    pub use_feedback_policy: bool,
}

impl Default for DdpSettings {
    fn default() -> Self {
        Self {
            algorithm: DdpAlgorithm::default(),
            max_num_iterations: default_max_iterations(),
            min_rel_cost: default_min_rel_cost(),
            constraint_tolerance: default_constraint_tolerance(),
            time_step: default_time_step(),
            num_threads: default_num_threads(),
            use_feedback_policy: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RolloutSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorType {
    Euler,
    Rk4,
    #[default]
    Ode45,
}

/// Settings handed to the injected rollout integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutSettings {
    #[serde(default = "default_abs_tol")]
    pub abs_tol_ode: f64,

    #[serde(default = "default_rel_tol")]
    pub rel_tol_ode: f64,

    #[serde(default = "default_time_step")]
    pub time_step: f64,

    #[serde(default)]
    pub integrator: IntegratorType,

    #[serde(default = "default_max_steps_per_second")]
    pub max_num_steps_per_second: usize,

    #[serde(default)]
    pub check_numerical_stability: bool,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            abs_tol_ode: default_abs_tol(),
            rel_tol_ode: default_rel_tol(),
            time_step: default_time_step(),
            integrator: IntegratorType::default(),
            max_num_steps_per_second: default_max_steps_per_second(),
            check_numerical_stability: false,
        }
    }
}

// ---------------------------------------------------------------------------
// FrictionConeSettings / SwingSettings
// ---------------------------------------------------------------------------

/// Friction cone soft constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionConeSettings {
    /// Coulomb friction coefficient of the initial terrain.
    #[serde(default = "default_friction_coefficient")]
    pub friction_coefficient: f64,

    /// Relaxed barrier scale.
    #[serde(default = "default_barrier_mu")]
    pub mu: f64,

    /// Relaxed barrier switch point.
    #[serde(default = "default_barrier_delta")]
    pub delta: f64,

    /// Added under the tangential-force square root to keep the cone smooth.
    #[serde(default = "default_cone_regularization")]
    pub regularization: f64,

    /// Normal force offset the foot can pull with (zero for point feet).
    #[serde(default)]
    pub gripper_force: f64,

    #[serde(default = "default_hessian_diagonal_shift")]
    pub hessian_diagonal_shift: f64,
}

impl Default for FrictionConeSettings {
    fn default() -> Self {
        Self {
            friction_coefficient: default_friction_coefficient(),
            mu: default_barrier_mu(),
            delta: default_barrier_delta(),
            regularization: default_cone_regularization(),
            gripper_force: 0.0,
            hessian_diagonal_shift: default_hessian_diagonal_shift(),
        }
    }
}

/// Swing foot height profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingSettings {
    /// Apex height above the ground (meters).
    #[serde(default = "default_swing_height")]
    pub swing_height: f64,

    /// Swings shorter than this (seconds) get a proportionally lower apex.
    #[serde(default = "default_swing_time_scale")]
    pub swing_time_scale: f64,
}

impl Default for SwingSettings {
    fn default() -> Self {
        Self {
            swing_height: default_swing_height(),
            swing_time_scale: default_swing_time_scale(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking weights
// ---------------------------------------------------------------------------

/// A weight matrix given either by its diagonal or row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightMatrix {
    Diagonal { diagonal: Vec<f64> },
    Full { rows: Vec<Vec<f64>> },
}

impl WeightMatrix {
    /// Build the dense matrix. Fails on ragged or non-square input.
    pub fn to_matrix(&self, name: &str) -> Result<DMatrix<f64>, ConfigError> {
        match self {
            Self::Diagonal { diagonal } => Ok(DMatrix::from_diagonal(
                &nalgebra::DVector::from_column_slice(diagonal),
            )),
            Self::Full { rows } => {
                let n_rows = rows.len();
                let n_cols = rows.first().map_or(0, Vec::len);
                if let Some(bad) = rows.iter().position(|r| r.len() != n_cols) {
                    return Err(ConfigError::invalid(
                        name,
                        format!("row {bad} has {} entries, expected {n_cols}", rows[bad].len()),
                    ));
                }
                if n_rows != n_cols {
                    return Err(ConfigError::NotSquare {
                        name: name.to_string(),
                        rows: n_rows,
                        cols: n_cols,
                    });
                }
                Ok(DMatrix::from_fn(n_rows, n_cols, |i, j| rows[i][j]))
            }
        }
    }
}

/// State and input weights of the tracking cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSettings {
    pub q: WeightMatrix,
    pub r: WeightMatrix,
}

// ---------------------------------------------------------------------------
// Gait configuration
// ---------------------------------------------------------------------------

/// Explicit mode sequence with one duration per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSequence {
    pub modes: Vec<String>,
    pub durations: Vec<f64>,
}

/// A named gait: either an explicit cycle or per-foot phase offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GaitDefinition {
    Phases(PhaseSequence),
    Offsets {
        /// Phase offset per foot in [0, 1).
        phase_offsets: Vec<f64>,
        /// Fraction of the cycle spent in stance.
        duty_factor: f64,
        /// Cycle period in seconds.
        cycle_time: f64,
    },
}

/// Initial schedule plus the library of commandable gaits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitConfig {
    /// Gait cycled after the initial phases. Must name a library entry.
    pub default: String,

    /// Finite phases played once from t = 0 before the default gait.
    #[serde(default)]
    pub initial: Option<PhaseSequence>,

    /// Named gaits.
    pub library: BTreeMap<String, GaitDefinition>,
}

impl GaitConfig {
    pub fn gait(&self, name: &str) -> Result<&GaitDefinition, ConfigError> {
        self.library
            .get(name)
            .ok_or_else(|| ConfigError::UnknownGait(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TaskConfig
// ---------------------------------------------------------------------------

/// Complete task file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Initial state, `state_dim` entries.
    pub initial_state: Vec<f64>,

    pub model: ModelSettings,

    #[serde(default)]
    pub mpc: MpcSettings,

    #[serde(default)]
    pub ddp: DdpSettings,

    #[serde(default)]
    pub rollout: RolloutSettings,

    #[serde(default)]
    pub friction_cone: FrictionConeSettings,

    #[serde(default)]
    pub swing: SwingSettings,

    pub tracking: TrackingSettings,

    pub gait: GaitConfig,
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} (must be > 0)")))
    }
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} (must be >= 0)")))
    }
}

impl TaskConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = self.model.contact_names()?;
        require_positive("model.robot_mass", self.model.robot_mass)?;
        require_non_negative("model.position_error_gain", self.model.position_error_gain)?;
        require_non_negative(
            "model.phase_transition_stance_time",
            self.model.phase_transition_stance_time,
        )?;
        require_positive("mpc.time_horizon", self.mpc.time_horizon)?;
        require_positive("ddp.time_step", self.ddp.time_step)?;
        require_positive("rollout.time_step", self.rollout.time_step)?;
        require_positive("friction_cone.friction_coefficient", self.friction_cone.friction_coefficient)?;
        require_positive("friction_cone.mu", self.friction_cone.mu)?;
        require_positive("friction_cone.delta", self.friction_cone.delta)?;
        require_positive("friction_cone.regularization", self.friction_cone.regularization)?;
        require_non_negative("swing.swing_height", self.swing.swing_height)?;
        require_positive("swing.swing_time_scale", self.swing.swing_time_scale)?;

        let state_dim = self.model.model_info().state_dim();
        if self.initial_state.len() != state_dim {
            return Err(ConfigError::DimensionMismatch {
                name: "initial_state".into(),
                expected: state_dim,
                got: self.initial_state.len(),
            });
        }
        if let Some(bad) = self.initial_state.iter().position(|v| !v.is_finite()) {
            return Err(ConfigError::invalid(
                "initial_state",
                format!("entry {bad} is not finite"),
            ));
        }

        self.gait.gait(&self.gait.default)?;
        if let Some(initial) = &self.gait.initial {
            for mode in &initial.modes {
                names.parse_mode(mode)?;
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

// ---------------------------------------------------------------------------
// TargetCommandConfig
// ---------------------------------------------------------------------------

/// Parameters for turning target poses into reference trajectories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCommandConfig {
    /// Desired base height (meters).
    pub com_height: f64,

    /// Nominal joint positions, `num_joints` entries.
    pub default_joint_state: Vec<f64>,

    /// Average base speed used to time a displacement (m/s).
    pub target_displacement_velocity: f64,

    /// Average yaw rate used to time a rotation (rad/s).
    pub target_rotation_velocity: f64,
}

impl TargetCommandConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("com_height", self.com_height)?;
        require_positive("target_displacement_velocity", self.target_displacement_velocity)?;
        require_positive("target_rotation_velocity", self.target_rotation_velocity)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
initial_state = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.1, 0.2]

[model]
contact_names = ["LF_FOOT", "RF_FOOT"]
num_joints = 2
robot_mass = 10.0

[tracking.q]
diagonal = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]

[tracking.r]
diagonal = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]

[gait]
default = "stance"

[gait.library.stance]
modes = ["STANCE"]
durations = [0.5]
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = TaskConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.mpc, MpcSettings::default());
        assert_eq!(config.ddp, DdpSettings::default());
        assert_eq!(config.rollout, RolloutSettings::default());
        assert_eq!(config.friction_cone, FrictionConeSettings::default());
        assert!((config.model.position_error_gain - 20.0).abs() < f64::EPSILON);
        assert!(!config.model.use_analytical_gradients_constraints);
        assert!(config.gait.initial.is_none());
    }

    #[test]
    fn missing_section_is_rejected() {
        let without_tracking: String = MINIMAL
            .lines()
            .filter(|l| !l.contains("tracking") && !l.starts_with("diagonal"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = TaskConfig::from_toml_str(&without_tracking).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn wrong_initial_state_length_is_rejected() {
        let mut config: TaskConfig = toml::from_str(MINIMAL).unwrap();
        config.initial_state.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DimensionMismatch { expected: 14, got: 13, .. })
        ));
    }

    #[test]
    fn unknown_default_gait_is_rejected() {
        let mut config: TaskConfig = toml::from_str(MINIMAL).unwrap();
        config.gait.default = "gallop".into();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownGait(_))));
    }

    #[test]
    fn non_positive_horizon_is_rejected() {
        let mut config: TaskConfig = toml::from_str(MINIMAL).unwrap();
        config.mpc.time_horizon = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn zero_cone_regularization_is_rejected() {
        let mut config: TaskConfig = toml::from_str(MINIMAL).unwrap();
        config.friction_cone.regularization = 0.0;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "friction_cone.regularization");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
        config.friction_cone.regularization = 1e-3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn offsets_gait_definition_parses() {
        let text = r#"
phase_offsets = [0.0, 0.5]
duty_factor = 0.5
cycle_time = 0.4
"#;
        let gait: GaitDefinition = toml::from_str(text).unwrap();
        assert!(matches!(gait, GaitDefinition::Offsets { .. }));
    }

    #[test]
    fn weight_matrix_full_rows() {
        let w = WeightMatrix::Full {
            rows: vec![vec![2.0, 1.0], vec![0.0, 3.0]],
        };
        let m = w.to_matrix("R").unwrap();
        assert_eq!(m.nrows(), 2);
        assert!((m[(0, 1)] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weight_matrix_not_square() {
        let w = WeightMatrix::Full {
            rows: vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
        };
        assert!(matches!(
            w.to_matrix("R"),
            Err(ConfigError::NotSquare { rows: 2, cols: 3, .. })
        ));
    }

    #[test]
    fn weight_matrix_ragged_rows() {
        let w = WeightMatrix::Full {
            rows: vec![vec![1.0, 0.0], vec![0.0]],
        };
        assert!(matches!(
            w.to_matrix("R"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn target_command_validation() {
        let text = r"
com_height = 0.5
default_joint_state = [0.0, 0.0]
target_displacement_velocity = 0.5
target_rotation_velocity = 1.5
";
        let cmd = TargetCommandConfig::from_toml_str(text).unwrap();
        assert!((cmd.com_height - 0.5).abs() < f64::EPSILON);

        let bad = text.replace("com_height = 0.5", "com_height = -1.0");
        assert!(TargetCommandConfig::from_toml_str(&bad).is_err());
    }
}
