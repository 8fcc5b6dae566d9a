// clankers-core: Types, model traits, settings and errors for Clankers legged MPC.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    DdpSettings, FrictionConeSettings, GaitConfig, GaitDefinition, ModelSettings, MpcSettings,
    PhaseSequence, RolloutSettings, SwingSettings, TargetCommandConfig, TaskConfig,
    TrackingSettings, WeightMatrix,
};
pub use error::{
    ClankersError, ConfigError, EvalError, ExternalError, ScheduleCoverageError,
};
pub use traits::{EndEffectorKinematics, SystemDynamics};
pub use types::{
    CentroidalModelInfo, ContactMode, ContactNames, GRAVITY, MAX_CONTACTS,
    ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation,
    VectorFunctionQuadraticApproximation,
};
