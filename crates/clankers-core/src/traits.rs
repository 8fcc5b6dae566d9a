use nalgebra::{DVector, Vector3};

use crate::error::ExternalError;
use crate::types::VectorFunctionLinearApproximation;

// ---------------------------------------------------------------------------
// EndEffectorKinematics
// ---------------------------------------------------------------------------

/// Forward kinematics of the robot's contact points.
///
/// Implemented outside this workspace (rigid-body library, code-generated
/// model, ...). Errors are returned to the caller untouched.
pub trait EndEffectorKinematics: Send + Sync + 'static {
    /// Number of end-effectors this evaluator knows about.
    fn num_end_effectors(&self) -> usize;

    /// World-frame position of end-effector `index`.
    fn position(&self, state: &DVector<f64>, index: usize) -> Result<Vector3<f64>, ExternalError>;

    /// World-frame linear velocity of end-effector `index`.
    fn velocity(
        &self,
        state: &DVector<f64>,
        input: &DVector<f64>,
        index: usize,
    ) -> Result<Vector3<f64>, ExternalError>;

    /// Position and its state Jacobian. `dfdu` has zero columns.
    fn position_linear_approximation(
        &self,
        state: &DVector<f64>,
        index: usize,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError>;

    /// Velocity and its state/input Jacobians.
    fn velocity_linear_approximation(
        &self,
        state: &DVector<f64>,
        input: &DVector<f64>,
        index: usize,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError>;
}

// ---------------------------------------------------------------------------
// SystemDynamics
// ---------------------------------------------------------------------------

/// Continuous-time system dynamics `dx/dt = f(t, x, u)`.
pub trait SystemDynamics: Send + Sync + 'static {
    fn flow_map(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, ExternalError>;

    fn linear_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError>;

    /// Human-readable name for this model.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
