//! Mock implementations of the injected model traits.
//!
//! Lightweight, exactly differentiable stand-ins for a rigid-body library so
//! the problem assembly can be exercised without a robot model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clankers_core::error::ExternalError;
use clankers_core::traits::{EndEffectorKinematics, SystemDynamics};
use clankers_core::types::{CentroidalModelInfo, VectorFunctionLinearApproximation};
use nalgebra::{DVector, Vector3};

// ---------------------------------------------------------------------------
// PointFootKinematics
// ---------------------------------------------------------------------------

/// Legs with three prismatic joints each, one leg per contact.
///
/// Foot `i` sits at `base position + hip_offsets[i] + q_i`, where `q_i` are
/// the three joint positions of leg `i`. Its velocity is the leg's three
/// joint velocities. Both maps are linear, so the Jacobians are constant.
pub struct PointFootKinematics {
    hip_offsets: Vec<Vector3<f64>>,
    calls: AtomicUsize,
}

impl PointFootKinematics {
    pub fn new(hip_offsets: Vec<Vector3<f64>>) -> Self {
        Self {
            hip_offsets,
            calls: AtomicUsize::new(0),
        }
    }

    /// Four legs in the order LF, RF, LH, RH.
    pub fn quadruped() -> Self {
        Self::new(vec![
            Vector3::new(0.3, 0.2, -0.5),
            Vector3::new(0.3, -0.2, -0.5),
            Vector3::new(-0.3, 0.2, -0.5),
            Vector3::new(-0.3, -0.2, -0.5),
        ])
    }

    /// Number of evaluations served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn num_legs(&self) -> usize {
        self.hip_offsets.len()
    }

    fn joint_column(index: usize) -> usize {
        CentroidalModelInfo::JOINT_OFFSET + 3 * index
    }

    fn velocity_column(&self, index: usize) -> usize {
        3 * self.num_legs() + 3 * index
    }
}

impl EndEffectorKinematics for PointFootKinematics {
    fn num_end_effectors(&self) -> usize {
        self.num_legs()
    }

    fn position(&self, state: &DVector<f64>, index: usize) -> Result<Vector3<f64>, ExternalError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let base = state.fixed_rows::<3>(CentroidalModelInfo::BASE_POSE_OFFSET);
        let leg = state.fixed_rows::<3>(Self::joint_column(index));
        Ok(base + self.hip_offsets[index] + leg)
    }

    fn velocity(
        &self,
        _state: &DVector<f64>,
        input: &DVector<f64>,
        index: usize,
    ) -> Result<Vector3<f64>, ExternalError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(input.fixed_rows::<3>(self.velocity_column(index)).clone_owned())
    }

    fn position_linear_approximation(
        &self,
        state: &DVector<f64>,
        index: usize,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError> {
        let mut approx = VectorFunctionLinearApproximation::zeros(3, state.len(), 0);
        approx.f = DVector::from_column_slice(self.position(state, index)?.as_slice());
        approx
            .dfdx
            .view_mut((0, CentroidalModelInfo::BASE_POSE_OFFSET), (3, 3))
            .fill_with_identity();
        approx
            .dfdx
            .view_mut((0, Self::joint_column(index)), (3, 3))
            .fill_with_identity();
        Ok(approx)
    }

    fn velocity_linear_approximation(
        &self,
        state: &DVector<f64>,
        input: &DVector<f64>,
        index: usize,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError> {
        let mut approx = VectorFunctionLinearApproximation::zeros(3, state.len(), input.len());
        approx.f = DVector::from_column_slice(self.velocity(state, input, index)?.as_slice());
        approx
            .dfdu
            .view_mut((0, self.velocity_column(index)), (3, 3))
            .fill_with_identity();
        Ok(approx)
    }
}

// ---------------------------------------------------------------------------
// FailingKinematics
// ---------------------------------------------------------------------------

/// Error raised by [`FailingKinematics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KinematicsFailure {
    pub index: usize,
}

impl std::fmt::Display for KinematicsFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kinematics failed for end-effector {}", self.index)
    }
}

impl std::error::Error for KinematicsFailure {}

/// Kinematics that reports the right count but fails every evaluation.
pub struct FailingKinematics {
    n: usize,
}

impl FailingKinematics {
    pub const fn new(n: usize) -> Self {
        Self { n }
    }

    fn fail<T>(index: usize) -> Result<T, ExternalError> {
        Err(Box::new(KinematicsFailure { index }))
    }
}

impl EndEffectorKinematics for FailingKinematics {
    fn num_end_effectors(&self) -> usize {
        self.n
    }

    fn position(&self, _state: &DVector<f64>, index: usize) -> Result<Vector3<f64>, ExternalError> {
        Self::fail(index)
    }

    fn velocity(
        &self,
        _state: &DVector<f64>,
        _input: &DVector<f64>,
        index: usize,
    ) -> Result<Vector3<f64>, ExternalError> {
        Self::fail(index)
    }

    fn position_linear_approximation(
        &self,
        _state: &DVector<f64>,
        index: usize,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError> {
        Self::fail(index)
    }

    fn velocity_linear_approximation(
        &self,
        _state: &DVector<f64>,
        _input: &DVector<f64>,
        index: usize,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError> {
        Self::fail(index)
    }
}

// ---------------------------------------------------------------------------
// ZeroDynamics
// ---------------------------------------------------------------------------

/// `dx/dt = 0` for every state and input.
pub struct ZeroDynamics;

impl ZeroDynamics {
    pub fn shared() -> Arc<dyn SystemDynamics> {
        Arc::new(Self)
    }
}

impl SystemDynamics for ZeroDynamics {
    fn flow_map(
        &self,
        _time: f64,
        state: &DVector<f64>,
        _input: &DVector<f64>,
    ) -> Result<DVector<f64>, ExternalError> {
        Ok(DVector::zeros(state.len()))
    }

    fn linear_approximation(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, ExternalError> {
        Ok(VectorFunctionLinearApproximation::zeros(
            state.len(),
            state.len(),
            input.len(),
        ))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "zero"
    }
}
