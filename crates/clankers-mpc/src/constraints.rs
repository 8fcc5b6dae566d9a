//! Per-contact constraint terms.
//!
//! Every term is built once at assembly time and gated by a
//! [`ContactActivation`] that looks up the active mode schedule when the
//! solver asks. A mode change therefore never rebuilds the problem.
//!
//! | term | active in | kind |
//! |---|---|---|
//! | [`FrictionConeConstraint`] | stance | inequality, softened by [`SoftConstraintCost`] |
//! | [`ZeroVelocityConstraint`] | stance | equality, 3 rows |
//! | [`ZeroForceConstraint`] | swing | equality, 3 rows |
//! | [`NormalVelocityConstraint`] | swing | equality, 1 row |

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use clankers_core::config::FrictionConeSettings;
use clankers_core::error::EvalError;
use clankers_core::traits::EndEffectorKinematics;
use clankers_core::types::{
    CentroidalModelInfo, ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation,
    VectorFunctionQuadraticApproximation,
};

use crate::cost::StateInputCost;
use crate::penalty::RelaxedBarrierPenalty;
use crate::schedule::ModeScheduleManager;
use crate::swing::SwingTrajectoryPlanner;
use crate::synchronized::SyncSlot;
use crate::terrain::TerrainParameters;

/// Perturbation used by central finite differences.
const FINITE_DIFFERENCE_STEP: f64 = 1e-6;

// ---------------------------------------------------------------------------
// StateInputConstraint
// ---------------------------------------------------------------------------

/// A vector constraint `g(t, x, u)` (`= 0` or `>= 0` depending on where it is
/// registered).
pub trait StateInputConstraint: Send + Sync {
    fn num_constraints(&self) -> usize;

    /// Contact point this term belongs to, if any.
    fn contact_index(&self) -> Option<usize> {
        None
    }

    fn is_active(&self, _time: f64) -> Result<bool, EvalError> {
        Ok(true)
    }

    fn value(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError>;

    fn linear_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, EvalError>;

    /// Exact second-order model, for terms that can provide one.
    fn quadratic_approximation(
        &self,
        _time: f64,
        _state: &DVector<f64>,
        _input: &DVector<f64>,
    ) -> Result<Option<VectorFunctionQuadraticApproximation>, EvalError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactPhase {
    Stance,
    Swing,
}

/// Active while `contact` is in `phase` under the current mode schedule.
#[derive(Clone)]
pub struct ContactActivation {
    manager: Arc<ModeScheduleManager>,
    contact: usize,
    phase: ContactPhase,
}

impl ContactActivation {
    pub fn new(manager: Arc<ModeScheduleManager>, contact: usize, phase: ContactPhase) -> Self {
        Self {
            manager,
            contact,
            phase,
        }
    }

    pub const fn contact(&self) -> usize {
        self.contact
    }

    pub const fn phase(&self) -> ContactPhase {
        self.phase
    }

    pub fn is_active(&self, time: f64) -> Result<bool, EvalError> {
        let in_stance = self.manager.query(time)?.is_stance(self.contact);
        Ok(match self.phase {
            ContactPhase::Stance => in_stance,
            ContactPhase::Swing => !in_stance,
        })
    }
}

// ---------------------------------------------------------------------------
// Gradients
// ---------------------------------------------------------------------------

/// How velocity-level terms obtain their Jacobians.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradientMode {
    /// Jacobians from the kinematics evaluator.
    Analytical,
    /// Central differences on the term value.
    FiniteDifference,
}

impl GradientMode {
    pub const fn from_flag(use_analytical: bool) -> Self {
        if use_analytical {
            Self::Analytical
        } else {
            Self::FiniteDifference
        }
    }
}

/// Central-difference Jacobians of `f` with respect to `state` and `input`.
pub fn finite_difference_jacobian<F>(
    f: F,
    state: &DVector<f64>,
    input: &DVector<f64>,
) -> Result<VectorFunctionLinearApproximation, EvalError>
where
    F: Fn(&DVector<f64>, &DVector<f64>) -> Result<DVector<f64>, EvalError>,
{
    let value = f(state, input)?;
    let rows = value.len();
    let mut approx = VectorFunctionLinearApproximation::zeros(rows, state.len(), input.len());

    let mut x = state.clone();
    for j in 0..state.len() {
        let nominal = x[j];
        x[j] = nominal + FINITE_DIFFERENCE_STEP;
        let plus = f(&x, input)?;
        x[j] = nominal - FINITE_DIFFERENCE_STEP;
        let minus = f(&x, input)?;
        x[j] = nominal;
        approx
            .dfdx
            .set_column(j, &((plus - minus) / (2.0 * FINITE_DIFFERENCE_STEP)));
    }

    let mut u = input.clone();
    for j in 0..input.len() {
        let nominal = u[j];
        u[j] = nominal + FINITE_DIFFERENCE_STEP;
        let plus = f(state, &u)?;
        u[j] = nominal - FINITE_DIFFERENCE_STEP;
        let minus = f(state, &u)?;
        u[j] = nominal;
        approx
            .dfdu
            .set_column(j, &((plus - minus) / (2.0 * FINITE_DIFFERENCE_STEP)));
    }

    approx.f = value;
    Ok(approx)
}

fn check_dims(
    info: &CentroidalModelInfo,
    state: &DVector<f64>,
    input: &DVector<f64>,
) -> Result<(), EvalError> {
    if state.len() != info.state_dim() {
        return Err(EvalError::DimensionMismatch {
            name: "state",
            expected: info.state_dim(),
            got: state.len(),
        });
    }
    if input.len() != info.input_dim() {
        return Err(EvalError::DimensionMismatch {
            name: "input",
            expected: info.input_dim(),
            got: input.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FrictionConeConstraint
// ---------------------------------------------------------------------------

/// `h = mu * (F.n + gripper) - sqrt(|F_t|^2 + reg) >= 0` on one contact force.
pub struct FrictionConeConstraint {
    activation: ContactActivation,
    info: CentroidalModelInfo,
    terrain: Arc<SyncSlot<TerrainParameters>>,
    gripper_force: f64,
    regularization: f64,
    hessian_diagonal_shift: f64,
}

/// Cone value with its force gradient and force Hessian.
struct ConeLocal {
    h: f64,
    gradient: Vector3<f64>,
    hessian: Matrix3<f64>,
}

impl FrictionConeConstraint {
    pub fn new(
        activation: ContactActivation,
        info: CentroidalModelInfo,
        terrain: Arc<SyncSlot<TerrainParameters>>,
        settings: &FrictionConeSettings,
    ) -> Self {
        Self {
            activation,
            info,
            terrain,
            gripper_force: settings.gripper_force,
            regularization: settings.regularization,
            hessian_diagonal_shift: settings.hessian_diagonal_shift,
        }
    }

    fn local(&self, force: &Vector3<f64>) -> ConeLocal {
        let (mu, normal) = {
            let terrain = self.terrain.read();
            (terrain.friction_coefficient, terrain.surface_normal)
        };
        let normal_force = force.dot(&normal);
        let tangential = force - normal * normal_force;
        let s = (tangential.norm_squared() + self.regularization).sqrt();

        let projector = Matrix3::identity() - normal * normal.transpose();
        let hessian = -(projector / s - tangential * tangential.transpose() / (s * s * s))
            - Matrix3::identity() * self.hessian_diagonal_shift;
        ConeLocal {
            h: mu * (normal_force + self.gripper_force) - s,
            gradient: normal * mu - tangential / s,
            hessian,
        }
    }

    /// Cone terms at the contact force in `input`, with that force's input offset.
    fn local_at(
        &self,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<(ConeLocal, usize), EvalError> {
        check_dims(&self.info, state, input)?;
        let contact = self.activation.contact();
        let cone = self.local(&self.info.contact_force(input, contact));
        Ok((cone, self.info.force_offset(contact)))
    }

    fn linear_from(&self, cone: &ConeLocal, offset: usize) -> VectorFunctionLinearApproximation {
        let mut approx =
            VectorFunctionLinearApproximation::zeros(1, self.info.state_dim(), self.info.input_dim());
        approx.f[0] = cone.h;
        for k in 0..3 {
            approx.dfdu[(0, offset + k)] = cone.gradient[k];
        }
        approx
    }
}

impl StateInputConstraint for FrictionConeConstraint {
    fn num_constraints(&self) -> usize {
        1
    }

    fn contact_index(&self) -> Option<usize> {
        Some(self.activation.contact())
    }

    fn is_active(&self, time: f64) -> Result<bool, EvalError> {
        self.activation.is_active(time)
    }

    fn value(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        check_dims(&self.info, state, input)?;
        let force = self.info.contact_force(input, self.activation.contact());
        Ok(DVector::from_element(1, self.local(&force).h))
    }

    fn linear_approximation(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, EvalError> {
        let (cone, offset) = self.local_at(state, input)?;
        Ok(self.linear_from(&cone, offset))
    }

    fn quadratic_approximation(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<Option<VectorFunctionQuadraticApproximation>, EvalError> {
        let (cone, offset) = self.local_at(state, input)?;
        let mut approx =
            VectorFunctionQuadraticApproximation::zeros(1, self.info.state_dim(), self.info.input_dim());
        approx.linear = self.linear_from(&cone, offset);
        approx.dfduu[0]
            .fixed_view_mut::<3, 3>(offset, offset)
            .copy_from(&cone.hessian);
        Ok(Some(approx))
    }
}

// ---------------------------------------------------------------------------
// SoftConstraintCost
// ---------------------------------------------------------------------------

/// Turns an inequality constraint `h >= 0` into the cost `sum_k p(h_k)`.
///
/// When the constraint provides its own Hessians they enter the cost Hessian
/// through the penalty slope; otherwise the Gauss-Newton term alone is used.
pub struct SoftConstraintCost {
    constraint: Box<dyn StateInputConstraint>,
    penalty: RelaxedBarrierPenalty,
}

impl SoftConstraintCost {
    pub fn new(constraint: Box<dyn StateInputConstraint>, penalty: RelaxedBarrierPenalty) -> Self {
        Self {
            constraint,
            penalty,
        }
    }

    pub fn constraint(&self) -> &dyn StateInputConstraint {
        self.constraint.as_ref()
    }

    pub const fn penalty(&self) -> &RelaxedBarrierPenalty {
        &self.penalty
    }
}

impl StateInputCost for SoftConstraintCost {
    fn contact_index(&self) -> Option<usize> {
        self.constraint.contact_index()
    }

    fn is_active(&self, time: f64) -> Result<bool, EvalError> {
        self.constraint.is_active(time)
    }

    fn value(&self, time: f64, state: &DVector<f64>, input: &DVector<f64>) -> Result<f64, EvalError> {
        let h = self.constraint.value(time, state, input)?;
        Ok(h.iter().map(|&v| self.penalty.value(v)).sum())
    }

    fn quadratic_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<ScalarFunctionQuadraticApproximation, EvalError> {
        let second_order = self.constraint.quadratic_approximation(time, state, input)?;
        let linear = match &second_order {
            Some(q) => q.linear.clone(),
            None => self.constraint.linear_approximation(time, state, input)?,
        };

        let mut cost = ScalarFunctionQuadraticApproximation::zeros(state.len(), input.len());
        for k in 0..linear.f.len() {
            let h = linear.f[k];
            let slope = self.penalty.derivative(h);
            let curvature = self.penalty.second_derivative(h);
            let gx = linear.dfdx.row(k).transpose();
            let gu = linear.dfdu.row(k).transpose();

            cost.f += self.penalty.value(h);
            cost.dfdx += &gx * slope;
            cost.dfdu += &gu * slope;
            cost.dfdxx += &gx * gx.transpose() * curvature;
            cost.dfdux += &gu * gx.transpose() * curvature;
            cost.dfduu += &gu * gu.transpose() * curvature;
            if let Some(q) = &second_order {
                cost.dfdxx += &q.dfdxx[k] * slope;
                cost.dfdux += &q.dfdux[k] * slope;
                cost.dfduu += &q.dfduu[k] * slope;
            }
        }
        Ok(cost)
    }
}

// ---------------------------------------------------------------------------
// ZeroForceConstraint
// ---------------------------------------------------------------------------

/// Contact force of a swing foot is zero.
pub struct ZeroForceConstraint {
    activation: ContactActivation,
    info: CentroidalModelInfo,
}

impl ZeroForceConstraint {
    pub const fn new(activation: ContactActivation, info: CentroidalModelInfo) -> Self {
        Self { activation, info }
    }
}

impl StateInputConstraint for ZeroForceConstraint {
    fn num_constraints(&self) -> usize {
        3
    }

    fn contact_index(&self) -> Option<usize> {
        Some(self.activation.contact())
    }

    fn is_active(&self, time: f64) -> Result<bool, EvalError> {
        self.activation.is_active(time)
    }

    fn value(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        check_dims(&self.info, state, input)?;
        let force = self.info.contact_force(input, self.activation.contact());
        Ok(DVector::from_column_slice(force.as_slice()))
    }

    fn linear_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, EvalError> {
        let mut approx =
            VectorFunctionLinearApproximation::zeros(3, self.info.state_dim(), self.info.input_dim());
        approx.f = self.value(time, state, input)?;
        let offset = self.info.force_offset(self.activation.contact());
        approx
            .dfdu
            .view_mut((0, offset), (3, 3))
            .fill_with_identity();
        Ok(approx)
    }
}

// ---------------------------------------------------------------------------
// ZeroVelocityConstraint
// ---------------------------------------------------------------------------

/// End-effector linear velocity of a stance foot is zero.
pub struct ZeroVelocityConstraint {
    activation: ContactActivation,
    info: CentroidalModelInfo,
    kinematics: Arc<dyn EndEffectorKinematics>,
    gradients: GradientMode,
}

impl ZeroVelocityConstraint {
    pub fn new(
        activation: ContactActivation,
        info: CentroidalModelInfo,
        kinematics: Arc<dyn EndEffectorKinematics>,
        gradients: GradientMode,
    ) -> Self {
        Self {
            activation,
            info,
            kinematics,
            gradients,
        }
    }

    fn velocity(&self, state: &DVector<f64>, input: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        let v = self
            .kinematics
            .velocity(state, input, self.activation.contact())
            .map_err(EvalError::External)?;
        Ok(DVector::from_column_slice(v.as_slice()))
    }
}

impl StateInputConstraint for ZeroVelocityConstraint {
    fn num_constraints(&self) -> usize {
        3
    }

    fn contact_index(&self) -> Option<usize> {
        Some(self.activation.contact())
    }

    fn is_active(&self, time: f64) -> Result<bool, EvalError> {
        self.activation.is_active(time)
    }

    fn value(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        check_dims(&self.info, state, input)?;
        self.velocity(state, input)
    }

    fn linear_approximation(
        &self,
        _time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, EvalError> {
        check_dims(&self.info, state, input)?;
        match self.gradients {
            GradientMode::Analytical => self
                .kinematics
                .velocity_linear_approximation(state, input, self.activation.contact())
                .map_err(EvalError::External),
            GradientMode::FiniteDifference => {
                finite_difference_jacobian(|x, u| self.velocity(x, u), state, input)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// NormalVelocityConstraint
// ---------------------------------------------------------------------------

/// Swing foot tracks the planned height along the surface normal:
/// `v.n + kp * (p.n) - (v_ref + kp * z_ref) = 0`.
pub struct NormalVelocityConstraint {
    activation: ContactActivation,
    info: CentroidalModelInfo,
    kinematics: Arc<dyn EndEffectorKinematics>,
    planner: Arc<SwingTrajectoryPlanner>,
    terrain: Arc<SyncSlot<TerrainParameters>>,
    position_error_gain: f64,
    gradients: GradientMode,
}

impl NormalVelocityConstraint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        activation: ContactActivation,
        info: CentroidalModelInfo,
        kinematics: Arc<dyn EndEffectorKinematics>,
        planner: Arc<SwingTrajectoryPlanner>,
        terrain: Arc<SyncSlot<TerrainParameters>>,
        position_error_gain: f64,
        gradients: GradientMode,
    ) -> Self {
        Self {
            activation,
            info,
            kinematics,
            planner,
            terrain,
            position_error_gain,
            gradients,
        }
    }

    fn evaluate(
        &self,
        normal: &Vector3<f64>,
        offset: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        let contact = self.activation.contact();
        let position = self
            .kinematics
            .position(state, contact)
            .map_err(EvalError::External)?;
        let velocity = self
            .kinematics
            .velocity(state, input, contact)
            .map_err(EvalError::External)?;
        let value =
            velocity.dot(normal) + self.position_error_gain * position.dot(normal) - offset;
        Ok(DVector::from_element(1, value))
    }

    /// Surface normal and the constant part `v_ref + kp * z_ref` at `time`.
    fn reference(&self, time: f64) -> Result<(Vector3<f64>, f64), EvalError> {
        let normal = self.terrain.read().surface_normal;
        let reference = self.planner.reference(self.activation.contact(), time)?;
        Ok((
            normal,
            reference.vertical_velocity + self.position_error_gain * reference.height,
        ))
    }
}

impl StateInputConstraint for NormalVelocityConstraint {
    fn num_constraints(&self) -> usize {
        1
    }

    fn contact_index(&self) -> Option<usize> {
        Some(self.activation.contact())
    }

    fn is_active(&self, time: f64) -> Result<bool, EvalError> {
        self.activation.is_active(time)
    }

    fn value(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        check_dims(&self.info, state, input)?;
        let (normal, offset) = self.reference(time)?;
        self.evaluate(&normal, offset, state, input)
    }

    fn linear_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, EvalError> {
        check_dims(&self.info, state, input)?;
        let (normal, offset) = self.reference(time)?;
        match self.gradients {
            GradientMode::Analytical => {
                let contact = self.activation.contact();
                let position = self
                    .kinematics
                    .position_linear_approximation(state, contact)
                    .map_err(EvalError::External)?;
                let velocity = self
                    .kinematics
                    .velocity_linear_approximation(state, input, contact)
                    .map_err(EvalError::External)?;
                let n_row = DMatrix::from_row_slice(1, 3, normal.as_slice());
                let kp = self.position_error_gain;

                let mut approx = VectorFunctionLinearApproximation::zeros(
                    1,
                    self.info.state_dim(),
                    self.info.input_dim(),
                );
                approx.f[0] = (&n_row * &velocity.f)[0] + kp * (&n_row * &position.f)[0] - offset;
                approx.dfdx = &n_row * &velocity.dfdx + &n_row * &position.dfdx * kp;
                approx.dfdu = &n_row * &velocity.dfdu;
                Ok(approx)
            }
            GradientMode::FiniteDifference => finite_difference_jacobian(
                |x, u| self.evaluate(&normal, offset, x, u),
                state,
                input,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gait::{GaitPhase, GaitSchedule, GaitTemplate};
    use approx::assert_relative_eq;
    use clankers_core::config::SwingSettings;
    use clankers_core::error::ExternalError;
    use clankers_core::types::ContactMode;

    const N_CONTACTS: usize = 2;
    const N_JOINTS: usize = 6;

    fn info() -> CentroidalModelInfo {
        CentroidalModelInfo {
            num_contacts: N_CONTACTS,
            num_joints: N_JOINTS,
            robot_mass: 10.0,
        }
    }

    /// Contact 0 stands on [0, 1) and swings on [1, 1.5); contact 1 always stands.
    fn manager() -> Arc<ModeScheduleManager> {
        let template = GaitTemplate::new(vec![
            GaitPhase::new(1.0, ContactMode::stance(N_CONTACTS)),
            GaitPhase::new(0.5, ContactMode::stance(N_CONTACTS).with_contact(0, false)),
        ])
        .unwrap();
        Arc::new(ModeScheduleManager::new(GaitSchedule::periodic(0.0, template), N_CONTACTS).unwrap())
    }

    fn terrain() -> Arc<SyncSlot<TerrainParameters>> {
        Arc::new(SyncSlot::new("terrain", TerrainParameters::flat(0.5, 0.0)))
    }

    /// Each leg has three joints; the foot sits at base position + joint
    /// positions and moves with the matching joint velocities.
    struct LegKinematics;

    impl LegKinematics {
        fn joint_offset(index: usize) -> usize {
            CentroidalModelInfo::JOINT_OFFSET + 3 * index
        }

        fn velocity_offset(index: usize) -> usize {
            3 * N_CONTACTS + 3 * index
        }
    }

    impl EndEffectorKinematics for LegKinematics {
        fn num_end_effectors(&self) -> usize {
            N_CONTACTS
        }

        fn position(&self, state: &DVector<f64>, index: usize) -> Result<Vector3<f64>, ExternalError> {
            let base = state.fixed_rows::<3>(CentroidalModelInfo::BASE_POSE_OFFSET);
            let leg = state.fixed_rows::<3>(Self::joint_offset(index));
            // Quadratic term so the Jacobian depends on the state.
            Ok(Vector3::new(base[0] + leg[0], base[1] + leg[1], base[2] + leg[2] + leg[0] * leg[0]))
        }

        fn velocity(
            &self,
            state: &DVector<f64>,
            input: &DVector<f64>,
            index: usize,
        ) -> Result<Vector3<f64>, ExternalError> {
            let leg = state.fixed_rows::<3>(Self::joint_offset(index));
            let qd = input.fixed_rows::<3>(Self::velocity_offset(index));
            Ok(Vector3::new(qd[0], qd[1], qd[2] + 2.0 * leg[0] * qd[0]))
        }

        fn position_linear_approximation(
            &self,
            state: &DVector<f64>,
            index: usize,
        ) -> Result<VectorFunctionLinearApproximation, ExternalError> {
            let mut approx = VectorFunctionLinearApproximation::zeros(3, state.len(), 0);
            approx.f = DVector::from_column_slice(self.position(state, index)?.as_slice());
            let base = CentroidalModelInfo::BASE_POSE_OFFSET;
            let joint = Self::joint_offset(index);
            for k in 0..3 {
                approx.dfdx[(k, base + k)] = 1.0;
                approx.dfdx[(k, joint + k)] = 1.0;
            }
            approx.dfdx[(2, joint)] += 2.0 * state[joint];
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
            let joint = Self::joint_offset(index);
            let vel = Self::velocity_offset(index);
            for k in 0..3 {
                approx.dfdu[(k, vel + k)] = 1.0;
            }
            approx.dfdu[(2, vel)] += 2.0 * state[joint];
            approx.dfdx[(2, joint)] = 2.0 * input[vel];
            Ok(approx)
        }
    }

    fn sample_point() -> (DVector<f64>, DVector<f64>) {
        let info = info();
        let state = DVector::from_fn(info.state_dim(), |i, _| 0.05 * (i as f64 + 1.0));
        let input = DVector::from_fn(info.input_dim(), |i, _| 0.3 - 0.07 * i as f64);
        (state, input)
    }

    fn cone(contact: usize) -> FrictionConeConstraint {
        FrictionConeConstraint::new(
            ContactActivation::new(manager(), contact, ContactPhase::Stance),
            info(),
            terrain(),
            &FrictionConeSettings {
                regularization: 0.1,
                hessian_diagonal_shift: 0.0,
                ..FrictionConeSettings::default()
            },
        )
    }

    fn input_with_force(contact: usize, force: Vector3<f64>) -> DVector<f64> {
        let info = info();
        let mut input = DVector::zeros(info.input_dim());
        input
            .fixed_rows_mut::<3>(info.force_offset(contact))
            .copy_from(&force);
        input
    }

    fn normal_velocity(gradients: GradientMode) -> NormalVelocityConstraint {
        let manager = manager();
        let terrain = terrain();
        let planner = Arc::new(SwingTrajectoryPlanner::new(
            SwingSettings::default(),
            Arc::clone(&manager),
            Arc::clone(&terrain),
        ));
        NormalVelocityConstraint::new(
            ContactActivation::new(manager, 0, ContactPhase::Swing),
            info(),
            Arc::new(LegKinematics),
            planner,
            terrain,
            20.0,
            gradients,
        )
    }

    #[test]
    fn activation_follows_schedule() {
        let stance = ContactActivation::new(manager(), 0, ContactPhase::Stance);
        let swing = ContactActivation::new(manager(), 0, ContactPhase::Swing);
        assert!(stance.is_active(0.5).unwrap());
        assert!(!swing.is_active(0.5).unwrap());
        assert!(!stance.is_active(1.2).unwrap());
        assert!(swing.is_active(1.2).unwrap());
        let other = ContactActivation::new(manager(), 1, ContactPhase::Swing);
        assert!(!other.is_active(1.2).unwrap());
    }

    #[test]
    fn friction_cone_inside_and_outside() {
        let cone = cone(0);
        let (state, _) = sample_point();
        let inside = input_with_force(0, Vector3::new(0.0, 0.0, 100.0));
        let h = cone.value(0.0, &state, &inside).unwrap()[0];
        assert_relative_eq!(h, 0.5 * 100.0 - 0.1_f64.sqrt(), epsilon = 1e-12);

        let outside = input_with_force(0, Vector3::new(80.0, 0.0, 100.0));
        assert!(cone.value(0.0, &state, &outside).unwrap()[0] < 0.0);
    }

    #[test]
    fn friction_cone_follows_terrain_update() {
        let cone = cone(0);
        let (state, _) = sample_point();
        let input = input_with_force(0, Vector3::new(30.0, 0.0, 100.0));
        assert!(cone.value(0.0, &state, &input).unwrap()[0] > 0.0);
        cone.terrain.request(TerrainParameters::flat(0.2, 0.0));
        assert!(cone.value(0.0, &state, &input).unwrap()[0] > 0.0);
        cone.terrain.synchronize();
        assert!(cone.value(0.0, &state, &input).unwrap()[0] < 0.0);
    }

    #[test]
    fn friction_cone_gradient_matches_finite_difference() {
        let cone = cone(1);
        let (state, _) = sample_point();
        let input = input_with_force(1, Vector3::new(4.0, -3.0, 60.0));
        let analytic = cone.linear_approximation(0.0, &state, &input).unwrap();
        let numeric =
            finite_difference_jacobian(|x, u| cone.value(0.0, x, u), &state, &input).unwrap();
        assert_relative_eq!(analytic.dfdu, numeric.dfdu, epsilon = 1e-6);
        assert_relative_eq!(analytic.dfdx, numeric.dfdx, epsilon = 1e-6);
    }

    #[test]
    fn friction_cone_hessian_matches_finite_difference() {
        let cone = cone(0);
        let (state, _) = sample_point();
        let input = input_with_force(0, Vector3::new(4.0, -3.0, 60.0));
        let quadratic = cone.quadratic_approximation(0.0, &state, &input).unwrap().unwrap();
        let numeric = finite_difference_jacobian(
            |x, u| {
                let g = cone.linear_approximation(0.0, x, u)?.dfdu;
                Ok(g.row(0).transpose())
            },
            &state,
            &input,
        )
        .unwrap();
        assert_relative_eq!(quadratic.dfduu[0], numeric.dfdu, epsilon = 1e-5);
    }

    #[test]
    fn friction_cone_quadratic_carries_linear_part() {
        let cone = cone(1);
        let (state, _) = sample_point();
        let input = input_with_force(1, Vector3::new(-2.0, 5.0, 45.0));
        let linear = cone.linear_approximation(0.0, &state, &input).unwrap();
        let quadratic = cone.quadratic_approximation(0.0, &state, &input).unwrap().unwrap();
        assert_relative_eq!(quadratic.linear.f, linear.f);
        assert_relative_eq!(quadratic.linear.dfdu, linear.dfdu);
        assert_relative_eq!(quadratic.linear.dfdx, linear.dfdx);
        let offset = info().force_offset(1);
        assert_eq!(quadratic.dfduu[0].view((0, 0), (offset, offset)).amax(), 0.0);
    }

    #[test]
    fn friction_cone_is_smooth_under_vertical_load() {
        let cone = cone(0);
        let (state, _) = sample_point();
        let input = info().weight_compensating_input(ContactMode::stance(N_CONTACTS));
        let quadratic = cone.quadratic_approximation(0.0, &state, &input).unwrap().unwrap();
        assert!(quadratic.linear.dfdu.iter().all(|v| v.is_finite()));
        assert!(quadratic.dfduu[0].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn soft_cone_cost_gradient_matches_finite_difference() {
        let soft = SoftConstraintCost::new(
            Box::new(cone(0)),
            RelaxedBarrierPenalty::new(0.1, 5.0).unwrap(),
        );
        let (state, _) = sample_point();
        // Near the cone boundary so the relaxed branch is exercised.
        let input = input_with_force(0, Vector3::new(20.0, 5.0, 42.0));
        let approx = soft.quadratic_approximation(0.0, &state, &input).unwrap();
        assert_relative_eq!(approx.f, soft.value(0.0, &state, &input).unwrap(), epsilon = 1e-12);

        let numeric = finite_difference_jacobian(
            |x, u| Ok(DVector::from_element(1, soft.value(0.0, x, u)?)),
            &state,
            &input,
        )
        .unwrap();
        assert_relative_eq!(approx.dfdu, numeric.dfdu.row(0).transpose(), epsilon = 1e-5);
        assert_eq!(soft.contact_index(), Some(0));
        assert_relative_eq!(approx.dfduu, approx.dfduu.transpose(), epsilon = 1e-9);
    }

    #[test]
    fn zero_force_selects_contact_block() {
        let zf = ZeroForceConstraint::new(
            ContactActivation::new(manager(), 1, ContactPhase::Swing),
            info(),
        );
        let (state, _) = sample_point();
        let input = input_with_force(1, Vector3::new(1.0, 2.0, 3.0));
        let approx = zf.linear_approximation(0.0, &state, &input).unwrap();
        assert_relative_eq!(approx.f, DVector::from_column_slice(&[1.0, 2.0, 3.0]));
        assert_relative_eq!(approx.dfdu[(0, 3)], 1.0);
        assert_relative_eq!(approx.dfdu[(2, 5)], 1.0);
        assert_relative_eq!(approx.dfdu[(0, 0)], 0.0);
        assert_eq!(zf.num_constraints(), 3);
    }

    #[test]
    fn zero_velocity_gradient_modes_agree() {
        let (state, input) = sample_point();
        let make = |mode| {
            ZeroVelocityConstraint::new(
                ContactActivation::new(manager(), 0, ContactPhase::Stance),
                info(),
                Arc::new(LegKinematics),
                mode,
            )
        };
        let analytic = make(GradientMode::Analytical)
            .linear_approximation(0.0, &state, &input)
            .unwrap();
        let numeric = make(GradientMode::FiniteDifference)
            .linear_approximation(0.0, &state, &input)
            .unwrap();
        assert_relative_eq!(analytic.f, numeric.f, epsilon = 1e-12);
        assert_relative_eq!(analytic.dfdx, numeric.dfdx, epsilon = 1e-6);
        assert_relative_eq!(analytic.dfdu, numeric.dfdu, epsilon = 1e-6);
    }

    #[test]
    fn normal_velocity_gradient_modes_agree() {
        let (state, input) = sample_point();
        let analytic = normal_velocity(GradientMode::Analytical);
        let numeric = normal_velocity(GradientMode::FiniteDifference);
        let t = 1.2;
        let a = analytic.linear_approximation(t, &state, &input).unwrap();
        let n = numeric.linear_approximation(t, &state, &input).unwrap();
        assert_relative_eq!(
            analytic.value(t, &state, &input).unwrap(),
            numeric.value(t, &state, &input).unwrap()
        );
        assert_relative_eq!(a.f, n.f, epsilon = 1e-12);
        assert_relative_eq!(a.dfdx, n.dfdx, epsilon = 1e-6);
        assert_relative_eq!(a.dfdu, n.dfdu, epsilon = 1e-6);
    }

    #[test]
    fn normal_velocity_value_uses_swing_reference() {
        let constraint = normal_velocity(GradientMode::Analytical);
        let info = info();
        let state = DVector::zeros(info.state_dim());
        let input = DVector::zeros(info.input_dim());
        // Foot at the origin with zero velocity, mid-swing reference at 0.1 m.
        let value = constraint.value(1.25, &state, &input).unwrap()[0];
        assert_relative_eq!(value, -20.0 * 0.1, epsilon = 1e-9);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let cone = cone(0);
        let err = cone
            .value(0.0, &DVector::zeros(3), &DVector::zeros(12))
            .unwrap_err();
        assert!(matches!(err, EvalError::DimensionMismatch { name: "state", .. }));
    }

    #[test]
    fn contact_indices_are_reported() {
        assert_eq!(cone(1).contact_index(), Some(1));
        assert_eq!(normal_velocity(GradientMode::Analytical).contact_index(), Some(0));
    }
}
