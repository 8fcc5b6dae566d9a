//! Cost terms and tracking weights.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use clankers_core::config::TrackingSettings;
use clankers_core::error::{ConfigError, EvalError};
use clankers_core::types::{CentroidalModelInfo, ScalarFunctionQuadraticApproximation};

use crate::reference::ReferenceTrajectory;
use crate::schedule::ModeScheduleManager;
use crate::synchronized::SyncSlot;

/// Smallest eigenvalue accepted for a tracking weight.
const MIN_WEIGHT_EIGENVALUE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// StateInputCost
// ---------------------------------------------------------------------------

/// A scalar cost `l(t, x, u)`.
pub trait StateInputCost: Send + Sync {
    /// Contact point this term belongs to, if any.
    fn contact_index(&self) -> Option<usize> {
        None
    }

    fn is_active(&self, _time: f64) -> Result<bool, EvalError> {
        Ok(true)
    }

    fn value(&self, time: f64, state: &DVector<f64>, input: &DVector<f64>) -> Result<f64, EvalError>;

    fn quadratic_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<ScalarFunctionQuadraticApproximation, EvalError>;
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Symmetrize `matrix` and require it to be positive definite with side `dim`.
pub fn validate_weight(name: &str, matrix: DMatrix<f64>, dim: usize) -> Result<DMatrix<f64>, ConfigError> {
    if !matrix.is_square() {
        return Err(ConfigError::NotSquare {
            name: name.to_string(),
            rows: matrix.nrows(),
            cols: matrix.ncols(),
        });
    }
    if matrix.nrows() != dim {
        return Err(ConfigError::DimensionMismatch {
            name: name.to_string(),
            expected: dim,
            got: matrix.nrows(),
        });
    }
    if !matrix.iter().all(|v| v.is_finite()) {
        return Err(ConfigError::invalid(name, "weight entries must be finite"));
    }
    let symmetric = (&matrix + matrix.transpose()) * 0.5;
    let eigenvalues = symmetric.clone().symmetric_eigen().eigenvalues;
    // `f64::min` drops NaN, so a NaN eigenvalue is carried through explicitly.
    let min_eigenvalue = eigenvalues
        .iter()
        .copied()
        .find(|v| v.is_nan())
        .unwrap_or_else(|| eigenvalues.iter().copied().fold(f64::INFINITY, f64::min));
    if !(min_eigenvalue > MIN_WEIGHT_EIGENVALUE) {
        return Err(ConfigError::NotPositiveDefinite {
            name: name.to_string(),
            min_eigenvalue,
        });
    }
    Ok(symmetric)
}

/// Input weight `R`, sized `input_dim x input_dim`.
pub fn initialize_input_cost_weight(
    tracking: &TrackingSettings,
    info: &CentroidalModelInfo,
) -> Result<DMatrix<f64>, ConfigError> {
    validate_weight("tracking.r", tracking.r.to_matrix("tracking.r")?, info.input_dim())
}

/// State weight `Q`, sized `state_dim x state_dim`.
pub fn initialize_state_cost_weight(
    tracking: &TrackingSettings,
    info: &CentroidalModelInfo,
) -> Result<DMatrix<f64>, ConfigError> {
    validate_weight("tracking.q", tracking.q.to_matrix("tracking.q")?, info.state_dim())
}

// ---------------------------------------------------------------------------
// QuadraticTrackingCost
// ---------------------------------------------------------------------------

/// `0.5 (x - x_ref)' Q (x - x_ref) + 0.5 (u - u_ref)' R (u - u_ref)`.
///
/// `x_ref` comes from the shared reference trajectory. `u_ref` is the
/// weight-compensating input for the contact mode at `t`.
pub struct QuadraticTrackingCost {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    info: CentroidalModelInfo,
    reference: Arc<SyncSlot<ReferenceTrajectory>>,
    manager: Arc<ModeScheduleManager>,
}

impl QuadraticTrackingCost {
    pub fn new(
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        info: CentroidalModelInfo,
        reference: Arc<SyncSlot<ReferenceTrajectory>>,
        manager: Arc<ModeScheduleManager>,
    ) -> Self {
        Self {
            q,
            r,
            info,
            reference,
            manager,
        }
    }

    pub const fn state_weight(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub const fn input_weight(&self) -> &DMatrix<f64> {
        &self.r
    }

    fn deviations(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<(DVector<f64>, DVector<f64>), EvalError> {
        if state.len() != self.info.state_dim() {
            return Err(EvalError::DimensionMismatch {
                name: "state",
                expected: self.info.state_dim(),
                got: state.len(),
            });
        }
        if input.len() != self.info.input_dim() {
            return Err(EvalError::DimensionMismatch {
                name: "input",
                expected: self.info.input_dim(),
                got: input.len(),
            });
        }
        let x_ref = self.reference.read().state_at(time);
        if x_ref.len() != state.len() {
            return Err(EvalError::DimensionMismatch {
                name: "reference state",
                expected: state.len(),
                got: x_ref.len(),
            });
        }
        let u_ref = self
            .info
            .weight_compensating_input(self.manager.query(time)?);
        Ok((state - x_ref, input - u_ref))
    }
}

impl StateInputCost for QuadraticTrackingCost {
    fn value(&self, time: f64, state: &DVector<f64>, input: &DVector<f64>) -> Result<f64, EvalError> {
        let (dx, du) = self.deviations(time, state, input)?;
        Ok(0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * du.dot(&(&self.r * &du)))
    }

    fn quadratic_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<ScalarFunctionQuadraticApproximation, EvalError> {
        let (dx, du) = self.deviations(time, state, input)?;
        let q_dx = &self.q * &dx;
        let r_du = &self.r * &du;
        Ok(ScalarFunctionQuadraticApproximation {
            f: 0.5 * dx.dot(&q_dx) + 0.5 * du.dot(&r_du),
            dfdx: q_dx,
            dfdu: r_du,
            dfdxx: self.q.clone(),
            dfdux: DMatrix::zeros(input.len(), state.len()),
            dfduu: self.r.clone(),
        })
    }
}

/// Base tracking cost with validated weights from `tracking`.
pub fn get_base_tracking_cost(
    tracking: &TrackingSettings,
    info: &CentroidalModelInfo,
    reference: Arc<SyncSlot<ReferenceTrajectory>>,
    manager: Arc<ModeScheduleManager>,
) -> Result<Box<dyn StateInputCost>, ConfigError> {
    let q = initialize_state_cost_weight(tracking, info)?;
    let r = initialize_input_cost_weight(tracking, info)?;
    Ok(Box::new(QuadraticTrackingCost::new(q, r, *info, reference, manager)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gait::{GaitPhase, GaitSchedule, GaitTemplate};
    use approx::assert_relative_eq;
    use clankers_core::config::WeightMatrix;
    use clankers_core::types::{ContactMode, GRAVITY};

    fn info() -> CentroidalModelInfo {
        CentroidalModelInfo {
            num_contacts: 2,
            num_joints: 2,
            robot_mass: 4.0,
        }
    }

    fn tracking(q_diag: f64, r_diag: f64) -> TrackingSettings {
        let info = info();
        TrackingSettings {
            q: WeightMatrix::Diagonal {
                diagonal: vec![q_diag; info.state_dim()],
            },
            r: WeightMatrix::Diagonal {
                diagonal: vec![r_diag; info.input_dim()],
            },
        }
    }

    /// Both feet down on [0, 1), contact 1 up on [1, 2).
    fn manager() -> Arc<ModeScheduleManager> {
        let template = GaitTemplate::new(vec![
            GaitPhase::new(1.0, ContactMode::stance(2)),
            GaitPhase::new(1.0, ContactMode::stance(2).with_contact(1, false)),
        ])
        .unwrap();
        Arc::new(ModeScheduleManager::new(GaitSchedule::periodic(0.0, template), 2).unwrap())
    }

    fn reference(state: DVector<f64>) -> Arc<SyncSlot<ReferenceTrajectory>> {
        let input = DVector::zeros(info().input_dim());
        Arc::new(SyncSlot::new(
            "reference",
            ReferenceTrajectory::constant(0.0, state, input),
        ))
    }

    #[test]
    fn weights_symmetrized_and_sized() {
        let info = info();
        let mut rows = vec![vec![0.0; 8]; 8];
        for (i, row) in rows.iter_mut().enumerate() {
            row[i] = 2.0;
        }
        rows[0][1] = 0.4;
        let settings = TrackingSettings {
            q: WeightMatrix::Diagonal {
                diagonal: vec![1.0; info.state_dim()],
            },
            r: WeightMatrix::Full { rows },
        };
        let r = initialize_input_cost_weight(&settings, &info).unwrap();
        assert_relative_eq!(r[(0, 1)], 0.2);
        assert_relative_eq!(r[(1, 0)], 0.2);
        assert_eq!(initialize_state_cost_weight(&settings, &info).unwrap().nrows(), 14);
    }

    #[test]
    fn rejects_wrong_size() {
        let settings = TrackingSettings {
            q: WeightMatrix::Diagonal { diagonal: vec![1.0; 3] },
            r: WeightMatrix::Diagonal { diagonal: vec![1.0; 8] },
        };
        assert!(matches!(
            initialize_state_cost_weight(&settings, &info()),
            Err(ConfigError::DimensionMismatch { expected: 14, got: 3, .. })
        ));
    }

    #[test]
    fn rejects_non_square() {
        let settings = TrackingSettings {
            q: WeightMatrix::Diagonal { diagonal: vec![1.0; 14] },
            r: WeightMatrix::Full {
                rows: vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            },
        };
        assert!(matches!(
            initialize_input_cost_weight(&settings, &info()),
            Err(ConfigError::NotSquare { rows: 2, cols: 3, .. })
        ));
    }

    #[test]
    fn rejects_indefinite() {
        let mut diagonal = vec![1.0; 8];
        diagonal[3] = -0.5;
        let settings = TrackingSettings {
            q: WeightMatrix::Diagonal { diagonal: vec![1.0; 14] },
            r: WeightMatrix::Diagonal { diagonal },
        };
        match initialize_input_cost_weight(&settings, &info()) {
            Err(ConfigError::NotPositiveDefinite { min_eigenvalue, .. }) => {
                assert_relative_eq!(min_eigenvalue, -0.5, epsilon = 1e-12);
            }
            other => panic!("expected NotPositiveDefinite, got {other:?}"),
        }
        let zero_r = tracking(1.0, 0.0);
        assert!(initialize_input_cost_weight(&zero_r, &info()).is_err());
    }

    #[test]
    fn rejects_nan_weight() {
        let diagonal = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, f64::NAN, 1.0]));
        assert!(matches!(
            validate_weight("R", diagonal, 3),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "R"
        ));
        let all_nan = DMatrix::from_element(2, 2, f64::NAN);
        assert!(validate_weight("Q", all_nan, 2).is_err());
        let infinite = DMatrix::from_diagonal(&DVector::from_vec(vec![f64::INFINITY, 1.0]));
        assert!(validate_weight("Q", infinite, 2).is_err());

        let mut settings = tracking(1.0, 1.0);
        if let WeightMatrix::Diagonal { diagonal } = &mut settings.r {
            diagonal[5] = f64::NAN;
        }
        assert!(initialize_input_cost_weight(&settings, &info()).is_err());
    }

    #[test]
    fn zero_cost_at_reference_and_weight_compensation() {
        let info = info();
        let x_ref = DVector::from_fn(info.state_dim(), |i, _| 0.1 * i as f64);
        let cost =
            get_base_tracking_cost(&tracking(2.0, 0.5), &info, reference(x_ref.clone()), manager())
                .unwrap();

        let double_stance = info.weight_compensating_input(ContactMode::stance(2));
        assert_relative_eq!(double_stance[2], 4.0 * GRAVITY / 2.0);
        assert_relative_eq!(cost.value(0.5, &x_ref, &double_stance).unwrap(), 0.0);

        // On [1, 2) only contact 0 carries the weight.
        let single = info.weight_compensating_input(ContactMode::stance(2).with_contact(1, false));
        assert_relative_eq!(cost.value(1.5, &x_ref, &single).unwrap(), 0.0);
        assert!(cost.value(1.5, &x_ref, &double_stance).unwrap() > 0.0);
    }

    #[test]
    fn quadratic_approximation_is_exact() {
        let info = info();
        let x_ref = DVector::zeros(info.state_dim());
        let cost = get_base_tracking_cost(&tracking(2.0, 0.5), &info, reference(x_ref), manager())
            .unwrap();
        let state = DVector::from_element(info.state_dim(), 0.1);
        let input = info.weight_compensating_input(ContactMode::stance(2)).add_scalar(1.0);
        let approx = cost.quadratic_approximation(0.2, &state, &input).unwrap();

        assert_relative_eq!(approx.f, cost.value(0.2, &state, &input).unwrap(), epsilon = 1e-12);
        assert_relative_eq!(approx.f, 0.5 * 2.0 * 0.01 * 14.0 + 0.5 * 0.5 * 8.0, epsilon = 1e-12);
        assert_relative_eq!(approx.dfdx[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(approx.dfdu[7], 0.5, epsilon = 1e-12);
        assert_relative_eq!(approx.dfduu[(3, 3)], 0.5);
    }

    #[test]
    fn reference_update_shifts_target() {
        let info = info();
        let slot = reference(DVector::zeros(info.state_dim()));
        let cost = get_base_tracking_cost(&tracking(1.0, 1.0), &info, Arc::clone(&slot), manager())
            .unwrap();
        let state = DVector::from_element(info.state_dim(), 1.0);
        let input = info.weight_compensating_input(ContactMode::stance(2));
        assert!(cost.value(0.0, &state, &input).unwrap() > 0.0);

        slot.request(ReferenceTrajectory::constant(
            0.0,
            state.clone(),
            DVector::zeros(info.input_dim()),
        ));
        slot.synchronize();
        assert_relative_eq!(cost.value(0.0, &state, &input).unwrap(), 0.0);
    }

    #[test]
    fn coverage_errors_propagate() {
        let info = info();
        let finite = GaitSchedule::finite(0.0, vec![GaitPhase::new(1.0, ContactMode::stance(2))])
            .unwrap();
        let manager = Arc::new(ModeScheduleManager::new(finite, 2).unwrap());
        let cost = get_base_tracking_cost(
            &tracking(1.0, 1.0),
            &info,
            reference(DVector::zeros(info.state_dim())),
            manager,
        )
        .unwrap();
        let err = cost
            .value(2.0, &DVector::zeros(14), &DVector::zeros(8))
            .unwrap_err();
        assert!(matches!(err, EvalError::Coverage(_)));
    }
}
