//! Warm-start guesses for the solver.

use std::sync::Arc;

use nalgebra::DVector;

use clankers_core::error::EvalError;
use clankers_core::types::CentroidalModelInfo;

use crate::schedule::ModeScheduleManager;

/// Input and next-state guess over `[time, next_time]`.
pub trait Initializer: Send + Sync {
    fn compute(
        &self,
        time: f64,
        state: &DVector<f64>,
        next_time: f64,
    ) -> Result<(DVector<f64>, DVector<f64>), EvalError>;
}

/// Weight-compensating contact forces with zero joint velocities, holding the
/// current state.
pub struct LeggedRobotInitializer {
    info: CentroidalModelInfo,
    manager: Arc<ModeScheduleManager>,
    extend_normalized_momentum: bool,
}

impl LeggedRobotInitializer {
    pub fn new(info: CentroidalModelInfo, manager: Arc<ModeScheduleManager>) -> Self {
        Self {
            info,
            manager,
            extend_normalized_momentum: true,
        }
    }

    /// Keep the current momentum in the next-state guess (default) or zero it.
    #[must_use]
    pub const fn with_momentum_extension(mut self, extend: bool) -> Self {
        self.extend_normalized_momentum = extend;
        self
    }
}

impl Initializer for LeggedRobotInitializer {
    fn compute(
        &self,
        time: f64,
        state: &DVector<f64>,
        _next_time: f64,
    ) -> Result<(DVector<f64>, DVector<f64>), EvalError> {
        if state.len() != self.info.state_dim() {
            return Err(EvalError::DimensionMismatch {
                name: "state",
                expected: self.info.state_dim(),
                got: state.len(),
            });
        }
        let mode = self.manager.query(time)?;
        let input = self.info.weight_compensating_input(mode);
        let mut next_state = state.clone();
        if !self.extend_normalized_momentum {
            next_state.rows_mut(0, CentroidalModelInfo::BASE_POSE_OFFSET).fill(0.0);
        }
        Ok((input, next_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gait::{GaitPhase, GaitSchedule, GaitTemplate};
    use approx::assert_relative_eq;
    use clankers_core::types::{ContactMode, GRAVITY};

    fn setup() -> (CentroidalModelInfo, Arc<ModeScheduleManager>) {
        let info = CentroidalModelInfo {
            num_contacts: 4,
            num_joints: 12,
            robot_mass: 20.0,
        };
        let template = GaitTemplate::new(vec![
            GaitPhase::new(0.5, ContactMode::stance(4)),
            GaitPhase::new(0.5, ContactMode::from_flags(&[true, false, false, true]).unwrap()),
        ])
        .unwrap();
        let manager = ModeScheduleManager::new(GaitSchedule::periodic(0.0, template), 4).unwrap();
        (info, Arc::new(manager))
    }

    #[test]
    fn splits_weight_over_stance_feet() {
        let (info, manager) = setup();
        let init = LeggedRobotInitializer::new(info, manager);
        let state = DVector::from_element(info.state_dim(), 0.3);

        let (input, next) = init.compute(0.1, &state, 0.2).unwrap();
        assert_relative_eq!(input[2], 20.0 * GRAVITY / 4.0, epsilon = 1e-12);
        assert_relative_eq!(next, state);

        let (input, _) = init.compute(0.7, &state, 0.8).unwrap();
        assert_relative_eq!(input[2], 20.0 * GRAVITY / 2.0, epsilon = 1e-12);
        assert_relative_eq!(input[5], 0.0);
        assert_relative_eq!(input[11], 20.0 * GRAVITY / 2.0, epsilon = 1e-12);
        assert_relative_eq!(input.rows(12, 12).norm(), 0.0);
    }

    #[test]
    fn momentum_can_be_zeroed() {
        let (info, manager) = setup();
        let init = LeggedRobotInitializer::new(info, manager).with_momentum_extension(false);
        let state = DVector::from_element(info.state_dim(), 0.3);
        let (_, next) = init.compute(0.0, &state, 0.1).unwrap();
        assert_relative_eq!(next.rows(0, 6).norm(), 0.0);
        assert_relative_eq!(next[6], 0.3);
    }

    #[test]
    fn rejects_wrong_state_size() {
        let (info, manager) = setup();
        let init = LeggedRobotInitializer::new(info, manager);
        assert!(init.compute(0.0, &DVector::zeros(3), 0.1).is_err());
    }
}
