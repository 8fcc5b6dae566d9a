//! Reference trajectories and target-pose commands.

use nalgebra::DVector;

use clankers_core::config::TargetCommandConfig;
use clankers_core::error::ConfigError;
use clankers_core::types::CentroidalModelInfo;

/// Timed state/input knots, linearly interpolated and held constant past
/// either end.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTrajectory {
    times: Vec<f64>,
    states: Vec<DVector<f64>>,
    inputs: Vec<DVector<f64>>,
}

impl ReferenceTrajectory {
    /// Knot times must be non-decreasing and every knot the same size.
    pub fn new(
        times: Vec<f64>,
        states: Vec<DVector<f64>>,
        inputs: Vec<DVector<f64>>,
    ) -> Result<Self, ConfigError> {
        if times.is_empty() {
            return Err(ConfigError::invalid("reference.times", "no knots"));
        }
        if states.len() != times.len() || inputs.len() != times.len() {
            return Err(ConfigError::DimensionMismatch {
                name: "reference knots".into(),
                expected: times.len(),
                got: states.len().min(inputs.len()),
            });
        }
        if times.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(ConfigError::invalid("reference.times", "not sorted"));
        }
        let nx = states[0].len();
        let nu = inputs[0].len();
        if let Some(bad) = states.iter().find(|s| s.len() != nx) {
            return Err(ConfigError::DimensionMismatch {
                name: "reference state".into(),
                expected: nx,
                got: bad.len(),
            });
        }
        if let Some(bad) = inputs.iter().find(|u| u.len() != nu) {
            return Err(ConfigError::DimensionMismatch {
                name: "reference input".into(),
                expected: nu,
                got: bad.len(),
            });
        }
        Ok(Self {
            times,
            states,
            inputs,
        })
    }

    /// Single knot held for all time.
    pub fn constant(time: f64, state: DVector<f64>, input: DVector<f64>) -> Self {
        Self {
            times: vec![time],
            states: vec![state],
            inputs: vec![input],
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn state_dim(&self) -> usize {
        self.states[0].len()
    }

    pub fn input_dim(&self) -> usize {
        self.inputs[0].len()
    }

    fn interpolate(&self, knots: &[DVector<f64>], time: f64) -> DVector<f64> {
        let i = self.times.partition_point(|&t| t <= time);
        if i == 0 {
            return knots[0].clone();
        }
        if i == self.times.len() {
            return knots[i - 1].clone();
        }
        let (t0, t1) = (self.times[i - 1], self.times[i]);
        let alpha = if t1 > t0 { (time - t0) / (t1 - t0) } else { 1.0 };
        knots[i - 1].lerp(&knots[i], alpha)
    }

    pub fn state_at(&self, time: f64) -> DVector<f64> {
        self.interpolate(&self.states, time)
    }

    pub fn input_at(&self, time: f64) -> DVector<f64> {
        self.interpolate(&self.inputs, time)
    }
}

/// Desired planar base pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetPose {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

/// Seconds needed to reach `target` from the current base pose at the
/// configured average speeds. The slower of translation and rotation wins.
pub fn estimate_time_to_target(
    current: &TargetPose,
    target: &TargetPose,
    command: &TargetCommandConfig,
) -> f64 {
    let displacement = (target.x - current.x).hypot(target.y - current.y);
    let rotation = (target.yaw - current.yaw).abs();
    let displacement_time = displacement / command.target_displacement_velocity;
    let rotation_time = rotation / command.target_rotation_velocity;
    displacement_time.max(rotation_time)
}

/// Two-knot reference from the current base pose to `target`.
///
/// The target base height is `com_height` with zero pitch and roll; momentum
/// is zero and joints sit at the default joint state. Inputs are zero.
pub fn target_pose_to_trajectory(
    time: f64,
    state: &DVector<f64>,
    target: &TargetPose,
    command: &TargetCommandConfig,
    info: &CentroidalModelInfo,
) -> Result<ReferenceTrajectory, ConfigError> {
    if state.len() != info.state_dim() {
        return Err(ConfigError::DimensionMismatch {
            name: "state".into(),
            expected: info.state_dim(),
            got: state.len(),
        });
    }
    if command.default_joint_state.len() != info.num_joints {
        return Err(ConfigError::DimensionMismatch {
            name: "default_joint_state".into(),
            expected: info.num_joints,
            got: command.default_joint_state.len(),
        });
    }

    let base = CentroidalModelInfo::BASE_POSE_OFFSET;
    let current = TargetPose {
        x: state[base],
        y: state[base + 1],
        yaw: state[base + 3],
    };
    let arrival = time + estimate_time_to_target(&current, target, command);

    let knot = |pose: [f64; 6]| {
        let mut x = DVector::zeros(info.state_dim());
        x.fixed_rows_mut::<6>(base)
            .copy_from_slice(&pose);
        x.rows_mut(CentroidalModelInfo::JOINT_OFFSET, info.num_joints)
            .copy_from_slice(&command.default_joint_state);
        x
    };
    let start = knot([
        current.x,
        current.y,
        state[base + 2],
        current.yaw,
        state[base + 4],
        state[base + 5],
    ]);
    let goal = knot([target.x, target.y, command.com_height, target.yaw, 0.0, 0.0]);
    let input = DVector::zeros(info.input_dim());

    ReferenceTrajectory::new(
        vec![time, arrival],
        vec![start, goal],
        vec![input.clone(), input],
    )
}
