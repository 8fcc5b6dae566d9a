//! Assembles the legged-robot optimal control problem from configuration.

use std::path::Path;
use std::sync::Arc;

use nalgebra::DVector;
use tracing::info;

use clankers_core::config::{
    DdpSettings, ModelSettings, MpcSettings, RolloutSettings, TargetCommandConfig, TaskConfig,
};
use clankers_core::error::{ClankersError, ConfigError};
use clankers_core::traits::{EndEffectorKinematics, SystemDynamics};
use clankers_core::types::{CentroidalModelInfo, ContactNames};

use crate::constraints::{
    ContactActivation, ContactPhase, FrictionConeConstraint, GradientMode,
    NormalVelocityConstraint, SoftConstraintCost, ZeroForceConstraint, ZeroVelocityConstraint,
};
use crate::controller::{Mpc, MpcParts, OptimalControlSolver};
use crate::cost::get_base_tracking_cost;
use crate::gait::GaitSchedule;
use crate::initializer::{Initializer, LeggedRobotInitializer};
use crate::penalty::RelaxedBarrierPenalty;
use crate::problem::OptimalControlProblem;
use crate::reference::{ReferenceTrajectory, TargetPose, target_pose_to_trajectory};
use crate::schedule::{GaitReceiver, ModeScheduleManager};
use crate::swing::SwingTrajectoryPlanner;
use crate::synchronized::{SyncSlot, SynchronizedModule};
use crate::terrain::TerrainParameters;

/// Name of the state/input tracking cost.
pub const BASE_TRACKING_COST: &str = "baseTrackingCost";

/// Per-contact term names, `<contact frame>_<term>`.
pub fn friction_cone_name(frame: &str) -> String {
    format!("{frame}_frictionCone")
}

pub fn zero_force_name(frame: &str) -> String {
    format!("{frame}_zeroForce")
}

pub fn zero_velocity_name(frame: &str) -> String {
    format!("{frame}_zeroVelocity")
}

pub fn normal_velocity_name(frame: &str) -> String {
    format!("{frame}_normalVelocity")
}

/// Everything the MPC needs for one legged robot, built once from a task
/// file and a target-command file.
pub struct LeggedRobotInterface {
    task: TaskConfig,
    target_command: TargetCommandConfig,
    info: CentroidalModelInfo,
    names: ContactNames,
    initial_state: DVector<f64>,
    problem: Arc<OptimalControlProblem>,
    initializer: Arc<LeggedRobotInitializer>,
    manager: Arc<ModeScheduleManager>,
    gait_receiver: Arc<GaitReceiver>,
    reference: Arc<SyncSlot<ReferenceTrajectory>>,
    terrain: Arc<SyncSlot<TerrainParameters>>,
    swing_planner: Arc<SwingTrajectoryPlanner>,
    modules: Vec<Arc<dyn SynchronizedModule>>,
}

impl LeggedRobotInterface {
    pub fn new(
        task: TaskConfig,
        target_command: TargetCommandConfig,
        kinematics: Arc<dyn EndEffectorKinematics>,
        dynamics: Arc<dyn SystemDynamics>,
    ) -> Result<Self, ConfigError> {
        task.validate()?;
        target_command.validate()?;

        let names = task.model.contact_names()?;
        let info = task.model.model_info();
        if kinematics.num_end_effectors() != info.num_contacts {
            return Err(ConfigError::ContactCountMismatch {
                expected: info.num_contacts,
                got: kinematics.num_end_effectors(),
            });
        }
        if target_command.default_joint_state.len() != info.num_joints {
            return Err(ConfigError::DimensionMismatch {
                name: "default_joint_state".into(),
                expected: info.num_joints,
                got: target_command.default_joint_state.len(),
            });
        }

        let schedule = GaitSchedule::from_config(&task.gait, &names)?;
        schedule
            .ensure_covers(0.0, task.mpc.time_horizon)
            .map_err(|err| ConfigError::InvalidSchedule(format!("initial schedule: {err}")))?;
        let manager = Arc::new(ModeScheduleManager::new(schedule, info.num_contacts)?);

        let initial_state = DVector::from_column_slice(&task.initial_state);
        let reference = Arc::new(SyncSlot::new(
            "reference",
            ReferenceTrajectory::constant(0.0, initial_state.clone(), DVector::zeros(info.input_dim())),
        ));
        let terrain = Arc::new(SyncSlot::new(
            "terrain",
            TerrainParameters::from_settings(&task.friction_cone),
        ));
        let swing_planner = Arc::new(SwingTrajectoryPlanner::new(
            task.swing.clone(),
            Arc::clone(&manager),
            Arc::clone(&terrain),
        ));

        let mut problem = OptimalControlProblem::new(dynamics);
        problem.costs.add(
            BASE_TRACKING_COST,
            get_base_tracking_cost(&task.tracking, &info, Arc::clone(&reference), Arc::clone(&manager))?,
        )?;

        let penalty = RelaxedBarrierPenalty::new(task.friction_cone.mu, task.friction_cone.delta)?;
        let gradients = GradientMode::from_flag(task.model.use_analytical_gradients_constraints);
        for (contact, frame) in task.model.contact_names.iter().enumerate() {
            let stance = ContactActivation::new(Arc::clone(&manager), contact, ContactPhase::Stance);
            let swing = ContactActivation::new(Arc::clone(&manager), contact, ContactPhase::Swing);

            let cone = FrictionConeConstraint::new(
                stance.clone(),
                info,
                Arc::clone(&terrain),
                &task.friction_cone,
            );
            problem.soft_constraints.add(
                friction_cone_name(frame),
                Box::new(SoftConstraintCost::new(Box::new(cone), penalty)),
            )?;
            problem.equality_constraints.add(
                zero_force_name(frame),
                Box::new(ZeroForceConstraint::new(swing.clone(), info)),
            )?;
            problem.equality_constraints.add(
                zero_velocity_name(frame),
                Box::new(ZeroVelocityConstraint::new(
                    stance,
                    info,
                    Arc::clone(&kinematics),
                    gradients,
                )),
            )?;
            problem.equality_constraints.add(
                normal_velocity_name(frame),
                Box::new(NormalVelocityConstraint::new(
                    swing,
                    info,
                    Arc::clone(&kinematics),
                    Arc::clone(&swing_planner),
                    Arc::clone(&terrain),
                    task.model.position_error_gain,
                    gradients,
                )),
            )?;
        }

        let initializer = Arc::new(LeggedRobotInitializer::new(info, Arc::clone(&manager)));
        let gait_receiver = Arc::new(GaitReceiver::new(
            Arc::clone(&manager),
            names.clone(),
            task.gait.clone(),
            task.model.phase_transition_stance_time,
        ));
        let modules: Vec<Arc<dyn SynchronizedModule>> = vec![
            Arc::clone(&gait_receiver) as Arc<dyn SynchronizedModule>,
            Arc::clone(&reference) as Arc<dyn SynchronizedModule>,
            Arc::clone(&terrain) as Arc<dyn SynchronizedModule>,
            Arc::clone(&manager) as Arc<dyn SynchronizedModule>,
        ];

        info!(
            contacts = info.num_contacts,
            joints = info.num_joints,
            state_dim = info.state_dim(),
            input_dim = info.input_dim(),
            equality_terms = problem.equality_constraints.len(),
            soft_terms = problem.soft_constraints.len(),
            gait = %task.gait.default,
            "legged robot interface assembled"
        );

        Ok(Self {
            task,
            target_command,
            info,
            names,
            initial_state,
            problem: Arc::new(problem),
            initializer,
            manager,
            gait_receiver,
            reference,
            terrain,
            swing_planner,
            modules,
        })
    }

    /// Load both configuration files and assemble.
    pub fn from_files(
        task_path: impl AsRef<Path>,
        target_command_path: impl AsRef<Path>,
        kinematics: Arc<dyn EndEffectorKinematics>,
        dynamics: Arc<dyn SystemDynamics>,
    ) -> Result<Self, ConfigError> {
        let task = TaskConfig::from_file(task_path)?;
        let target_command = TargetCommandConfig::from_file(target_command_path)?;
        Self::new(task, target_command, kinematics, dynamics)
    }

    pub fn problem(&self) -> &Arc<OptimalControlProblem> {
        &self.problem
    }

    pub fn initializer(&self) -> Arc<dyn Initializer> {
        Arc::clone(&self.initializer) as Arc<dyn Initializer>
    }

    pub const fn mode_schedule_manager(&self) -> &Arc<ModeScheduleManager> {
        &self.manager
    }

    /// Modules in the order the controller calls them.
    pub fn synchronized_modules(&self) -> &[Arc<dyn SynchronizedModule>] {
        &self.modules
    }

    pub const fn gait_receiver(&self) -> &Arc<GaitReceiver> {
        &self.gait_receiver
    }

    pub const fn reference_slot(&self) -> &Arc<SyncSlot<ReferenceTrajectory>> {
        &self.reference
    }

    pub const fn terrain_slot(&self) -> &Arc<SyncSlot<TerrainParameters>> {
        &self.terrain
    }

    pub const fn swing_planner(&self) -> &Arc<SwingTrajectoryPlanner> {
        &self.swing_planner
    }

    pub const fn model_settings(&self) -> &ModelSettings {
        &self.task.model
    }

    pub const fn mpc_settings(&self) -> &MpcSettings {
        &self.task.mpc
    }

    pub const fn ddp_settings(&self) -> &DdpSettings {
        &self.task.ddp
    }

    pub const fn rollout_settings(&self) -> &RolloutSettings {
        &self.task.rollout
    }

    pub const fn initial_state(&self) -> &DVector<f64> {
        &self.initial_state
    }

    pub const fn model_info(&self) -> &CentroidalModelInfo {
        &self.info
    }

    pub const fn contact_names(&self) -> &ContactNames {
        &self.names
    }

    pub const fn target_command(&self) -> &TargetCommandConfig {
        &self.target_command
    }

    pub const fn task(&self) -> &TaskConfig {
        &self.task
    }

    /// Queue a reference from the current state to `target`, applied at the
    /// next solve.
    pub fn set_target_pose(
        &self,
        time: f64,
        state: &DVector<f64>,
        target: &TargetPose,
    ) -> Result<(), ConfigError> {
        let trajectory =
            target_pose_to_trajectory(time, state, target, &self.target_command, &self.info)?;
        self.reference.request(trajectory);
        Ok(())
    }

    /// Bind the problem to a solver.
    pub fn make_mpc<S, F>(&self, build_solver: F) -> Result<Mpc<S>, ClankersError>
    where
        S: OptimalControlSolver,
        F: FnOnce(&DdpSettings, &RolloutSettings) -> Result<S, ClankersError>,
    {
        let solver = build_solver(&self.task.ddp, &self.task.rollout)?;
        Ok(Mpc::new(
            solver,
            MpcParts {
                problem: Arc::clone(&self.problem),
                initializer: self.initializer(),
                modules: self.modules.clone(),
                manager: Arc::clone(&self.manager),
                mpc: self.task.mpc.clone(),
                ddp: self.task.ddp.clone(),
                rollout: self.task.rollout.clone(),
            },
        ))
    }
}
