//! Optimal control problem assembly for legged-robot MPC.
//!
//! Turns a time-varying contact schedule into per-leg constraints and costs
//! for a model-predictive controller, and applies asynchronous updates only at
//! well-defined points:
//!
//! 1. **Gait schedule**: contact mode as a function of time, periodic or finite
//! 2. **Mode schedule manager**: the schedule the solver sees, swapped only at
//!    synchronization points
//! 3. **Synchronized modules**: pending/active buffers for gait commands,
//!    reference trajectories and terrain parameters
//! 4. **Constraint/cost factory**: friction cones, zero force, zero velocity,
//!    normal velocity and the base tracking cost, each gated by the schedule
//! 5. **Interface**: builds everything from a task file and binds it to an
//!    injected solver
//!
//! # Architecture
//!
//! Per-contact terms are built once. Instead of rebuilding the problem at
//! every mode change, each term asks the active schedule whether it applies
//! at the queried time. Producers write only pending slots; the solver thread
//! installs them in [`synchronized::SynchronizedModule::pre_solve_run`] before
//! each solve.

pub mod constraints;
pub mod controller;
pub mod cost;
pub mod gait;
pub mod initializer;
pub mod interface;
pub mod penalty;
pub mod problem;
pub mod reference;
pub mod schedule;
pub mod swing;
pub mod synchronized;
pub mod terrain;

pub use constraints::{
    ContactActivation, ContactPhase, FrictionConeConstraint, GradientMode,
    NormalVelocityConstraint, SoftConstraintCost, StateInputConstraint, ZeroForceConstraint,
    ZeroVelocityConstraint,
};
pub use controller::{Mpc, MpcParts, OptimalControlSolver, PrimalSolution, SolveRequest};
pub use cost::{
    QuadraticTrackingCost, StateInputCost, get_base_tracking_cost, initialize_input_cost_weight,
    initialize_state_cost_weight,
};
pub use gait::{GaitPhase, GaitSchedule, GaitTemplate, GaitType, ModeSchedule, SwingInterval};
pub use initializer::{Initializer, LeggedRobotInitializer};
pub use interface::LeggedRobotInterface;
pub use penalty::RelaxedBarrierPenalty;
pub use problem::{OptimalControlProblem, TermCollection, TermEvaluation};
pub use reference::{ReferenceTrajectory, TargetPose, target_pose_to_trajectory};
pub use schedule::{GaitReceiver, ModeScheduleManager};
pub use swing::SwingTrajectoryPlanner;
pub use synchronized::{SyncSlot, SynchronizedModule};
pub use terrain::TerrainParameters;
