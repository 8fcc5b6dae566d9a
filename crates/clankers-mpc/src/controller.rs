//! Receding-horizon loop around an injected optimal control solver.
//!
//! Each cycle runs every synchronized module's pre-solve hook in order, hands
//! the problem for `[time, time + horizon]` to the solver, then runs every
//! post-solve hook.

use std::sync::Arc;
use std::time::Instant;

use nalgebra::DVector;
use tracing::{debug, info};

use clankers_core::config::{DdpSettings, MpcSettings, RolloutSettings};
use clankers_core::error::{ClankersError, ExternalError};

use crate::gait::ModeSchedule;
use crate::initializer::Initializer;
use crate::problem::OptimalControlProblem;
use crate::schedule::ModeScheduleManager;
use crate::synchronized::SynchronizedModule;

/// Optimized trajectory over one horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimalSolution {
    pub times: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    pub inputs: Vec<DVector<f64>>,
    pub mode_schedule: ModeSchedule,
}

impl PrimalSolution {
    /// Input at the first node, the one applied to the robot.
    pub fn first_input(&self) -> Option<&DVector<f64>> {
        self.inputs.first()
    }

    pub fn final_time(&self) -> Option<f64> {
        self.times.last().copied()
    }
}

/// Everything a solver needs for one horizon.
pub struct SolveRequest<'a> {
    pub init_time: f64,
    pub final_time: f64,
    pub initial_state: &'a DVector<f64>,
    pub problem: &'a OptimalControlProblem,
    pub initializer: &'a dyn Initializer,
    pub mode_schedule: ModeSchedule,
    pub ddp: &'a DdpSettings,
    pub rollout: &'a RolloutSettings,
}

/// Solver plugged into [`Mpc`]. Its errors are passed through untouched.
pub trait OptimalControlSolver: Send {
    fn solve(&mut self, request: &SolveRequest<'_>) -> Result<PrimalSolution, ExternalError>;
}

/// Shared pieces an [`Mpc`] runs on.
pub struct MpcParts {
    pub problem: Arc<OptimalControlProblem>,
    pub initializer: Arc<dyn Initializer>,
    /// Called in this order before and after every solve.
    pub modules: Vec<Arc<dyn SynchronizedModule>>,
    pub manager: Arc<ModeScheduleManager>,
    pub mpc: MpcSettings,
    pub ddp: DdpSettings,
    pub rollout: RolloutSettings,
}

pub struct Mpc<S> {
    solver: S,
    parts: MpcParts,
    last_solution: Option<PrimalSolution>,
    cycles: u64,
}

impl<S: OptimalControlSolver> Mpc<S> {
    pub const fn new(solver: S, parts: MpcParts) -> Self {
        Self {
            solver,
            parts,
            last_solution: None,
            cycles: 0,
        }
    }

    /// Solve the horizon starting at `time` from `state`.
    pub fn run(&mut self, time: f64, state: &DVector<f64>) -> Result<&PrimalSolution, ClankersError> {
        let final_time = time + self.parts.mpc.time_horizon;
        for module in &self.parts.modules {
            module.pre_solve_run(time, final_time, state)?;
        }

        let request = SolveRequest {
            init_time: time,
            final_time,
            initial_state: state,
            problem: &self.parts.problem,
            initializer: self.parts.initializer.as_ref(),
            mode_schedule: self.parts.manager.mode_schedule(time, final_time)?,
            ddp: &self.parts.ddp,
            rollout: &self.parts.rollout,
        };
        let start = Instant::now();
        let solution = self.solver.solve(&request).map_err(ClankersError::Solver)?;
        let solve_time_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

        for module in &self.parts.modules {
            module.post_solve_run(&solution);
        }

        self.cycles += 1;
        if self.parts.mpc.debug_print {
            info!(
                cycle = self.cycles,
                time,
                final_time,
                solve_time_us,
                mode_switches = request.mode_schedule.event_times.len(),
                "mpc cycle"
            );
        } else {
            debug!(cycle = self.cycles, time, solve_time_us, "mpc cycle");
        }
        Ok(self.last_solution.insert(solution))
    }

    pub const fn last_solution(&self) -> Option<&PrimalSolution> {
        self.last_solution.as_ref()
    }

    /// Completed solve cycles.
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    pub const fn solver(&self) -> &S {
        &self.solver
    }

    pub const fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    pub const fn parts(&self) -> &MpcParts {
        &self.parts
    }
}
