//! Clankers legged MPC command-line tooling.
//!
//! Provides four modes of operation:
//! - `check`: Load and validate a task file and a target-command file
//! - `schedule`: Print the contact modes of a task over a time window
//! - `gaits`: List the gait library of a task
//! - `info`: Print workspace crate versions

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use clankers_core::config::{TargetCommandConfig, TaskConfig};
use clankers_core::error::{ClankersError, ConfigError};
use clankers_core::types::ContactNames;
use clankers_mpc::cost::{initialize_input_cost_weight, initialize_state_cost_weight};
use clankers_mpc::gait::{GaitSchedule, GaitTemplate};
use clankers_mpc::penalty::RelaxedBarrierPenalty;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Clankers legged-robot MPC tooling.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a task file and, optionally, a target-command file.
    Check {
        /// Task file (TOML).
        #[arg(short, long, default_value = "config/task.toml")]
        task: PathBuf,

        /// Target-command file (TOML).
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },

    /// Print the contact mode sequence over a time window.
    Schedule {
        #[arg(short, long, default_value = "config/task.toml")]
        task: PathBuf,

        /// Window start (seconds).
        #[arg(long, default_value_t = 0.0)]
        from: f64,

        /// Window end (seconds).
        #[arg(long, default_value_t = 2.0)]
        to: f64,

        /// Switch to this library gait at `--switch-time`.
        #[arg(short, long)]
        gait: Option<String>,

        /// Time at which `--gait` takes over, after the stance transition.
        #[arg(long, default_value_t = 0.0)]
        switch_time: f64,
    },

    /// List the gait library.
    Gaits {
        #[arg(short, long, default_value = "config/task.toml")]
        task: PathBuf,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn load_task(path: &Path) -> Result<(TaskConfig, ContactNames), ClankersError> {
    let task = TaskConfig::from_file(path)?;
    let names = task.model.contact_names()?;
    debug!(path = %path.display(), contacts = names.len(), "task loaded");
    Ok((task, names))
}

fn run_check(task_path: &Path, reference_path: Option<&Path>) -> Result<(), ClankersError> {
    let (task, names) = load_task(task_path)?;
    let info = task.model.model_info();

    let schedule = GaitSchedule::from_config(&task.gait, &names)?;
    schedule.ensure_covers(0.0, task.mpc.time_horizon)?;
    for (name, definition) in &task.gait.library {
        GaitTemplate::from_definition(&names, definition)?;
        debug!(gait = %name, "gait ok");
    }
    initialize_state_cost_weight(&task.tracking, &info)?;
    initialize_input_cost_weight(&task.tracking, &info)?;
    RelaxedBarrierPenalty::new(task.friction_cone.mu, task.friction_cone.delta)?;

    if let Some(path) = reference_path {
        let command = TargetCommandConfig::from_file(path)?;
        if command.default_joint_state.len() != info.num_joints {
            return Err(ConfigError::DimensionMismatch {
                name: "default_joint_state".into(),
                expected: info.num_joints,
                got: command.default_joint_state.len(),
            }
            .into());
        }
    }

    info!(
        contacts = info.num_contacts,
        joints = info.num_joints,
        state_dim = info.state_dim(),
        input_dim = info.input_dim(),
        gaits = task.gait.library.len(),
        "task valid"
    );
    println!("{}: ok", task_path.display());
    println!(
        "contacts={}, joints={}, state_dim={}, input_dim={}, horizon={}s, gaits={}",
        info.num_contacts,
        info.num_joints,
        info.state_dim(),
        info.input_dim(),
        task.mpc.time_horizon,
        task.gait.library.len()
    );
    Ok(())
}

fn run_schedule(
    task_path: &Path,
    from: f64,
    to: f64,
    gait: Option<&str>,
    switch_time: f64,
) -> Result<(), ClankersError> {
    let (task, names) = load_task(task_path)?;
    let mut schedule = GaitSchedule::from_config(&task.gait, &names)?;
    if let Some(name) = gait {
        let template = GaitTemplate::from_definition(&names, task.gait.gait(name)?)?;
        let keep_from = from.min(switch_time);
        schedule = schedule.insert_template(
            keep_from,
            switch_time,
            template,
            task.model.phase_transition_stance_time,
        )?;
    }

    let modes = schedule.mode_schedule(from, to)?;
    let mut begin = from;
    for (k, mode) in modes.modes.iter().enumerate() {
        let end = modes.event_times.get(k).copied().unwrap_or(to);
        println!("[{begin:8.3}, {end:8.3})  {mode}  {}", names.mode_name(*mode));
        begin = end;
    }
    Ok(())
}

fn run_gaits(task_path: &Path) -> Result<(), ClankersError> {
    let (task, names) = load_task(task_path)?;
    for (name, definition) in &task.gait.library {
        let template = GaitTemplate::from_definition(&names, definition)?;
        let marker = if *name == task.gait.default { "*" } else { " " };
        let phases: Vec<String> = template
            .phases()
            .iter()
            .map(|p| format!("{}:{:.3}", names.mode_name(p.mode), p.duration))
            .collect();
        println!(
            "{marker} {name:<16} period={:.3}s  {}",
            template.period(),
            phases.join(" ")
        );
    }
    Ok(())
}

fn run_info() {
    println!("clankers v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  clankers-core {}", env!("CARGO_PKG_VERSION"));
    println!("  clankers-mpc  {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("edition: 2024");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Check { task, reference }) => run_check(&task, reference.as_deref()),
        Some(Commands::Schedule {
            task,
            from,
            to,
            gait,
            switch_time,
        }) => run_schedule(&task, from, to, gait.as_deref(), switch_time),
        Some(Commands::Gaits { task }) => run_gaits(&task),
        Some(Commands::Info) => {
            run_info();
            Ok(())
        }
        None => run_check(Path::new("config/task.toml"), None),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
