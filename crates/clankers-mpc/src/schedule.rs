//! Mode schedule manager and gait command receiver.
//!
//! The manager holds the schedule the solver sees. It changes only in
//! [`ModeScheduleManager::synchronize`], which the controller runs at the
//! start of each solve.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::DVector;
use parking_lot::Mutex;
use tracing::{debug, info};

use clankers_core::config::GaitConfig;
use clankers_core::error::{ClankersError, ConfigError, ScheduleCoverageError};
use clankers_core::types::{ContactMode, ContactNames};

use crate::gait::{GaitSchedule, GaitTemplate, ModeSchedule, SwingInterval};
use crate::synchronized::{SyncSlot, SynchronizedModule};

// ---------------------------------------------------------------------------
// ModeScheduleManager
// ---------------------------------------------------------------------------

pub struct ModeScheduleManager {
    slot: SyncSlot<GaitSchedule>,
    num_contacts: usize,
    generation: AtomicU64,
}

impl ModeScheduleManager {
    /// Fails if the schedule's contact count differs from `num_contacts`.
    pub fn new(schedule: GaitSchedule, num_contacts: usize) -> Result<Self, ConfigError> {
        schedule.validate_contact_count(num_contacts)?;
        Ok(Self {
            slot: SyncSlot::new("mode_schedule", schedule),
            num_contacts,
            generation: AtomicU64::new(0),
        })
    }

    pub const fn num_contacts(&self) -> usize {
        self.num_contacts
    }

    /// Contact mode at `time` under the active schedule.
    pub fn query(&self, time: f64) -> Result<ContactMode, ScheduleCoverageError> {
        self.slot.read().mode_at_time(time)
    }

    pub fn next_switch_time(&self, time: f64) -> Result<f64, ScheduleCoverageError> {
        self.slot.read().next_switch_time(time)
    }

    pub fn mode_schedule(&self, t0: f64, t1: f64) -> Result<ModeSchedule, ScheduleCoverageError> {
        self.slot.read().mode_schedule(t0, t1)
    }

    pub fn swing_interval(
        &self,
        contact: usize,
        time: f64,
    ) -> Result<Option<SwingInterval>, ScheduleCoverageError> {
        self.slot.read().swing_interval(contact, time)
    }

    /// Queue a schedule for the next sync point. Newest request wins.
    pub fn request_schedule_update(&self, schedule: GaitSchedule) -> Result<(), ConfigError> {
        schedule.validate_contact_count(self.num_contacts)?;
        self.slot.request(schedule);
        Ok(())
    }

    /// Install the pending schedule, if any. Returns whether a swap happened.
    pub fn synchronize(&self) -> bool {
        if !self.slot.synchronize() {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let active = self.slot.read();
        info!(
            generation,
            start_time = active.start_time(),
            prefix_phases = active.prefix().len(),
            "mode schedule updated"
        );
        true
    }

    /// Whether a schedule is queued for the next sync point.
    pub fn has_pending(&self) -> bool {
        self.slot.has_pending()
    }

    /// Snapshot of the active schedule.
    pub fn active_schedule(&self) -> Arc<GaitSchedule> {
        self.slot.active()
    }

    /// Number of schedule swaps so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl SynchronizedModule for ModeScheduleManager {
    fn name(&self) -> &str {
        "mode_schedule_manager"
    }

    fn pre_solve_run(
        &self,
        init_time: f64,
        final_time: f64,
        _state: &DVector<f64>,
    ) -> Result<(), ClankersError> {
        self.synchronize();
        self.slot
            .read()
            .ensure_covers(init_time, final_time)
            .map_err(ClankersError::from)
    }
}

// ---------------------------------------------------------------------------
// GaitReceiver
// ---------------------------------------------------------------------------

/// Turns gait commands into schedule updates at the next sync point.
///
/// The new gait takes over at the start of the horizon being solved, after
/// an all-stance transition phase. If a foot is in the air at that time the
/// switch waits for the end of the current phase.
pub struct GaitReceiver {
    manager: Arc<ModeScheduleManager>,
    names: ContactNames,
    gaits: GaitConfig,
    transition_stance_time: f64,
    pending: Mutex<Option<(String, GaitTemplate)>>,
}

impl GaitReceiver {
    pub fn new(
        manager: Arc<ModeScheduleManager>,
        names: ContactNames,
        gaits: GaitConfig,
        transition_stance_time: f64,
    ) -> Self {
        Self {
            manager,
            names,
            gaits,
            transition_stance_time,
            pending: Mutex::new(None),
        }
    }

    /// Queue a gait given as a template.
    pub fn set_gait(&self, label: impl Into<String>, template: GaitTemplate) -> Result<(), ConfigError> {
        if template.num_contacts() != self.manager.num_contacts() {
            return Err(ConfigError::ContactCountMismatch {
                expected: self.manager.num_contacts(),
                got: template.num_contacts(),
            });
        }
        *self.pending.lock() = Some((label.into(), template));
        Ok(())
    }

    /// Queue a gait from the library.
    pub fn set_gait_by_name(&self, name: &str) -> Result<(), ConfigError> {
        let template = GaitTemplate::from_definition(&self.names, self.gaits.gait(name)?)?;
        self.set_gait(name, template)
    }

    /// Names of the gaits in the library.
    pub fn gait_names(&self) -> impl Iterator<Item = &str> {
        self.gaits.library.keys().map(String::as_str)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl SynchronizedModule for GaitReceiver {
    fn name(&self) -> &str {
        "gait_receiver"
    }

    fn pre_solve_run(
        &self,
        init_time: f64,
        _final_time: f64,
        _state: &DVector<f64>,
    ) -> Result<(), ClankersError> {
        let Some((label, template)) = self.pending.lock().take() else {
            return Ok(());
        };
        let active = self.manager.active_schedule();
        let switch_time = match active.phase_at(init_time) {
            Ok(phase) if phase.mode.num_stance() < phase.mode.num_contacts() => phase.end,
            _ => init_time,
        };
        let updated = active.insert_template(
            init_time,
            switch_time,
            template,
            self.transition_stance_time,
        )?;
        if self.manager.has_pending() {
            debug!(gait = %label, "queued schedule replaced by gait command");
        }
        debug!(gait = %label, time = switch_time, "gait command applied");
        self.manager.request_schedule_update(updated)?;
        self.manager.synchronize();
        Ok(())
    }
}
