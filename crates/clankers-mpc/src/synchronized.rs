//! Synchronized update protocol.
//!
//! Producers (gait commands, reference generators, terrain estimators) write
//! into pending slots from any thread. The solver thread applies pending
//! values only at the start of each solve, through the
//! [`SynchronizedModule`] hooks, so a solve never observes a half-applied
//! update.

use std::sync::Arc;

use nalgebra::DVector;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

use clankers_core::error::ClankersError;

use crate::controller::PrimalSolution;

// ---------------------------------------------------------------------------
// SynchronizedModule
// ---------------------------------------------------------------------------

/// Hook called by the controller around every solve.
pub trait SynchronizedModule: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Apply pending updates before a solve over `[init_time, final_time]`.
    fn pre_solve_run(
        &self,
        init_time: f64,
        final_time: f64,
        state: &DVector<f64>,
    ) -> Result<(), ClankersError>;

    /// Observe the solution of the last solve.
    fn post_solve_run(&self, _solution: &PrimalSolution) {}
}

// ---------------------------------------------------------------------------
// SyncSlot
// ---------------------------------------------------------------------------

/// Pending/active double buffer.
///
/// `request` may be called from any thread; the newest request wins.
/// `synchronize` installs the pending value with a pointer swap. Readers see
/// the active value until then.
pub struct SyncSlot<T> {
    name: String,
    active: RwLock<Arc<T>>,
    pending: Mutex<Option<Arc<T>>>,
}

impl<T: Send + Sync> SyncSlot<T> {
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            name: name.into(),
            active: RwLock::new(Arc::new(initial)),
            pending: Mutex::new(None),
        }
    }

    /// Queue `value` for the next sync point, replacing any earlier request.
    pub fn request(&self, value: T) {
        let replaced = self.pending.lock().replace(Arc::new(value)).is_some();
        if replaced {
            debug!(slot = %self.name, "pending update replaced");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Install the pending value. Returns whether anything changed.
    pub fn synchronize(&self) -> bool {
        let Some(next) = self.pending.lock().take() else {
            return false;
        };
        *self.active.write() = next;
        debug!(slot = %self.name, "pending update applied");
        true
    }

    /// Snapshot of the active value.
    pub fn active(&self) -> Arc<T> {
        Arc::clone(&self.active.read())
    }

    /// Borrow the active value without touching the reference count.
    pub fn read(&self) -> RwLockReadGuard<'_, Arc<T>> {
        self.active.read()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Send + Sync> SynchronizedModule for SyncSlot<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_solve_run(
        &self,
        _init_time: f64,
        _final_time: f64,
        _state: &DVector<f64>,
    ) -> Result<(), ClankersError> {
        self.synchronize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn request_is_invisible_until_synchronize() {
        let slot = SyncSlot::new("friction", 0.3_f64);
        slot.request(0.7);
        assert!(slot.has_pending());
        assert!((*slot.active() - 0.3).abs() < 1e-12);
        assert!(slot.synchronize());
        assert!((*slot.active() - 0.7).abs() < 1e-12);
        assert!(!slot.has_pending());
    }

    #[test]
    fn synchronize_without_pending_keeps_identity() {
        let slot = SyncSlot::new("value", 1_u32);
        let before = slot.active();
        assert!(!slot.synchronize());
        assert!(Arc::ptr_eq(&before, &slot.active()));
    }

    #[test]
    fn last_writer_wins() {
        let slot = SyncSlot::new("value", 0_u32);
        slot.request(1);
        slot.request(2);
        slot.request(3);
        slot.synchronize();
        assert_eq!(*slot.active(), 3);
    }

    #[test]
    fn snapshots_survive_swaps() {
        let slot = SyncSlot::new("value", 10_u32);
        let old = slot.active();
        slot.request(20);
        slot.synchronize();
        assert_eq!(*old, 10);
        assert_eq!(**slot.read(), 20);
    }

    #[test]
    fn concurrent_requests_land_as_one_of_the_values() {
        let slot = Arc::new(SyncSlot::new("value", 0_u32));
        let handles: Vec<_> = (1..=8)
            .map(|v| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.request(v))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(slot.synchronize());
        assert!((1..=8).contains(&*slot.active()));
    }

    #[test]
    fn pre_solve_run_applies_pending() {
        let slot = SyncSlot::new("value", 0_u32);
        slot.request(5);
        slot.pre_solve_run(0.0, 1.0, &DVector::zeros(0)).unwrap();
        assert_eq!(*slot.active(), 5);
    }

    #[test]
    fn slot_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncSlot<f64>>();
    }
}
