//! Swing foot height reference.
//!
//! During a swing the foot follows a 12-point (degree-11) Bezier height
//! profile between liftoff and touchdown. The first and last three control
//! points are zero, so height, vertical velocity and vertical acceleration all
//! vanish at both ends. The swing times come from the active mode schedule and
//! the ground height from the active terrain parameters.

use std::sync::Arc;

use clankers_core::config::SwingSettings;
use clankers_core::error::EvalError;

use crate::schedule::ModeScheduleManager;
use crate::synchronized::SyncSlot;
use crate::terrain::TerrainParameters;

// Height profile control points. Peaks at t = 0.5.
const BEZIER_H: [f64; 12] = [
    0.0, 0.0, 0.0, // zero at liftoff
    0.9, 0.9, // rise
    1.0, 1.0, // peak
    0.9, 0.9, // descent
    0.0, 0.0, 0.0, // zero at touchdown
];

// bezier_eval(&BEZIER_H, 0.5), used to normalize the apex to `swing_height`.
const BEZIER_H_PEAK: f64 = 0.886_230_468_75;

/// Evaluate a degree-11 Bezier curve at `t` (De Casteljau).
fn bezier_eval(points: &[f64; 12], t: f64) -> f64 {
    let mut work = *points;
    for k in 1..12 {
        for i in 0..(12 - k) {
            work[i] = work[i].mul_add(1.0 - t, work[i + 1] * t);
        }
    }
    work[0]
}

/// Derivative of a degree-11 Bezier curve at `t`, via its degree-10 hodograph.
fn bezier_derivative(points: &[f64; 12], t: f64) -> f64 {
    let mut diffs = [0.0; 11];
    for (i, d) in diffs.iter_mut().enumerate() {
        *d = points[i + 1] - points[i];
    }
    for k in 1..11 {
        for i in 0..(11 - k) {
            diffs[i] = diffs[i].mul_add(1.0 - t, diffs[i + 1] * t);
        }
    }
    11.0 * diffs[0]
}

/// Height above ground at normalized swing `phase` for a swing reaching `apex`.
pub fn swing_height_profile(phase: f64, apex: f64) -> f64 {
    bezier_eval(&BEZIER_H, phase.clamp(0.0, 1.0)) * (apex / BEZIER_H_PEAK)
}

/// Time derivative of [`swing_height_profile`] for a swing lasting `duration`.
pub fn swing_height_rate(phase: f64, apex: f64, duration: f64) -> f64 {
    if duration < 1e-10 {
        return 0.0;
    }
    bezier_derivative(&BEZIER_H, phase.clamp(0.0, 1.0)) * (apex / BEZIER_H_PEAK) / duration
}

/// Vertical position and velocity reference of one foot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwingReference {
    pub height: f64,
    pub vertical_velocity: f64,
}

/// Per-contact vertical reference for feet in swing.
pub struct SwingTrajectoryPlanner {
    settings: SwingSettings,
    manager: Arc<ModeScheduleManager>,
    terrain: Arc<SyncSlot<TerrainParameters>>,
}

impl SwingTrajectoryPlanner {
    pub fn new(
        settings: SwingSettings,
        manager: Arc<ModeScheduleManager>,
        terrain: Arc<SyncSlot<TerrainParameters>>,
    ) -> Self {
        Self {
            settings,
            manager,
            terrain,
        }
    }

    pub const fn settings(&self) -> &SwingSettings {
        &self.settings
    }

    /// Apex height for a swing of `duration` seconds.
    pub fn apex_height(&self, duration: f64) -> f64 {
        let scale = (duration / self.settings.swing_time_scale).min(1.0);
        self.settings.swing_height * scale
    }

    /// Reference for `contact` at `time`. Feet in stance stay on the ground.
    pub fn reference(&self, contact: usize, time: f64) -> Result<SwingReference, EvalError> {
        let ground = self.terrain.read().ground_height;
        let Some(swing) = self.manager.swing_interval(contact, time)? else {
            return Ok(SwingReference {
                height: ground,
                vertical_velocity: 0.0,
            });
        };
        let duration = swing.duration();
        let apex = self.apex_height(duration);
        let phase = swing.phase(time);
        Ok(SwingReference {
            height: ground + swing_height_profile(phase, apex),
            vertical_velocity: swing_height_rate(phase, apex, duration),
        })
    }
}
