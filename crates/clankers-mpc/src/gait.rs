//! Gait templates and time-indexed gait schedules.
//!
//! A [`GaitTemplate`] is one cycle of contact-mode phases. A [`GaitSchedule`]
//! anchors phases in time: an optional finite prefix played once from
//! `start_time`, followed by an optional template repeated forever.
//!
//! Phase intervals are half-open `[begin, end)`, so at an exact switch time the
//! mode of the next phase is returned.

use clankers_core::config::{GaitConfig, GaitDefinition, PhaseSequence};
use clankers_core::error::{ClankersError, ConfigError, ScheduleCoverageError};
use clankers_core::types::{ContactMode, ContactNames, MAX_CONTACTS};

/// Durations and offsets closer than this are treated as equal.
const TIME_EPSILON: f64 = 1e-9;

/// Supported quadruped gait presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GaitType {
    /// All feet on ground (static balance).
    Stand,
    /// Diagonal pairs alternate: LF+RH and RF+LH.
    Trot,
    /// One foot lifts at a time, in sequence.
    Walk,
    /// Front pair and rear pair alternate.
    Bound,
}

impl GaitType {
    /// Per-foot phase offsets, duty factor and cycle time of the preset.
    fn timing(self) -> (&'static [f64], f64, f64) {
        match self {
            Self::Stand => (&[0.0; 4], 1.0, 1.0),
            Self::Trot => (&[0.0, 0.5, 0.5, 0.0], 0.5, 0.35),
            Self::Walk => (&[0.0, 0.5, 0.25, 0.75], 0.75, 0.8),
            Self::Bound => (&[0.0, 0.0, 0.5, 0.5], 0.5, 0.4),
        }
    }
}

// ---------------------------------------------------------------------------
// GaitPhase / GaitTemplate
// ---------------------------------------------------------------------------

/// A contact mode held for a fixed duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaitPhase {
    /// Phase length in seconds. Strictly positive.
    pub duration: f64,
    pub mode: ContactMode,
}

impl GaitPhase {
    pub const fn new(duration: f64, mode: ContactMode) -> Self {
        Self { duration, mode }
    }
}

fn validate_phases(phases: &[GaitPhase]) -> Result<usize, ConfigError> {
    let Some(first) = phases.first() else {
        return Err(ConfigError::InvalidSchedule("phase list is empty".into()));
    };
    let n_contacts = first.mode.num_contacts();
    for (i, phase) in phases.iter().enumerate() {
        if !(phase.duration > 0.0 && phase.duration.is_finite()) {
            return Err(ConfigError::InvalidSchedule(format!(
                "phase {i} has non-positive duration {}",
                phase.duration
            )));
        }
        if phase.mode.num_contacts() != n_contacts {
            return Err(ConfigError::ContactCountMismatch {
                expected: n_contacts,
                got: phase.mode.num_contacts(),
            });
        }
    }
    Ok(n_contacts)
}

fn cumulative_ends(start: f64, phases: &[GaitPhase]) -> Vec<f64> {
    phases
        .iter()
        .scan(start, |t, p| {
            *t += p.duration;
            Some(*t)
        })
        .collect()
}

/// One cycle of a periodic gait.
#[derive(Clone, Debug, PartialEq)]
pub struct GaitTemplate {
    phases: Vec<GaitPhase>,
    /// End of each phase relative to the cycle start.
    ends: Vec<f64>,
    n_contacts: usize,
}

impl GaitTemplate {
    /// Build from explicit phases.
    pub fn new(phases: Vec<GaitPhase>) -> Result<Self, ConfigError> {
        let n_contacts = validate_phases(&phases)?;
        Ok(Self::from_valid_phases(phases, n_contacts))
    }

    fn from_valid_phases(phases: Vec<GaitPhase>, n_contacts: usize) -> Self {
        let ends = cumulative_ends(0.0, &phases);
        Self {
            phases,
            ends,
            n_contacts,
        }
    }

    /// Build a quadruped preset.
    pub fn quadruped(gait: GaitType) -> Self {
        let (offsets, duty_factor, cycle_time) = gait.timing();
        Self::from_valid_phases(offsets_to_phases(offsets, duty_factor, cycle_time), 4)
    }

    /// Build from per-foot phase offsets.
    ///
    /// Foot `i` is in stance while `(phase + offsets[i]) % 1 < duty_factor`.
    pub fn from_phase_offsets(
        offsets: &[f64],
        duty_factor: f64,
        cycle_time: f64,
    ) -> Result<Self, ConfigError> {
        if offsets.is_empty() || offsets.len() > MAX_CONTACTS {
            return Err(ConfigError::invalid(
                "phase_offsets",
                format!("expected 1..={MAX_CONTACTS} offsets, got {}", offsets.len()),
            ));
        }
        if let Some(bad) = offsets.iter().find(|o| !(0.0..1.0).contains(*o)) {
            return Err(ConfigError::invalid(
                "phase_offsets",
                format!("offset {bad} outside [0, 1)"),
            ));
        }
        if !(duty_factor > 0.0 && duty_factor <= 1.0) {
            return Err(ConfigError::invalid(
                "duty_factor",
                format!("{duty_factor} outside (0, 1]"),
            ));
        }
        if !(cycle_time > 0.0 && cycle_time.is_finite()) {
            return Err(ConfigError::invalid(
                "cycle_time",
                format!("{cycle_time} (must be > 0)"),
            ));
        }
        Ok(Self::from_valid_phases(
            offsets_to_phases(offsets, duty_factor, cycle_time),
            offsets.len(),
        ))
    }

    /// Build from named modes and durations.
    pub fn from_sequence(names: &ContactNames, sequence: &PhaseSequence) -> Result<Self, ConfigError> {
        Self::new(parse_sequence(names, sequence)?)
    }

    /// Build from a gait library entry.
    pub fn from_definition(
        names: &ContactNames,
        definition: &GaitDefinition,
    ) -> Result<Self, ConfigError> {
        let template = match definition {
            GaitDefinition::Phases(sequence) => Self::from_sequence(names, sequence)?,
            GaitDefinition::Offsets {
                phase_offsets,
                duty_factor,
                cycle_time,
            } => Self::from_phase_offsets(phase_offsets, *duty_factor, *cycle_time)?,
        };
        if template.n_contacts != names.len() {
            return Err(ConfigError::ContactCountMismatch {
                expected: names.len(),
                got: template.n_contacts,
            });
        }
        Ok(template)
    }

    pub fn phases(&self) -> &[GaitPhase] {
        &self.phases
    }

    pub const fn num_contacts(&self) -> usize {
        self.n_contacts
    }

    /// Cycle period in seconds.
    pub fn period(&self) -> f64 {
        self.ends.last().copied().unwrap_or(0.0)
    }

    /// Index of the phase containing `offset` in `[0, period)`.
    fn locate(&self, offset: f64) -> usize {
        self.ends
            .partition_point(|&e| e <= offset)
            .min(self.phases.len() - 1)
    }

    /// Start of phase `index` relative to the cycle start.
    fn phase_begin(&self, index: usize) -> f64 {
        if index == 0 { 0.0 } else { self.ends[index - 1] }
    }
}

/// Convert per-foot phase offsets into a list of mode phases.
fn offsets_to_phases(offsets: &[f64], duty_factor: f64, cycle_time: f64) -> Vec<GaitPhase> {
    let foot_in_stance =
        |phase: f64, offset: f64| duty_factor >= 1.0 || (phase + offset) % 1.0 < duty_factor;

    // Liftoff and touchdown events of every foot, as gait phases in [0, 1).
    let mut events = vec![0.0];
    if duty_factor < 1.0 {
        for &offset in offsets {
            events.push((duty_factor - offset).rem_euclid(1.0));
            events.push((-offset).rem_euclid(1.0));
        }
    }
    events.retain(|e| *e < 1.0 - TIME_EPSILON);
    events.sort_by(f64::total_cmp);
    events.dedup_by(|a, b| (*a - *b).abs() < TIME_EPSILON);
    events.push(1.0);

    let mut phases: Vec<GaitPhase> = Vec::with_capacity(events.len());
    for window in events.windows(2) {
        let mid = 0.5 * (window[0] + window[1]);
        let mut mode = ContactMode::flight(offsets.len());
        for (foot, &offset) in offsets.iter().enumerate() {
            mode = mode.with_contact(foot, foot_in_stance(mid, offset));
        }
        let duration = (window[1] - window[0]) * cycle_time;
        match phases.last_mut() {
            Some(last) if last.mode == mode => last.duration += duration,
            _ => phases.push(GaitPhase::new(duration, mode)),
        }
    }
    phases
}

fn parse_sequence(
    names: &ContactNames,
    sequence: &PhaseSequence,
) -> Result<Vec<GaitPhase>, ConfigError> {
    if sequence.modes.len() != sequence.durations.len() {
        return Err(ConfigError::DimensionMismatch {
            name: "gait durations".into(),
            expected: sequence.modes.len(),
            got: sequence.durations.len(),
        });
    }
    sequence
        .modes
        .iter()
        .zip(&sequence.durations)
        .map(|(mode, &duration)| Ok(GaitPhase::new(duration, names.parse_mode(mode)?)))
        .collect()
}

// ---------------------------------------------------------------------------
// ModeSchedule
// ---------------------------------------------------------------------------

/// Mode switches over an interval, as consumed by the solver.
///
/// `modes[k]` is active on `[event_times[k-1], event_times[k])`, so there is
/// always one more mode than event times.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeSchedule {
    pub event_times: Vec<f64>,
    pub modes: Vec<ContactMode>,
}

impl ModeSchedule {
    /// Mode active at `time`. Event times belong to the following mode.
    pub fn mode_at(&self, time: f64) -> ContactMode {
        self.modes[self.event_times.partition_point(|&e| e <= time)]
    }
}

/// Liftoff and touchdown times of a swing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwingInterval {
    pub liftoff: f64,
    pub touchdown: f64,
}

impl SwingInterval {
    pub fn duration(&self) -> f64 {
        self.touchdown - self.liftoff
    }

    /// Normalized progress of `time` through the swing, clamped to [0, 1].
    pub fn phase(&self, time: f64) -> f64 {
        let duration = self.duration();
        if duration <= TIME_EPSILON {
            return 0.0;
        }
        ((time - self.liftoff) / duration).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// GaitSchedule
// ---------------------------------------------------------------------------

/// A phase located in time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseSpan {
    pub begin: f64,
    pub end: f64,
    pub mode: ContactMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Prefix(usize),
    Cycle { lap: i64, index: usize },
}

/// Time-indexed contact-mode schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct GaitSchedule {
    start_time: f64,
    prefix: Vec<GaitPhase>,
    /// Absolute end time of each prefix phase.
    prefix_ends: Vec<f64>,
    cycle: Option<GaitTemplate>,
    n_contacts: usize,
}

impl GaitSchedule {
    /// Template repeated forever, with a cycle starting at `start_time`.
    ///
    /// Covers every time, including times before `start_time`.
    pub fn periodic(start_time: f64, template: GaitTemplate) -> Self {
        Self {
            start_time,
            prefix: Vec::new(),
            prefix_ends: Vec::new(),
            n_contacts: template.num_contacts(),
            cycle: Some(template),
        }
    }

    /// Phases played once from `start_time`.
    pub fn finite(start_time: f64, phases: Vec<GaitPhase>) -> Result<Self, ConfigError> {
        let n_contacts = validate_phases(&phases)?;
        Ok(Self {
            start_time,
            prefix_ends: cumulative_ends(start_time, &phases),
            prefix: phases,
            cycle: None,
            n_contacts,
        })
    }

    /// Phases played once from `start_time`, then `cycle` repeated forever.
    pub fn with_cycle(
        start_time: f64,
        prefix: Vec<GaitPhase>,
        cycle: GaitTemplate,
    ) -> Result<Self, ConfigError> {
        if prefix.is_empty() {
            return Ok(Self::periodic(start_time, cycle));
        }
        let n_contacts = validate_phases(&prefix)?;
        if cycle.num_contacts() != n_contacts {
            return Err(ConfigError::ContactCountMismatch {
                expected: n_contacts,
                got: cycle.num_contacts(),
            });
        }
        Ok(Self {
            start_time,
            prefix_ends: cumulative_ends(start_time, &prefix),
            prefix,
            cycle: Some(cycle),
            n_contacts,
        })
    }

    /// Initial schedule from the task file: the initial phases from t = 0,
    /// then the default gait.
    pub fn from_config(config: &GaitConfig, names: &ContactNames) -> Result<Self, ConfigError> {
        let template = GaitTemplate::from_definition(names, config.gait(&config.default)?)?;
        let prefix = match &config.initial {
            Some(sequence) => parse_sequence(names, sequence)?,
            None => Vec::new(),
        };
        Self::with_cycle(0.0, prefix, template)
    }

    pub const fn num_contacts(&self) -> usize {
        self.n_contacts
    }

    pub const fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn prefix(&self) -> &[GaitPhase] {
        &self.prefix
    }

    pub const fn cycle(&self) -> Option<&GaitTemplate> {
        self.cycle.as_ref()
    }

    pub const fn is_periodic(&self) -> bool {
        self.prefix.is_empty() && self.cycle.is_some()
    }

    /// Fail unless every phase has `expected` contact points.
    pub const fn validate_contact_count(&self, expected: usize) -> Result<(), ConfigError> {
        if self.n_contacts == expected {
            Ok(())
        } else {
            Err(ConfigError::ContactCountMismatch {
                expected,
                got: self.n_contacts,
            })
        }
    }

    fn prefix_end(&self) -> f64 {
        self.prefix_ends.last().copied().unwrap_or(self.start_time)
    }

    /// Half-open time interval `[begin, end)` this schedule answers for.
    pub fn coverage(&self) -> (f64, f64) {
        match (&self.cycle, self.prefix.is_empty()) {
            (Some(_), true) => (f64::NEG_INFINITY, f64::INFINITY),
            (Some(_), false) => (self.start_time, f64::INFINITY),
            (None, _) => (self.start_time, self.prefix_end()),
        }
    }

    /// Whether every time in `[t0, t1]` can be queried.
    pub fn covers(&self, t0: f64, t1: f64) -> bool {
        let (begin, end) = self.coverage();
        begin <= t0 && t1 < end
    }

    /// Error form of [`covers`](Self::covers), reporting the first uncovered time.
    pub fn ensure_covers(&self, t0: f64, t1: f64) -> Result<(), ScheduleCoverageError> {
        let (begin, end) = self.coverage();
        if begin > t0 {
            return Err(ScheduleCoverageError { time: t0, begin, end });
        }
        if t1 >= end {
            return Err(ScheduleCoverageError { time: t1, begin, end });
        }
        Ok(())
    }

    fn coverage_error(&self, time: f64) -> ScheduleCoverageError {
        let (begin, end) = self.coverage();
        ScheduleCoverageError { time, begin, end }
    }

    fn locate(&self, time: f64) -> Result<Slot, ScheduleCoverageError> {
        if time.is_nan() {
            return Err(self.coverage_error(time));
        }
        if !self.prefix.is_empty() || self.cycle.is_none() {
            if time < self.start_time {
                return Err(self.coverage_error(time));
            }
            if time < self.prefix_end() {
                let index = self.prefix_ends.partition_point(|&e| e <= time);
                return Ok(Slot::Prefix(index.min(self.prefix.len() - 1)));
            }
        }
        let Some(cycle) = &self.cycle else {
            return Err(self.coverage_error(time));
        };
        let period = cycle.period();
        let elapsed = time - self.prefix_end();
        let lap_f = (elapsed / period).floor();
        #[allow(clippy::cast_possible_truncation)]
        let lap = lap_f as i64;
        let offset = (elapsed - lap_f * period).clamp(0.0, period);
        Ok(Slot::Cycle {
            lap,
            index: cycle.locate(offset),
        })
    }

    fn span(&self, slot: Slot) -> PhaseSpan {
        match slot {
            Slot::Prefix(i) => PhaseSpan {
                begin: if i == 0 { self.start_time } else { self.prefix_ends[i - 1] },
                end: self.prefix_ends[i],
                mode: self.prefix[i].mode,
            },
            Slot::Cycle { lap, index } => {
                let Some(cycle) = &self.cycle else {
                    unreachable!("cycle slot without a cycle");
                };
                #[allow(clippy::cast_precision_loss)]
                let lap_start = self.prefix_end() + lap as f64 * cycle.period();
                PhaseSpan {
                    begin: lap_start + cycle.phase_begin(index),
                    end: lap_start + cycle.ends[index],
                    mode: cycle.phases[index].mode,
                }
            }
        }
    }

    fn next_slot(&self, slot: Slot) -> Option<Slot> {
        match slot {
            Slot::Prefix(i) if i + 1 < self.prefix.len() => Some(Slot::Prefix(i + 1)),
            Slot::Prefix(_) => self.cycle.as_ref().map(|_| Slot::Cycle { lap: 0, index: 0 }),
            Slot::Cycle { lap, index } => {
                let n = self.cycle.as_ref().map_or(0, |c| c.phases.len());
                if index + 1 < n {
                    Some(Slot::Cycle { lap, index: index + 1 })
                } else {
                    Some(Slot::Cycle { lap: lap + 1, index: 0 })
                }
            }
        }
    }

    fn prev_slot(&self, slot: Slot) -> Option<Slot> {
        match slot {
            Slot::Prefix(0) => None,
            Slot::Prefix(i) => Some(Slot::Prefix(i - 1)),
            Slot::Cycle { lap, index } if index > 0 => Some(Slot::Cycle { lap, index: index - 1 }),
            Slot::Cycle { lap, .. } => {
                let n = self.cycle.as_ref().map_or(0, |c| c.phases.len());
                if lap > 0 || self.prefix.is_empty() {
                    Some(Slot::Cycle { lap: lap - 1, index: n - 1 })
                } else {
                    Some(Slot::Prefix(self.prefix.len() - 1))
                }
            }
        }
    }

    /// The phase containing `time`.
    pub fn phase_at(&self, time: f64) -> Result<PhaseSpan, ScheduleCoverageError> {
        Ok(self.span(self.locate(time)?))
    }

    /// Contact mode active at `time`.
    pub fn mode_at_time(&self, time: f64) -> Result<ContactMode, ScheduleCoverageError> {
        Ok(self.phase_at(time)?.mode)
    }

    /// End of the phase containing `time`.
    ///
    /// For the last phase of a finite schedule this is the coverage end.
    pub fn next_switch_time(&self, time: f64) -> Result<f64, ScheduleCoverageError> {
        Ok(self.phase_at(time)?.end)
    }

    /// Mode switches over `[t0, t1]`, consecutive identical modes merged.
    pub fn mode_schedule(&self, t0: f64, t1: f64) -> Result<ModeSchedule, ScheduleCoverageError> {
        let mut slot = self.locate(t0)?;
        let mut span = self.span(slot);
        let mut schedule = ModeSchedule {
            event_times: Vec::new(),
            modes: vec![span.mode],
        };
        while span.end < t1 {
            slot = self
                .next_slot(slot)
                .ok_or_else(|| self.coverage_error(span.end))?;
            let next = self.span(slot);
            if next.mode != span.mode {
                schedule.event_times.push(next.begin);
                schedule.modes.push(next.mode);
            }
            span = next;
        }
        Ok(schedule)
    }

    /// Modes sampled at `t0 + k * dt` for `k` in `0..steps`.
    #[allow(clippy::cast_precision_loss)]
    pub fn contact_sequence(
        &self,
        t0: f64,
        steps: usize,
        dt: f64,
    ) -> Result<Vec<ContactMode>, ScheduleCoverageError> {
        (0..steps)
            .map(|k| self.mode_at_time(t0 + k as f64 * dt))
            .collect()
    }

    /// Liftoff and touchdown of the swing of `contact` containing `time`.
    ///
    /// Returns `None` if the contact is in stance at `time`. The search is
    /// bounded by one pass over the prefix plus two cycles in each direction;
    /// a contact that never lands within that window reports the window edge.
    pub fn swing_interval(
        &self,
        contact: usize,
        time: f64,
    ) -> Result<Option<SwingInterval>, ScheduleCoverageError> {
        let slot = self.locate(time)?;
        let span = self.span(slot);
        if span.mode.is_stance(contact) {
            return Ok(None);
        }
        let max_steps =
            self.prefix.len() + 2 * self.cycle.as_ref().map_or(0, |c| c.phases.len()) + 1;

        let mut liftoff = span.begin;
        let mut cursor = slot;
        for _ in 0..max_steps {
            let Some(prev) = self.prev_slot(cursor) else { break };
            let prev_span = self.span(prev);
            if prev_span.mode.is_stance(contact) {
                break;
            }
            liftoff = prev_span.begin;
            cursor = prev;
        }

        let mut touchdown = span.end;
        cursor = slot;
        for _ in 0..max_steps {
            let Some(next) = self.next_slot(cursor) else { break };
            let next_span = self.span(next);
            if next_span.mode.is_stance(contact) {
                break;
            }
            touchdown = next_span.end;
            cursor = next;
        }

        Ok(Some(SwingInterval { liftoff, touchdown }))
    }

    /// New schedule that keeps this one on `[keep_from, switch_time)`, then an
    /// all-stance transition of `transition_stance_time`, then `template`
    /// repeated forever.
    pub fn insert_template(
        &self,
        keep_from: f64,
        switch_time: f64,
        template: GaitTemplate,
        transition_stance_time: f64,
    ) -> Result<Self, ClankersError> {
        if template.num_contacts() != self.n_contacts {
            return Err(ConfigError::ContactCountMismatch {
                expected: self.n_contacts,
                got: template.num_contacts(),
            }
            .into());
        }
        if switch_time < keep_from {
            return Err(ConfigError::InvalidSchedule(format!(
                "switch time {switch_time} precedes {keep_from}"
            ))
            .into());
        }

        let mut prefix = Vec::new();
        if switch_time - keep_from > TIME_EPSILON {
            let mut slot = self.locate(keep_from)?;
            loop {
                let span = self.span(slot);
                let begin = span.begin.max(keep_from);
                let end = span.end.min(switch_time);
                if end - begin > TIME_EPSILON {
                    prefix.push(GaitPhase::new(end - begin, span.mode));
                }
                if span.end >= switch_time {
                    break;
                }
                slot = self
                    .next_slot(slot)
                    .ok_or_else(|| self.coverage_error(span.end))?;
            }
        }
        if transition_stance_time > TIME_EPSILON {
            prefix.push(GaitPhase::new(
                transition_stance_time,
                ContactMode::stance(self.n_contacts),
            ));
        }
        Ok(Self::with_cycle(keep_from, prefix, template)?)
    }
}
