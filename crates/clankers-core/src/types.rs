use std::fmt;

use nalgebra::{DMatrix, DVector, Vector3};

use crate::error::ConfigError;

/// Maximum number of contact points a [`ContactMode`] can represent.
pub const MAX_CONTACTS: usize = 32;

/// Standard gravity used for weight compensation (m/s^2).
pub const GRAVITY: f64 = 9.81;

// ---------------------------------------------------------------------------
// ContactMode
// ---------------------------------------------------------------------------

/// Stance/swing flags for every contact point of the robot.
///
/// Bit `i` set means contact point `i` is in stance. The contact count is
/// stored alongside the mask so two modes of different robots never compare
/// equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactMode {
    mask: u32,
    n_contacts: u8,
}

impl ContactMode {
    /// All contact points in stance.
    ///
    /// # Panics
    /// If `n_contacts` exceeds [`MAX_CONTACTS`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn stance(n_contacts: usize) -> Self {
        assert!(n_contacts <= MAX_CONTACTS, "too many contact points");
        let mask = if n_contacts == MAX_CONTACTS {
            u32::MAX
        } else {
            (1u32 << n_contacts) - 1
        };
        Self {
            mask,
            n_contacts: n_contacts as u8,
        }
    }

    /// All contact points in swing.
    ///
    /// # Panics
    /// If `n_contacts` exceeds [`MAX_CONTACTS`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn flight(n_contacts: usize) -> Self {
        assert!(n_contacts <= MAX_CONTACTS, "too many contact points");
        Self {
            mask: 0,
            n_contacts: n_contacts as u8,
        }
    }

    /// Build from per-contact stance flags.
    pub fn from_flags(flags: &[bool]) -> Result<Self, ConfigError> {
        if flags.len() > MAX_CONTACTS {
            return Err(ConfigError::invalid(
                "contact_flags",
                format!("at most {MAX_CONTACTS} contact points supported, got {}", flags.len()),
            ));
        }
        let mut mode = Self::flight(flags.len());
        for (i, &in_stance) in flags.iter().enumerate() {
            if in_stance {
                mode.mask |= 1 << i;
            }
        }
        Ok(mode)
    }

    /// Return a copy with contact `i` set to stance or swing.
    #[must_use]
    pub const fn with_contact(mut self, i: usize, in_stance: bool) -> Self {
        debug_assert!(i < self.n_contacts as usize);
        if in_stance {
            self.mask |= 1 << i;
        } else {
            self.mask &= !(1 << i);
        }
        self
    }

    pub const fn num_contacts(&self) -> usize {
        self.n_contacts as usize
    }

    pub const fn is_stance(&self, i: usize) -> bool {
        i < self.n_contacts as usize && self.mask & (1 << i) != 0
    }

    pub const fn is_swing(&self, i: usize) -> bool {
        i < self.n_contacts as usize && !self.is_stance(i)
    }

    /// Number of contact points in stance.
    pub const fn num_stance(&self) -> usize {
        self.mask.count_ones() as usize
    }

    /// Raw stance bit mask.
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// Stance flags, one per contact point.
    pub fn flags(&self) -> Vec<bool> {
        (0..self.num_contacts()).map(|i| self.is_stance(i)).collect()
    }
}

impl fmt::Debug for ContactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactMode({self})")
    }
}

impl fmt::Display for ContactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.num_contacts() {
            f.write_str(if self.is_stance(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ContactNames
// ---------------------------------------------------------------------------

/// Maps contact modes to and from their textual names.
///
/// Names follow the convention `STANCE` (all feet down), `FLY` (all feet up),
/// or the short names of the stance feet joined by `_`, e.g. `LF_RH`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactNames {
    short_names: Vec<String>,
}

impl ContactNames {
    /// Build from full contact frame names such as `LF_FOOT`.
    ///
    /// The short name is the part before the first `_`.
    pub fn from_frames(frames: &[String]) -> Result<Self, ConfigError> {
        if frames.is_empty() || frames.len() > MAX_CONTACTS {
            return Err(ConfigError::invalid(
                "model.contact_names",
                format!("expected 1..={MAX_CONTACTS} contact names, got {}", frames.len()),
            ));
        }
        let short_names: Vec<String> = frames
            .iter()
            .map(|f| f.split('_').next().unwrap_or(f).to_uppercase())
            .collect();
        for (i, name) in short_names.iter().enumerate() {
            if name.is_empty() || matches!(name.as_str(), "STANCE" | "FLY") {
                return Err(ConfigError::invalid(
                    "model.contact_names",
                    format!("invalid contact name '{}'", frames[i]),
                ));
            }
            if short_names[..i].contains(name) {
                return Err(ConfigError::invalid(
                    "model.contact_names",
                    format!("duplicate contact short name '{name}'"),
                ));
            }
        }
        Ok(Self { short_names })
    }

    pub fn len(&self) -> usize {
        self.short_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.short_names.is_empty()
    }

    pub fn short_names(&self) -> &[String] {
        &self.short_names
    }

    /// Parse a mode name.
    pub fn parse_mode(&self, name: &str) -> Result<ContactMode, ConfigError> {
        let n = self.len();
        match name.trim().to_uppercase().as_str() {
            "STANCE" => Ok(ContactMode::stance(n)),
            "FLY" => Ok(ContactMode::flight(n)),
            other => {
                let mut mode = ContactMode::flight(n);
                for part in other.split('_') {
                    let i = self
                        .short_names
                        .iter()
                        .position(|s| s == part)
                        .ok_or_else(|| ConfigError::UnknownMode(name.to_string()))?;
                    if mode.is_stance(i) {
                        return Err(ConfigError::UnknownMode(name.to_string()));
                    }
                    mode = mode.with_contact(i, true);
                }
                Ok(mode)
            }
        }
    }

    /// Canonical name of a mode.
    pub fn mode_name(&self, mode: ContactMode) -> String {
        if mode.num_stance() == 0 {
            return "FLY".into();
        }
        if mode.num_stance() == mode.num_contacts() {
            return "STANCE".into();
        }
        self.short_names
            .iter()
            .enumerate()
            .filter(|(i, _)| mode.is_stance(*i))
            .map(|(_, s)| s.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }
}

// ---------------------------------------------------------------------------
// CentroidalModelInfo
// ---------------------------------------------------------------------------

/// Dimensions and mass of the centroidal model.
///
/// State layout: `[normalized momentum (6), base pose (6), joint positions (n_j)]`
/// where the base pose is `[x, y, z, yaw, pitch, roll]`.
/// Input layout: `[contact forces (3 * n_c), joint velocities (n_j)]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CentroidalModelInfo {
    pub num_contacts: usize,
    pub num_joints: usize,
    pub robot_mass: f64,
}

impl CentroidalModelInfo {
    /// Offset of the base pose inside the state vector.
    pub const BASE_POSE_OFFSET: usize = 6;
    /// Offset of the joint positions inside the state vector.
    pub const JOINT_OFFSET: usize = 12;

    pub const fn state_dim(&self) -> usize {
        Self::JOINT_OFFSET + self.num_joints
    }

    pub const fn input_dim(&self) -> usize {
        3 * self.num_contacts + self.num_joints
    }

    /// Column offset of contact `i`'s force inside the input vector.
    pub const fn force_offset(&self, contact: usize) -> usize {
        3 * contact
    }

    /// Column offset of the joint velocities inside the input vector.
    pub const fn joint_velocity_offset(&self) -> usize {
        3 * self.num_contacts
    }

    /// Contact force of contact `i`.
    pub fn contact_force(&self, input: &DVector<f64>, contact: usize) -> Vector3<f64> {
        input.fixed_rows::<3>(self.force_offset(contact)).clone_owned()
    }

    /// Input that carries the robot weight evenly on the stance feet.
    ///
    /// Joint velocities are zero. In flight the input is all zeros.
    pub fn weight_compensating_input(&self, mode: ContactMode) -> DVector<f64> {
        let mut input = DVector::zeros(self.input_dim());
        let n_stance = mode.num_stance();
        if n_stance == 0 {
            return input;
        }
        #[allow(clippy::cast_precision_loss)]
        let fz = self.robot_mass * GRAVITY / n_stance as f64;
        for i in (0..self.num_contacts).filter(|&i| mode.is_stance(i)) {
            input[self.force_offset(i) + 2] = fz;
        }
        input
    }
}

// ---------------------------------------------------------------------------
// Approximations
// ---------------------------------------------------------------------------

/// First-order approximation of a vector function `f(x, u)`.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorFunctionLinearApproximation {
    pub f: DVector<f64>,
    pub dfdx: DMatrix<f64>,
    pub dfdu: DMatrix<f64>,
}

impl VectorFunctionLinearApproximation {
    pub fn zeros(rows: usize, state_dim: usize, input_dim: usize) -> Self {
        Self {
            f: DVector::zeros(rows),
            dfdx: DMatrix::zeros(rows, state_dim),
            dfdu: DMatrix::zeros(rows, input_dim),
        }
    }
}

/// Second-order approximation of a scalar function `f(x, u)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarFunctionQuadraticApproximation {
    pub f: f64,
    pub dfdx: DVector<f64>,
    pub dfdu: DVector<f64>,
    pub dfdxx: DMatrix<f64>,
    pub dfdux: DMatrix<f64>,
    pub dfduu: DMatrix<f64>,
}

impl ScalarFunctionQuadraticApproximation {
    pub fn zeros(state_dim: usize, input_dim: usize) -> Self {
        Self {
            f: 0.0,
            dfdx: DVector::zeros(state_dim),
            dfdu: DVector::zeros(input_dim),
            dfdxx: DMatrix::zeros(state_dim, state_dim),
            dfdux: DMatrix::zeros(input_dim, state_dim),
            dfduu: DMatrix::zeros(input_dim, input_dim),
        }
    }

    /// Accumulate another approximation of the same dimensions.
    pub fn add_assign(&mut self, other: &Self) {
        self.f += other.f;
        self.dfdx += &other.dfdx;
        self.dfdu += &other.dfdu;
        self.dfdxx += &other.dfdxx;
        self.dfdux += &other.dfdux;
        self.dfduu += &other.dfduu;
    }
}

/// Second-order approximation of a vector function, one Hessian set per row.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorFunctionQuadraticApproximation {
    pub linear: VectorFunctionLinearApproximation,
    pub dfdxx: Vec<DMatrix<f64>>,
    pub dfdux: Vec<DMatrix<f64>>,
    pub dfduu: Vec<DMatrix<f64>>,
}

impl VectorFunctionQuadraticApproximation {
    pub fn zeros(rows: usize, state_dim: usize, input_dim: usize) -> Self {
        Self {
            linear: VectorFunctionLinearApproximation::zeros(rows, state_dim, input_dim),
            dfdxx: vec![DMatrix::zeros(state_dim, state_dim); rows],
            dfdux: vec![DMatrix::zeros(input_dim, state_dim); rows],
            dfduu: vec![DMatrix::zeros(input_dim, input_dim); rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.linear.f.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadruped_names() -> ContactNames {
        let frames: Vec<String> = ["LF_FOOT", "RF_FOOT", "LH_FOOT", "RH_FOOT"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        ContactNames::from_frames(&frames).unwrap()
    }

    #[test]
    fn stance_and_flight() {
        let stance = ContactMode::stance(4);
        assert_eq!(stance.num_stance(), 4);
        assert!((0..4).all(|i| stance.is_stance(i)));

        let fly = ContactMode::flight(4);
        assert_eq!(fly.num_stance(), 0);
        assert!((0..4).all(|i| fly.is_swing(i)));
    }

    #[test]
    fn from_flags_matches_flags() {
        let mode = ContactMode::from_flags(&[true, false, false, true]).unwrap();
        assert_eq!(mode.flags(), vec![true, false, false, true]);
        assert_eq!(mode.num_contacts(), 4);
        assert_eq!(mode.to_string(), "1001");
    }

    #[test]
    fn out_of_range_contact_is_neither() {
        let mode = ContactMode::stance(2);
        assert!(!mode.is_stance(5));
        assert!(!mode.is_swing(5));
    }

    #[test]
    fn modes_of_different_size_differ() {
        assert_ne!(ContactMode::stance(2), ContactMode::stance(4));
        assert_eq!(ContactMode::stance(32).num_stance(), 32);
    }

    #[test]
    fn too_many_flags_rejected() {
        assert!(ContactMode::from_flags(&[true; 33]).is_err());
    }

    #[test]
    fn parse_mode_names() {
        let names = quadruped_names();
        assert_eq!(names.parse_mode("STANCE").unwrap(), ContactMode::stance(4));
        assert_eq!(names.parse_mode("FLY").unwrap(), ContactMode::flight(4));
        let lf_rh = names.parse_mode("LF_RH").unwrap();
        assert_eq!(lf_rh.flags(), vec![true, false, false, true]);
        let rf_lh_rh = names.parse_mode("rf_lh_rh").unwrap();
        assert_eq!(rf_lh_rh.flags(), vec![false, true, true, true]);
    }

    #[test]
    fn parse_mode_rejects_unknown_and_repeated() {
        let names = quadruped_names();
        assert!(matches!(
            names.parse_mode("LF_XX"),
            Err(ConfigError::UnknownMode(_))
        ));
        assert!(matches!(
            names.parse_mode("LF_LF"),
            Err(ConfigError::UnknownMode(_))
        ));
    }

    #[test]
    fn mode_name_roundtrips_through_parser() {
        let names = quadruped_names();
        for name in ["STANCE", "FLY", "LF_RH", "RF_LH", "LF_RF_LH"] {
            let mode = names.parse_mode(name).unwrap();
            assert_eq!(names.mode_name(mode), name);
        }
    }

    #[test]
    fn duplicate_short_names_rejected() {
        let frames = vec!["LF_FOOT".to_string(), "LF_TOE".to_string()];
        assert!(ContactNames::from_frames(&frames).is_err());
    }

    #[test]
    fn model_info_dimensions() {
        let info = CentroidalModelInfo {
            num_contacts: 4,
            num_joints: 12,
            robot_mass: 50.0,
        };
        assert_eq!(info.state_dim(), 24);
        assert_eq!(info.input_dim(), 24);
        assert_eq!(info.force_offset(2), 6);
        assert_eq!(info.joint_velocity_offset(), 12);
    }

    #[test]
    fn weight_compensation_splits_load_on_stance_feet() {
        let info = CentroidalModelInfo {
            num_contacts: 4,
            num_joints: 12,
            robot_mass: 40.0,
        };
        let mode = ContactMode::from_flags(&[true, false, false, true]).unwrap();
        let u = info.weight_compensating_input(mode);
        let expected = 40.0 * GRAVITY / 2.0;
        approx::assert_relative_eq!(info.contact_force(&u, 0).z, expected);
        approx::assert_relative_eq!(info.contact_force(&u, 3).z, expected);
        assert_eq!(info.contact_force(&u, 1), Vector3::zeros());
        assert!(u.rows(12, 12).iter().all(|&v| v == 0.0));

        let airborne = info.weight_compensating_input(ContactMode::flight(4));
        assert!(airborne.iter().all(|&v| v == 0.0));
    }
}
