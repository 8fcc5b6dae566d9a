//! Terrain parameters shared by the friction cone and swing terms.

use nalgebra::Vector3;

use clankers_core::config::FrictionConeSettings;
use clankers_core::error::ConfigError;

/// Local ground model under the robot.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainParameters {
    pub friction_coefficient: f64,
    /// Unit normal of the contact surface, world frame.
    pub surface_normal: Vector3<f64>,
    pub ground_height: f64,
}

impl TerrainParameters {
    /// Flat ground at `ground_height` with the given friction.
    pub fn flat(friction_coefficient: f64, ground_height: f64) -> Self {
        Self {
            friction_coefficient,
            surface_normal: Vector3::z(),
            ground_height,
        }
    }

    /// Normalizes `surface_normal` and checks friction is positive.
    pub fn new(
        friction_coefficient: f64,
        surface_normal: Vector3<f64>,
        ground_height: f64,
    ) -> Result<Self, ConfigError> {
        if !(friction_coefficient > 0.0 && friction_coefficient.is_finite()) {
            return Err(ConfigError::invalid(
                "friction_coefficient",
                format!("{friction_coefficient} (must be > 0)"),
            ));
        }
        let norm = surface_normal.norm();
        if !(norm > 1e-9 && norm.is_finite()) {
            return Err(ConfigError::invalid(
                "surface_normal",
                "must be a non-zero finite vector",
            ));
        }
        if !ground_height.is_finite() {
            return Err(ConfigError::invalid("ground_height", "must be finite"));
        }
        Ok(Self {
            friction_coefficient,
            surface_normal: surface_normal / norm,
            ground_height,
        })
    }

    /// Initial terrain from the friction cone settings: flat ground at z = 0.
    pub fn from_settings(settings: &FrictionConeSettings) -> Self {
        Self::flat(settings.friction_coefficient, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normal_is_normalized() {
        let terrain = TerrainParameters::new(0.5, Vector3::new(0.0, 0.0, 2.0), 0.1).unwrap();
        assert_relative_eq!(terrain.surface_normal, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(TerrainParameters::new(0.0, Vector3::z(), 0.0).is_err());
        assert!(TerrainParameters::new(0.5, Vector3::zeros(), 0.0).is_err());
        assert!(TerrainParameters::new(0.5, Vector3::z(), f64::NAN).is_err());
    }

    #[test]
    fn settings_give_flat_ground() {
        let terrain = TerrainParameters::from_settings(&FrictionConeSettings::default());
        assert_relative_eq!(terrain.friction_coefficient, 0.3);
        assert_relative_eq!(terrain.ground_height, 0.0);
    }
}
