//! Relaxed log-barrier penalty for soft inequality constraints `h >= 0`.
//!
//! For `h > delta` the penalty is the plain log barrier `-mu * ln(h)`. Below
//! `delta` it continues as the quadratic that matches value, slope and
//! curvature at `delta`, so infeasible points still get a finite, smooth cost.

use clankers_core::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelaxedBarrierPenalty {
    mu: f64,
    delta: f64,
}

impl RelaxedBarrierPenalty {
    pub fn new(mu: f64, delta: f64) -> Result<Self, ConfigError> {
        if !(mu > 0.0 && mu.is_finite()) {
            return Err(ConfigError::invalid("barrier mu", format!("{mu} (must be > 0)")));
        }
        if !(delta > 0.0 && delta.is_finite()) {
            return Err(ConfigError::invalid(
                "barrier delta",
                format!("{delta} (must be > 0)"),
            ));
        }
        Ok(Self { mu, delta })
    }

    pub const fn mu(&self) -> f64 {
        self.mu
    }

    pub const fn delta(&self) -> f64 {
        self.delta
    }

    pub fn value(&self, h: f64) -> f64 {
        if h > self.delta {
            -self.mu * h.ln()
        } else {
            let z = (h - 2.0 * self.delta) / self.delta;
            self.mu * (-self.delta.ln() + 0.5 * z * z - 0.5)
        }
    }

    pub fn derivative(&self, h: f64) -> f64 {
        if h > self.delta {
            -self.mu / h
        } else {
            self.mu * (h - 2.0 * self.delta) / (self.delta * self.delta)
        }
    }

    pub fn second_derivative(&self, h: f64) -> f64 {
        if h > self.delta {
            self.mu / (h * h)
        } else {
            self.mu / (self.delta * self.delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn penalty() -> RelaxedBarrierPenalty {
        RelaxedBarrierPenalty::new(0.1, 5.0).unwrap()
    }

    #[test]
    fn log_barrier_above_delta() {
        let p = penalty();
        assert_relative_eq!(p.value(10.0), -0.1 * 10.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(p.derivative(10.0), -0.01, epsilon = 1e-12);
        assert_relative_eq!(p.second_derivative(10.0), 0.001, epsilon = 1e-12);
    }

    #[test]
    fn continuous_at_delta() {
        let p = penalty();
        let d = p.delta();
        let eps = 1e-9;
        assert_relative_eq!(p.value(d - eps), p.value(d + eps), epsilon = 1e-8);
        assert_relative_eq!(p.derivative(d - eps), p.derivative(d + eps), epsilon = 1e-8);
        assert_relative_eq!(
            p.second_derivative(d - eps),
            p.second_derivative(d + eps),
            epsilon = 1e-8
        );
    }

    #[test]
    fn finite_when_infeasible() {
        let p = penalty();
        let v = p.value(-3.0);
        assert!(v.is_finite());
        assert!(v > p.value(0.0));
        assert!(p.derivative(-3.0) < 0.0);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let p = penalty();
        for h in [-2.0, 1.0, 4.9, 7.5] {
            let step = 1e-6;
            let numeric = (p.value(h + step) - p.value(h - step)) / (2.0 * step);
            assert_relative_eq!(p.derivative(h), numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn rejects_non_positive_parameters() {
        assert!(RelaxedBarrierPenalty::new(0.0, 1.0).is_err());
        assert!(RelaxedBarrierPenalty::new(0.1, -1.0).is_err());
    }
}
