//! The optimal control problem handed to the solver.
//!
//! Terms are stored in named, ordered collections. Their order is fixed at
//! assembly, so a term's index (and the solver's multiplier slot for it)
//! never changes while the schedule does.

use std::sync::Arc;

use nalgebra::DVector;

use clankers_core::error::{ConfigError, EvalError};
use clankers_core::traits::SystemDynamics;
use clankers_core::types::{ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation};

use crate::constraints::StateInputConstraint;
use crate::cost::StateInputCost;

// ---------------------------------------------------------------------------
// TermCollection
// ---------------------------------------------------------------------------

/// Named terms in insertion order. Names are unique.
pub struct TermCollection<T: ?Sized> {
    names: Vec<String>,
    terms: Vec<Box<T>>,
}

impl<T: ?Sized> Default for TermCollection<T> {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            terms: Vec::new(),
        }
    }
}

impl<T: ?Sized> TermCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a term. Fails if `name` is already taken.
    pub fn add(&mut self, name: impl Into<String>, term: Box<T>) -> Result<usize, ConfigError> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(ConfigError::DuplicateTerm(name));
        }
        self.names.push(name);
        self.terms.push(term);
        Ok(self.terms.len() - 1)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        let index = self.index_of(name)?;
        Some(&*self.terms[index])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.terms.iter().map(|term| &**term))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Evaluations
// ---------------------------------------------------------------------------

/// An active term evaluated at one point.
#[derive(Clone, Debug, PartialEq)]
pub struct TermEvaluation<V> {
    /// Position of the term in its collection.
    pub index: usize,
    pub name: String,
    pub contact: Option<usize>,
    pub value: V,
}

// ---------------------------------------------------------------------------
// OptimalControlProblem
// ---------------------------------------------------------------------------

pub struct OptimalControlProblem {
    pub dynamics: Arc<dyn SystemDynamics>,
    pub costs: TermCollection<dyn StateInputCost>,
    /// Inequalities turned into penalty costs.
    pub soft_constraints: TermCollection<dyn StateInputCost>,
    pub equality_constraints: TermCollection<dyn StateInputConstraint>,
}

impl OptimalControlProblem {
    pub fn new(dynamics: Arc<dyn SystemDynamics>) -> Self {
        Self {
            dynamics,
            costs: TermCollection::new(),
            soft_constraints: TermCollection::new(),
            equality_constraints: TermCollection::new(),
        }
    }

    fn active_costs(&self) -> impl Iterator<Item = (usize, &str, &dyn StateInputCost)> {
        let offset = self.costs.len();
        self.costs
            .iter()
            .enumerate()
            .map(|(i, (name, term))| (i, name, term))
            .chain(
                self.soft_constraints
                    .iter()
                    .enumerate()
                    .map(move |(i, (name, term))| (offset + i, name, term)),
            )
    }

    /// Total of active costs and soft constraints.
    pub fn cost(&self, time: f64, state: &DVector<f64>, input: &DVector<f64>) -> Result<f64, EvalError> {
        let mut total = 0.0;
        for (_, _, term) in self.active_costs() {
            if term.is_active(time)? {
                total += term.value(time, state, input)?;
            }
        }
        Ok(total)
    }

    /// Sum of the quadratic models of active costs and soft constraints.
    pub fn cost_quadratic_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<ScalarFunctionQuadraticApproximation, EvalError> {
        let mut total = ScalarFunctionQuadraticApproximation::zeros(state.len(), input.len());
        for (_, _, term) in self.active_costs() {
            if term.is_active(time)? {
                total.add_assign(&term.quadratic_approximation(time, state, input)?);
            }
        }
        Ok(total)
    }

    /// Values of every active cost and soft constraint, indexed over costs
    /// followed by soft constraints.
    pub fn cost_terms(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<Vec<TermEvaluation<f64>>, EvalError> {
        let mut out = Vec::new();
        for (index, name, term) in self.active_costs() {
            if term.is_active(time)? {
                out.push(TermEvaluation {
                    index,
                    name: name.to_string(),
                    contact: term.contact_index(),
                    value: term.value(time, state, input)?,
                });
            }
        }
        Ok(out)
    }

    /// Values of the active equality constraints.
    pub fn active_equality_constraints(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<Vec<TermEvaluation<DVector<f64>>>, EvalError> {
        let mut out = Vec::new();
        for (index, (name, term)) in self.equality_constraints.iter().enumerate() {
            if term.is_active(time)? {
                out.push(TermEvaluation {
                    index,
                    name: name.to_string(),
                    contact: term.contact_index(),
                    value: term.value(time, state, input)?,
                });
            }
        }
        Ok(out)
    }

    /// Linear models of the active equality constraints.
    pub fn equality_constraint_linear_approximations(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<Vec<TermEvaluation<VectorFunctionLinearApproximation>>, EvalError> {
        let mut out = Vec::new();
        for (index, (name, term)) in self.equality_constraints.iter().enumerate() {
            if term.is_active(time)? {
                out.push(TermEvaluation {
                    index,
                    name: name.to_string(),
                    contact: term.contact_index(),
                    value: term.linear_approximation(time, state, input)?,
                });
            }
        }
        Ok(out)
    }

    /// Active equality constraints stacked into one linear model.
    pub fn stacked_equality_constraint_approximation(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<VectorFunctionLinearApproximation, EvalError> {
        let terms = self.equality_constraint_linear_approximations(time, state, input)?;
        let rows = terms.iter().map(|t| t.value.f.len()).sum();
        let mut stacked = VectorFunctionLinearApproximation::zeros(rows, state.len(), input.len());
        let mut row = 0;
        for term in &terms {
            let n = term.value.f.len();
            stacked.f.rows_mut(row, n).copy_from(&term.value.f);
            stacked.dfdx.rows_mut(row, n).copy_from(&term.value.dfdx);
            stacked.dfdu.rows_mut(row, n).copy_from(&term.value.dfdu);
            row += n;
        }
        Ok(stacked)
    }

    /// Dynamics `dx/dt` at one point.
    pub fn flow_map(
        &self,
        time: f64,
        state: &DVector<f64>,
        input: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        self.dynamics
            .flow_map(time, state, input)
            .map_err(EvalError::External)
    }
}
