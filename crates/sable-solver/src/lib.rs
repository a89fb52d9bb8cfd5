//! The layered solver stack.
//!
//! A [`Solver`] wraps a chain of [`SolverImpl`] adapters: timing and
//! logging, a validity cache, a constant shortcut, equality substitution,
//! and the independent filter, with a concrete backend at the bottom. The
//! chain is assembled by [`chain::build_solver_chain`] from a
//! [`config::CoreConfig`].
//!
//! Queries ask whether `constraints ∧ ¬expr` is unsatisfiable: `evaluate`
//! classifies the query expression as implied-true, implied-false, or
//! neither, and `get_initial_values` produces one byte vector per requested
//! array from a satisfying assignment.

pub mod chain;
pub mod config;
pub mod enumerative;
pub mod independent;

use std::time::Duration;

use sable_constraints::ConstraintManager;
use sable_expr::{builders, ArrayRef, ExprRef};
use thiserror::Error;

pub use chain::build_solver_chain;
pub use config::{CoreConfig, IndependentMode};
pub use enumerative::EnumerativeSolver;
pub use independent::IndependentSolver;

/// Truth status of a query expression under the constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    True,
    False,
    Unknown,
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver timed out")]
    Timeout,

    #[error("solver cancelled")]
    Interrupted,

    #[error("symbolic array '{name}' has {size} bytes, limit is {limit}")]
    Capacity { name: String, size: u32, limit: u32 },

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type SolverResult<T> = Result<T, SolverError>;

/// One solver question: the in-scope constraints and the expression asked
/// about. The constraint list starts as the manager's full sequence; chain
/// layers narrow it.
#[derive(Clone)]
pub struct Query<'a> {
    pub manager: &'a ConstraintManager,
    pub constraints: Vec<ExprRef>,
    pub expr: ExprRef,
}

impl<'a> Query<'a> {
    pub fn new(manager: &'a ConstraintManager, expr: ExprRef) -> Self {
        let constraints = manager.iter().cloned().collect();
        Self {
            manager,
            constraints,
            expr,
        }
    }

    pub fn with_constraints(
        manager: &'a ConstraintManager,
        constraints: Vec<ExprRef>,
        expr: ExprRef,
    ) -> Self {
        Self {
            manager,
            constraints,
            expr,
        }
    }

    /// Same constraints, different expression.
    pub fn with_expr(&self, expr: ExprRef) -> Query<'a> {
        Query {
            manager: self.manager,
            constraints: self.constraints.clone(),
            expr,
        }
    }

    /// The negated query: `expr == 0`.
    pub fn negated_expr(&self) -> ExprRef {
        builders::is_zero(self.expr.clone())
    }
}

/// The driver-facing half of a solver layer. Layers wrap an inner
/// `Box<dyn SolverImpl>` and forward what they do not handle.
pub trait SolverImpl {
    /// Is `query.expr` valid (implied true) under the constraints?
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool>;

    fn compute_validity(&mut self, query: &Query) -> SolverResult<Validity> {
        if self.compute_truth(query)? {
            return Ok(Validity::True);
        }
        let negated = query.with_expr(query.negated_expr());
        if self.compute_truth(&negated)? {
            return Ok(Validity::False);
        }
        Ok(Validity::Unknown)
    }

    /// Any satisfying assignment's value for `query.expr`.
    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef>;

    /// One byte vector per requested array from a model of
    /// `constraints ∧ ¬expr`, or `None` when there is no solution.
    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>>;

    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Cooperative cancellation; in-flight work finishes, later calls fail.
    fn cancel(&mut self);
}

/// Public facade over an assembled chain.
pub struct Solver {
    inner: Box<dyn SolverImpl>,
}

impl Solver {
    pub fn new(inner: Box<dyn SolverImpl>) -> Self {
        Self { inner }
    }

    /// Is `expr` implied true, implied false, or neither under the state's
    /// constraints?
    pub fn evaluate(
        &mut self,
        manager: &ConstraintManager,
        expr: ExprRef,
    ) -> SolverResult<Validity> {
        self.inner.compute_validity(&Query::new(manager, expr))
    }

    pub fn must_be_true(
        &mut self,
        manager: &ConstraintManager,
        expr: ExprRef,
    ) -> SolverResult<bool> {
        self.inner.compute_truth(&Query::new(manager, expr))
    }

    pub fn must_be_false(
        &mut self,
        manager: &ConstraintManager,
        expr: ExprRef,
    ) -> SolverResult<bool> {
        self.must_be_true(manager, builders::is_zero(expr))
    }

    pub fn may_be_true(
        &mut self,
        manager: &ConstraintManager,
        expr: ExprRef,
    ) -> SolverResult<bool> {
        Ok(!self.must_be_false(manager, expr)?)
    }

    pub fn may_be_false(
        &mut self,
        manager: &ConstraintManager,
        expr: ExprRef,
    ) -> SolverResult<bool> {
        Ok(!self.must_be_true(manager, expr)?)
    }

    /// Any satisfying assignment's value for `expr`; always a constant.
    pub fn get_value(
        &mut self,
        manager: &ConstraintManager,
        expr: ExprRef,
    ) -> SolverResult<ExprRef> {
        self.inner.compute_value(&Query::new(manager, expr))
    }

    /// A model for the requested arrays under the current constraints:
    /// `(has_solution, one byte vector per array)`.
    pub fn get_initial_values(
        &mut self,
        manager: &ConstraintManager,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        let query = Query::new(manager, builders::false_expr());
        self.inner.compute_initial_values(&query, arrays)
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    pub fn cancel(&mut self) {
        self.inner.cancel();
    }
}
