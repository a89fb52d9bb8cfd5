//! Solver chain adapters: timing, validity caching, the constant shortcut,
//! and equality substitution. Each wraps an inner layer and forwards what
//! it does not handle; timeouts and cancellation pass straight through.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use sable_expr::{ArrayRef, ExprRef};
use tracing::debug;

use crate::config::CoreConfig;
use crate::independent::IndependentSolver;
use crate::{Query, Solver, SolverImpl, SolverResult, Validity};

/// Outermost layer: wall-clock accounting for every query.
pub struct TimingSolver {
    inner: Box<dyn SolverImpl>,
}

impl TimingSolver {
    pub fn new(inner: Box<dyn SolverImpl>) -> Self {
        Self { inner }
    }
}

impl SolverImpl for TimingSolver {
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool> {
        let start = Instant::now();
        let result = self.inner.compute_truth(query);
        debug!(elapsed_us = start.elapsed().as_micros() as u64, kind = "truth", "solver query");
        result
    }

    fn compute_validity(&mut self, query: &Query) -> SolverResult<Validity> {
        let start = Instant::now();
        let result = self.inner.compute_validity(query);
        debug!(elapsed_us = start.elapsed().as_micros() as u64, kind = "validity", "solver query");
        result
    }

    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef> {
        let start = Instant::now();
        let result = self.inner.compute_value(query);
        debug!(elapsed_us = start.elapsed().as_micros() as u64, kind = "value", "solver query");
        result
    }

    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        let start = Instant::now();
        let result = self.inner.compute_initial_values(query, arrays);
        debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            arrays = arrays.len(),
            kind = "initial_values",
            "solver query"
        );
        result
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Canonical form of a query for cache keying: constraints sorted by the
/// structural total order plus the query expression.
#[derive(PartialEq, Eq, Hash)]
struct QueryKey {
    constraints: Vec<ExprRef>,
    expr: ExprRef,
}

impl QueryKey {
    fn of(query: &Query) -> Self {
        let mut constraints = query.constraints.clone();
        constraints.sort();
        Self {
            constraints,
            expr: query.expr.clone(),
        }
    }
}

/// Memoizes validity and truth answers. Queries carry immutable constraint
/// snapshots, so entries never need invalidation.
pub struct CachingSolver {
    inner: Box<dyn SolverImpl>,
    validity: FxHashMap<QueryKey, Validity>,
    truth: FxHashMap<QueryKey, bool>,
    hits: u64,
    misses: u64,
}

impl CachingSolver {
    pub fn new(inner: Box<dyn SolverImpl>) -> Self {
        Self {
            inner,
            validity: FxHashMap::default(),
            truth: FxHashMap::default(),
            hits: 0,
            misses: 0,
        }
    }
}

impl SolverImpl for CachingSolver {
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool> {
        let key = QueryKey::of(query);
        if let Some(&cached) = self.truth.get(&key) {
            self.hits += 1;
            return Ok(cached);
        }
        // A definitive validity answer settles truth as well.
        if let Some(&cached) = self.validity.get(&key) {
            self.hits += 1;
            return Ok(cached == Validity::True);
        }
        self.misses += 1;
        let result = self.inner.compute_truth(query)?;
        self.truth.insert(key, result);
        Ok(result)
    }

    fn compute_validity(&mut self, query: &Query) -> SolverResult<Validity> {
        let key = QueryKey::of(query);
        if let Some(&cached) = self.validity.get(&key) {
            self.hits += 1;
            return Ok(cached);
        }
        self.misses += 1;
        let result = self.inner.compute_validity(query)?;
        self.validity.insert(key, result);
        if self.misses % 256 == 0 {
            debug!(hits = self.hits, misses = self.misses, "validity cache");
        }
        Ok(result)
    }

    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef> {
        self.inner.compute_value(query)
    }

    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        self.inner.compute_initial_values(query, arrays)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Answers queries over constant expressions without touching the backend.
/// As everywhere in the chain, the constraint set is assumed satisfiable.
pub struct ConstShortcutSolver {
    inner: Box<dyn SolverImpl>,
}

impl ConstShortcutSolver {
    pub fn new(inner: Box<dyn SolverImpl>) -> Self {
        Self { inner }
    }
}

impl SolverImpl for ConstShortcutSolver {
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool> {
        if let Some(v) = query.expr.as_constant() {
            return Ok(v.is_true());
        }
        self.inner.compute_truth(query)
    }

    fn compute_validity(&mut self, query: &Query) -> SolverResult<Validity> {
        if let Some(v) = query.expr.as_constant() {
            return Ok(if v.is_true() {
                Validity::True
            } else {
                Validity::False
            });
        }
        self.inner.compute_validity(query)
    }

    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef> {
        if query.expr.is_constant() {
            return Ok(query.expr.clone());
        }
        self.inner.compute_value(query)
    }

    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        self.inner.compute_initial_values(query, arrays)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Rewrites the query expression through the manager's equalities map
/// before it reaches the filter, so queries about substituted bytes fold
/// early.
pub struct EqualitySubstSolver {
    inner: Box<dyn SolverImpl>,
    enabled: bool,
}

impl EqualitySubstSolver {
    pub fn new(inner: Box<dyn SolverImpl>, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    fn substituted<'a>(&self, query: &Query<'a>) -> Query<'a> {
        if !self.enabled {
            return query.clone();
        }
        let simplified = query.manager.simplify(&query.expr);
        query.with_expr(simplified)
    }
}

impl SolverImpl for EqualitySubstSolver {
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool> {
        let q = self.substituted(query);
        self.inner.compute_truth(&q)
    }

    fn compute_validity(&mut self, query: &Query) -> SolverResult<Validity> {
        let q = self.substituted(query);
        self.inner.compute_validity(&q)
    }

    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef> {
        let q = self.substituted(query);
        self.inner.compute_value(&q)
    }

    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        self.inner.compute_initial_values(query, arrays)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Assemble the standard chain over a concrete backend:
/// timing → validity cache → constant shortcut → equality substitution →
/// independent filter → backend.
pub fn build_solver_chain(backend: Box<dyn SolverImpl>, config: &CoreConfig) -> Solver {
    let mut stack: Box<dyn SolverImpl> = Box::new(IndependentSolver::new(backend, config));
    stack = Box::new(EqualitySubstSolver::new(stack, config.equality_substitution));
    stack = Box::new(ConstShortcutSolver::new(stack));
    stack = Box::new(CachingSolver::new(stack));
    stack = Box::new(TimingSolver::new(stack));
    let mut solver = Solver::new(stack);
    solver.set_timeout(config.core_solver_timeout);
    solver
}
