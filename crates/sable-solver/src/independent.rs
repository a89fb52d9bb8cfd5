//! The independent solver: ships only the constraints connected to a query
//! and reassembles per-factor models into whole-array byte vectors.
//!
//! Decision queries take the query expression's footprint as a closure and
//! select every manager factor intersecting it; because factors are
//! pairwise disjoint, the selection is exact. Model queries partition the
//! constraints (the negated query seeds its own factor), solve each factor
//! or batch of factors separately, and merge the returned byte ranges. The
//! merged model is verified against every source constraint before it is
//! returned; a model that does not satisfy the query is a solver bug and
//! panics.

use std::time::Duration;

use rustc_hash::FxHashMap;
use sable_constraints::Footprint;
use sable_expr::{builders, ArrayId, ArrayRef, Assignment, ExprRef};
use tracing::{debug, warn};

use crate::config::{CoreConfig, IndependentMode};
use crate::{Query, SolverImpl, SolverResult, Validity};

pub struct IndependentSolver {
    inner: Box<dyn SolverImpl>,
    mode: IndependentMode,
    expr_num_threshold: usize,
    max_sym_array_size: Option<u32>,
}

impl IndependentSolver {
    pub fn new(inner: Box<dyn SolverImpl>, config: &CoreConfig) -> Self {
        Self {
            inner,
            mode: config.independent_mode,
            expr_num_threshold: config.expr_num_threshold.max(1),
            max_sym_array_size: config.max_sym_array_size,
        }
    }

    /// The constraints whose factor intersects the query's footprint.
    fn independent_constraints(query: &Query) -> Vec<ExprRef> {
        if query.manager.factor_count() == 0 {
            // Partition maintenance is off for this state; filtering would
            // drop constraints, so ship them all.
            return query.constraints.clone();
        }
        let closure = Footprint::from_expr(&query.expr);
        let mut required = Vec::new();
        for factor in query.manager.factors() {
            if closure.intersects(factor) {
                required.extend(factor.exprs.iter().cloned());
            }
        }
        debug!(
            selected = required.len(),
            total = query.constraints.len(),
            "independent filter"
        );
        required
    }

    fn filtered<'a>(query: &Query<'a>) -> Query<'a> {
        Query::with_constraints(
            query.manager,
            Self::independent_constraints(query),
            query.expr.clone(),
        )
    }

    /// Partition the model query into factors: the negated query seeds the
    /// "query factor" and absorbs every manager factor it touches; the
    /// remaining factors pass through unchanged.
    fn model_factors(query: &Query) -> Vec<Footprint> {
        let mut current = match query.expr.as_constant() {
            Some(v) => {
                debug_assert!(
                    v.is_false(),
                    "constant model-query expression must be false"
                );
                None
            }
            None => Some(Footprint::from_expr(&query.negated_expr())),
        };
        if query.manager.factor_count() == 0 && !query.constraints.is_empty() {
            // No partition to draw from; solve the whole set as one factor.
            let mut all = current.unwrap_or_default();
            for c in &query.constraints {
                all.add(&Footprint::from_expr(c));
            }
            return vec![all];
        }
        let mut result = Vec::new();
        for factor in query.manager.factors() {
            if let Some(cur) = &mut current {
                if cur.intersects(factor) {
                    cur.add(factor);
                    continue;
                }
            }
            result.push(factor.clone());
        }
        if let Some(cur) = current {
            if !cur.exprs.is_empty() {
                result.push(cur);
            }
        }
        result
    }

    fn check_capacity(&self, arrays: &[ArrayRef]) -> SolverResult<()> {
        if let Some(limit) = self.max_sym_array_size {
            for a in arrays {
                if a.is_symbolic() && a.size > limit {
                    return Err(crate::SolverError::Capacity {
                        name: a.name.clone(),
                        size: a.size,
                        limit,
                    });
                }
            }
        }
        Ok(())
    }

    /// Copy one factor's answer bytes into the running per-array model,
    /// writing only the byte indices the factor itself references.
    fn merge_factor_bytes(
        ret: &mut FxHashMap<ArrayId, Vec<u8>>,
        factor: &Footprint,
        arrays: &[ArrayRef],
        values: &[Vec<u8>],
    ) {
        debug_assert_eq!(arrays.len(), values.len());
        for (array, bytes) in arrays.iter().zip(values.iter()) {
            match ret.entry(ArrayId(array.clone())) {
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let dst = slot.get_mut();
                    debug_assert_eq!(dst.len(), bytes.len(), "same array, same size");
                    if let Some(indices) = factor.known_indices(array) {
                        for i in indices.iter() {
                            if let Some(b) = bytes.get(i as usize) {
                                dst[i as usize] = *b;
                            }
                        }
                    } else if factor.is_whole_object(array) {
                        dst.copy_from_slice(bytes);
                    }
                    // A factor that does not reference this array at all is
                    // skipped: the batch asked about it on behalf of some
                    // other factor.
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(bytes.clone());
                }
            }
        }
    }

    fn initial_values_per_factor(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        let factors = Self::model_factors(query);
        let mut ret: FxHashMap<ArrayId, Vec<u8>> = FxHashMap::default();
        for factor in &factors {
            debug_assert!(!factor.exprs.is_empty(), "no empty factors");
            let arrays_in_factor = factor.arrays();
            if arrays_in_factor.is_empty() {
                continue;
            }
            let sub = Query::with_constraints(
                query.manager,
                factor.exprs.clone(),
                builders::false_expr(),
            );
            match self.inner.compute_initial_values(&sub, &arrays_in_factor)? {
                None => return Ok(None),
                Some(values) => {
                    Self::merge_factor_bytes(&mut ret, factor, &arrays_in_factor, &values);
                }
            }
        }
        Ok(Some(self.finish_model(query, arrays, ret)))
    }

    fn initial_values_batched(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        let mut factors = Self::model_factors(query);
        factors.retain(|f| f.has_arrays());
        factors.sort_by_key(|f| f.exprs.len());

        // Greedy packing: close a batch once it reaches the expression
        // threshold, so each batch overshoots by at most one factor.
        let mut batches: Vec<Vec<&Footprint>> = vec![Vec::new()];
        let mut acc = 0usize;
        for f in &factors {
            if acc >= self.expr_num_threshold {
                batches.push(Vec::new());
                acc = 0;
            }
            batches.last_mut().expect("at least one batch").push(f);
            acc += f.exprs.len();
        }
        if batches.last().is_some_and(Vec::is_empty) {
            batches.pop();
        }
        debug!(factors = factors.len(), batches = batches.len(), "batched mode");

        let mut ret: FxHashMap<ArrayId, Vec<u8>> = FxHashMap::default();
        for batch in &batches {
            let mut constraints = Vec::new();
            let mut batch_arrays: Vec<ArrayRef> = Vec::new();
            for factor in batch {
                debug_assert!(!factor.exprs.is_empty(), "no empty factors");
                constraints.extend(factor.exprs.iter().cloned());
                for a in factor.arrays() {
                    if !batch_arrays.iter().any(|b| std::rc::Rc::ptr_eq(b, &a)) {
                        batch_arrays.push(a);
                    }
                }
            }
            batch_arrays.sort_by(|x, y| x.name.cmp(&y.name));
            let sub =
                Query::with_constraints(query.manager, constraints, builders::false_expr());
            match self.inner.compute_initial_values(&sub, &batch_arrays)? {
                None => return Ok(None),
                Some(values) => {
                    for factor in batch {
                        Self::merge_factor_bytes(&mut ret, factor, &batch_arrays, &values);
                    }
                }
            }
        }
        Ok(Some(self.finish_model(query, arrays, ret)))
    }

    /// Materialize the merged model in requested-array order and verify it
    /// satisfies the full query.
    fn finish_model(
        &self,
        query: &Query,
        arrays: &[ArrayRef],
        ret: FxHashMap<ArrayId, Vec<u8>>,
    ) -> Vec<Vec<u8>> {
        let values: Vec<Vec<u8>> = arrays
            .iter()
            .map(|a| {
                ret.get(&ArrayId(a.clone()))
                    .cloned()
                    .unwrap_or_else(|| vec![0; a.size as usize])
            })
            .collect();
        assert!(
            verify_model(query, arrays, &values, &ret),
            "independent solver produced a model that does not satisfy the query"
        );
        values
    }
}

/// Evaluate every source constraint and the negated query under the merged
/// byte map; all must come out constant-true. The overlay carries bytes for
/// arrays related to the constraints but not requested by the caller.
fn verify_model(
    query: &Query,
    arrays: &[ArrayRef],
    values: &[Vec<u8>],
    overlay: &FxHashMap<ArrayId, Vec<u8>>,
) -> bool {
    let mut assignment = Assignment::new(arrays, values, true);
    assignment.bind_absent(overlay);
    for constraint in &query.constraints {
        let evaluated = assignment.evaluate(constraint);
        match evaluated.as_constant() {
            None => {
                // The model left bytes of this constraint unbound; it is
                // incomplete and must not be returned.
                warn!(
                    constraint = %sable_expr::pretty::pretty_print_expr(constraint),
                    evaluated = %sable_expr::pretty::pretty_print_expr(&evaluated),
                    "assignment evaluation did not produce a constant"
                );
                return false;
            }
            Some(v) if v.is_false() => return false,
            Some(_) => {}
        }
    }
    let negated = assignment.evaluate(&query.negated_expr());
    match negated.as_constant() {
        Some(v) => v.is_true(),
        None => {
            warn!("negated query did not evaluate to a constant under the model");
            false
        }
    }
}

impl SolverImpl for IndependentSolver {
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool> {
        let q = Self::filtered(query);
        self.inner.compute_truth(&q)
    }

    fn compute_validity(&mut self, query: &Query) -> SolverResult<Validity> {
        let q = Self::filtered(query);
        self.inner.compute_validity(&q)
    }

    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef> {
        let q = Self::filtered(query);
        self.inner.compute_value(&q)
    }

    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        self.check_capacity(arrays)?;
        match self.mode {
            IndependentMode::PerFactor => self.initial_values_per_factor(query, arrays),
            IndependentMode::Batch => self.initial_values_batched(query, arrays),
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}
