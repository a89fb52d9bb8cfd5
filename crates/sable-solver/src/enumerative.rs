//! A small enumerating backend: the executable semantics of the concrete
//! solver protocol.
//!
//! Models are found by bounded exhaustive search over the unknown bytes in
//! the query's footprint, in ascending byte order, pruning with partial
//! evaluation as soon as a constraint's bytes are all assigned. It is the
//! reference backend for the test suites, not a production SMT adapter:
//! queries with more unknown bytes than `max_slots` are rejected.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use sable_constraints::Footprint;
use sable_expr::{ArrayId, ArrayRef, Assignment, ExprRef};
use tracing::debug;

use crate::{Query, SolverError, SolverImpl, SolverResult};

pub struct EnumerativeSolver {
    timeout: Option<Duration>,
    cancelled: bool,
    max_slots: usize,
    max_steps: u64,
}

impl Default for EnumerativeSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EnumerativeSolver {
    pub fn new() -> Self {
        Self {
            timeout: None,
            cancelled: false,
            max_slots: 8,
            max_steps: 1 << 22,
        }
    }

    pub fn with_limits(max_slots: usize, max_steps: u64) -> Self {
        Self {
            max_slots,
            max_steps,
            ..Self::new()
        }
    }

    /// Clear a previous `cancel`.
    pub fn reset(&mut self) {
        self.cancelled = false;
    }

    fn check_cancelled(&self) -> SolverResult<()> {
        if self.cancelled {
            Err(SolverError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Find byte values satisfying every condition, or `None` if none
    /// exist. `extra` expressions contribute unknowns (so they can be
    /// evaluated under the model) without constraining it.
    fn search(
        &self,
        conditions: &[ExprRef],
        extra: &[ExprRef],
    ) -> SolverResult<Option<FxHashMap<ArrayId, Vec<u8>>>> {
        self.check_cancelled()?;
        let mut conds = Vec::new();
        for c in conditions {
            match c.as_constant() {
                Some(v) if v.is_true() => {}
                Some(_) => return Ok(None),
                None => conds.push(c.clone()),
            }
        }

        let mut footprint = Footprint::new();
        for e in conds.iter().chain(extra.iter()) {
            footprint.add(&Footprint::from_expr(e));
        }

        // One search state per referenced array; constant arrays are fixed
        // to their frozen contents, symbolic ones start all-zero.
        let arrays = footprint.arrays();
        let mut values: Vec<Vec<u8>> = Vec::with_capacity(arrays.len());
        let mut slots: Vec<(usize, u32)> = Vec::new();
        for (pos, array) in arrays.iter().enumerate() {
            if array.is_constant() {
                values.push(
                    array
                        .constant_values
                        .iter()
                        .map(|v| v.as_u64() as u8)
                        .collect(),
                );
                continue;
            }
            values.push(vec![0; array.size as usize]);
            if footprint.is_whole_object(array) {
                slots.extend((0..array.size).map(|i| (pos, i)));
            } else if let Some(indices) = footprint.known_indices(array) {
                slots.extend(indices.iter().map(|i| (pos, i)));
            }
        }
        if slots.len() > self.max_slots {
            return Err(SolverError::Backend(format!(
                "{} unknown bytes exceed the enumeration limit of {}",
                slots.len(),
                self.max_slots
            )));
        }

        // A condition becomes checkable once all the slots it reads are
        // assigned; conditions over constant arrays only check at depth 0.
        let slot_pos: FxHashMap<(usize, u32), usize> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i))
            .collect();
        let mut conds_by_depth: Vec<Vec<ExprRef>> = vec![Vec::new(); slots.len() + 1];
        for c in &conds {
            let fp = Footprint::from_expr(c);
            let mut depth = 0;
            for (pos, array) in arrays.iter().enumerate() {
                if array.is_constant() {
                    continue;
                }
                let indices: Vec<u32> = if fp.is_whole_object(array) {
                    (0..array.size).collect()
                } else if let Some(set) = fp.known_indices(array) {
                    set.iter().collect()
                } else {
                    continue;
                };
                for i in indices {
                    if let Some(&p) = slot_pos.get(&(pos, i)) {
                        depth = depth.max(p + 1);
                    }
                }
            }
            conds_by_depth[depth].push(c.clone());
        }

        let mut ctx = SearchCtx {
            arrays: &arrays,
            values,
            slots: &slots,
            conds_by_depth: &conds_by_depth,
            steps: 0,
            max_steps: self.max_steps,
            deadline: self.timeout.map(|t| Instant::now() + t),
        };
        if ctx.descend(0)? {
            debug!(steps = ctx.steps, slots = slots.len(), "model found");
            let mut out = FxHashMap::default();
            for (array, bytes) in arrays.iter().zip(ctx.values.into_iter()) {
                out.insert(ArrayId(array.clone()), bytes);
            }
            Ok(Some(out))
        } else {
            debug!(steps = ctx.steps, slots = slots.len(), "unsatisfiable");
            Ok(None)
        }
    }
}

struct SearchCtx<'a> {
    arrays: &'a [ArrayRef],
    values: Vec<Vec<u8>>,
    slots: &'a [(usize, u32)],
    conds_by_depth: &'a [Vec<ExprRef>],
    steps: u64,
    max_steps: u64,
    deadline: Option<Instant>,
}

impl SearchCtx<'_> {
    fn descend(&mut self, depth: usize) -> SolverResult<bool> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(SolverError::Backend(
                "enumeration budget exhausted".to_owned(),
            ));
        }
        if self.steps % 1024 == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    return Err(SolverError::Timeout);
                }
            }
        }
        for cond in &self.conds_by_depth[depth] {
            if !self.holds(cond) {
                return Ok(false);
            }
        }
        if depth == self.slots.len() {
            return Ok(true);
        }
        let (array_pos, index) = self.slots[depth];
        for value in 0..=u8::MAX {
            self.values[array_pos][index as usize] = value;
            if self.descend(depth + 1)? {
                return Ok(true);
            }
        }
        self.values[array_pos][index as usize] = 0;
        Ok(false)
    }

    fn holds(&self, cond: &ExprRef) -> bool {
        let assignment = Assignment::new(self.arrays, &self.values, false);
        assignment.evaluate(cond).is_true()
    }
}

impl SolverImpl for EnumerativeSolver {
    fn compute_truth(&mut self, query: &Query) -> SolverResult<bool> {
        // Valid iff constraints ∧ ¬expr has no model.
        let mut conds = query.constraints.clone();
        conds.push(query.negated_expr());
        Ok(self.search(&conds, &[])?.is_none())
    }

    fn compute_value(&mut self, query: &Query) -> SolverResult<ExprRef> {
        let model = self
            .search(&query.constraints, std::slice::from_ref(&query.expr))?
            .ok_or_else(|| {
                SolverError::Backend("value query over unsatisfiable constraints".to_owned())
            })?;
        let mut arrays = Vec::new();
        let mut values = Vec::new();
        for (id, bytes) in &model {
            arrays.push(id.0.clone());
            values.push(bytes.clone());
        }
        let assignment = Assignment::new(&arrays, &values, false);
        let result = assignment.evaluate(&query.expr);
        debug_assert!(result.is_constant(), "model covers the value expression");
        Ok(result)
    }

    fn compute_initial_values(
        &mut self,
        query: &Query,
        arrays: &[ArrayRef],
    ) -> SolverResult<Option<Vec<Vec<u8>>>> {
        let mut conds = query.constraints.clone();
        let negated = query.negated_expr();
        match negated.as_constant() {
            Some(v) if v.is_true() => {}
            Some(_) => return Ok(None),
            None => conds.push(negated),
        }
        let Some(model) = self.search(&conds, &[])? else {
            return Ok(None);
        };
        Ok(Some(
            arrays
                .iter()
                .map(|a| {
                    model
                        .get(&ArrayId(a.clone()))
                        .cloned()
                        .unwrap_or_else(|| vec![0; a.size as usize])
                })
                .collect(),
        ))
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_constraints::{ConstraintManager, ManagerConfig};
    use sable_expr::builders::{constant, eq, read, ult};
    use sable_expr::{builders, ArrayCache, UpdateList, WIDTH_32};

    fn manager_with(constraints: Vec<ExprRef>) -> ConstraintManager {
        ConstraintManager::with_constraints(ManagerConfig::default(), constraints)
    }

    #[test]
    fn finds_the_forced_byte() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let r0 = read(UpdateList::fresh(a.clone()), constant(0, WIDTH_32));
        let m = manager_with(vec![eq(constant(42, 8), r0)]);
        let mut solver = EnumerativeSolver::new();
        let q = Query::new(&m, builders::false_expr());
        let values = solver
            .compute_initial_values(&q, &[a])
            .unwrap()
            .expect("satisfiable");
        assert_eq!(values, vec![vec![42, 0, 0, 0]]);
    }

    #[test]
    fn detects_unsatisfiable_pairs() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let r0 = read(UpdateList::fresh(a.clone()), constant(0, WIDTH_32));
        let m = manager_with(vec![
            ult(r0.clone(), constant(5, 8)),
            ult(constant(9, 8), r0),
        ]);
        let mut solver = EnumerativeSolver::new();
        let q = Query::new(&m, builders::false_expr());
        assert!(solver.compute_initial_values(&q, &[a]).unwrap().is_none());
    }

    #[test]
    fn truth_recognizes_implied_facts() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let r0 = read(UpdateList::fresh(a), constant(0, WIDTH_32));
        let m = manager_with(vec![ult(r0.clone(), constant(5, 8))]);
        let mut solver = EnumerativeSolver::new();
        assert!(solver
            .compute_truth(&Query::new(&m, ult(r0.clone(), constant(10, 8))))
            .unwrap());
        assert!(!solver
            .compute_truth(&Query::new(&m, ult(r0, constant(3, 8))))
            .unwrap());
    }

    #[test]
    fn cancel_interrupts_later_calls() {
        let m = manager_with(vec![]);
        let mut solver = EnumerativeSolver::new();
        solver.cancel();
        let err = solver
            .compute_truth(&Query::new(&m, builders::true_expr()))
            .unwrap_err();
        assert!(matches!(err, SolverError::Interrupted));
        solver.reset();
        assert!(solver
            .compute_truth(&Query::new(&m, builders::true_expr()))
            .unwrap());
    }

    #[test]
    fn too_many_unknowns_is_a_backend_error() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let i = cache.make_symbolic("i", 1);
        let idx = builders::zext(
            read(UpdateList::fresh(i), constant(0, WIDTH_32)),
            WIDTH_32,
        );
        // A symbolic index touches the whole 4-byte object plus the index
        // byte itself: five unknowns, over a limit of two.
        let m = manager_with(vec![eq(
            constant(7, 8),
            read(UpdateList::fresh(a.clone()), idx),
        )]);
        let mut solver = EnumerativeSolver::with_limits(2, 1 << 20);
        let q = Query::new(&m, builders::false_expr());
        assert!(matches!(
            solver.compute_initial_values(&q, &[a]),
            Err(SolverError::Backend(_))
        ));
    }
}
