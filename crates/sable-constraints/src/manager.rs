//! The constraint manager: an ordered set of assumed-true expressions that
//! canonicalizes itself on insertion and maintains the independent-set
//! partition of its constraints.
//!
//! Insertion simplifies through the current equalities map, splits
//! conjunctions, and skips duplicates. An `Eq(Constant, rhs)` fact also
//! rewrites the existing constraints with the new equality, recursing on
//! anything that changes. The factor partition is kept in step: new
//! constraints extend or merge factors, rewritten-away constraints mark
//! their factor dirty and trigger a pairwise re-merge of what remains.

use std::cell::RefCell;

use rustc_hash::{FxHashMap, FxHashSet};
use sable_expr::builders;
use sable_expr::visitor::{self, ReplaceMap, ReplaceOne};
use sable_expr::{BinOp, CmpOp, CompareGuard, ExprKind, ExprRef, UpdateDedup};
use tracing::debug;

use crate::footprint::Footprint;

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Rewrite existing constraints when an equality with a constant is
    /// added.
    pub rewrite_equalities: bool,
    /// Maintain the factor partition for the independent solver.
    pub use_independent_sets: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            rewrite_equalities: true,
            use_independent_sets: true,
        }
    }
}

pub type FactorId = u32;

/// Mutable set of assumed-true expressions owned by one execution state.
///
/// Copying a manager deep-clones the factor bookkeeping and re-shares the
/// constraint expressions themselves.
#[derive(Debug, Clone)]
pub struct ConstraintManager {
    config: ManagerConfig,
    constraints: Vec<ExprRef>,
    members: FxHashSet<ExprRef>,
    /// `rhs -> constant` for added `Eq(constant, rhs)` facts; other
    /// constraints map to constant-true.
    equalities: FxHashMap<ExprRef, ExprRef>,
    representative: FxHashMap<ExprRef, FactorId>,
    factors: FxHashMap<FactorId, Footprint>,
    next_factor: FactorId,
    dedup: RefCell<UpdateDedup>,
    // Transient bookkeeping for one add_constraint cycle.
    old: Vec<ExprRef>,
    added: Vec<ExprRef>,
    deleted: Vec<ExprRef>,
}

impl Default for ConstraintManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl ConstraintManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            constraints: Vec::new(),
            members: FxHashSet::default(),
            equalities: FxHashMap::default(),
            representative: FxHashMap::default(),
            factors: FxHashMap::default(),
            next_factor: 0,
            dedup: RefCell::new(UpdateDedup::new()),
            old: Vec::new(),
            added: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Build a manager over an existing constraint list, establishing the
    /// equalities map and the factor partition.
    pub fn with_constraints(config: ManagerConfig, constraints: Vec<ExprRef>) -> Self {
        let _guard = CompareGuard::new();
        let mut m = Self::new(config);
        for e in constraints {
            if m.push_constraint(&e) {
                m.added.push(e);
            }
        }
        m.update_equalities();
        if m.config.use_independent_sets {
            m.update_partition();
        }
        m.added.clear();
        m
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExprRef> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// The current partition's element sets.
    pub fn factors(&self) -> impl Iterator<Item = &Footprint> {
        self.factors.values()
    }

    pub fn factor_count(&self) -> usize {
        self.factors.len()
    }

    /// Equality-substituted version of `e` under the current map. Read-only
    /// with respect to the constraint set and the partition.
    pub fn simplify(&self, e: &ExprRef) -> ExprRef {
        if e.is_constant() {
            return e.clone();
        }
        let _guard = CompareGuard::new();
        let mut rewriter = ReplaceMap {
            replacements: &self.equalities,
        };
        let mut dedup = self.dedup.borrow_mut();
        visitor::rewrite(&mut rewriter, &mut dedup, e)
    }

    /// Add a constraint, canonicalizing the set around it.
    ///
    /// Returns `false` when the constraint (or a rewrite it triggers)
    /// reduces to constant-false: the path is infeasible and the manager is
    /// left unchanged. Adding a duplicate is a no-op that returns `true`.
    pub fn add_constraint(&mut self, e: ExprRef) -> bool {
        let _guard = CompareGuard::new();
        if self.members.contains(&e) {
            return true;
        }
        debug_assert!(self.old.is_empty() && self.added.is_empty() && self.deleted.is_empty());

        let simplified = self.simplify(&e);
        if simplified.is_false() {
            debug!("constraint simplified to false, path infeasible");
            return false;
        }
        let snapshot = self.constraints.clone();
        let changed = match self.add_internal(simplified) {
            Some(changed) => changed,
            None => {
                // A rewrite falsified a constraint mid-pass; put the set
                // back the way it was and report the path infeasible.
                self.constraints = snapshot;
                self.members = self.constraints.iter().cloned().collect();
                self.old.clear();
                self.added.clear();
                self.deleted.clear();
                debug!("equality rewrite falsified an existing constraint, path infeasible");
                return false;
            }
        };

        // A rewrite pass rebuilt the constraint vector; diff it against the
        // snapshot to find what was really added and removed.
        if changed {
            self.added.clear();
            self.diff_constraints();
        }
        self.old.clear();

        self.update_equalities();
        if self.config.use_independent_sets {
            self.update_partition();
        }
        self.added.clear();
        self.deleted.clear();
        debug_assert!(self.partition_is_consistent(), "factor partition broken");
        true
    }

    /// Returns whether a rewrite pass changed the constraint vector, or
    /// `None` when the constraint or a rewrite it triggers reduces to
    /// constant-false.
    fn add_internal(&mut self, e: ExprRef) -> Option<bool> {
        if self.members.contains(&e) {
            return Some(false);
        }
        match e.kind() {
            // A rewrite can fold an existing constraint down to a literal;
            // false means the whole path is infeasible.
            ExprKind::Constant(v) => {
                if v.is_true() {
                    Some(false)
                } else {
                    None
                }
            }
            // Split conjunctions for finer-grained independence.
            ExprKind::Binary {
                op: BinOp::And,
                left,
                right,
            } => {
                let (l, r) = (left.clone(), right.clone());
                let a = self.add_internal(l)?;
                let b = self.add_internal(r)?;
                Some(a | b)
            }
            ExprKind::Compare {
                op: CmpOp::Eq,
                left,
                right,
            } if self.config.rewrite_equalities
                && left.is_constant()
                && !matches!(
                    right.kind(),
                    ExprKind::Compare { op: CmpOp::Eq, .. }
                ) =>
            {
                let (src, dst) = (right.clone(), left.clone());
                let changed = self.rewrite_constraints(&src, &dst)?;
                if self.push_constraint(&e) {
                    self.added.push(e);
                }
                Some(changed)
            }
            _ => {
                if self.push_constraint(&e) {
                    self.added.push(e);
                }
                Some(false)
            }
        }
    }

    /// Re-run every constraint through a single-substitution rewrite,
    /// re-adding anything that changed so it canonicalizes further. `None`
    /// propagates a rewrite that falsified some constraint.
    fn rewrite_constraints(&mut self, src: &ExprRef, dst: &ExprRef) -> Option<bool> {
        let mut changed = false;
        let worklist: Vec<ExprRef> = if self.old.is_empty() {
            std::mem::swap(&mut self.constraints, &mut self.old);
            self.old.clone()
        } else {
            // Re-entered from a nested add: rewrite the vector rebuilt so
            // far, keeping the original snapshot for the final diff.
            std::mem::take(&mut self.constraints)
        };
        self.members.clear();
        for ce in worklist {
            let rewritten = {
                let mut rewriter = ReplaceOne {
                    src: src.clone(),
                    dst: dst.clone(),
                };
                let mut dedup = self.dedup.borrow_mut();
                visitor::rewrite(&mut rewriter, &mut dedup, &ce)
            };
            if rewritten != ce {
                changed = true;
                self.add_internal(rewritten)?;
            } else {
                self.push_constraint(&ce);
            }
        }
        Some(changed)
    }

    fn push_constraint(&mut self, e: &ExprRef) -> bool {
        if self.members.insert(e.clone()) {
            self.constraints.push(e.clone());
            true
        } else {
            false
        }
    }

    /// Diff the rebuilt constraint vector against the pre-rewrite snapshot.
    fn diff_constraints(&mut self) {
        let mut old_set: FxHashSet<ExprRef> = self.old.drain(..).collect();
        for c in &self.constraints {
            if !old_set.remove(c) {
                self.added.push(c.clone());
            }
        }
        self.deleted.extend(old_set);
    }

    fn update_equalities(&mut self) {
        for e in &self.added {
            match e.kind() {
                ExprKind::Compare {
                    op: CmpOp::Eq,
                    left,
                    right,
                } if left.is_constant() => {
                    self.equalities.insert(right.clone(), left.clone());
                }
                _ => {
                    self.equalities.insert(e.clone(), builders::true_expr());
                }
            }
        }
        for e in &self.deleted {
            match e.kind() {
                ExprKind::Compare {
                    op: CmpOp::Eq,
                    left,
                    right,
                } if left.is_constant() => {
                    self.equalities.remove(right);
                }
                _ => {
                    self.equalities.remove(e);
                }
            }
        }
    }

    fn alloc_factor_id(&mut self) -> FactorId {
        let id = self.next_factor;
        self.next_factor += 1;
        id
    }

    /// Fold the pending adds and deletes into the factor partition.
    fn update_partition(&mut self) {
        if !self.deleted.is_empty() {
            self.update_delete();
        }
        while let Some(e) = self.added.pop() {
            let mut current = Footprint::from_expr(&e);
            let garbage: Vec<FactorId> = self
                .factors
                .iter()
                .filter(|(_, f)| current.intersects(f))
                .map(|(id, _)| *id)
                .collect();
            if garbage.len() == 1 {
                // The new constraint falls inside one existing factor.
                let fid = garbage[0];
                let factor = self.factors.get_mut(&fid).expect("live factor id");
                factor.add(&current);
                for ex in &current.exprs {
                    self.representative.insert(ex.clone(), fid);
                }
            } else {
                for fid in &garbage {
                    let victim = self.factors.remove(fid).expect("live factor id");
                    current.add(&victim);
                }
                let fid = self.alloc_factor_id();
                for ex in &current.exprs {
                    self.representative.insert(ex.clone(), fid);
                }
                if garbage.len() > 1 {
                    debug!(merged = garbage.len(), factor = fid, "merged factors");
                }
                self.factors.insert(fid, current);
            }
        }
    }

    /// Rewritten-away constraints leave their factor: drop them from the
    /// expression list and re-merge what remains from single-expression
    /// footprints, splitting the factor if it decomposes.
    fn update_delete(&mut self) {
        let deleted = std::mem::take(&mut self.deleted);
        let mut dirty: FxHashMap<FactorId, FxHashSet<ExprRef>> = FxHashMap::default();
        for e in deleted {
            if let Some(fid) = self.representative.remove(&e) {
                dirty.entry(fid).or_default().insert(e);
            }
        }
        for (fid, dead) in dirty {
            let Some(victim) = self.factors.remove(&fid) else {
                continue;
            };
            let mut temp: Vec<Footprint> = victim
                .exprs
                .iter()
                .filter(|e| !dead.contains(e))
                .map(Footprint::from_expr)
                .collect();
            let mut result: Vec<Footprint> = Vec::new();
            while let Some(mut current) = temp.pop() {
                // Entries in result stay pairwise disjoint, so one forward
                // scan per element reaches the fixed point.
                let mut i = 0;
                while i < result.len() {
                    if current.intersects(&result[i]) {
                        let absorbed = result.swap_remove(i);
                        current.add(&absorbed);
                    } else {
                        i += 1;
                    }
                }
                result.push(current);
            }
            if result.len() > 1 {
                debug!(factor = fid, pieces = result.len(), "factor split on rewrite");
            }
            for fp in result {
                let nid = self.alloc_factor_id();
                for ex in &fp.exprs {
                    self.representative.insert(ex.clone(), nid);
                }
                self.factors.insert(nid, fp);
            }
        }
    }

    /// Debug check: every constraint in exactly one factor, factors
    /// pairwise non-intersecting.
    fn partition_is_consistent(&self) -> bool {
        if !self.config.use_independent_sets {
            return true;
        }
        let mut counted = 0;
        for (fid, f) in &self.factors {
            for e in &f.exprs {
                counted += 1;
                if !self.members.contains(e) {
                    return false;
                }
                if self.representative.get(e) != Some(fid) {
                    return false;
                }
            }
        }
        if counted != self.constraints.len() {
            return false;
        }
        let all: Vec<&Footprint> = self.factors.values().collect();
        for i in 0..all.len() {
            for j in i + 1..all.len() {
                if all[i].intersects(all[j]) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_expr::builders::{add, and, constant, eq, read, ult};
    use sable_expr::{ArrayCache, UpdateList, WIDTH_32};

    fn byte(cache: &mut ArrayCache, name: &str, i: u64) -> ExprRef {
        let a = cache.make_symbolic(name, 4);
        read(UpdateList::fresh(a), constant(i, WIDTH_32))
    }

    #[test]
    fn false_constraint_is_rejected_and_nothing_changes() {
        let mut m = ConstraintManager::default();
        assert!(!m.add_constraint(eq(constant(0, 8), constant(1, 8))));
        assert!(m.is_empty());
        assert_eq!(m.factor_count(), 0);
    }

    #[test]
    fn true_constraint_is_a_noop() {
        let mut m = ConstraintManager::default();
        assert!(m.add_constraint(builders::true_expr()));
        assert!(m.is_empty());
    }

    #[test]
    fn duplicates_are_skipped() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let c = eq(constant(1, 8), byte(&mut cache, "a", 0));
        assert!(m.add_constraint(c.clone()));
        assert!(m.add_constraint(c));
        assert_eq!(m.len(), 1);
        assert_eq!(m.factor_count(), 1);
    }

    #[test]
    fn conjunctions_split_into_conjuncts() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let c1 = eq(constant(1, 8), byte(&mut cache, "a", 0));
        let c2 = eq(constant(2, 8), byte(&mut cache, "b", 3));
        assert!(m.add_constraint(and(c1.clone(), c2.clone())));
        assert_eq!(m.len(), 2);
        assert_eq!(m.factor_count(), 2);
        assert!(m.iter().any(|e| *e == c1));
        assert!(m.iter().any(|e| *e == c2));
    }

    #[test]
    fn disjoint_constraints_get_disjoint_factors() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        m.add_constraint(eq(constant(1, 8), byte(&mut cache, "a", 0)));
        m.add_constraint(eq(constant(2, 8), byte(&mut cache, "b", 3)));
        assert_eq!(m.factor_count(), 2);
        for f in m.factors() {
            assert_eq!(f.exprs.len(), 1);
        }
    }

    #[test]
    fn overlapping_constraints_share_a_factor() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        let a1 = byte(&mut cache, "a", 1);
        m.add_constraint(ult(a0.clone(), a1.clone()));
        m.add_constraint(ult(a1, constant(9, 8)));
        assert_eq!(m.len(), 2);
        assert_eq!(m.factor_count(), 1);
        assert_eq!(m.factors().next().unwrap().exprs.len(), 2);
    }

    #[test]
    fn equality_rewrites_existing_constraints() {
        // a[0] + a[1] == 3, then a[0] == 1: the first constraint folds to
        // a[1] == 2 and the partition ends with two single-byte factors.
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        let a1 = byte(&mut cache, "a", 1);
        assert!(m.add_constraint(eq(constant(3, 8), add(a0.clone(), a1.clone()))));
        assert!(m.add_constraint(eq(constant(1, 8), a0.clone())));
        assert_eq!(m.len(), 2);
        assert!(m.iter().any(|e| *e == eq(constant(2, 8), a1.clone())));
        assert!(m.iter().any(|e| *e == eq(constant(1, 8), a0.clone())));
        assert_eq!(m.factor_count(), 2);
    }

    #[test]
    fn rewrite_that_falsifies_reports_infeasibility() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        assert!(m.add_constraint(eq(constant(1, 8), a0.clone())));
        // Simplification turns a[0] == 2 into 1 == 2, constant false.
        assert!(!m.add_constraint(eq(constant(2, 8), a0)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn falsifying_rewrite_of_existing_constraint_returns_false() {
        // The new equality is consistent on its own; it is the rewrite of
        // the older inequality that folds to constant false.
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        let bound = ult(a0.clone(), constant(3, 8));
        assert!(m.add_constraint(bound.clone()));
        assert!(!m.add_constraint(eq(constant(5, 8), a0)));
        // The set is exactly as it was before the failed add.
        assert_eq!(m.len(), 1);
        assert!(m.iter().any(|e| *e == bound));
        assert_eq!(m.factor_count(), 1);
        assert!(m.simplify(&bound).is_true());
    }

    #[test]
    fn simplify_is_idempotent() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        let a1 = byte(&mut cache, "a", 1);
        m.add_constraint(eq(constant(1, 8), a0.clone()));
        let e = ult(add(a0, a1.clone()), constant(9, 8));
        let once = m.simplify(&e);
        let twice = m.simplify(&once);
        assert_eq!(once, twice);
        // The substitution applied: a[0] is gone from the simplified form.
        assert_eq!(once, ult(add(constant(1, 8), a1), constant(9, 8)));
    }

    #[test]
    fn simplify_knows_added_facts_are_true() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        let a1 = byte(&mut cache, "a", 1);
        let fact = ult(a0.clone(), a1.clone());
        m.add_constraint(fact.clone());
        assert!(m.simplify(&fact).is_true());
    }

    #[test]
    fn with_constraints_builds_the_same_partition() {
        let mut cache = ArrayCache::new();
        let cs = vec![
            eq(constant(1, 8), byte(&mut cache, "a", 0)),
            eq(constant(2, 8), byte(&mut cache, "b", 3)),
            ult(byte(&mut cache, "a", 0), byte(&mut cache, "a", 2)),
        ];
        let m = ConstraintManager::with_constraints(ManagerConfig::default(), cs);
        assert_eq!(m.len(), 3);
        // a[0]-constraints connect, b stays alone.
        assert_eq!(m.factor_count(), 2);
    }

    #[test]
    fn clone_is_independent() {
        let mut m = ConstraintManager::default();
        let mut cache = ArrayCache::new();
        m.add_constraint(eq(constant(1, 8), byte(&mut cache, "a", 0)));
        let fork = m.clone();
        let mut m2 = m;
        m2.add_constraint(eq(constant(2, 8), byte(&mut cache, "b", 0)));
        assert_eq!(fork.len(), 1);
        assert_eq!(m2.len(), 2);
        assert_eq!(fork.factor_count(), 1);
        assert_eq!(m2.factor_count(), 2);
    }

    #[test]
    fn rewrite_disabled_keeps_old_forms() {
        let mut m = ConstraintManager::new(ManagerConfig {
            rewrite_equalities: false,
            use_independent_sets: true,
        });
        let mut cache = ArrayCache::new();
        let a0 = byte(&mut cache, "a", 0);
        let a1 = byte(&mut cache, "a", 1);
        let sum = eq(constant(3, 8), add(a0.clone(), a1));
        m.add_constraint(sum.clone());
        m.add_constraint(eq(constant(1, 8), a0));
        assert!(m.iter().any(|e| *e == sum));
        assert_eq!(m.len(), 2);
        // The shared byte keeps both constraints in one factor.
        assert_eq!(m.factor_count(), 1);
    }
}
