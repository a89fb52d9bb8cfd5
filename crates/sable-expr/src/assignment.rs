//! Partial byte-map assignments and evaluation under them.
//!
//! An assignment binds whole byte vectors to arrays. Evaluation substitutes
//! bound reads with byte constants and rebuilds everything else through the
//! constructors, so a fully bound expression folds down to a `Constant`.
//! With `allow_free`, bytes without a binding leave a residual non-constant
//! term, which is how the model verifier detects an incomplete model.

use rustc_hash::FxHashMap;

use crate::array::{ArrayId, ArrayRef};
use crate::builders;
use crate::expr::{CompareGuard, ExprKind, ExprRef};
use crate::updates::{UpdateList, UpdateNode, UpdateNodeRef};

#[derive(Debug, Clone)]
pub struct Assignment {
    bindings: FxHashMap<ArrayId, Vec<u8>>,
    allow_free: bool,
}

impl Assignment {
    /// Bind `values[i]` to `arrays[i]`. With `allow_free`, unbound bytes
    /// evaluate to residual symbolic terms instead of zero.
    pub fn new(arrays: &[ArrayRef], values: &[Vec<u8>], allow_free: bool) -> Self {
        debug_assert_eq!(arrays.len(), values.len());
        let mut bindings = FxHashMap::default();
        for (a, v) in arrays.iter().zip(values.iter()) {
            bindings.insert(ArrayId(a.clone()), v.clone());
        }
        Self {
            bindings,
            allow_free,
        }
    }

    /// Overlay extra bindings without overwriting existing ones.
    pub fn bind_absent(&mut self, extra: &FxHashMap<ArrayId, Vec<u8>>) {
        for (k, v) in extra {
            self.bindings.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn bytes_for(&self, array: &ArrayRef) -> Option<&Vec<u8>> {
        self.bindings.get(&ArrayId(array.clone()))
    }

    pub fn evaluate(&self, e: &ExprRef) -> ExprRef {
        let _guard = CompareGuard::new();
        let mut memo = FxHashMap::default();
        self.eval(e, &mut memo)
    }

    fn eval(&self, e: &ExprRef, memo: &mut FxHashMap<usize, ExprRef>) -> ExprRef {
        if let Some(cached) = memo.get(&e.as_ptr_usize()) {
            return cached.clone();
        }
        let result = match e.kind() {
            ExprKind::Constant(_) => e.clone(),
            // Value-equivalent: the barrier only blocks the simplifier.
            ExprKind::NotOptimized(inner) => self.eval(inner, memo),
            ExprKind::Read { updates, index } => {
                let idx = self.eval(index, memo);
                self.eval_read(updates, idx, memo)
            }
            ExprKind::Select { cond, t, f } => {
                let c = self.eval(cond, memo);
                let t = self.eval(t, memo);
                let f = self.eval(f, memo);
                builders::select(c, t, f)
            }
            ExprKind::Concat { left, right } => {
                let l = self.eval(left, memo);
                let r = self.eval(right, memo);
                builders::concat(l, r)
            }
            ExprKind::Extract {
                expr,
                offset,
                width,
            } => builders::extract(self.eval(expr, memo), *offset, *width),
            ExprKind::ZExt { expr, width } => builders::zext(self.eval(expr, memo), *width),
            ExprKind::SExt { expr, width } => builders::sext(self.eval(expr, memo), *width),
            ExprKind::Not(inner) => builders::not(self.eval(inner, memo)),
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(left, memo);
                let r = self.eval(right, memo);
                builders::binary_op(*op, l, r)
            }
            ExprKind::Compare { op, left, right } => {
                let l = self.eval(left, memo);
                let r = self.eval(right, memo);
                builders::compare_op(*op, l, r)
            }
        };
        memo.insert(e.as_ptr_usize(), result.clone());
        result
    }

    fn eval_read(
        &self,
        updates: &UpdateList,
        index: ExprRef,
        memo: &mut FxHashMap<usize, ExprRef>,
    ) -> ExprRef {
        let mut node = updates.head.clone();
        while let Some(n) = node {
            let widx = self.eval(&n.index, memo);
            match (widx.as_constant(), index.as_constant()) {
                (Some(wi), Some(ri)) => {
                    if wi.eq_value(ri) {
                        return self.eval(&n.value, memo);
                    }
                    node = n.next.clone();
                }
                _ => {
                    // Undecidable write: rebuild the remaining chain with
                    // evaluated contents and leave the rest to the builder.
                    let suffix = self.eval_chain(&n, memo);
                    return builders::read(
                        UpdateList::new(updates.root.clone(), Some(suffix)),
                        index,
                    );
                }
            }
        }
        if let Some(ri) = index.as_constant() {
            let i = ri.as_u64();
            let root = &updates.root;
            if root.is_constant() {
                if let Some(v) = root.constant_values.get(i as usize) {
                    return builders::constant_value(v.clone());
                }
            }
            if let Some(bytes) = self.bytes_for(root) {
                if let Some(b) = bytes.get(i as usize) {
                    return builders::constant(u64::from(*b), root.range);
                }
            }
            if !self.allow_free {
                return builders::constant(0, root.range);
            }
        }
        builders::read(UpdateList::fresh(updates.root.clone()), index)
    }

    fn eval_chain(
        &self,
        head: &UpdateNodeRef,
        memo: &mut FxHashMap<usize, ExprRef>,
    ) -> UpdateNodeRef {
        let next = head.next.as_ref().map(|n| self.eval_chain(n, memo));
        let index = self.eval(&head.index, memo);
        let value = self.eval(&head.value, memo);
        UpdateNode::new(next, index, value)
    }
}
