//! Generic DAG traversal with per-traversal memoization.
//!
//! A [`Rewriter`] decides, per node, whether to descend, skip, or replace.
//! The traversal memoizes one replacement per visited node and rebuilds
//! changed nodes through the public constructors, so every rewrite
//! re-canonicalizes. Rewritten update-node suffixes are uniqued through a
//! shared [`UpdateDedup`] map so that independent traversals producing the
//! same suffix share storage.

use rustc_hash::FxHashMap;

use crate::builders;
use crate::expr::{CompareGuard, ExprKind, ExprRef};
use crate::updates::{UpdateList, UpdateNode, UpdateNodeRef};

/// What to do with a visited node.
pub enum Action {
    /// Descend into the kids and rebuild if any changed.
    DoChildren,
    /// Keep the node as-is without descending.
    SkipChildren,
    /// Replace the node; the replacement is not descended into.
    ChangeTo(ExprRef),
}

pub trait Rewriter {
    fn visit_pre(&mut self, _e: &ExprRef) -> Action {
        Action::DoChildren
    }

    fn visit_post(&mut self, _e: &ExprRef) -> Action {
        Action::DoChildren
    }
}

/// Uniques rewritten update nodes by content so that two rewrites producing
/// the same suffix share one chain. Outlives individual traversals.
#[derive(Debug, Default, Clone)]
pub struct UpdateDedup {
    map: FxHashMap<u64, Vec<UpdateNodeRef>>,
}

impl UpdateDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(&mut self, node: UpdateNodeRef) -> UpdateNodeRef {
        let bucket = self.map.entry(node.hash()).or_default();
        for existing in bucket.iter() {
            if existing.structurally_equal(&node) {
                return existing.clone();
            }
        }
        bucket.push(node.clone());
        node
    }
}

/// One traversal over a DAG. The replacement caches are local to the
/// traversal; only the update-node dedup map is shared.
pub struct Traversal<'a, R: Rewriter> {
    rewriter: &'a mut R,
    dedup: &'a mut UpdateDedup,
    visited: FxHashMap<usize, ExprRef>,
    visited_un: FxHashMap<usize, UpdateNodeRef>,
    // Rewrites may drop the last reference to replaced nodes.
    _guard: CompareGuard,
}

impl<'a, R: Rewriter> Traversal<'a, R> {
    pub fn new(rewriter: &'a mut R, dedup: &'a mut UpdateDedup) -> Self {
        Self {
            rewriter,
            dedup,
            visited: FxHashMap::default(),
            visited_un: FxHashMap::default(),
            _guard: CompareGuard::new(),
        }
    }

    pub fn visit(&mut self, e: &ExprRef) -> ExprRef {
        if let Some(cached) = self.visited.get(&e.as_ptr_usize()) {
            return cached.clone();
        }
        let result = match self.rewriter.visit_pre(e) {
            Action::ChangeTo(r) => r,
            Action::SkipChildren => e.clone(),
            Action::DoChildren => {
                let rebuilt = self.visit_kids(e);
                match self.rewriter.visit_post(&rebuilt) {
                    Action::ChangeTo(r) => r,
                    _ => rebuilt,
                }
            }
        };
        self.visited.insert(e.as_ptr_usize(), result.clone());
        result
    }

    fn visit_kids(&mut self, e: &ExprRef) -> ExprRef {
        match e.kind() {
            ExprKind::Constant(_) => e.clone(),
            ExprKind::NotOptimized(inner) => {
                let i = self.visit(inner);
                if i.ptr_eq(inner) {
                    e.clone()
                } else {
                    builders::not_optimized(i)
                }
            }
            ExprKind::Not(inner) => {
                let i = self.visit(inner);
                if i.ptr_eq(inner) {
                    e.clone()
                } else {
                    builders::not(i)
                }
            }
            ExprKind::Read { updates, index } => {
                let idx = self.visit(index);
                let head = updates
                    .head
                    .as_ref()
                    .map(|un| self.visit_update_node(un));
                let unchanged = idx.ptr_eq(index)
                    && match (&head, &updates.head) {
                        (None, None) => true,
                        (Some(a), Some(b)) => std::rc::Rc::ptr_eq(a, b),
                        _ => false,
                    };
                if unchanged {
                    e.clone()
                } else {
                    builders::read(UpdateList::new(updates.root.clone(), head), idx)
                }
            }
            ExprKind::Select { cond, t, f } => {
                let (c2, t2, f2) = (self.visit(cond), self.visit(t), self.visit(f));
                if c2.ptr_eq(cond) && t2.ptr_eq(t) && f2.ptr_eq(f) {
                    e.clone()
                } else {
                    builders::select(c2, t2, f2)
                }
            }
            ExprKind::Concat { left, right } => {
                let (l, r) = (self.visit(left), self.visit(right));
                if l.ptr_eq(left) && r.ptr_eq(right) {
                    e.clone()
                } else {
                    builders::concat(l, r)
                }
            }
            ExprKind::Extract {
                expr,
                offset,
                width,
            } => {
                let i = self.visit(expr);
                if i.ptr_eq(expr) {
                    e.clone()
                } else {
                    builders::extract(i, *offset, *width)
                }
            }
            ExprKind::ZExt { expr, width } => {
                let i = self.visit(expr);
                if i.ptr_eq(expr) {
                    e.clone()
                } else {
                    builders::zext(i, *width)
                }
            }
            ExprKind::SExt { expr, width } => {
                let i = self.visit(expr);
                if i.ptr_eq(expr) {
                    e.clone()
                } else {
                    builders::sext(i, *width)
                }
            }
            ExprKind::Binary { op, left, right } => {
                let (l, r) = (self.visit(left), self.visit(right));
                if l.ptr_eq(left) && r.ptr_eq(right) {
                    e.clone()
                } else {
                    builders::binary_op(*op, l, r)
                }
            }
            ExprKind::Compare { op, left, right } => {
                let (l, r) = (self.visit(left), self.visit(right));
                if l.ptr_eq(left) && r.ptr_eq(right) {
                    e.clone()
                } else {
                    builders::compare_op(*op, l, r)
                }
            }
        }
    }

    /// Rewrite an update chain, sharing unchanged suffixes and uniquing
    /// changed ones through the dedup map.
    pub fn visit_update_node(&mut self, un: &UpdateNodeRef) -> UpdateNodeRef {
        let key = std::rc::Rc::as_ptr(un) as usize;
        if let Some(cached) = self.visited_un.get(&key) {
            return cached.clone();
        }
        let next = un.next.as_ref().map(|n| self.visit_update_node(n));
        let index = self.visit(&un.index);
        let value = self.visit(&un.value);
        let unchanged = index.ptr_eq(&un.index)
            && value.ptr_eq(&un.value)
            && match (&next, &un.next) {
                (None, None) => true,
                (Some(a), Some(b)) => std::rc::Rc::ptr_eq(a, b),
                _ => false,
            };
        let result = if unchanged {
            un.clone()
        } else {
            self.dedup.unique(UpdateNode::new(next, index, value))
        };
        self.visited_un.insert(key, result.clone());
        result
    }
}

/// Replaces every occurrence of one expression with another.
pub struct ReplaceOne {
    pub src: ExprRef,
    pub dst: ExprRef,
}

impl Rewriter for ReplaceOne {
    fn visit_pre(&mut self, e: &ExprRef) -> Action {
        if *e == self.src {
            Action::ChangeTo(self.dst.clone())
        } else {
            Action::DoChildren
        }
    }

    fn visit_post(&mut self, e: &ExprRef) -> Action {
        if *e == self.src {
            Action::ChangeTo(self.dst.clone())
        } else {
            Action::DoChildren
        }
    }
}

/// Replaces each key of an equalities map with its value.
pub struct ReplaceMap<'a> {
    pub replacements: &'a FxHashMap<ExprRef, ExprRef>,
}

impl Rewriter for ReplaceMap<'_> {
    fn visit_post(&mut self, e: &ExprRef) -> Action {
        match self.replacements.get(e) {
            Some(dst) => Action::ChangeTo(dst.clone()),
            None => Action::DoChildren,
        }
    }
}

/// Convenience entry point: run one rewriter over one expression.
pub fn rewrite<R: Rewriter>(rewriter: &mut R, dedup: &mut UpdateDedup, e: &ExprRef) -> ExprRef {
    Traversal::new(rewriter, dedup).visit(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayCache;
    use crate::builders::{add, constant, eq, read, ult};
    use crate::value::WIDTH_32;

    fn setup() -> (ExprRef, ExprRef) {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let b = cache.make_symbolic("b", 4);
        let ra = read(UpdateList::fresh(a), constant(0, WIDTH_32));
        let rb = read(UpdateList::fresh(b), constant(0, WIDTH_32));
        (ra, rb)
    }

    #[test]
    fn replace_one_rewrites_and_folds() {
        let (ra, rb) = setup();
        let e = eq(constant(3, 8), add(ra.clone(), rb.clone()));
        let mut r = ReplaceOne {
            src: ra,
            dst: constant(1, 8),
        };
        let mut dedup = UpdateDedup::new();
        let out = rewrite(&mut r, &mut dedup, &e);
        // 3 == 1 + rb folds down to 2 == rb.
        assert_eq!(out, eq(constant(2, 8), rb));
    }

    #[test]
    fn replace_map_substitutes_all_keys() {
        let (ra, rb) = setup();
        let e = ult(add(ra.clone(), rb.clone()), constant(9, 8));
        let mut map = FxHashMap::default();
        map.insert(ra, constant(1, 8));
        map.insert(rb, constant(2, 8));
        let mut r = ReplaceMap { replacements: &map };
        let mut dedup = UpdateDedup::new();
        let out = rewrite(&mut r, &mut dedup, &e);
        assert!(out.is_true());
    }

    #[test]
    fn unchanged_subtrees_keep_their_identity() {
        let (ra, rb) = setup();
        let e = add(ra, rb);
        let mut r = ReplaceOne {
            src: constant(0xbe, 8), // appears nowhere in e
            dst: constant(0xef, 8),
        };
        let mut dedup = UpdateDedup::new();
        let out = rewrite(&mut r, &mut dedup, &e);
        assert!(out.ptr_eq(&e));
    }

    #[test]
    fn rewritten_update_suffixes_are_shared() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let idx1 = read(UpdateList::fresh(cache.make_symbolic("i", 4)), constant(0, WIDTH_32));
        let idx2 = read(UpdateList::fresh(cache.make_symbolic("j", 4)), constant(0, WIDTH_32));
        let (ra, _) = setup();
        let mut ul = UpdateList::new(a, None);
        ul.extend(constant(1, WIDTH_32), ra.clone());
        // Two distinct reads with symbolic indices keep the same write chain.
        let e1 = read(ul.clone(), crate::builders::zext(idx1, WIDTH_32));
        let e2 = read(ul, crate::builders::zext(idx2, WIDTH_32));
        let mut dedup = UpdateDedup::new();
        let mut r = ReplaceOne {
            src: ra,
            dst: constant(2, 8),
        };
        let out1 = rewrite(&mut r, &mut dedup, &e1);
        let out2 = rewrite(&mut r, &mut dedup, &e2);
        let head_of = |e: &ExprRef| match e.kind() {
            ExprKind::Read { updates, .. } => updates.head.clone().unwrap(),
            other => panic!("expected Read, got {other:?}"),
        };
        assert!(std::rc::Rc::ptr_eq(&head_of(&out1), &head_of(&out2)));
    }
}
