//! Property tests for the canonical form of constructed expressions.
//!
//! Random expression shapes are pushed through the public constructors and
//! the resulting DAGs are checked for the canonicalization invariants:
//! constructor stability under rebuilding, hash/equality compatibility, and
//! the boolean shape rules.

use std::cell::RefCell;

use proptest::prelude::*;
use rustc_hash::FxHashSet;
use sable_expr::{builders, ArrayCache, ArrayRef, BinOp, CmpOp, ExprKind, ExprRef, UpdateList};

thread_local! {
    static CACHE: RefCell<ArrayCache> = RefCell::new(ArrayCache::new());
}

fn array(name: &str) -> ArrayRef {
    CACHE.with(|c| c.borrow_mut().make_symbolic(name, 4))
}

fn byte_read(name: &'static str, index: u64) -> ExprRef {
    builders::read(UpdateList::fresh(array(name)), builders::constant(index, 32))
}

fn byte_expr() -> impl Strategy<Value = ExprRef> {
    let leaf = prop_oneof![
        (0u64..=255).prop_map(|v| builders::constant(v, 8)),
        (0u64..4).prop_map(|i| byte_read("a", i)),
        (0u64..4).prop_map(|i| byte_read("b", i)),
    ];
    leaf.prop_recursive(4, 48, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::add(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::sub(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::mul(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::and(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::or(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::xor(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::shl(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::lshr(l, r)),
            inner.clone().prop_map(builders::not),
            (inner.clone(), inner.clone(), inner.clone(), inner.clone()).prop_map(
                |(c1, c2, t, f)| builders::select(builders::ult(c1, c2), t, f)
            ),
            ((inner.clone(), inner.clone()), 0u32..9).prop_map(|((l, r), o)| {
                builders::extract(builders::concat(l, r), o.min(8), 8)
            }),
            inner
                .clone()
                .prop_map(|e| builders::extract(builders::zext(e, 32), 0, 8)),
            inner
                .clone()
                .prop_map(|e| builders::extract(builders::sext(e, 16), 8, 8)),
        ]
    })
}

fn bool_expr() -> impl Strategy<Value = ExprRef> {
    let leaf = (byte_expr(), byte_expr(), 0u8..10).prop_map(|(l, r, op)| match op {
        0 => builders::eq(l, r),
        1 => builders::ne(l, r),
        2 => builders::ult(l, r),
        3 => builders::ule(l, r),
        4 => builders::ugt(l, r),
        5 => builders::uge(l, r),
        6 => builders::slt(l, r),
        7 => builders::sle(l, r),
        8 => builders::sgt(l, r),
        _ => builders::sge(l, r),
    });
    leaf.prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::and(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::or(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| builders::xor(l, r)),
            inner.clone().prop_map(builders::not),
        ]
    })
}

/// Walk the DAG once, yielding every node including update-list contents.
fn walk(e: &ExprRef, mut f: impl FnMut(&ExprRef)) {
    let mut seen = FxHashSet::default();
    let mut stack = vec![e.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(&*node as *const _ as usize) {
            continue;
        }
        f(&node);
        if let ExprKind::Read { updates, .. } = node.kind() {
            let mut un = updates.head.clone();
            while let Some(n) = un {
                stack.push(n.index.clone());
                stack.push(n.value.clone());
                un = n.next.clone();
            }
        }
        stack.extend(node.kids());
    }
}

/// Re-run the matching constructor on a node's own kids.
fn rebuild(e: &ExprRef) -> ExprRef {
    match e.kind() {
        ExprKind::Constant(v) => builders::constant_value(v.clone()),
        ExprKind::NotOptimized(inner) => builders::not_optimized(inner.clone()),
        ExprKind::Read { updates, index } => builders::read(updates.clone(), index.clone()),
        ExprKind::Select { cond, t, f } => builders::select(cond.clone(), t.clone(), f.clone()),
        ExprKind::Concat { left, right } => builders::concat(left.clone(), right.clone()),
        ExprKind::Extract {
            expr,
            offset,
            width,
        } => builders::extract(expr.clone(), *offset, *width),
        ExprKind::ZExt { expr, width } => builders::zext(expr.clone(), *width),
        ExprKind::SExt { expr, width } => builders::sext(expr.clone(), *width),
        ExprKind::Not(inner) => builders::not(inner.clone()),
        ExprKind::Binary { op, left, right } => {
            builders::binary_op(*op, left.clone(), right.clone())
        }
        ExprKind::Compare { op, left, right } => {
            builders::compare_op(*op, left.clone(), right.clone())
        }
    }
}

fn assert_canonical(root: &ExprRef) {
    walk(root, |node| {
        // Constructor stability: rebuilding from the same kids returns the
        // identical interned node.
        let again = rebuild(node);
        assert!(
            again.ptr_eq(node),
            "rebuild changed node: {} -> {}",
            sable_expr::pretty::pretty_print_expr(node),
            sable_expr::pretty::pretty_print_expr(&again),
        );
        assert_eq!(again.hash(), node.hash());

        // No node has all-constant kids, barring the opacity barrier and
        // reads at constant indices.
        let kids = node.kids();
        if !kids.is_empty()
            && !matches!(
                node.kind(),
                ExprKind::Read { .. } | ExprKind::NotOptimized(_)
            )
        {
            assert!(
                kids.iter().any(|k| !k.is_constant()),
                "all-constant kids survived folding"
            );
        }

        match node.kind() {
            // Booleans only combine through the boolean combinators.
            ExprKind::Binary { op, left, .. } if left.is_bool() => {
                assert!(
                    matches!(op, BinOp::And | BinOp::Or | BinOp::Xor),
                    "boolean operand under {op:?}"
                );
            }
            // Ordered comparisons never see boolean operands.
            ExprKind::Compare { op, left, .. } if *op != CmpOp::Eq => {
                assert!(!left.is_bool(), "boolean operand under {op:?}");
            }
            // Commutative constant-on-the-left rule.
            ExprKind::Binary {
                op: BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor,
                right,
                ..
            } => {
                assert!(!right.is_constant(), "constant kid on the right");
            }
            ExprKind::Compare { op: CmpOp::Eq, right, .. } => {
                assert!(!right.is_constant(), "constant kid on the right of Eq");
            }
            // Concat chains unbalance right.
            ExprKind::Concat { left, .. } => {
                assert!(
                    !matches!(left.kind(), ExprKind::Concat { .. }),
                    "left-leaning concat chain"
                );
            }
            _ => {}
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn byte_expressions_are_canonical(e in byte_expr()) {
        assert_canonical(&e);
    }

    #[test]
    fn boolean_expressions_are_canonical(e in bool_expr()) {
        assert_canonical(&e);
    }

    #[test]
    fn equal_construction_is_pointer_equal(e in byte_expr()) {
        let rebuilt = rebuild(&e);
        prop_assert!(rebuilt.ptr_eq(&e));
        prop_assert_eq!(rebuilt.hash(), e.hash());
    }

    #[test]
    fn double_negation_is_identity(e in bool_expr()) {
        prop_assert_eq!(builders::not(builders::not(e.clone())), e);
    }
}
