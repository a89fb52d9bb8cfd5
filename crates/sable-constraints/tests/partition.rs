//! Property tests for the factor partition: after any sequence of adds,
//! factors are pairwise disjoint and cover every constraint exactly once.

use proptest::prelude::*;
use sable_expr::builders::{self, constant, eq, read, ult};
use sable_expr::{ArrayCache, Assignment, ExprRef, UpdateList, WIDTH_32};
use sable_constraints::{ConstraintManager, ManagerConfig};

/// An equality whose substitution falsifies an existing constraint is
/// rejected like a directly-false constraint, leaving the set untouched.
#[test]
fn falsifying_rewrite_is_infeasible_and_leaves_the_set_unchanged() {
    let mut cache = ArrayCache::new();
    let a = cache.make_symbolic("a", 4);
    let a0 = read(UpdateList::fresh(a), constant(0, WIDTH_32));
    let mut m = ConstraintManager::new(ManagerConfig::default());
    let bound = ult(a0.clone(), constant(3, 8));
    assert!(m.add_constraint(bound.clone()));

    // a[0] == 5 rewrites the bound into 5 < 3, constant false.
    assert!(!m.add_constraint(eq(constant(5, 8), a0.clone())));
    assert_eq!(m.len(), 1);
    assert!(m.iter().any(|e| *e == bound));
    assert_eq!(m.factor_count(), 1);
    let factor = m.factors().next().unwrap();
    assert_eq!(factor.exprs.len(), 1);

    // A consistent equality still goes through afterwards; the bound
    // rewrites to constant true and drops out as implied.
    let pinned = eq(constant(2, 8), a0);
    assert!(m.add_constraint(pinned.clone()));
    assert_eq!(m.len(), 1);
    assert!(m.iter().any(|e| *e == pinned));
}

/// Substitution soundness: under any assignment consistent with the
/// equalities map, an expression and its simplified form evaluate alike.
#[test]
fn substitution_preserves_meaning_under_consistent_assignments() {
    let mut cache = ArrayCache::new();
    let a = cache.make_symbolic("a", 4);
    let a0 = read(UpdateList::fresh(a.clone()), constant(0, WIDTH_32));
    let a1 = read(UpdateList::fresh(a.clone()), constant(1, WIDTH_32));
    let mut m = ConstraintManager::new(ManagerConfig::default());
    assert!(m.add_constraint(eq(constant(7, 8), a0.clone())));

    let e = ult(builders::add(a0, a1), constant(9, 8));
    let s = m.simplify(&e);
    assert_ne!(e, s);
    for free in 0..=255u8 {
        // a[0] is pinned by the recorded equality; a[1] ranges freely.
        let assign = Assignment::new(&[a.clone()], &[vec![7, free, 0, 0]], false);
        assert_eq!(assign.evaluate(&e), assign.evaluate(&s));
    }
}

#[derive(Debug, Clone)]
enum Step {
    /// array[index] == value
    EqConst { array: u8, index: u8, value: u8 },
    /// array[i] < array[j]
    Less { array: u8, i: u8, j: u8 },
    /// array[i] + array[j] == value
    SumConst { array: u8, i: u8, j: u8, value: u8 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..3, 0u8..4, 0u8..=255).prop_map(|(array, index, value)| Step::EqConst {
            array,
            index,
            value
        }),
        (0u8..3, 0u8..4, 0u8..4).prop_map(|(array, i, j)| Step::Less { array, i, j }),
        (0u8..3, 0u8..4, 0u8..4, 0u8..=255).prop_map(|(array, i, j, value)| Step::SumConst {
            array,
            i,
            j,
            value
        }),
    ]
}

fn byte(cache: &mut ArrayCache, array: u8, index: u8) -> ExprRef {
    let name = ["a", "b", "c"][array as usize];
    let a = cache.make_symbolic(name, 4);
    read(UpdateList::fresh(a), constant(u64::from(index), WIDTH_32))
}

fn build(steps: &[Step]) -> ConstraintManager {
    let mut cache = ArrayCache::new();
    let mut m = ConstraintManager::new(ManagerConfig::default());
    for s in steps {
        let c = match *s {
            Step::EqConst {
                array,
                index,
                value,
            } => eq(
                constant(u64::from(value), 8),
                byte(&mut cache, array, index),
            ),
            Step::Less { array, i, j } => {
                ult(byte(&mut cache, array, i), byte(&mut cache, array, j))
            }
            Step::SumConst { array, i, j, value } => eq(
                constant(u64::from(value), 8),
                builders::add(byte(&mut cache, array, i), byte(&mut cache, array, j)),
            ),
        };
        // Infeasible sequences simply stop growing the set; the partition
        // invariants must hold either way.
        let _ = m.add_constraint(c);
    }
    m
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn factors_stay_disjoint_and_complete(steps in proptest::collection::vec(step(), 1..24)) {
        let m = build(&steps);

        // Completeness: every constraint appears in exactly one factor.
        let mut from_factors: Vec<ExprRef> = Vec::new();
        for f in m.factors() {
            from_factors.extend(f.exprs.iter().cloned());
        }
        prop_assert_eq!(from_factors.len(), m.len());
        for c in m.iter() {
            let hits = from_factors.iter().filter(|e| *e == c).count();
            prop_assert_eq!(hits, 1, "constraint not in exactly one factor");
        }

        // Disjointness: no two factors share an array byte.
        let factors: Vec<_> = m.factors().collect();
        for i in 0..factors.len() {
            for j in i + 1..factors.len() {
                prop_assert!(!factors[i].intersects(factors[j]));
            }
        }
    }

    #[test]
    fn adding_twice_equals_adding_once(steps in proptest::collection::vec(step(), 1..12)) {
        let once = build(&steps);
        let doubled: Vec<Step> = steps.iter().flat_map(|s| [s.clone(), s.clone()]).collect();
        let twice = build(&doubled);
        prop_assert_eq!(once.len(), twice.len());
        prop_assert_eq!(once.factor_count(), twice.factor_count());
        for (a, b) in once.iter().zip(twice.iter()) {
            prop_assert_eq!(a, b);
        }
    }
}
