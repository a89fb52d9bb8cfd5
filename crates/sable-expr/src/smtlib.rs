//! SMT-LIB2 printer for queries, targeting `QF_ABV`.
//!
//! Booleans are width-1 bit-vectors throughout, so every expression prints
//! in a bit-vector sort and assertions compare against `#b1`. This keeps
//! the grammar uniform for external solver tooling; the core never emits
//! backend-specific text anywhere else.

use std::fmt::Write;

use crate::expr::{BinOp, CmpOp, ExprKind, ExprRef};
use crate::pretty::collect_arrays;
use crate::updates::UpdateList;

/// Render `constraints ∧ ¬expr` as an SMT-LIB2 satisfiability problem.
///
/// A satisfying model is a counterexample to the query; `unsat` means the
/// query expression is valid under the constraints.
pub fn query_to_smtlib(constraints: &[ExprRef], expr: &ExprRef) -> String {
    let mut out = String::new();
    out.push_str("(set-logic QF_ABV)\n");
    for array in collect_arrays(constraints.iter().chain(std::iter::once(expr))) {
        let _ = writeln!(
            out,
            "(declare-fun {} () (Array (_ BitVec {}) (_ BitVec {})))",
            array.name, array.domain, array.range
        );
        for (i, v) in array.constant_values.iter().enumerate() {
            let _ = writeln!(
                out,
                "(assert (= (select {} (_ bv{} {})) (_ bv{} {})))",
                array.name,
                i,
                array.domain,
                v.bits(),
                array.range
            );
        }
    }
    for c in constraints {
        let _ = writeln!(out, "(assert (= {} #b1))", expr_to_smt(c));
    }
    if !expr.is_false() {
        let _ = writeln!(out, "(assert (= {} #b0))", expr_to_smt(expr));
    }
    out.push_str("(check-sat)\n");
    out
}

fn expr_to_smt(e: &ExprRef) -> String {
    match e.kind() {
        ExprKind::Constant(v) => format!("(_ bv{} {})", v.bits(), v.width()),
        ExprKind::NotOptimized(inner) => expr_to_smt(inner),
        ExprKind::Read { updates, index } => {
            format!("(select {} {})", updates_to_smt(updates), expr_to_smt(index))
        }
        ExprKind::Select { cond, t, f } => format!(
            "(ite (= {} #b1) {} {})",
            expr_to_smt(cond),
            expr_to_smt(t),
            expr_to_smt(f)
        ),
        ExprKind::Concat { left, right } => {
            format!("(concat {} {})", expr_to_smt(left), expr_to_smt(right))
        }
        ExprKind::Extract {
            expr,
            offset,
            width,
        } => format!(
            "((_ extract {} {}) {})",
            offset + width - 1,
            offset,
            expr_to_smt(expr)
        ),
        ExprKind::ZExt { expr, width } => format!(
            "((_ zero_extend {}) {})",
            width - expr.width(),
            expr_to_smt(expr)
        ),
        ExprKind::SExt { expr, width } => format!(
            "((_ sign_extend {}) {})",
            width - expr.width(),
            expr_to_smt(expr)
        ),
        ExprKind::Not(inner) => format!("(bvnot {})", expr_to_smt(inner)),
        ExprKind::Binary { op, left, right } => format!(
            "({} {} {})",
            binop_smt(*op),
            expr_to_smt(left),
            expr_to_smt(right)
        ),
        ExprKind::Compare { op, left, right } => match op {
            CmpOp::Eq => format!(
                "(ite (= {} {}) #b1 #b0)",
                expr_to_smt(left),
                expr_to_smt(right)
            ),
            _ => format!(
                "(ite ({} {} {}) #b1 #b0)",
                cmpop_smt(*op),
                expr_to_smt(left),
                expr_to_smt(right)
            ),
        },
    }
}

fn updates_to_smt(ul: &UpdateList) -> String {
    // Stores apply oldest-first so the head write wins on overlap.
    let mut nodes = Vec::new();
    let mut node = ul.head.clone();
    while let Some(n) = node {
        nodes.push(n.clone());
        node = n.next.clone();
    }
    let mut acc = ul.root.name.clone();
    for n in nodes.iter().rev() {
        acc = format!(
            "(store {} {} {})",
            acc,
            expr_to_smt(&n.index),
            expr_to_smt(&n.value)
        );
    }
    acc
}

fn binop_smt(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "bvadd",
        BinOp::Sub => "bvsub",
        BinOp::Mul => "bvmul",
        BinOp::UDiv => "bvudiv",
        BinOp::SDiv => "bvsdiv",
        BinOp::URem => "bvurem",
        BinOp::SRem => "bvsrem",
        BinOp::And => "bvand",
        BinOp::Or => "bvor",
        BinOp::Xor => "bvxor",
        BinOp::Shl => "bvshl",
        BinOp::LShr => "bvlshr",
        BinOp::AShr => "bvashr",
    }
}

fn cmpop_smt(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::Ult => "bvult",
        CmpOp::Ule => "bvule",
        CmpOp::Slt => "bvslt",
        CmpOp::Sle => "bvsle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayCache;
    use crate::builders::{constant, eq, false_expr, read};
    use crate::value::WIDTH_32;

    #[test]
    fn renders_a_model_query() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let c = eq(
            constant(42, 8),
            read(UpdateList::fresh(a), constant(0, WIDTH_32)),
        );
        let text = query_to_smtlib(&[c], &false_expr());
        assert!(text.contains("(set-logic QF_ABV)"));
        assert!(text.contains("(declare-fun a () (Array (_ BitVec 32) (_ BitVec 8)))"));
        assert!(text.contains("(assert (= (ite (= (_ bv42 8) (select a (_ bv0 32))) #b1 #b0) #b1))"));
        assert!(text.trim_end().ends_with("(check-sat)"));
    }

    #[test]
    fn stores_apply_oldest_first() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let i = cache.make_symbolic("i", 1);
        let j = cache.make_symbolic("j", 1);
        let idx = crate::builders::zext(
            read(UpdateList::fresh(i), constant(0, WIDTH_32)),
            WIDTH_32,
        );
        let rdx = crate::builders::zext(
            read(UpdateList::fresh(j), constant(0, WIDTH_32)),
            WIDTH_32,
        );
        let mut ul = UpdateList::fresh(a);
        ul.extend(idx.clone(), constant(1, 8));
        ul.extend(idx, constant(2, 8));
        let e = read(ul, rdx);
        let text = expr_to_smt(&e);
        // The newer write (value 2) must be the outermost store.
        let pos_outer = text.find("(_ bv2 8)").unwrap();
        let pos_inner = text.find("(_ bv1 8)").unwrap();
        assert!(pos_outer > pos_inner);
    }
}
