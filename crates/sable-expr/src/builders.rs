//! Expression constructors.
//!
//! Every public constructor simplifies eagerly and returns a canonical,
//! interned node. The canonical form keeps pattern matching small
//! downstream: no node has all-constant kids, commutative operations keep
//! their constant on the left, `Ne`/`Ugt`/`Uge`/`Sgt`/`Sge` never appear,
//! boolean operands only occur under the boolean combinators, and concat
//! chains are unbalanced to the right.

use crate::expr::{intern, BinOp, CmpOp, ExprKind, ExprRef};
use crate::updates::UpdateList;
use crate::value::{BitVecValue, Width, WIDTH_BOOL};

pub fn constant_value(v: BitVecValue) -> ExprRef {
    intern(ExprKind::Constant(v))
}

pub fn constant(v: u64, width: Width) -> ExprRef {
    constant_value(BitVecValue::from_u64(v, width))
}

pub fn bool_const(b: bool) -> ExprRef {
    constant_value(BitVecValue::from_bool(b))
}

pub fn true_expr() -> ExprRef {
    bool_const(true)
}

pub fn false_expr() -> ExprRef {
    bool_const(false)
}

/// `e == 0`, the standard query negation. For booleans this is `Not(e)`.
pub fn is_zero(e: ExprRef) -> ExprRef {
    let w = e.width();
    eq(constant(0, w), e)
}

pub fn implies(hyp: ExprRef, conc: ExprRef) -> ExprRef {
    debug_assert!(hyp.is_bool() && conc.is_bool());
    or(not(hyp), conc)
}

/// Opacity barrier: no simplification looks through it.
pub fn not_optimized(e: ExprRef) -> ExprRef {
    intern(ExprKind::NotOptimized(e))
}

/// One-byte read through a write history.
///
/// A constant read index skips past non-matching constant writes and folds
/// a matching write to its stored value; a symbolic write in its way turns
/// into a select over the rest of the history. A symbolic read index keeps
/// the update list intact.
pub fn read(updates: UpdateList, index: ExprRef) -> ExprRef {
    debug_assert_eq!(index.width(), updates.root.domain);
    let Some(ri) = index.as_constant().cloned() else {
        return intern(ExprKind::Read { updates, index });
    };
    let mut node = updates.head.clone();
    while let Some(n) = node {
        match n.index.as_constant() {
            Some(wi) => {
                if wi.eq_value(&ri) {
                    return n.value.clone();
                }
                node = n.next.clone();
            }
            None => {
                let prefix = UpdateList::new(updates.root.clone(), n.next.clone());
                let cond = eq(n.index.clone(), index.clone());
                let fallthrough = read(prefix, index);
                return select(cond, n.value.clone(), fallthrough);
            }
        }
    }
    if updates.root.is_constant() {
        let i = ri.as_u64() as usize;
        if i < updates.root.constant_values.len() {
            return constant_value(updates.root.constant_values[i].clone());
        }
    }
    intern(ExprKind::Read {
        updates: UpdateList::fresh(updates.root),
        index,
    })
}

/// Little-endian multi-byte read at a constant byte offset.
pub fn read_bytes_le(updates: &UpdateList, offset: u32, width: Width) -> ExprRef {
    debug_assert_eq!(width % updates.root.range, 0);
    let bytes = width / updates.root.range;
    let mut result = read(updates.clone(), constant(u64::from(offset), updates.root.domain));
    for i in 1..bytes {
        let byte = read(
            updates.clone(),
            constant(u64::from(offset + i), updates.root.domain),
        );
        result = concat(byte, result);
    }
    result
}

pub fn select(cond: ExprRef, t: ExprRef, f: ExprRef) -> ExprRef {
    debug_assert_eq!(cond.width(), WIDTH_BOOL);
    debug_assert_eq!(t.width(), f.width());
    if let Some(c) = cond.as_constant() {
        return if c.is_true() { t } else { f };
    }
    if t == f {
        return t;
    }
    if t.is_bool() {
        match (t.as_constant(), f.as_constant()) {
            (Some(tv), Some(fv)) => {
                // tv != fv here, so the select is the condition or its negation.
                return if tv.is_true() && fv.is_false() {
                    cond
                } else {
                    not(cond)
                };
            }
            (Some(tv), None) => {
                return if tv.is_true() {
                    or(cond, f)
                } else {
                    and(not(cond), f)
                };
            }
            (None, Some(fv)) => {
                return if fv.is_true() {
                    or(not(cond), t)
                } else {
                    and(cond, t)
                };
            }
            (None, None) => {}
        }
    }
    intern(ExprKind::Select { cond, t, f })
}

pub fn concat(left: ExprRef, right: ExprRef) -> ExprRef {
    if let (Some(l), Some(r)) = (left.as_constant(), right.as_constant()) {
        return constant_value(l.concat(r));
    }
    // Merge a sliced pair back together: hi bits and lo bits of one source.
    if let (
        ExprKind::Extract {
            expr: le,
            offset: lo,
            width: lw,
        },
        ExprKind::Extract {
            expr: re,
            offset: ro,
            width: rw,
        },
    ) = (left.kind(), right.kind())
    {
        if le.ptr_eq(re) && *lo == ro + rw {
            return extract(le.clone(), *ro, lw + rw);
        }
    }
    // Chains unbalance to the right.
    if let ExprKind::Concat {
        left: ll,
        right: lr,
    } = left.kind()
    {
        return concat(ll.clone(), concat(lr.clone(), right));
    }
    // Fold adjacent constants exposed by rebalancing.
    if left.is_constant() {
        if let ExprKind::Concat {
            left: rl,
            right: rr,
        } = right.kind()
        {
            if let (Some(l), Some(rl)) = (left.as_constant(), rl.as_constant()) {
                return concat(constant_value(l.concat(rl)), rr.clone());
            }
        }
    }
    intern(ExprKind::Concat { left, right })
}

pub fn extract(expr: ExprRef, offset: u32, width: Width) -> ExprRef {
    let kw = expr.width();
    assert!(width > 0 && offset + width <= kw, "extract out of range");
    if offset == 0 && width == kw {
        return expr;
    }
    if let Some(v) = expr.as_constant() {
        return constant_value(v.extract(offset, width));
    }
    match expr.kind() {
        ExprKind::Extract {
            expr: inner,
            offset: o2,
            ..
        } => {
            return extract(inner.clone(), o2 + offset, width);
        }
        ExprKind::Concat { left, right } => {
            let rw = right.width();
            if offset >= rw {
                return extract(left.clone(), offset - rw, width);
            }
            if offset + width <= rw {
                return extract(right.clone(), offset, width);
            }
            // The slice spans both sides.
            let lo = extract(right.clone(), offset, rw - offset);
            let hi = extract(left.clone(), 0, offset + width - rw);
            return concat(hi, lo);
        }
        ExprKind::ZExt { expr: inner, .. } => {
            let sw = inner.width();
            if offset + width <= sw {
                return extract(inner.clone(), offset, width);
            }
            if offset >= sw {
                return constant(0, width);
            }
        }
        ExprKind::SExt { expr: inner, .. } => {
            let sw = inner.width();
            if offset + width <= sw {
                return extract(inner.clone(), offset, width);
            }
        }
        _ => {}
    }
    intern(ExprKind::Extract {
        expr,
        offset,
        width,
    })
}

pub fn zext(expr: ExprRef, width: Width) -> ExprRef {
    let w = expr.width();
    if width == w {
        return expr;
    }
    if width < w {
        return extract(expr, 0, width);
    }
    if let Some(v) = expr.as_constant() {
        return constant_value(v.zext(width));
    }
    if let ExprKind::ZExt { expr: inner, .. } = expr.kind() {
        return zext(inner.clone(), width);
    }
    intern(ExprKind::ZExt { expr, width })
}

pub fn sext(expr: ExprRef, width: Width) -> ExprRef {
    let w = expr.width();
    if width == w {
        return expr;
    }
    if width < w {
        return extract(expr, 0, width);
    }
    if let Some(v) = expr.as_constant() {
        return constant_value(v.sext(width));
    }
    if let ExprKind::SExt { expr: inner, .. } = expr.kind() {
        return sext(inner.clone(), width);
    }
    intern(ExprKind::SExt { expr, width })
}

pub fn not(e: ExprRef) -> ExprRef {
    if let Some(v) = e.as_constant() {
        return constant_value(v.not());
    }
    if let ExprKind::Not(inner) = e.kind() {
        return inner.clone();
    }
    intern(ExprKind::Not(e))
}

// Binary arithmetic and bitwise operations.

fn binary(op: BinOp, left: ExprRef, right: ExprRef) -> ExprRef {
    debug_assert_eq!(left.width(), right.width());
    intern(ExprKind::Binary { op, left, right })
}

/// Swap so a lone constant operand of a commutative op sits on the left.
fn const_left(l: ExprRef, r: ExprRef) -> (ExprRef, ExprRef) {
    if r.is_constant() && !l.is_constant() {
        (r, l)
    } else {
        (l, r)
    }
}

pub fn add(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if l.is_bool() {
        // Width-1 addition is exclusive or; booleans never sit under Add.
        return xor(l, r);
    }
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return constant_value(a.add(b));
    }
    let (l, r) = const_left(l, r);
    if let Some(c) = l.as_constant() {
        if c.is_zero() {
            return r;
        }
        // c + (c2 + x) and c + (c2 - x) fold their constants together.
        match r.kind() {
            ExprKind::Binary {
                op: BinOp::Add,
                left: rl,
                right: rr,
            } => {
                if let Some(c2) = rl.as_constant() {
                    return add(constant_value(c.add(c2)), rr.clone());
                }
            }
            ExprKind::Binary {
                op: BinOp::Sub,
                left: rl,
                right: rr,
            } => {
                if let Some(c2) = rl.as_constant() {
                    return sub(constant_value(c.add(c2)), rr.clone());
                }
            }
            _ => {}
        }
    }
    binary(BinOp::Add, l, r)
}

pub fn sub(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if l.is_bool() {
        return xor(l, r);
    }
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return constant_value(a.sub(b));
    }
    if l == r {
        return constant(0, l.width());
    }
    // Subtraction by a constant is addition of its negation.
    if let Some(c) = r.as_constant() {
        return add(constant_value(c.neg()), l);
    }
    if let Some(c) = l.as_constant() {
        match r.kind() {
            ExprKind::Binary {
                op: BinOp::Add,
                left: rl,
                right: rr,
            } => {
                if let Some(c2) = rl.as_constant() {
                    return sub(constant_value(c.sub(c2)), rr.clone());
                }
            }
            ExprKind::Binary {
                op: BinOp::Sub,
                left: rl,
                right: rr,
            } => {
                if let Some(c2) = rl.as_constant() {
                    return add(constant_value(c.sub(c2)), rr.clone());
                }
            }
            _ => {}
        }
    }
    binary(BinOp::Sub, l, r)
}

pub fn mul(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if l.is_bool() {
        return and(l, r);
    }
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return constant_value(a.mul(b));
    }
    let (l, r) = const_left(l, r);
    if let Some(c) = l.as_constant() {
        if c.is_zero() {
            return l;
        }
        if c.is_one() {
            return r;
        }
    }
    binary(BinOp::Mul, l, r)
}

pub fn udiv(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        // A zero divisor stays symbolic; the backend owns that case.
        if !b.is_zero() {
            return constant_value(a.udiv(b));
        }
    }
    if r.as_constant().is_some_and(BitVecValue::is_one) {
        return l;
    }
    binary(BinOp::UDiv, l, r)
}

pub fn sdiv(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        if !b.is_zero() {
            return constant_value(a.sdiv(b));
        }
    }
    if r.as_constant().is_some_and(BitVecValue::is_one) {
        return l;
    }
    binary(BinOp::SDiv, l, r)
}

pub fn urem(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        if !b.is_zero() {
            return constant_value(a.urem(b));
        }
    }
    if r.as_constant().is_some_and(BitVecValue::is_one) {
        return constant(0, l.width());
    }
    binary(BinOp::URem, l, r)
}

pub fn srem(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        if !b.is_zero() {
            return constant_value(a.srem(b));
        }
    }
    if r.as_constant().is_some_and(BitVecValue::is_one) {
        return constant(0, l.width());
    }
    binary(BinOp::SRem, l, r)
}

pub fn and(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return constant_value(a.and(b));
    }
    if l == r {
        return l;
    }
    let (l, r) = const_left(l, r);
    if let Some(c) = l.as_constant() {
        if c.is_zero() {
            return l;
        }
        if c.is_all_ones() {
            return r;
        }
    }
    binary(BinOp::And, l, r)
}

pub fn or(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return constant_value(a.or(b));
    }
    if l == r {
        return l;
    }
    let (l, r) = const_left(l, r);
    if let Some(c) = l.as_constant() {
        if c.is_zero() {
            return r;
        }
        if c.is_all_ones() {
            return l;
        }
    }
    binary(BinOp::Or, l, r)
}

pub fn xor(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return constant_value(a.xor(b));
    }
    if l == r {
        return constant(0, l.width());
    }
    let (l, r) = const_left(l, r);
    if let Some(c) = l.as_constant() {
        if c.is_zero() {
            return r;
        }
        if c.is_true() {
            return not(r);
        }
    }
    binary(BinOp::Xor, l, r)
}

pub fn shl(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let Some(b) = r.as_constant() {
        if b.is_zero() {
            return l;
        }
        if let Some(a) = l.as_constant() {
            return constant_value(a.shl(b.as_u64()));
        }
    }
    binary(BinOp::Shl, l, r)
}

pub fn lshr(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let Some(b) = r.as_constant() {
        if b.is_zero() {
            return l;
        }
        if let Some(a) = l.as_constant() {
            return constant_value(a.lshr(b.as_u64()));
        }
    }
    binary(BinOp::LShr, l, r)
}

pub fn ashr(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let Some(b) = r.as_constant() {
        if b.is_zero() {
            return l;
        }
        if let Some(a) = l.as_constant() {
            return constant_value(a.ashr(b.as_u64()));
        }
    }
    binary(BinOp::AShr, l, r)
}

// Comparisons. All produce width-1 results; the non-canonical forms are
// rewritten on entry.

fn compare(op: CmpOp, left: ExprRef, right: ExprRef) -> ExprRef {
    debug_assert_eq!(left.width(), right.width());
    debug_assert!(
        op == CmpOp::Eq || left.width() != WIDTH_BOOL,
        "boolean operands must be lowered before reaching an ordered comparison"
    );
    intern(ExprKind::Compare { op, left, right })
}

pub fn eq(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return bool_const(a.eq_value(b));
    }
    if l == r {
        return true_expr();
    }
    let (l, r) = const_left(l, r);
    if let Some(c) = l.as_constant() {
        if l.is_bool() {
            // Boolean equality against a literal is the operand or its
            // negation; `Eq(false, x)` is the canonical boolean not.
            return if c.is_true() { r } else { not(r) };
        }
        // Push the constant through additive terms: c == c2 + x and
        // c == c2 - x solve for x.
        match r.kind() {
            ExprKind::Binary {
                op: BinOp::Add,
                left: rl,
                right: rr,
            } => {
                if let Some(c2) = rl.as_constant() {
                    return eq(constant_value(c.sub(c2)), rr.clone());
                }
            }
            ExprKind::Binary {
                op: BinOp::Sub,
                left: rl,
                right: rr,
            } => {
                if let Some(c2) = rl.as_constant() {
                    return eq(constant_value(c2.sub(c)), rr.clone());
                }
            }
            _ => {}
        }
    }
    compare(CmpOp::Eq, l, r)
}

pub fn ne(l: ExprRef, r: ExprRef) -> ExprRef {
    not(eq(l, r))
}

pub fn ult(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return bool_const(a.ult(b));
    }
    if l.is_bool() {
        return and(not(l), r);
    }
    if l == r {
        return false_expr();
    }
    if r.as_constant().is_some_and(BitVecValue::is_zero) {
        return false_expr();
    }
    compare(CmpOp::Ult, l, r)
}

pub fn ule(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return bool_const(a.ule(b));
    }
    if l.is_bool() {
        return or(not(l), r);
    }
    if l == r {
        return true_expr();
    }
    if l.as_constant().is_some_and(BitVecValue::is_zero) {
        return true_expr();
    }
    compare(CmpOp::Ule, l, r)
}

pub fn ugt(l: ExprRef, r: ExprRef) -> ExprRef {
    ult(r, l)
}

pub fn uge(l: ExprRef, r: ExprRef) -> ExprRef {
    ule(r, l)
}

pub fn slt(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return bool_const(a.slt(b));
    }
    if l.is_bool() {
        // Signed booleans: true is -1, so l < r only for (true, false).
        return and(l, not(r));
    }
    if l == r {
        return false_expr();
    }
    compare(CmpOp::Slt, l, r)
}

pub fn sle(l: ExprRef, r: ExprRef) -> ExprRef {
    debug_assert_eq!(l.width(), r.width());
    if let (Some(a), Some(b)) = (l.as_constant(), r.as_constant()) {
        return bool_const(a.sle(b));
    }
    if l.is_bool() {
        return or(l, not(r));
    }
    if l == r {
        return true_expr();
    }
    compare(CmpOp::Sle, l, r)
}

pub fn sgt(l: ExprRef, r: ExprRef) -> ExprRef {
    slt(r, l)
}

pub fn sge(l: ExprRef, r: ExprRef) -> ExprRef {
    sle(r, l)
}

/// Dispatch a binary operation by tag; rewrites re-canonicalize through
/// the same paths as direct construction.
pub fn binary_op(op: BinOp, l: ExprRef, r: ExprRef) -> ExprRef {
    match op {
        BinOp::Add => add(l, r),
        BinOp::Sub => sub(l, r),
        BinOp::Mul => mul(l, r),
        BinOp::UDiv => udiv(l, r),
        BinOp::SDiv => sdiv(l, r),
        BinOp::URem => urem(l, r),
        BinOp::SRem => srem(l, r),
        BinOp::And => and(l, r),
        BinOp::Or => or(l, r),
        BinOp::Xor => xor(l, r),
        BinOp::Shl => shl(l, r),
        BinOp::LShr => lshr(l, r),
        BinOp::AShr => ashr(l, r),
    }
}

/// Dispatch a canonical comparison by tag.
pub fn compare_op(op: CmpOp, l: ExprRef, r: ExprRef) -> ExprRef {
    match op {
        CmpOp::Eq => eq(l, r),
        CmpOp::Ult => ult(l, r),
        CmpOp::Ule => ule(l, r),
        CmpOp::Slt => slt(l, r),
        CmpOp::Sle => sle(l, r),
    }
}
