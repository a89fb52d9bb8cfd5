//! Expression nodes: immutable, hash-consed bit-vector and boolean terms.
//!
//! Nodes are built only through the constructors in [`crate::builders`],
//! which canonicalize eagerly and intern every result, so structurally equal
//! construction yields pointer-equal nodes. Structural comparison falls back
//! to a deep walk only on hash collisions and is accelerated by a
//! process-wide known-equal cache guarded by [`CompareGuard`].

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use crate::updates::UpdateList;
use crate::value::{BitVecValue, Width, WIDTH_BOOL};

pub(crate) const MAGIC_HASH_CONSTANT: u64 = 39;

/// Non-owning handle to the instruction that produced an expression, an
/// index into a table kept by the embedding interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

bitflags! {
    /// Provenance flags carried by expressions and update nodes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExprFlags: u8 {
        const INSTRUCTION_ROOT = 1 << 0;
        const OPTIMIZATION = 1 << 1;
        const INTERNAL = 1 << 2;
        const INITIALIZATION = 1 << 3;
    }
}

/// Binary arithmetic and bitwise operators. Both kids share the result width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// Comparison operators in canonical form. `Ne`, `Ugt`, `Uge`, `Sgt` and
/// `Sge` are accepted by the constructors but rewritten away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ult,
    Ule,
    Slt,
    Sle,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A bit-vector literal; the only kind that may hold a literal.
    Constant(BitVecValue),
    /// Opacity barrier: prevents folding below it.
    NotOptimized(ExprRef),
    /// One-element read from an array through its write history.
    Read { updates: UpdateList, index: ExprRef },
    /// If-then-else; the condition has width 1.
    Select {
        cond: ExprRef,
        t: ExprRef,
        f: ExprRef,
    },
    /// Bit concatenation; chains are right-unbalanced.
    Concat { left: ExprRef, right: ExprRef },
    /// Bit slice at `offset` of `width` bits, bit 0 rightmost.
    Extract {
        expr: ExprRef,
        offset: u32,
        width: Width,
    },
    ZExt { expr: ExprRef, width: Width },
    SExt { expr: ExprRef, width: Width },
    /// Bitwise not.
    Not(ExprRef),
    Binary {
        op: BinOp,
        left: ExprRef,
        right: ExprRef,
    },
    /// Width-1 comparison.
    Compare {
        op: CmpOp,
        left: ExprRef,
        right: ExprRef,
    },
}

impl ExprKind {
    /// Stable tag used in the hash and the total order.
    pub fn tag(&self) -> u32 {
        match self {
            ExprKind::Constant(_) => 0,
            ExprKind::NotOptimized(_) => 1,
            ExprKind::Read { .. } => 2,
            ExprKind::Select { .. } => 3,
            ExprKind::Concat { .. } => 4,
            ExprKind::Extract { .. } => 5,
            ExprKind::ZExt { .. } => 6,
            ExprKind::SExt { .. } => 7,
            ExprKind::Not(_) => 8,
            ExprKind::Binary { op, .. } => 9 + *op as u32,
            ExprKind::Compare { op, .. } => 32 + *op as u32,
        }
    }
}

/// An immutable expression node with its cached hash and width.
#[derive(Debug)]
pub struct Expr {
    kind: ExprKind,
    width: Width,
    hash: u64,
    flags: Cell<ExprFlags>,
    inst: Cell<Option<InstId>>,
}

impl Expr {
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn flags(&self) -> ExprFlags {
        self.flags.get()
    }

    pub fn set_flags(&self, flags: ExprFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    pub fn inst(&self) -> Option<InstId> {
        self.inst.get()
    }

    /// Attach the originating instruction; the first binding wins, so a
    /// hash-cons hit keeps its original provenance.
    pub fn bind_inst(&self, inst: InstId) {
        if self.inst.get().is_none() {
            self.inst.set(Some(inst));
        }
    }

    pub fn is_bool(&self) -> bool {
        self.width == WIDTH_BOOL
    }

    pub fn as_constant(&self) -> Option<&BitVecValue> {
        match &self.kind {
            ExprKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    pub fn is_true(&self) -> bool {
        self.as_constant().is_some_and(BitVecValue::is_true)
    }

    pub fn is_false(&self) -> bool {
        self.as_constant().is_some_and(BitVecValue::is_false)
    }

    pub fn is_zero(&self) -> bool {
        self.as_constant().is_some_and(BitVecValue::is_zero)
    }

    /// Direct kid expressions, not including update-list contents.
    pub fn kids(&self) -> SmallVec<[ExprRef; 3]> {
        match &self.kind {
            ExprKind::Constant(_) => SmallVec::new(),
            ExprKind::NotOptimized(e) | ExprKind::Not(e) => smallvec![e.clone()],
            ExprKind::Read { index, .. } => smallvec![index.clone()],
            ExprKind::Select { cond, t, f } => {
                smallvec![cond.clone(), t.clone(), f.clone()]
            }
            ExprKind::Concat { left, right }
            | ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. } => {
                smallvec![left.clone(), right.clone()]
            }
            ExprKind::Extract { expr, .. }
            | ExprKind::ZExt { expr, .. }
            | ExprKind::SExt { expr, .. } => smallvec![expr.clone()],
        }
    }

    fn compute_hash(kind: &ExprKind) -> u64 {
        let mut h = u64::from(kind.tag()).wrapping_mul(MAGIC_HASH_CONSTANT);
        match kind {
            ExprKind::Constant(v) => h ^= v.hash_value(),
            ExprKind::Read { updates, index } => {
                h = (h << 1) ^ updates.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
                h = (h << 1) ^ index.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
            }
            ExprKind::Extract {
                expr,
                offset,
                width,
            } => {
                h ^= u64::from(*offset).wrapping_mul(MAGIC_HASH_CONSTANT);
                h ^= u64::from(*width).rotate_left(17).wrapping_mul(MAGIC_HASH_CONSTANT);
                h = (h << 1) ^ expr.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
            }
            ExprKind::ZExt { expr, width } | ExprKind::SExt { expr, width } => {
                h ^= u64::from(*width).wrapping_mul(MAGIC_HASH_CONSTANT);
                h = (h << 1) ^ expr.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
            }
            ExprKind::NotOptimized(e) | ExprKind::Not(e) => {
                h = (h << 1) ^ e.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
            }
            ExprKind::Select { cond, t, f } => {
                for kid in [cond, t, f] {
                    h = (h << 1) ^ kid.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
                }
            }
            ExprKind::Concat { left, right }
            | ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. } => {
                for kid in [left, right] {
                    h = (h << 1) ^ kid.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
                }
            }
        }
        h
    }

    fn width_of(kind: &ExprKind) -> Width {
        match kind {
            ExprKind::Constant(v) => v.width(),
            ExprKind::NotOptimized(e) | ExprKind::Not(e) => e.width(),
            ExprKind::Read { updates, .. } => updates.root.range,
            ExprKind::Select { t, .. } => t.width(),
            ExprKind::Concat { left, right } => left.width() + right.width(),
            ExprKind::Extract { width, .. }
            | ExprKind::ZExt { width, .. }
            | ExprKind::SExt { width, .. } => *width,
            ExprKind::Binary { left, .. } => left.width(),
            ExprKind::Compare { .. } => WIDTH_BOOL,
        }
    }
}

/// Shared handle to an interned expression.
///
/// Equality is structural; the hash is the node's cached hash, so the two
/// stay compatible. Interning makes structural equality coincide with
/// pointer equality for nodes built by the constructors.
#[derive(Debug, Clone)]
pub struct ExprRef(Rc<Expr>);

impl std::ops::Deref for ExprRef {
    type Target = Expr;

    fn deref(&self) -> &Expr {
        &self.0
    }
}

impl ExprRef {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn as_ptr_usize(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        compare_exprs(&self.0, &other.0)
    }
}

impl PartialEq for ExprRef {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for ExprRef {}

impl PartialOrd for ExprRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for ExprRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl std::hash::Hash for ExprRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash.hash(state);
    }
}

// Process-wide caches. The engine is single-threaded by contract, so all of
// these are thread-local and unsynchronized.
thread_local! {
    static INTERN_TABLE: RefCell<FxHashMap<u64, SmallVec<[Weak<Expr>; 2]>>> =
        RefCell::new(FxHashMap::default());
    static EXPR_EQUIVS: RefCell<FxHashSet<(usize, usize)>> = RefCell::new(FxHashSet::default());
    static UN_EQUIVS: RefCell<FxHashSet<(usize, usize)>> = RefCell::new(FxHashSet::default());
    static COMPARE_SEMAPHORE: Cell<u64> = const { Cell::new(0) };
}

/// Scope guard for the structural-comparison caches.
///
/// The known-equal caches store raw node addresses, which go stale once a
/// node can be freed. Any operation that may drop expression or update-node
/// storage holds a guard; when the last guard releases, both caches clear.
pub struct CompareGuard(());

impl CompareGuard {
    pub fn new() -> Self {
        COMPARE_SEMAPHORE.with(|c| c.set(c.get() + 1));
        CompareGuard(())
    }
}

impl Default for CompareGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompareGuard {
    fn drop(&mut self) {
        COMPARE_SEMAPHORE.with(|c| {
            let n = c.get() - 1;
            c.set(n);
            if n == 0 {
                EXPR_EQUIVS.with(|e| e.borrow_mut().clear());
                UN_EQUIVS.with(|e| e.borrow_mut().clear());
            }
        });
    }
}

fn equiv_key(a: *const (), b: *const ()) -> (usize, usize) {
    let (a, b) = (a as usize, b as usize);
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn expr_equiv_cached(a: &Expr, b: &Expr) -> bool {
    let key = equiv_key(a as *const _ as *const (), b as *const _ as *const ());
    EXPR_EQUIVS.with(|e| e.borrow().contains(&key))
}

fn expr_equiv_record(a: &Expr, b: &Expr) {
    if COMPARE_SEMAPHORE.with(Cell::get) == 0 {
        return;
    }
    let key = equiv_key(a as *const _ as *const (), b as *const _ as *const ());
    EXPR_EQUIVS.with(|e| {
        e.borrow_mut().insert(key);
    });
}

pub(crate) fn un_equiv_cached(a: *const (), b: *const ()) -> bool {
    let key = equiv_key(a, b);
    UN_EQUIVS.with(|e| e.borrow().contains(&key))
}

pub(crate) fn un_equiv_record(a: *const (), b: *const ()) {
    if COMPARE_SEMAPHORE.with(Cell::get) == 0 {
        return;
    }
    let key = equiv_key(a, b);
    UN_EQUIVS.with(|e| {
        e.borrow_mut().insert(key);
    });
}

/// Total order over expressions: hash, then kind tag, then per-kind
/// contents, then kids recursively. Equal pairs found by the deep walk are
/// recorded in the known-equal cache while a [`CompareGuard`] is live.
pub fn compare_exprs(a: &Expr, b: &Expr) -> Ordering {
    if std::ptr::eq(a, b) {
        return Ordering::Equal;
    }
    match a.hash.cmp(&b.hash) {
        Ordering::Equal => {}
        ord => return ord,
    }
    match a.kind.tag().cmp(&b.kind.tag()) {
        Ordering::Equal => {}
        ord => return ord,
    }
    if expr_equiv_cached(a, b) {
        return Ordering::Equal;
    }
    let ord = compare_contents(a, b);
    if ord == Ordering::Equal {
        expr_equiv_record(a, b);
    }
    ord
}

fn compare_contents(a: &Expr, b: &Expr) -> Ordering {
    match (&a.kind, &b.kind) {
        (ExprKind::Constant(x), ExprKind::Constant(y)) => {
            match x.width().cmp(&y.width()) {
                Ordering::Equal => {}
                ord => return ord,
            }
            x.bits().cmp(y.bits())
        }
        (
            ExprKind::Extract {
                expr: xe,
                offset: xo,
                width: xw,
            },
            ExprKind::Extract {
                expr: ye,
                offset: yo,
                width: yw,
            },
        ) => xo
            .cmp(yo)
            .then_with(|| xw.cmp(yw))
            .then_with(|| xe.compare(ye)),
        (
            ExprKind::ZExt {
                expr: xe,
                width: xw,
            },
            ExprKind::ZExt {
                expr: ye,
                width: yw,
            },
        )
        | (
            ExprKind::SExt {
                expr: xe,
                width: xw,
            },
            ExprKind::SExt {
                expr: ye,
                width: yw,
            },
        ) => xw.cmp(yw).then_with(|| xe.compare(ye)),
        (
            ExprKind::Read {
                updates: xu,
                index: xi,
            },
            ExprKind::Read {
                updates: yu,
                index: yi,
            },
        ) => xu.compare(yu).then_with(|| xi.compare(yi)),
        _ => {
            let (xs, ys) = (a.kids(), b.kids());
            debug_assert_eq!(xs.len(), ys.len(), "same kind tag, same kid count");
            for (x, y) in xs.iter().zip(ys.iter()) {
                match x.compare(y) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
            }
            Ordering::Equal
        }
    }
}

/// Intern a freshly built node, returning the canonical shared instance.
pub(crate) fn intern(kind: ExprKind) -> ExprRef {
    let width = Expr::width_of(&kind);
    let hash = Expr::compute_hash(&kind);
    let candidate = Expr {
        kind,
        width,
        hash,
        flags: Cell::new(ExprFlags::default()),
        inst: Cell::new(None),
    };
    INTERN_TABLE.with(|table| {
        let mut table = table.borrow_mut();
        let bucket = table.entry(hash).or_default();
        let mut i = 0;
        while i < bucket.len() {
            match bucket[i].upgrade() {
                Some(existing) => {
                    if compare_exprs(&existing, &candidate) == Ordering::Equal {
                        return ExprRef(existing);
                    }
                    i += 1;
                }
                None => {
                    bucket.swap_remove(i);
                }
            }
        }
        let rc = Rc::new(candidate);
        bucket.push(Rc::downgrade(&rc));
        ExprRef(rc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders;

    #[test]
    fn interning_gives_pointer_equality() {
        let a = builders::constant(7, 16);
        let b = builders::constant(7, 16);
        assert!(a.ptr_eq(&b));
        let c = builders::constant(8, 16);
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn hash_compatible_with_equality() {
        let a = builders::constant(0xdead, 32);
        let b = builders::constant(0xdead, 32);
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn total_order_is_consistent() {
        let a = builders::constant(1, 8);
        let b = builders::constant(2, 8);
        assert_eq!(a.compare(&a), Ordering::Equal);
        assert_eq!(a.compare(&b), b.compare(&a).reverse());
    }

    #[test]
    fn inst_binding_is_first_occur() {
        let e = builders::constant(99, 8);
        e.bind_inst(InstId(3));
        e.bind_inst(InstId(5));
        assert_eq!(e.inst(), Some(InstId(3)));
    }

    #[test]
    fn compare_guard_clears_caches_at_zero() {
        let g1 = CompareGuard::new();
        let g2 = CompareGuard::new();
        assert_eq!(COMPARE_SEMAPHORE.with(Cell::get), 2);
        drop(g1);
        assert_eq!(COMPARE_SEMAPHORE.with(Cell::get), 1);
        drop(g2);
        assert_eq!(COMPARE_SEMAPHORE.with(Cell::get), 0);
        EXPR_EQUIVS.with(|e| assert!(e.borrow().is_empty()));
        UN_EQUIVS.with(|e| assert!(e.borrow().is_empty()));
    }
}
