//! Hash-consed bit-vector and boolean expressions over symbolic byte
//! arrays.
//!
//! The expression DAG is immutable and interned: constructors canonicalize
//! eagerly (constant folding, identity elements, comparison normalization,
//! extract/concat projection, read-over-update resolution) and structurally
//! equal construction yields pointer-equal nodes. Write histories over
//! arrays are append-only update lists that share suffixes. A memoizing
//! visitor supports substitution-style rewrites, and assignments evaluate
//! expressions under partial byte maps.
//!
//! The engine is single-threaded by contract: shared ownership is `Rc` and
//! the process-wide caches (the intern table, the structural-comparison
//! known-equal sets) are thread-local.

pub mod array;
pub mod assignment;
pub mod builders;
pub mod expr;
pub mod pretty;
pub mod smtlib;
pub mod updates;
pub mod value;
pub mod visitor;

pub use array::{Array, ArrayCache, ArrayId, ArrayRef};
pub use assignment::Assignment;
pub use expr::{
    compare_exprs, BinOp, CmpOp, CompareGuard, Expr, ExprFlags, ExprKind, ExprRef, InstId,
};
pub use updates::{UpdateList, UpdateNode, UpdateNodeRef};
pub use value::{BitVecValue, Width, WIDTH_32, WIDTH_64, WIDTH_8, WIDTH_BOOL};
pub use visitor::{Action, ReplaceMap, ReplaceOne, Rewriter, Traversal, UpdateDedup};
