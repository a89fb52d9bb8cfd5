//! Path-condition management: footprints and the constraint manager.
//!
//! Constraints are assumed-true boolean expressions. The manager
//! canonicalizes the set on every insertion (equality substitution,
//! conjunct splitting, duplicate elimination) and partitions it into
//! independent factors by the arrays and byte ranges each constraint
//! touches, so solver queries only ship the constraints transitively
//! connected to the query expression.

pub mod footprint;
pub mod manager;

pub use footprint::{ByteSet, Footprint};
pub use manager::{ConstraintManager, FactorId, ManagerConfig};
