//! Configuration for the solver stack and the constraint manager.

use std::time::Duration;

use sable_constraints::ManagerConfig;
use sable_expr::Array;

use crate::{SolverError, SolverResult};

/// How the independent solver splits model queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndependentMode {
    /// One backend query per independent factor.
    PerFactor,
    /// Factors packed into batches up to `expr_num_threshold` expressions.
    Batch,
}

/// The observable-behavior knobs of the core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Rewrite existing constraints when an equality with a constant is
    /// added.
    pub rewrite_equalities: bool,
    /// Pre-simplify symbolic indices before memory resolution. Consumed by
    /// the embedding interpreter through [`sable_constraints::ConstraintManager::simplify`].
    pub simplify_sym_indices: bool,
    /// Run the solver-chain equality-substitution layer.
    pub equality_substitution: bool,
    pub independent_mode: IndependentMode,
    /// Batch size, in number of expressions, for batched mode.
    pub expr_num_threshold: usize,
    /// Symbolic arrays larger than this must be concretized by the caller.
    pub max_sym_array_size: Option<u32>,
    /// Per-backend-call wall clock budget.
    pub core_solver_timeout: Option<Duration>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rewrite_equalities: true,
            simplify_sym_indices: false,
            equality_substitution: true,
            independent_mode: IndependentMode::PerFactor,
            expr_num_threshold: 1000,
            max_sym_array_size: None,
            core_solver_timeout: None,
        }
    }
}

impl CoreConfig {
    /// The constraint-manager settings implied by this configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            rewrite_equalities: self.rewrite_equalities,
            use_independent_sets: true,
        }
    }

    /// Oversized symbolic arrays are a capacity error; the caller
    /// concretizes their accesses instead of solving for them.
    pub fn check_array_capacity(&self, array: &Array) -> SolverResult<()> {
        if let Some(limit) = self.max_sym_array_size {
            if array.is_symbolic() && array.size > limit {
                return Err(SolverError::Capacity {
                    name: array.name.clone(),
                    size: array.size,
                    limit,
                });
            }
        }
        Ok(())
    }
}
