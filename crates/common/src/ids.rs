//! Typed identifiers shared across planner components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a named expression (column reference or alias).
///
/// Attribute equality across plan nodes is by id, never by name: two columns
/// spelled the same way in different scopes carry different ids, and a column
/// renamed by a transform keeps its id. Ids are unique within one process
/// lifetime; allocation is thread-safe because independent analyses may run
/// concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExprId(
    /// Raw numeric id value.
    pub u64,
);

impl ExprId {
    /// Allocate the next process-unique id.
    pub fn fresh() -> Self {
        Self(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Placeholder id used when comparing expressions modulo identity.
    pub const PLACEHOLDER: ExprId = ExprId(0);
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::ExprId;

    #[test]
    fn fresh_ids_are_distinct_and_increasing() {
        let a = ExprId::fresh();
        let b = ExprId::fresh();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn fresh_never_collides_with_placeholder() {
        assert_ne!(ExprId::fresh(), ExprId::PLACEHOLDER);
    }
}
