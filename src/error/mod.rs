use crate::models::{EntityKey, EntityKind, TentativeToken};
use crate::order::OrderError;
use crate::repo::RepoError;

/// Everything an intent can be refused with, plus repository failures
/// surfaced through reconciliation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: EntityKind, key: EntityKey },

    #[error("{0} is not confirmed yet and cannot be used as a parent")]
    TentativeParent(TentativeToken),

    #[error("{0} is not confirmed yet and cannot be moved")]
    Unconfirmed(TentativeToken),

    #[error("sibling group still has unconfirmed entries; reordering is blocked")]
    ReorderBlocked,

    #[error("{key} is not at index {index} of its sibling group")]
    StaleIndex { key: EntityKey, index: usize },

    #[error("shelf session has been disposed")]
    Disposed,

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl EngineError {
    /// True when the sibling group has to be renumbered before retrying.
    pub fn renumber_required(&self) -> bool {
        matches!(self, EngineError::Order(OrderError::RenumberRequired { .. }))
    }
}
