//! Ledger errors.

use std::fmt;

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Which redb operation a storage failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transaction,
    Table,
    Read,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Transaction => "transaction",
            Stage::Table => "table open",
            Stage::Read => "read",
            Stage::Write => "write",
        })
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open ledger: {0}")]
    Open(String),

    #[error("ledger {stage} failed: {message}")]
    Storage { stage: Stage, message: String },

    #[error("cannot encode ledger row: {0}")]
    Encode(String),

    #[error("corrupt ledger row: {0}")]
    Decode(String),

    /// A row the operation depends on is missing.
    #[error("{0} is not in the ledger")]
    NotFound(String),

    /// The row would contradict one already recorded.
    #[error("ledger conflict: {0}")]
    Conflict(String),
}

impl StateError {
    pub(crate) fn storage(stage: Stage, e: impl fmt::Display) -> Self {
        StateError::Storage {
            stage,
            message: e.to_string(),
        }
    }
}
