//! Errors surfaced by machine operations.

use crate::transaction::TransactionError;
use thiserror::Error;

/// Errors returned by the public machine contract.
///
/// Validation and closed-machine errors are raised before anything is
/// recorded or queued. Failures inside callbacks come back as
/// [`MachineError::Transaction`].
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Stage {stage} is not registered in machine {machine} or its ancestors")]
    UnknownStage { machine: String, stage: String },

    #[error("Stage {stage} of machine {machine} does not declare action {action}")]
    UnknownAction {
        machine: String,
        stage: String,
        action: String,
    },

    #[error("Machine {machine} is closed")]
    Closed { machine: String },

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl MachineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownStage { .. } | Self::UnknownAction { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// The wrapped transaction error, if any.
    pub fn transaction(&self) -> Option<&TransactionError> {
        match self {
            Self::Transaction(error) => Some(error),
            _ => None,
        }
    }
}

/// Unwrap machine errors raised inside callbacks so nested transaction
/// errors reach the tree unchanged and are not reported twice.
pub(crate) fn lift(error: impl Into<anyhow::Error>) -> anyhow::Error {
    match error.into().downcast::<MachineError>() {
        Ok(MachineError::Transaction(inner)) => inner.into(),
        Ok(other) => other.into(),
        Err(error) => error,
    }
}
