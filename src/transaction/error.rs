//! Transaction errors and failure reports.

use super::request::TransactionStatus;
use super::tree::TxId;
use std::fmt;
use thiserror::Error;

/// State of one transaction of the failing ancestry at failure time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncestorReport {
    /// Path id, e.g. `/::init/=>doStart`
    pub id: String,
    pub status: TransactionStatus,
    /// Reactions this transaction completed, in order
    pub processed_reactions: Vec<String>,
    /// Reaction that was executing when the failure happened
    pub failed_reaction: Option<String>,
    /// Phase note for statuses that point at a specific step
    pub detail: Option<String>,
}

/// Runtime failure of a transaction with its full ancestry.
///
/// The ancestry is ordered from the root to the failing transaction.
#[derive(Debug)]
pub struct TransactionFailure {
    pub transaction_id: String,
    pub ancestry: Vec<AncestorReport>,
    pub source: anyhow::Error,
}

impl TransactionFailure {
    pub fn root(&self) -> Option<&AncestorReport> {
        self.ancestry.first()
    }

    pub fn failing(&self) -> Option<&AncestorReport> {
        self.ancestry.last()
    }

    /// Multi-line human readable report.
    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error processing transaction: {}", self.source)?;
        writeln!(f, "--------")?;
        for ancestor in &self.ancestry {
            writeln!(f, "{:<12} {}", ancestor.status.as_str(), ancestor.id)?;
            if let Some(detail) = &ancestor.detail {
                writeln!(f, "         {detail}")?;
            }
            if let Some(reaction) = &ancestor.failed_reaction {
                writeln!(f, "         CURRENT REACTION KO: {reaction}")?;
            }
            writeln!(
                f,
                "         REACTIONS PROCESSED OK [{}] {}",
                ancestor.processed_reactions.len(),
                ancestor.processed_reactions.join(",")
            )?;
        }
        write!(f, "--------")
    }
}

/// Errors raised by the transaction tree.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction {id} cannot {operation} while {status}")]
    InvalidState {
        id: String,
        status: TransactionStatus,
        operation: &'static str,
    },

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxId),

    #[error("Transaction {id} cannot run while root {running} is still running")]
    RootAlreadyRunning { id: String, running: String },

    #[error(
        "Error chaining {id}, no chain provided on {metadata}; use on_done for a plain completion callback"
    )]
    ChainConfiguration { id: String, metadata: String },

    #[error("Transaction {} failed: {}", .0.transaction_id, .0.source)]
    Failed(Box<TransactionFailure>),
}

impl TransactionError {
    /// The failure report, for wrapped runtime failures.
    pub fn failure(&self) -> Option<&TransactionFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_failure() -> TransactionFailure {
        TransactionFailure {
            transaction_id: "/root/child".to_string(),
            ancestry: vec![
                AncestorReport {
                    id: "/root".to_string(),
                    status: TransactionStatus::Closing,
                    processed_reactions: vec!["a".to_string()],
                    failed_reaction: None,
                    detail: Some("ERROR PROCESSING CHILD FORKED TRANSACTIONS".to_string()),
                },
                AncestorReport {
                    id: "/root/child".to_string(),
                    status: TransactionStatus::Running,
                    processed_reactions: vec!["b".to_string(), "c".to_string()],
                    failed_reaction: Some("d".to_string()),
                    detail: None,
                },
            ],
            source: anyhow::anyhow!("boom"),
        }
    }

    #[test]
    fn root_and_failing_bracket_the_ancestry() {
        let failure = sample_failure();
        assert_eq!(failure.root().unwrap().id, "/root");
        assert_eq!(failure.failing().unwrap().id, "/root/child");
    }

    #[test]
    fn report_lists_every_ancestor() {
        let report = sample_failure().report();

        assert!(report.starts_with("Error processing transaction: boom"));
        assert!(report.contains("CLOSING      /root"));
        assert!(report.contains("CURRENT REACTION KO: d"));
        assert!(report.contains("REACTIONS PROCESSED OK [2] b,c"));
    }

    #[test]
    fn failed_error_exposes_failure() {
        let error = TransactionError::Failed(Box::new(sample_failure()));

        assert_eq!(error.to_string(), "Transaction /root/child failed: boom");
        assert!(error.failure().is_some());
    }

    #[test]
    fn chain_configuration_is_not_a_failure() {
        let error = TransactionError::ChainConfiguration {
            id: "/a".to_string(),
            metadata: "=>go::next".to_string(),
        };

        assert!(error.failure().is_none());
        assert!(error.to_string().contains("no chain provided on =>go::next"));
    }
}
