//! Nested transactions: ordered reactions, forks and chains.
//!
//! A transaction runs its start callback, its reactions, then its chain
//! producer; forks registered while it ran execute next, then the chained
//! successor, and finally its done callback. Errors are reported once, with
//! the ancestry of the transaction that failed.

mod error;
mod request;
mod tree;

pub use error::{AncestorReport, TransactionError, TransactionFailure};
pub use request::{
    reaction, Callback, ChainProducer, Labeled, Reaction, ReactionsProducer, TransactionRequest,
    TransactionStatus,
};
pub use tree::{TransactionTree, TxId};
