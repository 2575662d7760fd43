//! Transaction requests: the callbacks that make up one unit of work.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One-shot callback run as part of a transaction.
pub type Callback = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Produces the reactions of a transaction once it starts running.
pub type ReactionsProducer = Box<dyn FnOnce() -> Vec<Reaction>>;

/// Produces the request chained after a transaction.
pub type ChainProducer = Box<dyn FnOnce() -> anyhow::Result<Option<TransactionRequest>>>;

/// A value tagged with a human readable description.
pub struct Labeled<T> {
    pub metadata: String,
    pub value: T,
}

impl<T> Labeled<T> {
    pub fn new(metadata: impl Into<String>, value: T) -> Self {
        Self {
            metadata: metadata.into(),
            value,
        }
    }
}

/// A reaction run in order while its transaction is RUNNING.
pub type Reaction = Labeled<Callback>;

/// Build a reaction from a closure.
pub fn reaction<F>(metadata: impl Into<String>, callback: F) -> Reaction
where
    F: FnOnce() -> anyhow::Result<()> + 'static,
{
    Labeled::new(metadata, Box::new(callback) as Callback)
}

/// Lifecycle of a transaction. Statuses only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Idle,
    Starting,
    Running,
    PostRunning,
    Closing,
    Chaining,
    Closed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::PostRunning => "POST_RUNNING",
            Self::Closing => "CLOSING",
            Self::Chaining => "CHAINING",
            Self::Closed => "CLOSED",
        }
    }

    /// Forks can only be registered before the reactions are over.
    pub fn accepts_fork(&self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to create and run a transaction.
///
/// # Example
///
/// ```rust
/// use stagecraft::transaction::{reaction, TransactionRequest, TransactionTree};
///
/// let tree = TransactionTree::new();
/// let request = TransactionRequest::new("save")
///     .on_start("open", || Ok(()))
///     .reactions(|| vec![reaction("write", || Ok(()))])
///     .on_done("flush", || Ok(()));
///
/// tree.create_or_fork_transaction(request).unwrap();
/// ```
pub struct TransactionRequest {
    pub name: String,
    pub on_start: Option<Labeled<Callback>>,
    pub reactions_producer: ReactionsProducer,
    pub do_chain: Option<Labeled<ChainProducer>>,
    pub on_done: Option<Labeled<Callback>>,
}

impl TransactionRequest {
    /// Request with no callbacks and no reactions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_start: None,
            reactions_producer: Box::new(Vec::<Reaction>::new),
            do_chain: None,
            on_done: None,
        }
    }

    pub fn on_start<F>(mut self, metadata: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        self.on_start = Some(Labeled::new(metadata, Box::new(callback) as Callback));
        self
    }

    pub fn reactions<F>(mut self, producer: F) -> Self
    where
        F: FnOnce() -> Vec<Reaction> + 'static,
    {
        self.reactions_producer = Box::new(producer);
        self
    }

    /// Declare a successor. The producer must return a request; returning
    /// `None` is a configuration error.
    pub fn chain<F>(mut self, metadata: impl Into<String>, producer: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Option<TransactionRequest>> + 'static,
    {
        self.do_chain = Some(Labeled::new(metadata, Box::new(producer) as ChainProducer));
        self
    }

    pub fn on_done<F>(mut self, metadata: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        self.on_done = Some(Labeled::new(metadata, Box::new(callback) as Callback));
        self
    }
}

impl fmt::Debug for TransactionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRequest")
            .field("name", &self.name)
            .field("on_start", &self.on_start.as_ref().map(|it| &it.metadata))
            .field("do_chain", &self.do_chain.as_ref().map(|it| &it.metadata))
            .field("on_done", &self.on_done.as_ref().map(|it| &it.metadata))
            .finish()
    }
}
