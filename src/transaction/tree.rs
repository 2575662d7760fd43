//! Arena of transactions and the run loop that drives them.
//!
//! Transactions are stored by [`TxId`]; fork and chain edges are ids, and the
//! "delegated" pointer of each transaction names the descendant currently
//! running on its behalf. Following delegated pointers from the running root
//! yields the single active leaf.
//!
//! No borrow of the arena is held while user callbacks run, so callbacks may
//! re-enter the tree (typically to fork new work under the active leaf).

use super::error::{AncestorReport, TransactionError, TransactionFailure};
use super::request::{Labeled, TransactionRequest, TransactionStatus};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use tracing::error;

/// Identifier of a transaction inside its tree. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Node {
    name: String,
    parent: Option<TxId>,
    status: TransactionStatus,
    request: Option<TransactionRequest>,
    chain_metadata: Option<String>,
    forks: Vec<TxId>,
    chained: Option<TxId>,
    delegated: Option<TxId>,
    processed: Vec<String>,
    current_reaction: Option<String>,
}

impl Node {
    fn new(request: TransactionRequest, parent: Option<TxId>) -> Self {
        Self {
            name: request.name.clone(),
            parent,
            status: TransactionStatus::Idle,
            chain_metadata: request.do_chain.as_ref().map(|it| it.metadata.clone()),
            request: Some(request),
            forks: Vec::new(),
            chained: None,
            delegated: None,
            processed: Vec::new(),
            current_reaction: None,
        }
    }
}

#[derive(Default)]
struct Arena {
    nodes: HashMap<TxId, Node>,
    next_id: u64,
    running_root: Option<TxId>,
}

impl Arena {
    fn insert(&mut self, node: Node) -> TxId {
        let id = TxId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn node(&self, id: TxId) -> Result<&Node, TransactionError> {
        self.nodes
            .get(&id)
            .ok_or(TransactionError::UnknownTransaction(id))
    }

    fn node_mut(&mut self, id: TxId) -> Result<&mut Node, TransactionError> {
        self.nodes
            .get_mut(&id)
            .ok_or(TransactionError::UnknownTransaction(id))
    }

    /// `/` + name for every transaction from the root down to `id`.
    fn path(&self, id: TxId) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            names.push(node.name.as_str());
            cursor = node.parent;
        }
        names.iter().rev().map(|name| format!("/{name}")).collect()
    }

    fn leaf(&self) -> Option<TxId> {
        let mut current = self.running_root?;
        if self.nodes.get(&current)?.status.is_closed() {
            return None;
        }
        while let Some(next) = self.nodes.get(&current).and_then(|node| node.delegated) {
            match self.nodes.get(&next) {
                Some(node) if !node.status.is_closed() => current = next,
                _ => break,
            }
        }
        Some(current)
    }

    fn descendants(&self, id: TxId) -> Vec<TxId> {
        let mut found = vec![id];
        let mut index = 0;
        while let Some(current) = found.get(index).copied() {
            if let Some(node) = self.nodes.get(&current) {
                found.extend(node.forks.iter().copied());
                found.extend(node.chained);
            }
            index += 1;
        }
        found
    }
}

/// Why a run stopped early.
enum Interrupt {
    /// Domain error, already reported if needed; passed up unchanged
    Propagate(TransactionError),
    /// Runtime fault to be wrapped with the ancestry of the failing node
    Fault(anyhow::Error),
}

impl From<TransactionError> for Interrupt {
    fn from(error: TransactionError) -> Self {
        Interrupt::Propagate(error)
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<TransactionError>() {
            Ok(transaction_error) => Interrupt::Propagate(transaction_error),
            Err(error) => Interrupt::Fault(error),
        }
    }
}

/// Tree of nested transactions owned by one machine.
///
/// At most one root runs at a time. Work requested while a root is running
/// is forked under the active leaf and runs when that leaf closes, so the
/// tree stays single-writer.
///
/// # Example
///
/// ```rust
/// use stagecraft::transaction::{reaction, TransactionRequest, TransactionStatus, TransactionTree};
///
/// let tree = TransactionTree::new();
/// let root = tree.create_root(
///     TransactionRequest::new("root").reactions(|| vec![reaction("noop", || Ok(()))]),
/// );
/// let child = tree.fork(root, TransactionRequest::new("child")).unwrap();
///
/// tree.run(root).unwrap();
///
/// assert_eq!(tree.status(child), Some(TransactionStatus::Closed));
/// assert_eq!(tree.transaction_id(child).as_deref(), Some("/root/child"));
/// ```
#[derive(Default)]
pub struct TransactionTree {
    arena: RefCell<Arena>,
}

impl TransactionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new root if nothing is running, otherwise fork the request
    /// under the active leaf.
    ///
    /// A root started here is forgotten once it finishes, successfully or
    /// not; forked requests return immediately and run inside the root.
    pub fn create_or_fork_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<(), TransactionError> {
        let leaf = self.arena.borrow().leaf();
        if let Some(leaf) = leaf {
            self.fork(leaf, request)?;
            return Ok(());
        }

        let root = self.create_root(request);
        let result = self.run(root);
        self.forget(root);
        result
    }

    /// Register a root transaction without running it.
    pub fn create_root(&self, request: TransactionRequest) -> TxId {
        self.arena.borrow_mut().insert(Node::new(request, None))
    }

    /// Register `request` as a forked child of `parent`.
    ///
    /// The parent must be IDLE or RUNNING; forks run, in registration order,
    /// once the parent's reactions and chain producer are done.
    pub fn fork(&self, parent: TxId, request: TransactionRequest) -> Result<TxId, TransactionError> {
        let mut arena = self.arena.borrow_mut();
        let status = arena.node(parent)?.status;
        if !status.accepts_fork() {
            return Err(TransactionError::InvalidState {
                id: format!("{}/{}", arena.path(parent), request.name),
                status,
                operation: "fork",
            });
        }

        let child = arena.insert(Node::new(request, Some(parent)));
        arena.node_mut(parent)?.forks.push(child);
        Ok(child)
    }

    /// Run a root transaction, once.
    pub fn run(&self, id: TxId) -> Result<(), TransactionError> {
        {
            let mut arena = self.arena.borrow_mut();
            let node = arena.node(id)?;
            if node.parent.is_some() {
                return Err(TransactionError::InvalidState {
                    id: arena.path(id),
                    status: node.status,
                    operation: "run as a root",
                });
            }
            if let Some(running) = arena.running_root {
                return Err(TransactionError::RootAlreadyRunning {
                    id: arena.path(id),
                    running: arena.path(running),
                });
            }
            arena.running_root = Some(id);
        }

        let result = self.do_run(id);
        self.arena.borrow_mut().running_root = None;
        result
    }

    /// Path id of the active leaf, if a root is running.
    pub fn current_transaction_id(&self) -> Option<String> {
        let arena = self.arena.borrow();
        arena.leaf().map(|leaf| arena.path(leaf))
    }

    /// Path id of `id`, e.g. `/::init/=>doStart`.
    pub fn transaction_id(&self, id: TxId) -> Option<String> {
        let arena = self.arena.borrow();
        arena.nodes.contains_key(&id).then(|| arena.path(id))
    }

    pub fn status(&self, id: TxId) -> Option<TransactionStatus> {
        self.arena.borrow().nodes.get(&id).map(|node| node.status)
    }

    pub fn forks(&self, id: TxId) -> Vec<TxId> {
        self.arena
            .borrow()
            .nodes
            .get(&id)
            .map(|node| node.forks.clone())
            .unwrap_or_default()
    }

    pub fn chained(&self, id: TxId) -> Option<TxId> {
        self.arena.borrow().nodes.get(&id).and_then(|node| node.chained)
    }

    /// Reactions `id` completed so far.
    pub fn processed_reactions(&self, id: TxId) -> Vec<String> {
        self.arena
            .borrow()
            .nodes
            .get(&id)
            .map(|node| node.processed.clone())
            .unwrap_or_default()
    }

    /// Whether no root is running.
    pub fn is_idle(&self) -> bool {
        self.arena.borrow().running_root.is_none()
    }

    /// Number of transactions still held by the tree.
    pub fn len(&self) -> usize {
        self.arena.borrow().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, root: TxId) {
        let mut arena = self.arena.borrow_mut();
        for id in arena.descendants(root) {
            arena.nodes.remove(&id);
        }
    }

    fn do_run(&self, id: TxId) -> Result<(), TransactionError> {
        let request = {
            let mut arena = self.arena.borrow_mut();
            let path = arena.path(id);
            let node = arena.node_mut(id)?;
            match (node.status, node.request.take()) {
                (TransactionStatus::Idle, Some(request)) => request,
                (status, _) => {
                    return Err(TransactionError::InvalidState {
                        id: path,
                        status,
                        operation: "run",
                    })
                }
            }
        };

        match self.execute(id, request) {
            Ok(()) => Ok(()),
            Err(Interrupt::Propagate(error)) => Err(error),
            Err(Interrupt::Fault(source)) => Err(self.report_failure(id, source)),
        }
    }

    fn execute(&self, id: TxId, request: TransactionRequest) -> Result<(), Interrupt> {
        let TransactionRequest {
            on_start,
            reactions_producer,
            do_chain,
            on_done,
            ..
        } = request;

        if let Some(on_start) = on_start {
            self.set_status(id, TransactionStatus::Starting)?;
            (on_start.value)()?;
        }

        self.set_status(id, TransactionStatus::Running)?;
        for reaction in reactions_producer() {
            let Labeled { metadata, value } = reaction;
            self.update(id, |node| node.current_reaction = Some(metadata.clone()))?;
            value()?;
            self.update(id, |node| {
                node.current_reaction = None;
                node.processed.push(metadata);
            })?;
        }

        let chain_request = match do_chain {
            Some(Labeled { metadata, value }) => {
                self.set_status(id, TransactionStatus::PostRunning)?;
                match value()? {
                    Some(next) => Some(next),
                    None => {
                        return Err(Interrupt::Propagate(TransactionError::ChainConfiguration {
                            id: self.arena.borrow().path(id),
                            metadata,
                        }))
                    }
                }
            }
            None => None,
        };

        self.set_status(id, TransactionStatus::Closing)?;
        let mut index = 0;
        while let Some(child) = self.fork_at(id, index)? {
            self.update(id, |node| node.delegated = Some(child))?;
            self.do_run(child)?;
            index += 1;
        }

        self.set_status(id, TransactionStatus::Chaining)?;
        if let Some(next) = chain_request {
            let child = self.attach_chain(id, next)?;
            self.do_run(child)?;
        }

        if let Some(on_done) = on_done {
            (on_done.value)()?;
        }
        self.close(id)?;
        Ok(())
    }

    fn fork_at(&self, id: TxId, index: usize) -> Result<Option<TxId>, TransactionError> {
        Ok(self.arena.borrow().node(id)?.forks.get(index).copied())
    }

    fn attach_chain(&self, id: TxId, next: TransactionRequest) -> Result<TxId, TransactionError> {
        let request = TransactionRequest {
            name: format!("/{}", next.name),
            ..next
        };
        let mut arena = self.arena.borrow_mut();
        let child = arena.insert(Node::new(request, Some(id)));
        let node = arena.node_mut(id)?;
        node.chained = Some(child);
        node.delegated = Some(child);
        Ok(child)
    }

    fn update<R>(&self, id: TxId, change: impl FnOnce(&mut Node) -> R) -> Result<R, TransactionError> {
        let mut arena = self.arena.borrow_mut();
        Ok(change(arena.node_mut(id)?))
    }

    fn set_status(&self, id: TxId, status: TransactionStatus) -> Result<(), TransactionError> {
        let mut arena = self.arena.borrow_mut();
        let path = arena.path(id);
        let node = arena.node_mut(id)?;
        if status <= node.status {
            return Err(TransactionError::InvalidState {
                id: path,
                status: node.status,
                operation: "move backwards",
            });
        }
        node.status = status;
        Ok(())
    }

    fn close(&self, id: TxId) -> Result<(), TransactionError> {
        let mut arena = self.arena.borrow_mut();
        let path = arena.path(id);
        let node = arena.node_mut(id)?;
        if node.status.is_closed() {
            return Err(TransactionError::InvalidState {
                id: path,
                status: node.status,
                operation: "close",
            });
        }
        node.status = TransactionStatus::Closed;
        node.delegated = None;
        Ok(())
    }

    fn report_failure(&self, failing: TxId, source: anyhow::Error) -> TransactionError {
        let arena = self.arena.borrow();
        let mut ancestry = Vec::new();
        let mut cursor = Some(failing);
        while let Some(current) = cursor {
            let Some(node) = arena.nodes.get(&current) else {
                break;
            };
            let detail = match node.status {
                TransactionStatus::PostRunning => Some(format!(
                    "ERROR ON THE POST RUNNING (chain - {})",
                    node.chain_metadata.as_deref().unwrap_or("-")
                )),
                TransactionStatus::Closing => {
                    Some("ERROR PROCESSING CHILD FORKED TRANSACTIONS".to_string())
                }
                _ => None,
            };
            ancestry.push(AncestorReport {
                id: arena.path(current),
                status: node.status,
                processed_reactions: node.processed.clone(),
                failed_reaction: node.current_reaction.clone(),
                detail,
            });
            cursor = node.parent;
        }
        ancestry.reverse();

        let failure = TransactionFailure {
            transaction_id: arena.path(failing),
            ancestry,
            source,
        };
        for line in failure.report().lines() {
            error!(transaction = %failure.transaction_id, "{}", line);
        }
        TransactionError::Failed(Box::new(failure))
    }
}

impl fmt::Debug for TransactionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.borrow();
        f.debug_struct("TransactionTree")
            .field("transactions", &arena.nodes.len())
            .field("running_root", &arena.running_root.map(|root| arena.path(root)))
            .finish()
    }
}
