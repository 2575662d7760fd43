//! Structured diagnostics side channel.
//!
//! Every machine records a [`TraceEntry`] into its injected [`TraceSink`]
//! at each notable step. Sinks never influence behavior; swapping the
//! default [`TracingSink`] for a [`NoopSink`] disables diagnostics.

use super::state_machine::MachineStatus;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Step of the machine lifecycle a trace entry describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Init,
    Request,
    Action,
    Stage,
    Reaction,
    Proxy,
    Fork,
    ForkJoin,
    Shutdown,
    AddListener,
    AddInterceptor,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Request => "REQUEST",
            Self::Action => "ACTION",
            Self::Stage => "STAGE",
            Self::Reaction => "REACTION",
            Self::Proxy => "PROXY",
            Self::Fork => "FORK",
            Self::ForkJoin => "FORK_JOIN",
            Self::Shutdown => "SHUTDOWN",
            Self::AddListener => "ADD_LISTENER",
            Self::AddInterceptor => "ADD_INTERCEPTOR",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub machine: String,
    pub machine_id: Uuid,
    pub status: MachineStatus,
    /// Stage of the current event
    pub stage: Option<String>,
    /// Action of the current event
    pub action: Option<String>,
    /// Path of the active transaction, when one is running
    pub transaction_id: Option<String>,
    pub event_type: EventType,
    pub detail: String,
}

/// Destination for diagnostic entries.
pub trait TraceSink {
    fn record(&self, entry: &TraceEntry);
}

/// Emits entries as `tracing` debug events under the `stagecraft` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, entry: &TraceEntry) {
        debug!(
            target: "stagecraft",
            machine = %entry.machine,
            machine_id = %entry.machine_id,
            status = %entry.status,
            stage = entry.stage.as_deref().unwrap_or("-"),
            action = entry.action.as_deref().unwrap_or("-"),
            transaction = entry.transaction_id.as_deref().unwrap_or("-"),
            event = entry.event_type.as_str(),
            "{}",
            entry.detail
        );
    }
}

/// Discards every entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _entry: &TraceEntry) {}
}

/// Keeps every entry in memory.
///
/// # Example
///
/// ```rust
/// use stagecraft::builder::StateMachineDefBuilder;
/// use stagecraft::machine::{EventType, MemorySink, StateMachine};
/// use std::rc::Rc;
///
/// let sink = Rc::new(MemorySink::new());
/// let def = StateMachineDefBuilder::new("traced")
///     .trace_sink(sink.clone())
///     .build()
///     .unwrap();
///
/// StateMachine::create(def).unwrap();
///
/// assert_eq!(sink.entries()[0].event_type, EventType::Init);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: RefCell<Vec<TraceEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.borrow().clone()
    }

    /// Entries of one kind, in record order.
    pub fn of_type(&self, event_type: EventType) -> Vec<TraceEntry> {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl TraceSink for MemorySink {
    fn record(&self, entry: &TraceEntry) {
        self.entries.borrow_mut().push(entry.clone());
    }
}
