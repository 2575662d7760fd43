//! The state machine orchestrator.
//!
//! A [`StateMachine`] owns one event thread, one stage graph, one
//! transaction tree and its listener and interceptor registries. Every
//! stage arrival and every action runs as a transaction; callbacks that
//! request more work while one is running get their work forked under the
//! running transaction instead of starting a new one.

mod actions;
mod error;
mod listeners;
mod state_machine;
mod trace;
mod transactions;
mod transition;

pub use actions::Actions;
pub use error::MachineError;
pub use listeners::{ListenerType, SmEventCallback, SmEventParams, SmListener};
pub use state_machine::{MachineStatus, StateMachine, INIT, START, STOP};
pub use trace::{EventType, MemorySink, NoopSink, TraceEntry, TraceSink, TracingSink};
pub use transition::SmTransition;
