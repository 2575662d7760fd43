//! Core stage and event types.
//!
//! This module contains the data side of the engine:
//! - Stage definitions and the typed capability record of each stage
//! - The per-machine stage graph
//! - The append-only event thread and its serialized form

mod event;
mod stage;

pub use event::{EventKind, EventThread, SerializedEvent, SmEvent};
pub use stage::{
    event_name, ActionFn, DeferredInfo, Deferrer, Payload, Stage, StageActions, StageDef,
    StageGraph, StageLogic,
};
