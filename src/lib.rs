//! Stagecraft: a hierarchical, transactional state machine engine
//!
//! Machines move through named stages by performing the actions each stage
//! declares. Every arrival and every action runs as a transaction inside a
//! per-machine transaction tree, and is recorded in an append-only event
//! log. Stages can be deferred: reaching one forks a child machine that
//! does its work and later joins back into the parent.
//!
//! # Core Concepts
//!
//! - **Stage**: A named point in the lifecycle carrying a payload
//! - **Actions**: The typed capability record a stage exposes
//! - **Transaction**: One unit of work with forks and a chained successor
//! - **Event Thread**: Immutable history of arrivals and actions
//! - **Fork / Join**: Child machines that rejoin an ancestor stage
//!
//! # Example
//!
//! ```rust
//! use stagecraft::builder::StateMachineDefBuilder;
//! use stagecraft::core::{EventKind, Stage};
//! use stagecraft::machine::StateMachine;
//! use stagecraft::routed_stage;
//!
//! let def = StateMachineDefBuilder::new("workflow")
//!     .stage(routed_stage!(idle { startForking => forking }))
//!     .stage(routed_stage!(forking { waiting => waiting }))
//!     .stage(routed_stage!(waiting { joinBack => idle }))
//!     .initial_stage(Stage::named("idle"))
//!     .build()
//!     .unwrap();
//!
//! let machine = StateMachine::create(def).unwrap();
//! for action in ["startForking", "waiting", "joinBack"] {
//!     machine.actions().unwrap().call(action).unwrap();
//! }
//!
//! let stages: Vec<_> = machine
//!     .events()
//!     .into_iter()
//!     .filter(|event| event.kind == EventKind::Stage)
//!     .map(|event| event.stage_name)
//!     .collect();
//! assert_eq!(stages, ["init", "start", "idle", "forking", "waiting", "idle"]);
//! ```

pub mod builder;
pub mod core;
pub mod machine;
pub mod transaction;

// Re-export commonly used types
pub use builder::{BuildError, StateMachineDef, StateMachineDefBuilder};
pub use crate::core::{Payload, SerializedEvent, Stage, StageActions, StageDef};
pub use machine::{Actions, MachineError, SmListener, SmTransition, StateMachine};
pub use transaction::TransactionError;
