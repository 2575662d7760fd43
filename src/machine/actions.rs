//! Callable proxy over the actions a stage declares.

use super::error::MachineError;
use super::state_machine::{MachineCore, StateMachine};
use super::trace::EventType;
use super::transition::SmTransition;
use crate::core::{Payload, Stage, StageActions};
use std::fmt;
use std::rc::{Rc, Weak};

/// Actions available at one stage arrival, bound to the machine they
/// belong to.
///
/// Invoking an action runs its logic to find the destination, checks the
/// destination is known to the machine (or one of its ancestors) and
/// requests the transition. Nothing else happens until the resulting
/// transaction runs.
#[derive(Clone)]
pub struct Actions {
    machine: Weak<MachineCore>,
    machine_name: String,
    stage: Stage,
    actions: Rc<StageActions>,
}

impl Actions {
    pub(crate) fn new(machine: &StateMachine, stage: Stage, actions: StageActions) -> Self {
        Self {
            machine: machine.downgrade(),
            machine_name: machine.name().to_string(),
            stage,
            actions: Rc::new(actions),
        }
    }

    /// Stage these actions were created for.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.names()
    }

    pub fn has(&self, action: &str) -> bool {
        self.actions.get(action).is_some()
    }

    /// Machine the actions act on, while it is alive.
    pub fn machine(&self) -> Option<StateMachine> {
        self.machine.upgrade().map(StateMachine::from_core)
    }

    /// Invoke `action` without a payload.
    pub fn call(&self, action: &str) -> Result<(), MachineError> {
        self.invoke(action, None)
    }

    /// Invoke `action` with an optional payload.
    pub fn invoke(&self, action: &str, payload: Option<Payload>) -> Result<(), MachineError> {
        let logic = self
            .actions
            .get(action)
            .ok_or_else(|| MachineError::UnknownAction {
                machine: self.machine_name.clone(),
                stage: self.stage.name.clone(),
                action: action.to_string(),
            })?;
        let machine = self.machine().ok_or_else(|| MachineError::Closed {
            machine: self.machine_name.clone(),
        })?;

        let into = logic(payload.as_ref());
        machine.resolve_stage(&into.name)?;
        machine.trace(
            EventType::Proxy,
            format!("{}::{} => {}", self.stage.name, action, into.name),
        );

        let transition = SmTransition {
            action_name: action.to_string(),
            payload,
            into,
        };
        machine.request_transition(transition)
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actions")
            .field("machine", &self.machine_name)
            .field("stage", &self.stage.name)
            .field("actions", &self.actions)
            .finish()
    }
}
