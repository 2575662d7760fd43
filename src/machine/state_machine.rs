//! The machine orchestrator and its public contract.

use super::actions::Actions;
use super::error::MachineError;
use super::listeners::{ListenerRegistry, ListenerType, SmListener};
use super::trace::{EventType, TraceEntry, TraceSink};
use super::transition::SmTransition;
use crate::builder::StateMachineDef;
use crate::core::{
    event_name, EventThread, Payload, SerializedEvent, Stage, StageActions, StageDef, StageGraph,
};
use crate::transaction::TransactionTree;
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use uuid::Uuid;

/// Stage every machine starts from.
pub const INIT: &str = "init";
/// Stage reached once the machine is booted.
pub const START: &str = "start";
/// Stage that shuts the machine down.
pub const STOP: &str = "stop";

/// Machine-level lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Idle,
    Running,
    /// A forked child is pending
    Paused,
    /// Terminal, after shutdown
    Stopped,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct ParentLink {
    machine: Weak<MachineCore>,
    joins_into: Vec<String>,
}

pub(crate) struct MachineCore {
    id: Uuid,
    name: String,
    pub(super) graph: Rc<StageGraph>,
    /// Graphs of the ancestors, nearest first
    pub(super) ancestors: Vec<Rc<StageGraph>>,
    parent: Option<ParentLink>,
    pub(super) status: Cell<MachineStatus>,
    closed: Cell<bool>,
    pub(super) thread: RefCell<EventThread>,
    pub(super) tree: TransactionTree,
    pub(super) listeners: ListenerRegistry,
    pub(super) interceptors: ListenerRegistry,
    pub(super) current_actions: RefCell<Option<Actions>>,
    sink: Rc<dyn TraceSink>,
}

/// A hierarchical, transactional state machine.
///
/// The handle is cheap to clone; clones share the same machine. Machines
/// are single threaded: every request runs synchronously inside the
/// caller, and requests issued while the machine is already processing
/// are queued as forks of the running transaction.
///
/// # Example
///
/// ```rust
/// use stagecraft::builder::StateMachineDefBuilder;
/// use stagecraft::core::{Stage, StageActions, StageDef};
/// use stagecraft::machine::StateMachine;
///
/// let def = StateMachineDefBuilder::new("door")
///     .stage(StageDef::new("closed", |_| StageActions::new().goes_to("open", "opened")))
///     .stage(StageDef::new("opened", |_| StageActions::new().goes_to("close", "closed")))
///     .initial_stage(Stage::named("closed"))
///     .build()
///     .unwrap();
///
/// let door = StateMachine::create(def).unwrap();
/// door.actions().unwrap().call("open").unwrap();
///
/// assert_eq!(door.current_stage().as_deref(), Some("opened"));
/// ```
#[derive(Clone)]
pub struct StateMachine {
    core: Rc<MachineCore>,
}

impl StateMachine {
    /// Build a machine from its definition and boot it through
    /// `init` and `start` into the initial stage, if any.
    pub fn create(def: StateMachineDef) -> Result<Self, MachineError> {
        let machine = Self::assemble(def, None, Vec::new());
        machine.boot()?;
        Ok(machine)
    }

    fn assemble(
        def: StateMachineDef,
        parent: Option<ParentLink>,
        ancestors: Vec<Rc<StageGraph>>,
    ) -> Self {
        let StateMachineDef {
            name,
            stages,
            initial_stage,
            listeners,
            interceptors,
            sink,
        } = def;

        let graph = StageGraph::from_defs(system_stages().into_iter().chain(stages));
        let machine = Self {
            core: Rc::new(MachineCore {
                id: Uuid::new_v4(),
                name,
                graph: Rc::new(graph),
                ancestors,
                parent,
                status: Cell::new(MachineStatus::Idle),
                closed: Cell::new(false),
                thread: RefCell::new(EventThread::new()),
                tree: TransactionTree::new(),
                listeners: ListenerRegistry::default(),
                interceptors: ListenerRegistry::default(),
                current_actions: RefCell::new(None),
                sink,
            }),
        };

        for (listener, kind) in listeners {
            machine.core.listeners.add(listener, kind);
        }
        for listener in system_listeners(initial_stage) {
            machine.core.listeners.add(listener, ListenerType::Always);
        }
        for interceptor in interceptors {
            machine.core.interceptors.add(interceptor, ListenerType::Always);
        }
        machine
    }

    fn boot(&self) -> Result<(), MachineError> {
        self.process_stage(Stage::named(INIT), EventType::Init)
    }

    pub(crate) fn from_core(core: Rc<MachineCore>) -> Self {
        Self { core }
    }

    pub(crate) fn downgrade(&self) -> Weak<MachineCore> {
        Rc::downgrade(&self.core)
    }

    /// Drive the machine into `stage`.
    ///
    /// Fails with [`MachineError::UnknownStage`] before anything is recorded
    /// when neither the machine nor its ancestors register the stage.
    pub fn request_stage(&self, stage: Stage) -> Result<(), MachineError> {
        self.process_stage(stage, EventType::Request)
    }

    /// Perform a transition: record the action, run its listeners, then
    /// arrive at the target stage.
    pub fn request_transition(&self, transition: SmTransition) -> Result<(), MachineError> {
        self.ensure_open()?;
        self.resolve_stage(&transition.into.name)?;
        self.trace(
            EventType::Request,
            format!("=>{}::{}", transition.action_name, transition.into.name),
        );
        let request = self.action_transaction(transition);
        self.core.tree.create_or_fork_transaction(request)?;
        Ok(())
    }

    /// Move into the universal terminal stage, shutting the machine down.
    pub fn stop(&self) -> Result<(), MachineError> {
        self.request_transition(SmTransition::new("doStop", Stage::named(STOP)))
    }

    /// Spawn a child machine running `next` only.
    ///
    /// The child boots immediately and moves into `next`; `defer` runs on
    /// every arrival there. The child resolves stages it does not own through
    /// this machine's graphs, so moving into one of them joins back here.
    pub fn fork<F>(
        &self,
        next: Stage,
        defer: F,
        joins_into: Vec<String>,
    ) -> Result<StateMachine, MachineError>
    where
        F: Fn(&Actions, Option<&Payload>) -> anyhow::Result<()> + 'static,
    {
        self.ensure_open()?;
        let def = self.resolve_stage(&next.name)?;

        self.core.status.set(MachineStatus::Paused);
        self.trace(
            EventType::Fork,
            format!("[FORK]::{}/{}", self.core.name, next.name),
        );

        let defer_listener = SmListener::named(format!("::{}->[DEFERRED]", next.name)).on(
            next.event_name(),
            move |actions, params| defer(actions, params.payload.as_ref()),
        );
        let child_def = StateMachineDef {
            name: format!("{}/{}", self.core.name, next.name),
            stages: vec![StageDef::from_logic(next.name.clone(), def.logic())],
            initial_stage: Some(next),
            listeners: vec![(defer_listener, ListenerType::Always)],
            interceptors: Vec::new(),
            sink: Rc::clone(&self.core.sink),
        };
        let ancestors = std::iter::once(Rc::clone(&self.core.graph))
            .chain(self.core.ancestors.iter().cloned())
            .collect();
        let parent = ParentLink {
            machine: self.downgrade(),
            joins_into,
        };
        let child = Self::assemble(child_def, Some(parent), ancestors);

        self.core
            .thread
            .borrow_mut()
            .add_action_event("fork", None, Some(child.clone()));
        child.boot()?;
        Ok(child)
    }

    /// Resume after a fork by processing `stage` here.
    pub fn join(&self, stage: Stage) -> Result<(), MachineError> {
        self.process_stage(stage, EventType::ForkJoin)
    }

    /// Close the machine. Every later public call fails with
    /// [`MachineError::Closed`], including a second shutdown.
    pub fn shutdown(&self) -> Result<(), MachineError> {
        self.ensure_open()?;
        self.core.closed.set(true);
        self.core.status.set(MachineStatus::Stopped);
        self.trace(EventType::Shutdown, "shutdown");
        Ok(())
    }

    pub fn add_listener(&self, listener: SmListener) -> Result<&Self, MachineError> {
        self.add_listener_with_type(listener, ListenerType::Always)
    }

    pub fn add_listener_with_type(
        &self,
        listener: SmListener,
        kind: ListenerType,
    ) -> Result<&Self, MachineError> {
        self.ensure_open()?;
        self.trace(EventType::AddListener, listener.metadata());
        self.core.listeners.add(listener, kind);
        Ok(self)
    }

    /// Interceptors run before listeners for the same event.
    pub fn add_interceptor(&self, interceptor: SmListener) -> Result<&Self, MachineError> {
        self.ensure_open()?;
        self.trace(EventType::AddInterceptor, interceptor.metadata());
        self.core.interceptors.add(interceptor, ListenerType::Always);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn status(&self) -> MachineStatus {
        self.core.status.get()
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.get()
    }

    /// Stage of the latest event.
    pub fn current_stage(&self) -> Option<String> {
        self.core
            .thread
            .borrow()
            .current_stage_name()
            .map(str::to_string)
    }

    /// Actions of the latest stage arrival.
    pub fn actions(&self) -> Option<Actions> {
        self.core.current_actions.borrow().clone()
    }

    /// Snapshot of the event log, fork logs embedded.
    pub fn events(&self) -> Vec<SerializedEvent> {
        self.core.thread.borrow().serialize()
    }

    pub fn events_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.events())
    }

    /// Path of the transaction currently running, if any.
    pub fn transaction_id(&self) -> Option<String> {
        self.core.tree.current_transaction_id()
    }

    /// Machine this one was forked from, while it is alive.
    pub fn parent(&self) -> Option<StateMachine> {
        self.core
            .parent
            .as_ref()
            .and_then(|link| link.machine.upgrade())
            .map(Self::from_core)
    }

    /// Ancestor stages this fork was declared to join into.
    pub fn joins_into(&self) -> &[String] {
        self.core
            .parent
            .as_ref()
            .map(|link| link.joins_into.as_slice())
            .unwrap_or_default()
    }

    /// Locally registered stage names, system stages included.
    pub fn stage_names(&self) -> Vec<String> {
        self.core.graph.names()
    }

    fn process_stage(&self, stage: Stage, event_type: EventType) -> Result<(), MachineError> {
        self.ensure_open()?;
        let detail = format!("::{}", stage.name);
        let request = self.arrival_transaction(stage)?;
        self.core.status.set(MachineStatus::Running);
        self.trace(event_type, detail);
        self.core.tree.create_or_fork_transaction(request)?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), MachineError> {
        if self.is_closed() {
            return Err(MachineError::Closed {
                machine: self.core.name.clone(),
            });
        }
        Ok(())
    }

    /// Definition of `name`, looked up locally first and then in the
    /// ancestors, nearest first.
    pub(crate) fn resolve_stage(&self, name: &str) -> Result<StageDef, MachineError> {
        std::iter::once(&self.core.graph)
            .chain(self.core.ancestors.iter())
            .find_map(|graph| graph.get(name))
            .cloned()
            .ok_or_else(|| self.unknown_stage(name))
    }

    /// Nearest ancestor machine registering `name`.
    pub(crate) fn ancestor_owning(&self, name: &str) -> Option<StateMachine> {
        let mut cursor = self.parent();
        while let Some(machine) = cursor {
            if machine.core.graph.contains(name) {
                return Some(machine);
            }
            cursor = machine.parent();
        }
        None
    }

    pub(crate) fn unknown_stage(&self, stage: &str) -> MachineError {
        MachineError::UnknownStage {
            machine: self.core.name.clone(),
            stage: stage.to_string(),
        }
    }

    pub(crate) fn trace(&self, event_type: EventType, detail: impl Into<String>) {
        let (stage, action) = {
            let thread = self.core.thread.borrow();
            (
                thread.current_stage_name().map(str::to_string),
                thread.current_action_name().map(str::to_string),
            )
        };
        let entry = TraceEntry {
            machine: self.core.name.clone(),
            machine_id: self.core.id,
            status: self.core.status.get(),
            stage,
            action,
            transaction_id: self.core.tree.current_transaction_id(),
            event_type,
            detail: detail.into(),
        };
        self.core.sink.record(&entry);
    }

    pub(super) fn core(&self) -> &MachineCore {
        &self.core
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.core.name)
            .field("id", &self.core.id)
            .field("status", &self.core.status.get())
            .field("closed", &self.core.closed.get())
            .field("stage", &self.current_stage())
            .finish()
    }
}

fn system_stages() -> Vec<StageDef> {
    vec![
        StageDef::new(INIT, |_| StageActions::new().goes_to("doStart", START)),
        StageDef::terminal(START),
        StageDef::terminal(STOP),
    ]
}

fn system_listeners(initial_stage: Option<Stage>) -> Vec<SmListener> {
    let mut listeners = vec![
        SmListener::named("::init=>doStart").on_stage(INIT, |actions, _| {
            actions.call("doStart")?;
            Ok(())
        }),
        SmListener::named("::stop->shutdown").on_stage(STOP, |_, params| {
            params.sm.shutdown()?;
            Ok(())
        }),
    ];

    if let Some(initial) = initial_stage {
        let action = event_name("do", &initial.name);
        listeners.push(
            SmListener::named(format!("::{START}=>{action}")).on_stage(START, move |_, params| {
                params
                    .sm
                    .request_transition(SmTransition::new(action.clone(), initial.clone()))?;
                Ok(())
            }),
        );
    }
    listeners
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateMachineDefBuilder;
    use crate::core::EventKind;
    use crate::machine::MemorySink;
    use serde_json::json;

    fn door() -> StateMachine {
        let def = StateMachineDefBuilder::new("door")
            .stage(StageDef::new("closed", |_| {
                StageActions::new().goes_to("open", "opened")
            }))
            .stage(StageDef::new("opened", |_| {
                StageActions::new()
                    .goes_to("close", "closed")
                    .goes_to("leave", "nowhere")
            }))
            .initial_stage(Stage::named("closed"))
            .build()
            .unwrap();
        StateMachine::create(def).unwrap()
    }

    fn stage_names(machine: &StateMachine) -> Vec<String> {
        machine
            .events()
            .into_iter()
            .filter(|event| event.kind == EventKind::Stage)
            .map(|event| event.stage_name)
            .collect()
    }

    #[test]
    fn boot_runs_through_init_and_start() {
        let machine = door();

        let log: Vec<_> = machine
            .events()
            .into_iter()
            .map(|event| (event.stage_name, event.action_name))
            .collect();

        assert_eq!(
            log,
            vec![
                ("init".to_string(), "onInit".to_string()),
                ("init".to_string(), "doStart".to_string()),
                ("start".to_string(), "onStart".to_string()),
                ("start".to_string(), "doClosed".to_string()),
                ("closed".to_string(), "onClosed".to_string()),
            ]
        );
        assert_eq!(machine.status(), MachineStatus::Running);
        assert!(machine.transaction_id().is_none());
    }

    #[test]
    fn machine_without_initial_stage_rests_at_start() {
        let machine =
            StateMachine::create(StateMachineDefBuilder::new("bare").build().unwrap()).unwrap();

        assert_eq!(machine.current_stage().as_deref(), Some(START));
        assert_eq!(machine.stage_names(), vec!["init", "start", "stop"]);
    }

    #[test]
    fn actions_drive_transitions() {
        let machine = door();

        machine.actions().unwrap().call("open").unwrap();
        machine.actions().unwrap().call("close").unwrap();

        assert_eq!(
            stage_names(&machine),
            vec!["init", "start", "closed", "opened", "closed"]
        );
    }

    #[test]
    fn action_payload_is_recorded() {
        let machine = door();

        machine
            .actions()
            .unwrap()
            .invoke("open", Some(json!({"by": "alice"})))
            .unwrap();

        let events = machine.events();
        let action = &events[events.len() - 2];
        let stage = &events[events.len() - 1];
        assert_eq!(action.action_name, "open");
        assert_eq!(action.payload, Some(json!({"by": "alice"})));
        assert_eq!(stage.stage_name, "opened");
        assert_eq!(stage.payload, Some(json!({"by": "alice"})));
    }

    #[test]
    fn undeclared_action_is_rejected() {
        let machine = door();
        let before = machine.events().len();

        let result = machine.actions().unwrap().call("close");

        assert!(matches!(result, Err(MachineError::UnknownAction { .. })));
        assert_eq!(machine.events().len(), before);
    }

    #[test]
    fn action_to_unknown_stage_is_rejected_without_events() {
        let machine = door();
        machine.actions().unwrap().call("open").unwrap();
        let before = machine.events().len();

        let result = machine.actions().unwrap().call("leave");

        assert!(matches!(result, Err(MachineError::UnknownStage { .. })));
        assert_eq!(machine.events().len(), before);
    }

    #[test]
    fn request_stage_rejects_unknown_stage() {
        let machine = door();
        let before = machine.events().len();

        let result = machine.request_stage(Stage::named("attic"));

        assert!(matches!(result, Err(MachineError::UnknownStage { .. })));
        assert_eq!(machine.events().len(), before);
    }

    #[test]
    fn stop_shuts_the_machine_down() {
        let machine = door();

        machine.stop().unwrap();

        assert!(machine.is_closed());
        assert_eq!(machine.status(), MachineStatus::Stopped);
        assert_eq!(machine.current_stage().as_deref(), Some(STOP));
        assert!(matches!(
            machine.request_stage(Stage::named("closed")),
            Err(MachineError::Closed { .. })
        ));
        assert!(matches!(machine.shutdown(), Err(MachineError::Closed { .. })));
    }

    #[test]
    fn listeners_and_interceptors_fire_in_order() {
        let machine = door();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let listener_seen = Rc::clone(&seen);
        machine
            .add_listener(SmListener::named("listener").on_stage("opened", move |_, params| {
                listener_seen
                    .borrow_mut()
                    .push(format!("listener:{}", params.event_name));
                Ok(())
            }))
            .unwrap();
        let interceptor_seen = Rc::clone(&seen);
        machine
            .add_interceptor(SmListener::named("interceptor").on_stage("opened", move |_, _| {
                interceptor_seen.borrow_mut().push("interceptor".to_string());
                Ok(())
            }))
            .unwrap();

        machine.actions().unwrap().call("open").unwrap();

        assert_eq!(*seen.borrow(), vec!["interceptor", "listener:onOpened"]);
    }

    #[test]
    fn once_listener_fires_once() {
        let machine = door();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);

        machine
            .add_listener_with_type(
                SmListener::new().on_action("open", move |_, _| {
                    counter.set(counter.get() + 1);
                    Ok(())
                }),
                ListenerType::Once,
            )
            .unwrap();

        for _ in 0..2 {
            machine.actions().unwrap().call("open").unwrap();
            machine.actions().unwrap().call("close").unwrap();
        }

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn listener_requests_run_after_the_current_reactions() {
        let machine = door();
        machine
            .add_listener(SmListener::new().on_stage("opened", |actions, _| {
                actions.call("close")?;
                Ok(())
            }))
            .unwrap();

        machine.actions().unwrap().call("open").unwrap();

        assert_eq!(
            stage_names(&machine),
            vec!["init", "start", "closed", "opened", "closed"]
        );
        assert_eq!(machine.current_stage().as_deref(), Some("closed"));
    }

    #[test]
    fn failing_listener_surfaces_transaction_failure() {
        let machine = door();
        machine
            .add_listener(SmListener::named("grumpy").on_action("open", |_, _| {
                Err(anyhow::anyhow!("door is stuck"))
            }))
            .unwrap();

        let error = machine.actions().unwrap().call("open").unwrap_err();

        let failure = error.transaction().and_then(|it| it.failure()).unwrap();
        assert_eq!(failure.transaction_id, "/=>open");
        assert_eq!(failure.failing().unwrap().failed_reaction.as_deref(), Some("grumpy"));
        assert_eq!(failure.source.to_string(), "door is stuck");
        assert_eq!(machine.current_stage().as_deref(), Some("closed"));
    }

    #[test]
    fn trace_entries_cover_the_lifecycle() {
        let sink = Rc::new(MemorySink::new());
        let def = StateMachineDefBuilder::new("traced")
            .stage(StageDef::terminal("only"))
            .initial_stage(Stage::named("only"))
            .trace_sink(sink.clone())
            .build()
            .unwrap();

        let machine = StateMachine::create(def).unwrap();
        machine.shutdown().unwrap();

        let kinds: Vec<_> = sink.entries().iter().map(|it| it.event_type).collect();
        assert_eq!(kinds.first(), Some(&EventType::Init));
        assert!(kinds.contains(&EventType::Proxy));
        assert!(kinds.contains(&EventType::Reaction));
        assert_eq!(kinds.last(), Some(&EventType::Shutdown));
        assert!(sink
            .of_type(EventType::Stage)
            .iter()
            .all(|entry| entry.transaction_id.is_some()));
    }

    #[test]
    fn closed_machine_rejects_registration() {
        let machine = door();
        machine.shutdown().unwrap();

        assert!(machine.add_listener(SmListener::new()).is_err());
        assert!(machine.add_interceptor(SmListener::new()).is_err());
        assert!(machine
            .fork(Stage::named("closed"), |_, _| Ok(()), Vec::new())
            .is_err());
    }
}
