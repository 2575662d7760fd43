//! Builder for machine definitions.

use crate::builder::error::{BuildError, DefinitionViolation};
use crate::core::{Stage, StageDef};
use crate::machine::{ListenerType, SmListener, TraceSink, TracingSink, INIT, START, STOP};
use std::fmt;
use std::rc::Rc;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Validated description of a machine, consumed by
/// [`StateMachine::create`](crate::machine::StateMachine::create).
pub struct StateMachineDef {
    pub(crate) name: String,
    pub(crate) stages: Vec<StageDef>,
    pub(crate) initial_stage: Option<Stage>,
    pub(crate) listeners: Vec<(SmListener, ListenerType)>,
    pub(crate) interceptors: Vec<SmListener>,
    pub(crate) sink: Rc<dyn TraceSink>,
}

impl StateMachineDef {
    pub fn builder(name: impl Into<String>) -> StateMachineDefBuilder {
        StateMachineDefBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn initial_stage(&self) -> Option<&Stage> {
        self.initial_stage.as_ref()
    }
}

impl fmt::Debug for StateMachineDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachineDef")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("initial_stage", &self.initial_stage)
            .field("listeners", &self.listeners.len())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Builder for machine definitions with a fluent API.
pub struct StateMachineDefBuilder {
    name: String,
    stages: Vec<StageDef>,
    initial_stage: Option<Stage>,
    listeners: Vec<(SmListener, ListenerType)>,
    interceptors: Vec<SmListener>,
    sink: Option<Rc<dyn TraceSink>>,
}

impl StateMachineDefBuilder {
    /// Create a new builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            initial_stage: None,
            listeners: Vec::new(),
            interceptors: Vec::new(),
            sink: None,
        }
    }

    /// Register a stage. A later stage with the same name replaces it.
    pub fn stage(mut self, def: StageDef) -> Self {
        self.stages.push(def);
        self
    }

    /// Register several stages at once.
    pub fn stages(mut self, defs: impl IntoIterator<Item = StageDef>) -> Self {
        self.stages.extend(defs);
        self
    }

    /// Stage entered right after `start` (optional).
    pub fn initial_stage(mut self, stage: Stage) -> Self {
        self.initial_stage = Some(stage);
        self
    }

    pub fn listener(self, listener: SmListener) -> Self {
        self.listener_with_type(listener, ListenerType::Always)
    }

    pub fn listener_with_type(mut self, listener: SmListener, kind: ListenerType) -> Self {
        self.listeners.push((listener, kind));
        self
    }

    pub fn interceptor(mut self, interceptor: SmListener) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Diagnostics destination. Defaults to [`TracingSink`].
    pub fn trace_sink(mut self, sink: Rc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the definition, reporting every violation found.
    pub fn build(self) -> Result<StateMachineDef, BuildError> {
        match self.validate() {
            Validation::Success(()) => Ok(StateMachineDef {
                name: self.name,
                stages: self.stages,
                initial_stage: self.initial_stage,
                listeners: self.listeners,
                interceptors: self.interceptors,
                sink: self.sink.unwrap_or_else(|| Rc::new(TracingSink)),
            }),
            Validation::Failure(violations) => Err(BuildError::InvalidDefinition(
                violations.iter().cloned().collect(),
            )),
        }
    }

    fn validate(&self) -> Validation<(), NonEmptyVec<DefinitionViolation>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<DefinitionViolation>>> = Vec::new();

        checks.push(check(
            !self.name.trim().is_empty(),
            DefinitionViolation::EmptyMachineName,
        ));

        for def in &self.stages {
            checks.push(check(
                !def.name().is_empty(),
                DefinitionViolation::EmptyStageName,
            ));
            if let Some(info) = def.deferred_info() {
                for target in &info.joins_into {
                    checks.push(check(
                        !target.is_empty(),
                        DefinitionViolation::EmptyJoinTarget {
                            stage: def.name().to_string(),
                        },
                    ));
                }
            }
        }

        if let Some(initial) = &self.initial_stage {
            let known = [INIT, START, STOP].contains(&initial.name.as_str())
                || self.stages.iter().any(|def| def.name() == initial.name);
            checks.push(check(
                known,
                DefinitionViolation::UnknownInitialStage {
                    stage: initial.name.clone(),
                },
            ));
        }

        Validation::all_vec(checks).map(|_| ())
    }
}

fn check(
    holds: bool,
    violation: DefinitionViolation,
) -> Validation<(), NonEmptyVec<DefinitionViolation>> {
    if holds {
        Validation::success(())
    } else {
        Validation::fail(violation)
    }
}
