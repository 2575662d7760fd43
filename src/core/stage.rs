//! Stages, stage definitions and the capability record a stage exposes.
//!
//! A stage is a named point in a machine's lifecycle. Its definition owns
//! the logic that, given the stage requirements, declares which actions can
//! be performed from there and where each one leads.

use crate::machine::Actions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Data carried into a stage or supplied to an action.
pub type Payload = Value;

/// A named point in a machine's lifecycle together with the payload
/// carried into it.
///
/// # Example
///
/// ```rust
/// use stagecraft::core::Stage;
/// use serde_json::json;
///
/// let stage = Stage::with_requirements("loaded", json!({"items": 3}));
/// assert_eq!(stage.name, "loaded");
/// assert_eq!(stage.event_name(), "onLoaded");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique name of the stage within its machine
    pub name: String,
    /// Payload carried into the stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Payload>,
}

impl Stage {
    /// Create a stage without requirements.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: None,
        }
    }

    /// Create a stage carrying `requirements`.
    pub fn with_requirements(name: impl Into<String>, requirements: Payload) -> Self {
        Self {
            name: name.into(),
            requirements: Some(requirements),
        }
    }

    /// Name of the listener event fired when the stage is reached.
    pub fn event_name(&self) -> String {
        event_name("on", &self.name)
    }
}

/// Derive a callback key by prefixing the PascalCase form of `name`.
///
/// `event_name("on", "startForking")` is `onStartForking`; separators
/// (`_`, `-`, whitespace) start a new word.
pub fn event_name(prefix: &str, name: &str) -> String {
    let mut derived = String::with_capacity(prefix.len() + name.len());
    derived.push_str(prefix);
    for word in name
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            derived.extend(first.to_uppercase());
            derived.push_str(chars.as_str());
        }
    }
    derived
}

/// Action logic: maps the action payload to the destination stage.
pub type ActionFn = Rc<dyn Fn(Option<&Payload>) -> Stage>;

/// Typed capability record: the actions a stage declares.
///
/// Each entry is an action name and the function producing the destination
/// stage. The engine wraps every declared entry into a callable proxy, see
/// [`Actions`].
///
/// # Example
///
/// ```rust
/// use stagecraft::core::{Stage, StageActions};
///
/// let actions = StageActions::new()
///     .goes_to("startForking", "forking")
///     .action("load", |payload| Stage {
///         name: "loaded".to_string(),
///         requirements: payload.cloned(),
///     });
///
/// assert_eq!(actions.names().collect::<Vec<_>>(), vec!["startForking", "load"]);
/// ```
#[derive(Clone, Default)]
pub struct StageActions {
    actions: Vec<(String, ActionFn)>,
}

impl StageActions {
    /// Create an empty capability record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an action. Declaring the same name twice replaces the logic.
    pub fn action<F>(mut self, name: impl Into<String>, logic: F) -> Self
    where
        F: Fn(Option<&Payload>) -> Stage + 'static,
    {
        let name = name.into();
        let logic: ActionFn = Rc::new(logic);
        match self.actions.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = logic,
            None => self.actions.push((name, logic)),
        }
        self
    }

    /// Declare an action that always leads to `target`, carrying the action
    /// payload as the target's requirements.
    pub fn goes_to(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        self.action(name, move |payload| Stage {
            name: target.clone(),
            requirements: payload.cloned(),
        })
    }

    /// Declared action names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|(name, _)| name.as_str())
    }

    /// Logic of the action `name`, if declared.
    pub fn get(&self, name: &str) -> Option<&ActionFn> {
        self.actions
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, logic)| logic)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for StageActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Stage constructor: builds the capability record from the requirements.
pub type StageLogic = Rc<dyn Fn(Option<&Payload>) -> StageActions>;

/// Work a forked child runs once it reaches a deferred stage.
pub type Deferrer = Rc<dyn Fn(&Actions, Option<&Payload>) -> anyhow::Result<()>>;

/// Metadata marking a stage as deferred: reaching it forks a child machine.
#[derive(Clone, Default)]
pub struct DeferredInfo {
    /// Work run inside the child; without one no child is forked automatically
    pub deferrer: Option<Deferrer>,
    /// Ancestor stages the child may move into to join back
    pub joins_into: Vec<String>,
}

impl DeferredInfo {
    pub fn new<I, S>(joins_into: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deferrer: None,
            joins_into: joins_into.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_deferrer<F>(mut self, deferrer: F) -> Self
    where
        F: Fn(&Actions, Option<&Payload>) -> anyhow::Result<()> + 'static,
    {
        self.deferrer = Some(Rc::new(deferrer));
        self
    }
}

impl fmt::Debug for DeferredInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredInfo")
            .field("deferrer", &self.deferrer.is_some())
            .field("joins_into", &self.joins_into)
            .finish()
    }
}

/// Definition of a stage: its name, its logic and optional deferral.
///
/// Definitions are immutable once the owning machine is constructed.
#[derive(Clone)]
pub struct StageDef {
    name: String,
    logic: StageLogic,
    deferred_info: Option<DeferredInfo>,
}

impl StageDef {
    /// Define a stage from its constructor logic.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagecraft::core::{StageActions, StageDef};
    ///
    /// let idle = StageDef::new("idle", |_| StageActions::new().goes_to("start", "running"));
    /// assert_eq!(idle.name(), "idle");
    /// assert_eq!(idle.instantiate(None).len(), 1);
    /// ```
    pub fn new<F>(name: impl Into<String>, logic: F) -> Self
    where
        F: Fn(Option<&Payload>) -> StageActions + 'static,
    {
        Self::from_logic(name, Rc::new(logic))
    }

    /// Define a stage that declares no actions.
    pub fn terminal(name: impl Into<String>) -> Self {
        Self::new(name, |_| StageActions::new())
    }

    pub(crate) fn from_logic(name: impl Into<String>, logic: StageLogic) -> Self {
        Self {
            name: name.into(),
            logic,
            deferred_info: None,
        }
    }

    /// Mark the stage as deferred.
    pub fn deferred(mut self, info: DeferredInfo) -> Self {
        self.deferred_info = Some(info);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deferred_info(&self) -> Option<&DeferredInfo> {
        self.deferred_info.as_ref()
    }

    /// Run the stage constructor with `requirements`.
    pub fn instantiate(&self, requirements: Option<&Payload>) -> StageActions {
        (self.logic)(requirements)
    }

    pub(crate) fn logic(&self) -> StageLogic {
        Rc::clone(&self.logic)
    }

    /// Short description used in diagnostics, e.g. `forking[DEFERRED]`.
    pub fn describe(&self) -> String {
        match self.deferred_info {
            Some(_) => format!("{}[DEFERRED]", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("name", &self.name)
            .field("deferred_info", &self.deferred_info)
            .finish()
    }
}

/// Per-machine registry of stage definitions keyed by name.
///
/// Later definitions overwrite earlier ones with the same name.
#[derive(Clone, Debug, Default)]
pub struct StageGraph {
    defs: BTreeMap<String, StageDef>,
}

impl StageGraph {
    pub fn from_defs<I>(defs: I) -> Self
    where
        I: IntoIterator<Item = StageDef>,
    {
        let defs = defs
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        Self { defs }
    }

    pub fn get(&self, name: &str) -> Option<&StageDef> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Registered stage names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.defs.keys().cloned().collect()
    }

    pub fn defs(&self) -> impl Iterator<Item = &StageDef> {
        self.defs.values()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
