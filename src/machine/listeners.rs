//! Listener and interceptor bundles and their registries.

use super::actions::Actions;
use super::state_machine::StateMachine;
use crate::core::{event_name, Payload};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// What a callback sees besides the actions of the stage it fired for.
#[derive(Clone, Debug)]
pub struct SmEventParams {
    pub sm: StateMachine,
    pub event_name: String,
    pub payload: Option<Payload>,
}

/// Callback invoked when its event name fires.
pub type SmEventCallback = Rc<dyn Fn(&Actions, &SmEventParams) -> anyhow::Result<()>>;

/// Whether a registered bundle survives its first match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenerType {
    #[default]
    Always,
    /// Removed after the first dispatch that matches it
    Once,
}

/// Named bundle of callbacks keyed by event name (`onIdle`, `onStartForking`).
///
/// # Example
///
/// ```rust
/// use stagecraft::machine::SmListener;
///
/// let listener = SmListener::new()
///     .on_stage("idle", |_actions, _params| Ok(()))
///     .on_action("startForking", |_actions, _params| Ok(()));
///
/// assert_eq!(listener.metadata(), "onIdle,onStartForking");
/// assert!(listener.callback("onIdle").is_some());
/// ```
#[derive(Clone, Default)]
pub struct SmListener {
    metadata: Option<String>,
    callbacks: BTreeMap<String, SmEventCallback>,
}

impl SmListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle with an explicit description used in traces and reports.
    pub fn named(metadata: impl Into<String>) -> Self {
        Self {
            metadata: Some(metadata.into()),
            callbacks: BTreeMap::new(),
        }
    }

    /// Register `callback` under a raw event name.
    pub fn on<F>(mut self, event_name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Actions, &SmEventParams) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.insert(event_name.into(), Rc::new(callback));
        self
    }

    /// Register `callback` for arrivals at `stage`.
    pub fn on_stage<F>(self, stage: &str, callback: F) -> Self
    where
        F: Fn(&Actions, &SmEventParams) -> anyhow::Result<()> + 'static,
    {
        self.on(event_name("on", stage), callback)
    }

    /// Register `callback` for the action `action`.
    pub fn on_action<F>(self, action: &str, callback: F) -> Self
    where
        F: Fn(&Actions, &SmEventParams) -> anyhow::Result<()> + 'static,
    {
        self.on(event_name("on", action), callback)
    }

    pub fn metadata(&self) -> String {
        match &self.metadata {
            Some(metadata) => metadata.clone(),
            None => self.event_names().collect::<Vec<_>>().join(","),
        }
    }

    pub fn callback(&self, event_name: &str) -> Option<&SmEventCallback> {
        self.callbacks.get(event_name)
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }
}

impl fmt::Debug for SmListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmListener")
            .field("metadata", &self.metadata())
            .finish()
    }
}

struct Registered {
    listener: SmListener,
    kind: ListenerType,
}

/// Ordered registry; dispatch walks bundles in registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: RefCell<Vec<Registered>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: SmListener, kind: ListenerType) {
        self.entries
            .borrow_mut()
            .push(Registered { listener, kind });
    }

    /// Callbacks matching `event_name` with their bundle metadata.
    /// Matching `Once` bundles are dropped from the registry.
    pub(crate) fn matching(&self, event_name: &str) -> Vec<(String, SmEventCallback)> {
        let mut matched = Vec::new();
        self.entries.borrow_mut().retain(|entry| {
            match entry.listener.callback(event_name) {
                Some(callback) => {
                    matched.push((entry.listener.metadata(), Rc::clone(callback)));
                    entry.kind == ListenerType::Always
                }
                None => true,
            }
        });
        matched
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Actions, _: &SmEventParams) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn metadata_defaults_to_event_names() {
        let listener = SmListener::new().on("onB", noop).on("onA", noop);
        assert_eq!(listener.metadata(), "onA,onB");

        let named = SmListener::named("::init=>doStart").on("onInit", noop);
        assert_eq!(named.metadata(), "::init=>doStart");
    }

    #[test]
    fn matching_follows_registration_order() {
        let registry = ListenerRegistry::default();
        registry.add(SmListener::named("first").on("onIdle", noop), ListenerType::Always);
        registry.add(SmListener::named("other").on("onBusy", noop), ListenerType::Always);
        registry.add(SmListener::named("second").on("onIdle", noop), ListenerType::Always);

        let names: Vec<_> = registry
            .matching("onIdle")
            .into_iter()
            .map(|(metadata, _)| metadata)
            .collect();

        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn once_listeners_fire_a_single_time() {
        let registry = ListenerRegistry::default();
        registry.add(SmListener::named("once").on("onIdle", noop), ListenerType::Once);

        assert_eq!(registry.matching("onBusy").len(), 0);
        assert_eq!(registry.matching("onIdle").len(), 1);
        assert_eq!(registry.matching("onIdle").len(), 0);
        assert_eq!(registry.len(), 0);
    }
}
