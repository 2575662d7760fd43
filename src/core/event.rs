//! Append-only event log of a machine.
//!
//! Every processed stage arrival and action is recorded, in order, as an
//! immutable event. Events may point at a child machine forked at that
//! point; its log is embedded when the thread is serialized.

use super::stage::{Payload, Stage};
use crate::machine::StateMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an event records a stage arrival or an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stage,
    Action,
}

/// One processed stage arrival or action.
#[derive(Clone, Debug)]
pub struct SmEvent {
    pub stage_name: String,
    pub action_name: String,
    pub kind: EventKind,
    pub payload: Option<Payload>,
    /// Child machine spawned at this point
    pub fork: Option<StateMachine>,
    pub recorded_at: DateTime<Utc>,
}

/// Plain, restartable snapshot of an event, fork logs included.
///
/// # Example
///
/// ```rust
/// use stagecraft::core::{EventKind, SerializedEvent};
/// use chrono::Utc;
///
/// let event = SerializedEvent {
///     stage_name: "idle".to_string(),
///     action_name: "onIdle".to_string(),
///     kind: EventKind::Stage,
///     payload: None,
///     fork: None,
///     recorded_at: Utc::now(),
/// };
///
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["stageName"], "idle");
/// assert!(json.get("fork").is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedEvent {
    pub stage_name: String,
    pub action_name: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<Vec<SerializedEvent>>,
    pub recorded_at: DateTime<Utc>,
}

/// Ordered, append-only log of a machine's events.
///
/// The current event is always the last one appended.
#[derive(Debug, Default)]
pub struct EventThread {
    events: Vec<SmEvent>,
}

impl EventThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the arrival at `stage` and return the stage unchanged.
    ///
    /// The event payload is `payload` when given, the stage requirements
    /// otherwise.
    pub fn add_stage_event(
        &mut self,
        stage: Stage,
        action_name: &str,
        payload: Option<Payload>,
        fork: Option<StateMachine>,
    ) -> Stage {
        let payload = payload.or_else(|| stage.requirements.clone());
        self.push(EventKind::Stage, &stage.name, action_name, payload, fork);
        stage
    }

    /// Record `action_name` performed at the current stage.
    ///
    /// Without a payload the current stage requirements are carried over.
    pub fn add_action_event(
        &mut self,
        action_name: &str,
        payload: Option<Payload>,
        fork: Option<StateMachine>,
    ) -> Stage {
        let current = self.current_event();
        let stage = Stage {
            name: current
                .map(|event| event.stage_name.clone())
                .unwrap_or_default(),
            requirements: payload.or_else(|| current.and_then(|event| event.payload.clone())),
        };
        self.push(
            EventKind::Action,
            &stage.name,
            action_name,
            stage.requirements.clone(),
            fork,
        );
        stage
    }

    fn push(
        &mut self,
        kind: EventKind,
        stage_name: &str,
        action_name: &str,
        payload: Option<Payload>,
        fork: Option<StateMachine>,
    ) {
        self.events.push(SmEvent {
            stage_name: stage_name.to_string(),
            action_name: action_name.to_string(),
            kind,
            payload,
            fork,
            recorded_at: Utc::now(),
        });
    }

    /// The most recently appended event.
    pub fn current_event(&self) -> Option<&SmEvent> {
        self.events.last()
    }

    pub fn current_stage_name(&self) -> Option<&str> {
        self.current_event().map(|event| event.stage_name.as_str())
    }

    pub fn current_action_name(&self) -> Option<&str> {
        self.current_event().map(|event| event.action_name.as_str())
    }

    pub fn events(&self) -> &[SmEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Snapshot the log; forked children are serialized recursively.
    pub fn serialize(&self) -> Vec<SerializedEvent> {
        self.events
            .iter()
            .map(|event| SerializedEvent {
                stage_name: event.stage_name.clone(),
                action_name: event.action_name.clone(),
                kind: event.kind,
                payload: event.payload.clone(),
                fork: event.fork.as_ref().map(StateMachine::events),
                recorded_at: event.recorded_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_thread_is_empty() {
        let thread = EventThread::new();
        assert!(thread.is_empty());
        assert!(thread.current_event().is_none());
        assert!(thread.serialize().is_empty());
    }

    #[test]
    fn add_stage_event_returns_stage_and_becomes_current() {
        let mut thread = EventThread::new();
        let stage = Stage::with_requirements("idle", json!({"n": 1}));

        let returned = thread.add_stage_event(stage.clone(), "onIdle", None, None);

        assert_eq!(returned, stage);
        assert_eq!(thread.current_stage_name(), Some("idle"));
        assert_eq!(thread.current_action_name(), Some("onIdle"));
        assert_eq!(thread.current_event().unwrap().payload, Some(json!({"n": 1})));
    }

    #[test]
    fn explicit_payload_overrides_requirements() {
        let mut thread = EventThread::new();
        thread.add_stage_event(
            Stage::with_requirements("idle", json!(1)),
            "onIdle",
            Some(json!(2)),
            None,
        );

        assert_eq!(thread.current_event().unwrap().payload, Some(json!(2)));
    }

    #[test]
    fn action_event_derives_stage_from_current_event() {
        let mut thread = EventThread::new();
        thread.add_stage_event(Stage::named("idle"), "onIdle", None, None);

        let stage = thread.add_action_event("startForking", Some(json!("go")), None);

        assert_eq!(stage, Stage::with_requirements("idle", json!("go")));
        let current = thread.current_event().unwrap();
        assert_eq!(current.kind, EventKind::Action);
        assert_eq!(current.stage_name, "idle");
        assert_eq!(current.action_name, "startForking");
    }

    #[test]
    fn action_event_without_payload_keeps_stage_requirements() {
        let mut thread = EventThread::new();
        thread.add_stage_event(Stage::with_requirements("idle", json!(7)), "onIdle", None, None);

        thread.add_action_event("poke", None, None);

        assert_eq!(thread.current_event().unwrap().payload, Some(json!(7)));
    }

    #[test]
    fn serialize_preserves_append_order() {
        let mut thread = EventThread::new();
        thread.add_stage_event(Stage::named("init"), "onInit", None, None);
        thread.add_action_event("doStart", None, None);
        thread.add_stage_event(Stage::named("start"), "onStart", None, None);

        let names: Vec<_> = thread
            .serialize()
            .into_iter()
            .map(|event| (event.stage_name, event.action_name, event.kind))
            .collect();

        assert_eq!(
            names,
            vec![
                ("init".to_string(), "onInit".to_string(), EventKind::Stage),
                ("init".to_string(), "doStart".to_string(), EventKind::Action),
                ("start".to_string(), "onStart".to_string(), EventKind::Stage),
            ]
        );
    }

    #[test]
    fn serialized_events_round_trip_through_json() {
        let mut thread = EventThread::new();
        thread.add_stage_event(Stage::with_requirements("idle", json!([1, 2])), "onIdle", None, None);

        let events = thread.serialize();
        let json = serde_json::to_string(&events).unwrap();
        let restored: Vec<SerializedEvent> = serde_json::from_str(&json).unwrap();

        assert_eq!(events, restored);
        assert!(json.contains(r#""kind":"stage""#));
    }
}
