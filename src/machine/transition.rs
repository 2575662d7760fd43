//! Requested transitions.

use crate::core::{event_name, Payload, Stage};
use serde::{Deserialize, Serialize};

/// The causal step "perform `action_name` with `payload`, landing in `into`".
///
/// Built by the actions proxy (or by the engine for system moves) and
/// consumed once by the transaction tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmTransition {
    pub action_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    pub into: Stage,
}

impl SmTransition {
    pub fn new(action_name: impl Into<String>, into: Stage) -> Self {
        Self {
            action_name: action_name.into(),
            payload: None,
            into,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Listener key fired for this action, e.g. `onStartForking`.
    pub fn event_name(&self) -> String {
        event_name("on", &self.action_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_name_derives_from_action() {
        let transition = SmTransition::new("startForking", Stage::named("forking"));
        assert_eq!(transition.event_name(), "onStartForking");
    }

    #[test]
    fn payload_is_optional_on_the_wire() {
        let bare = SmTransition::new("go", Stage::named("there"));
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["actionName"], "go");

        let loaded = bare.with_payload(json!({"id": 1}));
        assert_eq!(loaded.payload, Some(json!({"id": 1})));
    }
}
