//! Build errors for machine definitions.

use thiserror::Error;

/// One problem found in a machine definition.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DefinitionViolation {
    #[error("Machine name is empty. Call StateMachineDefBuilder::new with a name")]
    EmptyMachineName,

    #[error("A stage has an empty name")]
    EmptyStageName,

    #[error("Initial stage {stage} is not registered. Add it with .stage(def)")]
    UnknownInitialStage { stage: String },

    #[error("Deferred stage {stage} lists an empty joins_into entry")]
    EmptyJoinTarget { stage: String },
}

/// Errors that can occur when building machine definitions.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Every violation found, not just the first one.
    #[error("Invalid state machine definition: {}", describe(.0))]
    InvalidDefinition(Vec<DefinitionViolation>),
}

impl BuildError {
    pub fn violations(&self) -> &[DefinitionViolation] {
        match self {
            Self::InvalidDefinition(violations) => violations,
        }
    }
}

fn describe(violations: &[DefinitionViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
