//! Builder API for ergonomic machine definitions.
//!
//! Definitions are validated as a whole: the builder reports every problem
//! it finds rather than stopping at the first one.

pub mod error;
pub mod machine;
pub mod macros;

pub use error::{BuildError, DefinitionViolation};
pub use machine::{StateMachineDef, StateMachineDefBuilder};

use crate::core::{DeferredInfo, Payload, StageActions, StageDef};
use crate::machine::Actions;

/// Define a deferred stage: reaching it forks a child machine that runs
/// `deferrer` and may join back into any of `joins_into`.
///
/// # Example
///
/// ```
/// use stagecraft::builder::deferred_stage;
/// use stagecraft::stage_actions;
///
/// let forking = deferred_stage(
///     "forking",
///     |_| stage_actions! { joinBack => idle },
///     ["idle"],
///     |actions, _payload| {
///         actions.call("joinBack")?;
///         Ok(())
///     },
/// );
///
/// assert_eq!(forking.describe(), "forking[DEFERRED]");
/// ```
pub fn deferred_stage<L, I, S, D>(name: &str, logic: L, joins_into: I, deferrer: D) -> StageDef
where
    L: Fn(Option<&Payload>) -> StageActions + 'static,
    I: IntoIterator<Item = S>,
    S: Into<String>,
    D: Fn(&Actions, Option<&Payload>) -> anyhow::Result<()> + 'static,
{
    StageDef::new(name, logic).deferred(DeferredInfo::new(joins_into).with_deferrer(deferrer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_stage_carries_deferrer_and_targets() {
        let def = deferred_stage("forking", |_| StageActions::new(), ["idle"], |_, _| Ok(()));

        let info = def.deferred_info().unwrap();
        assert!(info.deferrer.is_some());
        assert_eq!(info.joins_into, vec!["idle"]);
    }
}
