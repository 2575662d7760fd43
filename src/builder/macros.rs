//! Macros for ergonomic stage construction.

/// Build a [`StageActions`](crate::core::StageActions) record where every
/// action leads to a fixed stage, carrying its payload along.
///
/// # Example
///
/// ```
/// use stagecraft::stage_actions;
///
/// let actions = stage_actions! {
///     startForking => forking,
///     stop => stop,
/// };
///
/// assert_eq!(actions.names().collect::<Vec<_>>(), vec!["startForking", "stop"]);
/// ```
#[macro_export]
macro_rules! stage_actions {
    ($($action:ident => $target:ident),* $(,)?) => {
        $crate::core::StageActions::new()
            $(.goes_to(stringify!($action), stringify!($target)))*
    };
}

/// Define a stage whose actions all lead to fixed stages.
///
/// # Example
///
/// ```
/// use stagecraft::routed_stage;
///
/// let idle = routed_stage!(idle { startForking => forking });
/// assert_eq!(idle.name(), "idle");
/// assert_eq!(idle.instantiate(None).len(), 1);
/// ```
#[macro_export]
macro_rules! routed_stage {
    ($name:ident { $($action:ident => $target:ident),* $(,)? }) => {
        $crate::core::StageDef::new(stringify!($name), |_| {
            $crate::stage_actions!($($action => $target),*)
        })
    };
}
