//! Transaction requests the machine submits to its tree.
//!
//! Naming follows the trace keys used in reports: `::<stage>` for an
//! arrival, `=><action>` for an action, `::<stage>[JOIN]` for a forked
//! child moving back into an ancestor stage.

use super::actions::Actions;
use super::error::{lift, MachineError};
use super::listeners::SmEventParams;
use super::state_machine::StateMachine;
use super::trace::EventType;
use super::transition::SmTransition;
use crate::core::{event_name, DeferredInfo, Payload, Stage};
use crate::transaction::{reaction, Reaction, TransactionRequest};

impl StateMachine {
    /// Arrival at a local stage.
    pub(super) fn stage_transaction(&self, stage: Stage) -> TransactionRequest {
        let arriving = self.clone();
        let reacting = self.clone();
        let arrived = stage.clone();

        TransactionRequest::new(format!("::{}", stage.name))
            .on_start(format!("::{}->arrive", stage.name), move || {
                arriving.arrive(arrived)
            })
            .reactions(move || reacting.stage_reactions(&stage))
    }

    /// Action followed by the arrival at its target.
    pub(super) fn action_transaction(&self, transition: SmTransition) -> TransactionRequest {
        let SmTransition {
            action_name,
            payload,
            into,
        } = transition;
        let event = event_name("on", &action_name);

        let performing = self.clone();
        let performed = action_name.clone();
        let recorded_payload = payload.clone();
        let reacting = self.clone();
        let target = into.clone();
        let chaining = self.clone();

        TransactionRequest::new(format!("=>{action_name}"))
            .on_start(format!("=>{action_name}->record"), move || {
                performing.perform(&performed, recorded_payload);
                Ok(())
            })
            .reactions(move || reacting.action_reactions(&event, &target, payload))
            .chain(format!("=>{action_name}::{}", into.name), move || {
                // a reaction shut the machine down
                if chaining.is_closed() {
                    return Ok(None);
                }
                let next = chaining.arrival_transaction(into).map_err(lift)?;
                Ok(Some(next))
            })
    }

    /// Arrival at `into`: a stage transaction when the stage is local, a
    /// join when an ancestor owns it.
    pub(super) fn arrival_transaction(
        &self,
        into: Stage,
    ) -> Result<TransactionRequest, MachineError> {
        let core = self.core();
        if core.graph.contains(&into.name) {
            return Ok(self.stage_transaction(into));
        }
        if core.ancestors.iter().any(|graph| graph.contains(&into.name)) {
            return Ok(self.join_transaction(into));
        }
        Err(self.unknown_stage(&into.name))
    }

    fn join_transaction(&self, into: Stage) -> TransactionRequest {
        let name = into.name.clone();
        let recording = self.clone();
        let recorded = into.clone();
        let joining = self.clone();

        TransactionRequest::new(format!("::{name}[JOIN]"))
            .on_start(format!("::{name}[JOIN]->record"), move || {
                recording.record_join(recorded);
                Ok(())
            })
            .reactions(move || {
                let closing = joining.clone();
                vec![
                    reaction(format!("[JOIN]::{name}"), move || {
                        let owner = joining
                            .ancestor_owning(&into.name)
                            .ok_or_else(|| joining.unknown_stage(&into.name))?;
                        owner.join(into).map_err(lift)
                    }),
                    reaction(format!("::{name}[JOIN]->shutdown"), move || {
                        closing.shutdown().map_err(lift)
                    }),
                ]
            })
    }

    fn arrive(&self, stage: Stage) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let core = self.core();
        let def = core
            .graph
            .get(&stage.name)
            .ok_or_else(|| self.unknown_stage(&stage.name))?;

        let event = stage.event_name();
        let stage = core
            .thread
            .borrow_mut()
            .add_stage_event(stage, &event, None, None);
        let actions = def.instantiate(stage.requirements.as_ref());
        *core.current_actions.borrow_mut() = Some(Actions::new(self, stage, actions));

        self.trace(EventType::Stage, event);
        Ok(())
    }

    fn perform(&self, action_name: &str, payload: Option<Payload>) {
        if self.is_closed() {
            return;
        }
        self.core()
            .thread
            .borrow_mut()
            .add_action_event(action_name, payload, None);
        self.trace(EventType::Action, format!("=>{action_name}"));
    }

    fn record_join(&self, stage: Stage) {
        if self.is_closed() {
            return;
        }
        let event = stage.event_name();
        let detail = format!("[JOIN]::{}", stage.name);
        self.core()
            .thread
            .borrow_mut()
            .add_stage_event(stage, &event, None, None);
        self.trace(EventType::ForkJoin, detail);
    }

    fn stage_reactions(&self, stage: &Stage) -> Vec<Reaction> {
        if self.is_closed() {
            return Vec::new();
        }
        let Some(actions) = self.actions() else {
            return Vec::new();
        };
        let mut reactions =
            self.reactions_for(&stage.event_name(), &actions, stage.requirements.clone());

        let deferred = self
            .core()
            .graph
            .get(&stage.name)
            .and_then(|def| def.deferred_info())
            .cloned();
        if let Some(DeferredInfo {
            deferrer: Some(deferrer),
            joins_into,
        }) = deferred
        {
            let machine = self.clone();
            let next = stage.clone();
            reactions.push(reaction(
                format!("::{}->[DEFERRED]", stage.name),
                move || {
                    machine
                        .fork(next, move |actions, payload| deferrer(actions, payload), joins_into)
                        .map_err(lift)?;
                    Ok(())
                },
            ));
        }
        reactions
    }

    /// Listeners of an action see the actions of its target. A target owned
    /// by an ancestor yields an empty proxy bound to this machine, so a
    /// child only reaches the ancestor through its join.
    fn action_reactions(
        &self,
        event: &str,
        into: &Stage,
        payload: Option<Payload>,
    ) -> Vec<Reaction> {
        if self.is_closed() {
            return Vec::new();
        }
        let stage_actions = self
            .core()
            .graph
            .get(&into.name)
            .map(|def| def.instantiate(into.requirements.as_ref()))
            .unwrap_or_default();
        let actions = Actions::new(self, into.clone(), stage_actions);
        self.reactions_for(event, &actions, payload)
    }

    /// Interceptors then listeners matching `event`, each traced before it
    /// runs.
    fn reactions_for(
        &self,
        event: &str,
        actions: &Actions,
        payload: Option<Payload>,
    ) -> Vec<Reaction> {
        let params = SmEventParams {
            sm: self.clone(),
            event_name: event.to_string(),
            payload,
        };
        let core = self.core();
        let interceptors = core.interceptors.matching(event);
        let listeners = core.listeners.matching(event);

        interceptors
            .into_iter()
            .chain(listeners)
            .map(|(metadata, callback)| {
                let machine = self.clone();
                let actions = actions.clone();
                let params = params.clone();
                let detail = format!("{} ({})", metadata, event);
                reaction(metadata, move || {
                    machine.trace(EventType::Reaction, detail);
                    callback(&actions, &params).map_err(lift)
                })
            })
            .collect()
    }
}
