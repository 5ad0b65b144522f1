//! Terminator events: registration options and the adapter that derives
//! them from terminator entity changes and router presence.

use std::sync::{Arc, Weak};

use chrono::Utc;
use meshd_db::{ChangeKind, Db, DbError, EntityChangeState, EntityConstraint, MutateContext};
use meshd_event::{
    matches_handler, Event, EventHandler, HandlerRef, RouterEvent, RouterEventType, Subscriber,
    TerminatorEvent, TerminatorEventType, ROUTER_EVENT_NS, TERMINATOR_EVENT_NS,
};

use crate::dispatcher::{Dispatcher, TypeRegistrar};
use crate::error::DispatchError;
use crate::kinds::require_handler;
use crate::options::{bool_option, include_filter, Options};
use crate::topology::TerminatorInfo;
use crate::wrapper::{for_namespace, with_include};

/// Entity store the terminator adapter listens on.
pub const TERMINATOR_ENTITY_TYPE: &str = "terminator";

/// Drops model events emitted while this node was neither leader nor
/// leaderless. Router presence events always pass.
pub struct TerminatorEventFilter {
    wrapped: HandlerRef<TerminatorEvent>,
}

impl TerminatorEventFilter {
    pub fn new(wrapped: HandlerRef<TerminatorEvent>) -> Self {
        Self { wrapped }
    }
}

impl EventHandler<TerminatorEvent> for TerminatorEventFilter {
    fn accept(&self, event: &TerminatorEvent) {
        if !event.is_model_event() || event.propagate_indicator {
            self.wrapped.accept(event);
        }
    }

    fn is_wrapping(&self, handler: &HandlerRef<TerminatorEvent>) -> bool {
        matches_handler(&self.wrapped, handler)
    }
}

/// Options: `propagateAlways` and `include`.
pub struct TerminatorRegistrar;

impl TypeRegistrar for TerminatorRegistrar {
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError> {
        let handler = require_handler::<TerminatorEvent>(subscriber)?;
        let handler = for_namespace(event_type, handler);
        let propagate_always = bool_option(options, event_type, "propagateAlways")?;
        let include = include_filter(options, event_type, TerminatorEvent::EVENT_TYPES)?;

        let handler = with_include(include, handler);
        let handler: HandlerRef<TerminatorEvent> = if propagate_always {
            handler
        } else {
            Arc::new(TerminatorEventFilter::new(handler))
        };
        dispatcher.add_handler(handler);
        Ok(())
    }

    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>) {
        if let Some(handler) = TerminatorEvent::handler_of(subscriber) {
            dispatcher.remove_handler(&handler);
        }
    }
}

/// Turns committed terminator changes into terminator events.
pub(crate) struct TerminatorEventAdapter {
    dispatcher: Weak<Dispatcher>,
}

impl EntityConstraint for TerminatorEventAdapter {
    fn process_pre_commit(
        &self,
        _ctx: &MutateContext<'_>,
        _state: &EntityChangeState,
    ) -> Result<(), DbError> {
        Ok(())
    }

    fn process_post_commit(&self, state: &EntityChangeState) {
        if state.is_parent_event {
            return;
        }
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        let (event_type, snapshot) = match state.kind {
            ChangeKind::Created => (TerminatorEventType::Created, &state.final_state),
            ChangeKind::Updated => (TerminatorEventType::Updated, &state.final_state),
            ChangeKind::Deleted => (TerminatorEventType::Deleted, &state.initial_state),
        };
        let Some(snapshot) = snapshot else {
            return;
        };
        match serde_json::from_value::<TerminatorInfo>(snapshot.clone()) {
            Ok(mut terminator) => {
                if terminator.id.is_empty() {
                    terminator.id = state.entity_id.clone();
                }
                dispatcher.accept_terminator_change(event_type, &terminator);
            }
            Err(e) => tracing::error!(
                terminator_id = %state.entity_id,
                error = %e,
                "unable to read terminator for terminator event"
            ),
        }
    }
}

impl Dispatcher {
    /// Derives terminator events from changes to the terminator store of `db`.
    pub fn init_terminator_events(self: &Arc<Self>, db: &Db) -> Result<(), DispatchError> {
        let adapter = TerminatorEventAdapter {
            dispatcher: Arc::downgrade(self),
        };
        db.add_constraint(TERMINATOR_ENTITY_TYPE, Arc::new(adapter))?;
        Ok(())
    }

    /// Router presence callback: a router connected to this controller.
    pub fn router_connected(&self, router_id: &str) {
        self.router_presence_changed(router_id, true);
    }

    /// Router presence callback: a router disconnected from this controller.
    pub fn router_disconnected(&self, router_id: &str) {
        self.router_presence_changed(router_id, false);
    }

    fn router_presence_changed(&self, router_id: &str, online: bool) {
        let (router_event_type, terminator_event_type) = if online {
            (RouterEventType::Online, TerminatorEventType::RouterOnline)
        } else {
            (RouterEventType::Offline, TerminatorEventType::RouterOffline)
        };

        self.accept(RouterEvent {
            namespace: ROUTER_EVENT_NS.to_string(),
            event_src_id: self.settings.ctrl_id.clone(),
            timestamp: Utc::now(),
            event_type: router_event_type,
            router_id: router_id.to_string(),
            router_online: online,
        });

        for terminator in self.topology.router_terminators(router_id) {
            self.accept_terminator_change(terminator_event_type, &terminator);
        }
    }

    /// Emits a terminator event for `terminator`, with service-wide counts.
    pub fn accept_terminator_change(
        &self,
        event_type: TerminatorEventType,
        terminator: &TerminatorInfo,
    ) {
        let topology = &self.topology;
        let (total, usable_default, usable_required) =
            match topology.service_terminators(&terminator.service_id) {
                None => (-1, -1, -1),
                Some(terminators) => {
                    let mut usable_default = 0;
                    let mut usable_required = 0;
                    for t in &terminators {
                        if !topology.is_router_online(&t.router_id) {
                            continue;
                        }
                        if t.precedence.is_default() {
                            usable_default += 1;
                        } else if t.precedence.is_required() {
                            usable_required += 1;
                        }
                    }
                    (terminators.len() as i32, usable_default, usable_required)
                }
            };

        self.accept(TerminatorEvent {
            namespace: TERMINATOR_EVENT_NS.to_string(),
            event_src_id: self.settings.ctrl_id.clone(),
            timestamp: Utc::now(),
            event_type,
            service_id: terminator.service_id.clone(),
            terminator_id: terminator.id.clone(),
            router_id: terminator.router_id.clone(),
            host_id: terminator.host_id.clone(),
            instance_id: terminator.instance_id.clone(),
            router_online: topology.is_router_online(&terminator.router_id),
            precedence: terminator.precedence,
            static_cost: terminator.static_cost,
            dynamic_cost: topology.dynamic_cost(&terminator.id),
            total_terminators: total,
            usable_default_terminators: usable_default,
            usable_required_terminators: usable_required,
            propagate_indicator: topology.is_leader_or_leaderless(),
        });
    }
}
