//! Entity change events: the transactional pre/post-commit path.
//!
//! Unlike every other kind, entity change events are delivered
//! synchronously on the producing thread. The change event is delivered and
//! logged in pre-commit, inside the producing transaction; the `committed`
//! marker follows in post-commit. Anything between the two that kills the
//! process leaves the change log entry behind, and a later emitting scan
//! turns it into a recovery event.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use meshd_db::{
    ChangeKind, DbError, EntityChangeState, EntityConstraint, MutateContext,
};
use meshd_event::{
    matches_handler, EntityChangeEvent, EntityChangeType, Event, EventHandler, HandlerRef,
    Subscriber, ENTITY_CHANGE_EVENTS_VERSION, ENTITY_CHANGE_EVENT_NS,
};
use rusqlite::{Transaction, TransactionBehavior};
use serde_json::Value;
use tokio::sync::Notify;

use crate::change_log;
use crate::dispatcher::{Dispatcher, TypeRegistrar};
use crate::error::DispatchError;
use crate::kinds::require_handler;
use crate::options::{bool_option, include_filter, Options};
use crate::recovery::process_previous_tx_events;
use crate::registry::HandlerRegistry;
use crate::topology::Topology;
use crate::wrapper::for_namespace;

/// Handler registry, metadata and flush signal for entity change events.
///
/// Registered as an [`EntityConstraint`] on every entity type that is an
/// event source.
pub struct EntityChangeEvents {
    ctrl_id: String,
    pub(crate) handlers: HandlerRegistry<EntityChangeEvent>,
    global_metadata: ArcSwap<BTreeMap<String, Value>>,
    entity_types: ArcSwap<Vec<String>>,
    topology: Arc<dyn Topology>,
    pub(crate) flush_notify: Arc<Notify>,
}

impl EntityChangeEvents {
    pub(crate) fn new(ctrl_id: &str, topology: Arc<dyn Topology>) -> Self {
        Self {
            ctrl_id: ctrl_id.to_string(),
            handlers: HandlerRegistry::new(),
            global_metadata: ArcSwap::from_pointee(BTreeMap::new()),
            entity_types: ArcSwap::from_pointee(Vec::new()),
            topology,
            flush_notify: Arc::new(Notify::new()),
        }
    }

    fn accept(&self, event: &EntityChangeEvent) {
        for handler in self.handlers.snapshot().iter() {
            handler.accept(event);
        }
    }

    pub(crate) fn emit_recovery_event(&self, event_id: &str, entity_type: &str) {
        self.accept(&EntityChangeEvent::recovery(&self.ctrl_id, event_id, entity_type));
    }

    /// Posts a flush signal. Signals posted while one is pending coalesce.
    pub(crate) fn notify_flush(&self) {
        self.flush_notify.notify_one();
    }

    fn envelope(&self, state: &EntityChangeState, event_type: EntityChangeType) -> EntityChangeEvent {
        EntityChangeEvent {
            namespace: ENTITY_CHANGE_EVENT_NS.to_string(),
            event_src_id: self.ctrl_id.clone(),
            timestamp: Utc::now(),
            version: ENTITY_CHANGE_EVENTS_VERSION,
            event_id: state.event_id.clone(),
            event_type,
            metadata: BTreeMap::new(),
            entity_type: state.entity_type.clone(),
            is_parent_event: Some(state.is_parent_event),
            initial_state: None,
            final_state: None,
            propagate_indicator: self.topology.is_leader_or_leaderless(),
            is_recovery_event: false,
        }
    }

    fn change_event(&self, ctx: &MutateContext<'_>, state: &EntityChangeState) -> EntityChangeEvent {
        let event_type = match state.kind {
            ChangeKind::Created => EntityChangeType::Created,
            ChangeKind::Updated => EntityChangeType::Updated,
            ChangeKind::Deleted => EntityChangeType::Deleted,
        };
        let mut event = self.envelope(state, event_type);
        ctx.change_context().populate_metadata(&mut event.metadata);
        for (key, value) in self.global_metadata.load().iter() {
            event.metadata.insert(key.clone(), value.clone());
        }
        event.initial_state = state.initial_state.clone();
        event.final_state = state.final_state.clone();
        event
    }
}

impl EntityConstraint for EntityChangeEvents {
    fn process_pre_commit(
        &self,
        ctx: &MutateContext<'_>,
        state: &EntityChangeState,
    ) -> Result<(), DbError> {
        process_previous_tx_events(self, ctx.tx(), ctx.tx_id(), false);

        let event = self.change_event(ctx, state);
        self.accept(&event);

        change_log::log_tx_event(ctx.tx(), ctx.tx_id(), &event.event_id, &event.entity_type)?;
        Ok(())
    }

    fn process_post_commit(&self, state: &EntityChangeState) {
        self.accept(&self.envelope(state, EntityChangeType::Committed));
        self.notify_flush();
    }
}

/// Gate and filter in front of an entity change subscriber.
///
/// Recovery events bypass the leadership and parent checks: they carry
/// neither piece of information.
pub struct EntityChangeFilter {
    propagate_always: bool,
    include_parent_events: bool,
    entity_types: Option<HashSet<String>>,
    wrapped: HandlerRef<EntityChangeEvent>,
}

impl EventHandler<EntityChangeEvent> for EntityChangeFilter {
    fn accept(&self, event: &EntityChangeEvent) {
        if !event.is_recovery_event {
            if !self.propagate_always && !event.propagate_indicator {
                return;
            }
            if event.is_parent() && !self.include_parent_events {
                return;
            }
        }

        if let Some(types) = &self.entity_types {
            if !types.contains(&event.entity_type) {
                return;
            }
        }

        if event.event_type == EntityChangeType::Committed {
            let mut reduced = event.clone();
            reduced.is_parent_event = None;
            reduced.entity_type.clear();
            self.wrapped.accept(&reduced);
        } else {
            self.wrapped.accept(event);
        }
    }

    fn is_wrapping(&self, handler: &HandlerRef<EntityChangeEvent>) -> bool {
        matches_handler(&self.wrapped, handler)
    }
}

/// Options: `propagateAlways`, `includeParentEvents`, and `include` naming
/// entity types.
pub struct EntityChangeRegistrar;

impl TypeRegistrar for EntityChangeRegistrar {
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError> {
        let handler = require_handler::<EntityChangeEvent>(subscriber)?;
        let propagate_always = bool_option(options, event_type, "propagateAlways")?;
        let include_parent_events = bool_option(options, event_type, "includeParentEvents")?;

        let sources = dispatcher.entity_change.entity_types.load_full();
        let legal: Vec<&str> = sources.iter().map(String::as_str).collect();
        let entity_types = include_filter(options, event_type, &legal)?;

        let handler = for_namespace(event_type, handler);
        dispatcher.add_entity_change_handler(Arc::new(EntityChangeFilter {
            propagate_always,
            include_parent_events,
            entity_types,
            wrapped: handler,
        }));
        Ok(())
    }

    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>) {
        if let Some(handler) = EntityChangeEvent::handler_of(subscriber) {
            dispatcher.remove_entity_change_handler(&handler);
        }
    }
}

impl Dispatcher {
    pub fn add_entity_change_handler(&self, handler: HandlerRef<EntityChangeEvent>) {
        self.entity_change.handlers.add(handler);
    }

    pub fn remove_entity_change_handler(&self, handler: &HandlerRef<EntityChangeEvent>) {
        let removed = self.entity_change.handlers.remove(handler);
        tracing::debug!(namespace = ENTITY_CHANGE_EVENT_NS, removed, "removed event handler");
    }

    /// Delivers `event` to every entity change handler on the calling thread.
    pub fn accept_entity_change_event(&self, event: &EntityChangeEvent) {
        self.entity_change.accept(event);
    }

    /// The constraint that publishes entity change events and keeps the
    /// change log. [`Dispatcher::add_entity_change_source`] registers it.
    pub fn entity_change_constraint(&self) -> Arc<dyn EntityConstraint> {
        self.entity_change.clone()
    }

    /// Binds the dispatcher to `db` and makes every entity type currently
    /// registered there an event source.
    pub fn init_entity_change_events(&self, db: Arc<meshd_db::Db>) -> Result<(), DispatchError> {
        let db = self.db.get_or_init(|| db).clone();
        for entity_type in db.entity_types() {
            self.add_entity_change_source(&entity_type)?;
        }
        self.add_global_entity_change_metadata("version", Value::from(self.settings.version.clone()));
        Ok(())
    }

    pub fn add_entity_change_source(&self, entity_type: &str) -> Result<(), DispatchError> {
        let db = self.db.get().ok_or(DispatchError::NotInitialized)?;
        db.add_constraint(entity_type, self.entity_change.clone())?;
        self.entity_change.entity_types.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.iter().any(|t| t == entity_type) {
                next.push(entity_type.to_string());
                next.sort();
            }
            next
        });
        Ok(())
    }

    /// Entity types with a registered event source, sorted.
    pub fn entity_change_sources(&self) -> Vec<String> {
        self.entity_change.entity_types.load().as_ref().clone()
    }

    /// Adds `key` to the metadata of every subsequent change event.
    pub fn add_global_entity_change_metadata(&self, key: &str, value: Value) {
        self.entity_change.global_metadata.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(key.to_string(), value.clone());
            next
        });
    }

    pub fn notify_flush(&self) {
        self.entity_change.notify_flush();
    }

    /// Scans the change log in a fresh write transaction.
    ///
    /// With `emit`, every logged event of a concluded transaction is
    /// replayed as a recovery event before its entries are removed.
    pub fn flush_committed_tx_events(&self, emit: bool) -> Result<(), DispatchError> {
        let db = self.db.get().ok_or(DispatchError::NotInitialized)?;
        let conn = db.pool().get().map_err(DbError::from)?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        // Write transaction ids start at 1, so every logged bucket is concluded.
        process_previous_tx_events(&self.entity_change, &tx, 0, emit);
        tx.commit().map_err(DbError::from)?;
        Ok(())
    }
}
