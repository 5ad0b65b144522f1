//! Registration and fan-out for the concurrently delivered event kinds.

use std::marker::PhantomData;
use std::sync::Arc;

use meshd_event::{
    AlertEvent, ApiSessionEvent, AuthenticationEvent, CircuitEvent, ClusterEvent, ConnectEvent,
    EntityCountEvent, Event, HandlerRef, LinkEvent, MetricsEvent, RouterEvent, SdkEvent,
    ServiceEvent, SessionEvent, Subscriber, TerminatorEvent, UsageEvent, UsageEventV3,
};

use crate::dispatcher::{Dispatcher, TypeRegistrar};
use crate::error::DispatchError;
use crate::options::{include_filter, Options};
use crate::registry::HandlerRegistry;
use crate::wrapper::{for_namespace, with_include};

/// An event kind the dispatcher delivers to each handler on its own task.
///
/// Every kind except entity change events is delivered this way: the
/// producer never waits for handlers, and handlers of one event run
/// concurrently with each other.
pub trait DispatchedEvent: Event {
    fn registry(dispatcher: &Dispatcher) -> &HandlerRegistry<Self>;

    /// Called after `handler` was removed from the registry.
    fn on_removed(_dispatcher: &Dispatcher, _handler: &HandlerRef<Self>) {}
}

macro_rules! dispatched {
    ($($event:ty => $field:ident),+ $(,)?) => {
        $(
            impl DispatchedEvent for $event {
                fn registry(dispatcher: &Dispatcher) -> &HandlerRegistry<Self> {
                    &dispatcher.$field
                }
            }
        )+
    };
}

dispatched! {
    AlertEvent => alert_handlers,
    ApiSessionEvent => api_session_handlers,
    AuthenticationEvent => authentication_handlers,
    CircuitEvent => circuit_handlers,
    ClusterEvent => cluster_handlers,
    ConnectEvent => connect_handlers,
    EntityCountEvent => entity_count_handlers,
    LinkEvent => link_handlers,
    RouterEvent => router_handlers,
    SdkEvent => sdk_handlers,
    ServiceEvent => service_handlers,
    SessionEvent => session_handlers,
    TerminatorEvent => terminator_handlers,
    UsageEvent => usage_handlers,
    UsageEventV3 => usage_v3_handlers,
}

impl DispatchedEvent for MetricsEvent {
    fn registry(dispatcher: &Dispatcher) -> &HandlerRegistry<Self> {
        &dispatcher.metrics_handlers
    }

    fn on_removed(dispatcher: &Dispatcher, handler: &HandlerRef<Self>) {
        dispatcher.metrics_msg_handlers.remove_wrapping(handler);
    }
}

impl Dispatcher {
    pub fn add_handler<E: DispatchedEvent>(&self, handler: HandlerRef<E>) {
        E::registry(self).add(handler);
    }

    /// Removes `handler` and every registration wrapping it.
    pub fn remove_handler<E: DispatchedEvent>(&self, handler: &HandlerRef<E>) {
        let removed = E::registry(self).remove(handler);
        tracing::debug!(namespace = E::NAMESPACE, removed, "removed event handler");
        E::on_removed(self, handler);
    }

    /// Hands `event` to every registered handler and returns immediately.
    ///
    /// Each handler runs on the blocking pool with a shared reference to
    /// the envelope. A panicking handler is logged and affects no other
    /// handler.
    pub fn accept<E: DispatchedEvent>(&self, event: E) {
        let handlers = E::registry(self).snapshot();
        if handlers.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for handler in handlers.iter().cloned() {
            let event = event.clone();
            let task = self.runtime.spawn_blocking(move || handler.accept(&event));
            self.runtime.spawn(async move {
                if let Err(e) = task.await {
                    tracing::error!(namespace = E::NAMESPACE, error = %e, "event handler failed");
                }
            });
        }
    }
}

/// Registers subscribers for a kind with only the common options.
///
/// Subscriptions under a legacy namespace are relabelled, and kinds with
/// sub-types honour `include`.
pub struct KindRegistrar<E> {
    _kind: PhantomData<fn() -> E>,
}

impl<E: DispatchedEvent> KindRegistrar<E> {
    pub fn new() -> Self {
        Self { _kind: PhantomData }
    }
}

impl<E: DispatchedEvent> Default for KindRegistrar<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DispatchedEvent> TypeRegistrar for KindRegistrar<E> {
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError> {
        let handler = require_handler::<E>(subscriber)?;
        let handler = for_namespace(event_type, handler);
        let handler = if E::EVENT_TYPES.is_empty() {
            handler
        } else {
            with_include(include_filter(options, event_type, E::EVENT_TYPES)?, handler)
        };
        dispatcher.add_handler(handler);
        Ok(())
    }

    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>) {
        if let Some(handler) = E::handler_of(subscriber) {
            dispatcher.remove_handler(&handler);
        }
    }
}

/// Extracts the handler capability for `E`, or names what is missing.
pub(crate) fn require_handler<E: Event>(
    subscriber: Arc<dyn Subscriber>,
) -> Result<HandlerRef<E>, DispatchError> {
    let actual = subscriber.type_name();
    E::handler_of(subscriber).ok_or(DispatchError::MissingCapability {
        capability: E::CAPABILITY,
        actual,
    })
}
