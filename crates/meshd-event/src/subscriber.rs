//! Capability sets for registration.
//!
//! Configuration binds a subscriber to event namespaces by name, so the
//! registration layer receives an untyped value and has to ask it which
//! handler capabilities it offers. Each accessor returns the subscriber
//! itself, coerced to the handler trait object for that kind, so that the
//! same allocation can later be used to unregister it.

use std::sync::Arc;

use crate::handler::HandlerRef;
use crate::{
    AlertEvent, ApiSessionEvent, AuthenticationEvent, CircuitEvent, ClusterEvent, ConnectEvent,
    EntityChangeEvent, EntityCountEvent, LinkEvent, MetricsEvent, RouterEvent, SdkEvent,
    ServiceEvent, SessionEvent, TerminatorEvent, UsageEvent, UsageEventV3,
};

/// A value that may be subscribed to one or more event kinds.
///
/// Implementors override the accessor for each kind they handle, typically
/// as `Some(self)`.
pub trait Subscriber: Send + Sync + 'static {
    /// Concrete type name, used in configuration errors.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn alert_handler(self: Arc<Self>) -> Option<HandlerRef<AlertEvent>> {
        None
    }

    fn api_session_handler(self: Arc<Self>) -> Option<HandlerRef<ApiSessionEvent>> {
        None
    }

    fn authentication_handler(self: Arc<Self>) -> Option<HandlerRef<AuthenticationEvent>> {
        None
    }

    fn circuit_handler(self: Arc<Self>) -> Option<HandlerRef<CircuitEvent>> {
        None
    }

    fn cluster_handler(self: Arc<Self>) -> Option<HandlerRef<ClusterEvent>> {
        None
    }

    fn connect_handler(self: Arc<Self>) -> Option<HandlerRef<ConnectEvent>> {
        None
    }

    fn entity_change_handler(self: Arc<Self>) -> Option<HandlerRef<EntityChangeEvent>> {
        None
    }

    fn entity_count_handler(self: Arc<Self>) -> Option<HandlerRef<EntityCountEvent>> {
        None
    }

    fn link_handler(self: Arc<Self>) -> Option<HandlerRef<LinkEvent>> {
        None
    }

    fn metrics_handler(self: Arc<Self>) -> Option<HandlerRef<MetricsEvent>> {
        None
    }

    fn router_handler(self: Arc<Self>) -> Option<HandlerRef<RouterEvent>> {
        None
    }

    fn sdk_handler(self: Arc<Self>) -> Option<HandlerRef<SdkEvent>> {
        None
    }

    fn service_handler(self: Arc<Self>) -> Option<HandlerRef<ServiceEvent>> {
        None
    }

    fn session_handler(self: Arc<Self>) -> Option<HandlerRef<SessionEvent>> {
        None
    }

    fn terminator_handler(self: Arc<Self>) -> Option<HandlerRef<TerminatorEvent>> {
        None
    }

    fn usage_handler(self: Arc<Self>) -> Option<HandlerRef<UsageEvent>> {
        None
    }

    fn usage_v3_handler(self: Arc<Self>) -> Option<HandlerRef<UsageEventV3>> {
        None
    }
}
