//! Event envelopes and handler capabilities for the meshd controller.
//!
//! Every observable thing that happens inside the controller (an entity
//! mutation, a circuit coming up, a router going away, a metrics snapshot
//! arriving) is described by an immutable envelope of one kind. Consumers
//! implement [`EventHandler`] for the kinds they care about and are bound to
//! event namespaces by the dispatcher.

pub mod alert;
pub mod api_session;
pub mod authentication;
pub mod circuit;
pub mod cluster;
pub mod connect;
pub mod entity_change;
pub mod entity_count;
pub mod handler;
pub mod kind;
pub mod link;
pub mod metrics;
pub mod router;
pub mod sdk;
pub mod service;
pub mod session;
pub mod subscriber;
pub mod terminator;
pub mod usage;

pub use alert::{AlertEvent, AlertSeverity, AlertSourceType, ALERT_EVENT_NS};
pub use api_session::{
    ApiSessionEvent, ApiSessionEventType, ApiSessionKind, API_SESSION_EVENT_LEGACY_NS,
    API_SESSION_EVENT_NS,
};
pub use authentication::{
    AuthenticationEvent, AuthenticationEventType, AUTHENTICATION_EVENT_LEGACY_NS,
    AUTHENTICATION_EVENT_NS,
};
pub use circuit::{
    CircuitEvent, CircuitEventType, CircuitPath, CIRCUIT_EVENTS_VERSION, CIRCUIT_EVENT_LEGACY_NS,
    CIRCUIT_EVENT_NS,
};
pub use cluster::{ClusterEvent, ClusterEventType, ClusterPeer, CLUSTER_EVENT_NS};
pub use connect::{ConnectDestination, ConnectEvent, ConnectSource, CONNECT_EVENT_NS};
pub use entity_change::{
    EntityChangeEvent, EntityChangeType, ENTITY_CHANGE_EVENTS_VERSION, ENTITY_CHANGE_EVENT_NS,
};
pub use entity_count::{EntityCountEvent, ENTITY_COUNT_EVENT_LEGACY_NS, ENTITY_COUNT_EVENT_NS};
pub use handler::{matches_handler, same_handler, EventHandler, HandlerFn, HandlerRef};
pub use kind::Event;
pub use link::{LinkConnection, LinkEvent, LinkEventType, LINK_EVENT_LEGACY_NS, LINK_EVENT_NS};
pub use metrics::{
    HistogramSnapshot, IntervalBucket, IntervalCounter, MeterSnapshot, MetricValue, MetricsEvent,
    MetricsMessage, MetricsMessageHandler, MetricsMessageHandlerFn, MetricsMessageHandlerRef,
    TimerSnapshot, UsageBucket, UsageCounter, METRICS_EVENTS_VERSION, METRICS_EVENT_NS,
};
pub use router::{RouterEvent, RouterEventType, ROUTER_EVENT_LEGACY_NS, ROUTER_EVENT_NS};
pub use sdk::{SdkEvent, SdkEventType, SDK_EVENT_NS};
pub use service::{ServiceEvent, ServiceEventType, SERVICE_EVENT_LEGACY_NS, SERVICE_EVENT_NS};
pub use session::{
    SessionEvent, SessionEventType, SessionType, SESSION_EVENT_LEGACY_NS, SESSION_EVENT_NS,
};
pub use subscriber::Subscriber;
pub use terminator::{
    Precedence, TerminatorEvent, TerminatorEventType, TERMINATOR_EVENT_LEGACY_NS,
    TERMINATOR_EVENT_NS,
};
pub use usage::{
    UsageEvent, UsageEventV3, USAGE_COUNTER_PREFIX, USAGE_EVENT_LEGACY_NS, USAGE_EVENT_NS,
    USAGE_TYPES,
};
