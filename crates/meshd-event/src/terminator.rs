//! Terminator lifecycle and availability events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const TERMINATOR_EVENT_NS: &str = "terminator";
pub const TERMINATOR_EVENT_LEGACY_NS: &str = "fabric.terminators";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminatorEventType {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "updated")]
    Updated,
    #[serde(rename = "deleted")]
    Deleted,
    #[serde(rename = "router-online")]
    RouterOnline,
    #[serde(rename = "router-offline")]
    RouterOffline,
}

impl TerminatorEventType {
    pub const ALL: &'static [&'static str] =
        &["created", "updated", "deleted", "router-online", "router-offline"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::RouterOnline => "router-online",
            Self::RouterOffline => "router-offline",
        }
    }

    /// Model events reflect stored state and are subject to leadership gating.
    /// Router presence events are local observations and are not.
    pub fn is_model_event(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

/// How a terminator ranks against the other terminators of its service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Precedence {
    Required,
    #[default]
    Default,
    Failed,
}

impl Precedence {
    pub fn is_default(self) -> bool {
        self == Self::Default
    }

    pub fn is_required(self) -> bool {
        self == Self::Required
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminatorEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: TerminatorEventType,
    pub service_id: String,
    pub terminator_id: String,
    pub router_id: String,
    pub host_id: String,
    pub instance_id: String,
    pub router_online: bool,
    pub precedence: Precedence,
    pub static_cost: u16,
    pub dynamic_cost: u16,
    /// Total terminators on the service, or -1 if the service is unknown.
    pub total_terminators: i32,
    /// Default-precedence terminators whose router is online, or -1.
    pub usable_default_terminators: i32,
    /// Required-precedence terminators whose router is online, or -1.
    pub usable_required_terminators: i32,
    #[serde(skip)]
    pub propagate_indicator: bool,
}

impl TerminatorEvent {
    pub fn is_model_event(&self) -> bool {
        self.event_type.is_model_event()
    }
}

impl fmt::Display for TerminatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} terminatorId={} serviceId={} routerId={} routerOnline={} precedence={:?} totalTerminators={}",
            self.namespace,
            self.event_type.as_str(),
            self.terminator_id,
            self.service_id,
            self.router_id,
            self.router_online,
            self.precedence,
            self.total_terminators
        )
    }
}

impl Event for TerminatorEvent {
    const NAMESPACE: &'static str = TERMINATOR_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(TERMINATOR_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "TerminatorEventHandler";
    const EVENT_TYPES: &'static [&'static str] = TerminatorEventType::ALL;

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn event_type_name(&self) -> &str {
        self.event_type.as_str()
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.terminator_handler()
    }
}
