//! Router-to-router link events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const LINK_EVENT_NS: &str = "link";
pub const LINK_EVENT_LEGACY_NS: &str = "fabric.links";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkEventType {
    #[serde(rename = "dialed")]
    Dialed,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "fault")]
    Fault,
    #[serde(rename = "duplicate")]
    Duplicate,
}

impl LinkEventType {
    pub const ALL: &'static [&'static str] = &["dialed", "connected", "fault", "duplicate"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dialed => "dialed",
            Self::Connected => "connected",
            Self::Fault => "fault",
            Self::Duplicate => "duplicate",
        }
    }
}

/// One underlay connection backing a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConnection {
    pub id: String,
    pub local_addr: String,
    pub remote_addr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: LinkEventType,
    pub link_id: String,
    pub src_router_id: String,
    pub dst_router_id: String,
    pub protocol: String,
    pub dial_address: String,
    #[serde(default)]
    pub cost: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<LinkConnection>,
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} linkId={} srcRouterId={} dstRouterId={}",
            self.namespace,
            self.event_type.as_str(),
            self.link_id,
            self.src_router_id,
            self.dst_router_id
        )
    }
}

impl Event for LinkEvent {
    const NAMESPACE: &'static str = LINK_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(LINK_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "LinkEventHandler";
    const EVENT_TYPES: &'static [&'static str] = LinkEventType::ALL;

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
        subscriber.link_handler()
    }
}
