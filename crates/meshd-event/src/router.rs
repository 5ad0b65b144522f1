//! Router presence events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const ROUTER_EVENT_NS: &str = "router";
pub const ROUTER_EVENT_LEGACY_NS: &str = "fabric.routers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouterEventType {
    #[serde(rename = "router-online")]
    Online,
    #[serde(rename = "router-offline")]
    Offline,
}

impl RouterEventType {
    pub const ALL: &'static [&'static str] = &["router-online", "router-offline"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "router-online",
            Self::Offline => "router-offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: RouterEventType,
    pub router_id: String,
    pub router_online: bool,
}

impl fmt::Display for RouterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} routerId={} online={}",
            self.namespace,
            self.event_type.as_str(),
            self.router_id,
            self.router_online
        )
    }
}

impl Event for RouterEvent {
    const NAMESPACE: &'static str = ROUTER_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(ROUTER_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "RouterEventHandler";
    const EVENT_TYPES: &'static [&'static str] = RouterEventType::ALL;

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
        subscriber.router_handler()
    }
}
