//! Connections made to controllers and routers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const CONNECT_EVENT_NS: &str = "connect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectSource {
    Identity,
    Router,
    Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectDestination {
    Ctrl,
    Router,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub src_type: ConnectSource,
    pub dst_type: ConnectDestination,
    pub src_id: String,
    pub src_addr: String,
    pub dst_id: String,
    pub dst_addr: String,
}

impl fmt::Display for ConnectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}/{} ({}) -> {:?}/{} ({})",
            self.namespace,
            self.src_type,
            self.src_id,
            self.src_addr,
            self.dst_type,
            self.dst_id,
            self.dst_addr
        )
    }
}

impl Event for ConnectEvent {
    const NAMESPACE: &'static str = CONNECT_EVENT_NS;
    const CAPABILITY: &'static str = "ConnectEventHandler";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.connect_handler()
    }
}
