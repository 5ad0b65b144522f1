//! Edge API session lifecycle events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const API_SESSION_EVENT_NS: &str = "apiSession";
pub const API_SESSION_EVENT_LEGACY_NS: &str = "edge.apiSessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSessionEventType {
    Created,
    Deleted,
    Refreshed,
    Exchanged,
}

impl ApiSessionEventType {
    pub const ALL: &'static [&'static str] = &["created", "deleted", "refreshed", "exchanged"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::Refreshed => "refreshed",
            Self::Exchanged => "exchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSessionKind {
    Legacy,
    Jwt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSessionEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: ApiSessionEventType,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ApiSessionKind,
    pub identity_id: String,
    pub ip_address: String,
}

impl fmt::Display for ApiSessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} id={} identityId={} ipAddress={}",
            self.namespace,
            self.event_type.as_str(),
            self.id,
            self.identity_id,
            self.ip_address
        )
    }
}

impl Event for ApiSessionEvent {
    const NAMESPACE: &'static str = API_SESSION_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(API_SESSION_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "ApiSessionEventHandler";
    const EVENT_TYPES: &'static [&'static str] = ApiSessionEventType::ALL;

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
        subscriber.api_session_handler()
    }
}
