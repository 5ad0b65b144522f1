//! Edge session lifecycle events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const SESSION_EVENT_NS: &str = "session";
pub const SESSION_EVENT_LEGACY_NS: &str = "edge.sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventType {
    Created,
    Deleted,
}

impl SessionEventType {
    pub const ALL: &'static [&'static str] = &["created", "deleted"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Dial,
    Bind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: SessionEventType,
    pub id: String,
    pub session_type: SessionType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    pub api_session_id: String,
    pub identity_id: String,
    pub service_id: String,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} id={} apiSessionId={} serviceId={}",
            self.namespace,
            self.event_type.as_str(),
            self.id,
            self.api_session_id,
            self.service_id
        )
    }
}

impl Event for SessionEvent {
    const NAMESPACE: &'static str = SESSION_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(SESSION_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "SessionEventHandler";
    const EVENT_TYPES: &'static [&'static str] = SessionEventType::ALL;

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
        subscriber.session_handler()
    }
}
