//! Operator-facing alerts raised by routers and controllers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const ALERT_EVENT_NS: &str = "alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSourceType {
    Router,
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub alert_source_type: AlertSourceType,
    pub alert_source_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    /// Entities the alert concerns, as `(type, id)` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_entities: Vec<(String, String)>,
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} source={:?}/{}: {}",
            self.namespace, self.severity, self.alert_source_type, self.alert_source_id, self.message
        )
    }
}

impl Event for AlertEvent {
    const NAMESPACE: &'static str = ALERT_EVENT_NS;
    const CAPABILITY: &'static str = "AlertEventHandler";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.alert_handler()
    }
}
