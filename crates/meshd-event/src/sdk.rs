//! Edge SDK presence events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const SDK_EVENT_NS: &str = "sdk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SdkEventType {
    #[serde(rename = "sdk-online")]
    Online,
    #[serde(rename = "sdk-offline")]
    Offline,
    #[serde(rename = "sdk-status-unknown")]
    StatusUnknown,
}

impl SdkEventType {
    pub const ALL: &'static [&'static str] = &["sdk-online", "sdk-offline", "sdk-status-unknown"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "sdk-online",
            Self::Offline => "sdk-offline",
            Self::StatusUnknown => "sdk-status-unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: SdkEventType,
    pub identity_id: String,
}

impl fmt::Display for SdkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} identityId={}",
            self.namespace,
            self.event_type.as_str(),
            self.identity_id
        )
    }
}

impl Event for SdkEvent {
    const NAMESPACE: &'static str = SDK_EVENT_NS;
    const CAPABILITY: &'static str = "SdkEventHandler";
    const EVENT_TYPES: &'static [&'static str] = SdkEventType::ALL;

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
        subscriber.sdk_handler()
    }
}
