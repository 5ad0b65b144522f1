//! Authentication attempt outcomes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const AUTHENTICATION_EVENT_NS: &str = "authentication";
pub const AUTHENTICATION_EVENT_LEGACY_NS: &str = "edge.authentications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationEventType {
    Success,
    Fail,
}

impl AuthenticationEventType {
    pub const ALL: &'static [&'static str] = &["success", "fail"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuthenticationEventType,
    /// `updb`, `cert`, `ext-jwt` and so on.
    pub authenticator_method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authenticator_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identity_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_policy_id: String,
    pub remote_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl fmt::Display for AuthenticationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} method={} identityId={} remote={}",
            self.namespace,
            self.event_type.as_str(),
            self.authenticator_method,
            self.identity_id,
            self.remote_address
        )?;
        if let Some(reason) = &self.failure_reason {
            write!(f, " reason={reason}")?;
        }
        Ok(())
    }
}

impl Event for AuthenticationEvent {
    const NAMESPACE: &'static str = AUTHENTICATION_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(AUTHENTICATION_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "AuthenticationEventHandler";
    const EVENT_TYPES: &'static [&'static str] = AuthenticationEventType::ALL;

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
        subscriber.authentication_handler()
    }
}
