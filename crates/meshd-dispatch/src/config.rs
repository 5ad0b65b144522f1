//! Event handler configuration, as it appears under `events.<id>`.

use serde::{Deserialize, Serialize};

use crate::options::Options;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandlerConfig {
    pub handler: HandlerConfig,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Name of a registered handler factory, e.g. `file` or `stdout`.
    #[serde(rename = "type")]
    pub handler_type: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub path: Option<String>,
    /// Formatter queue depth.
    #[serde(default, rename = "bufferSize")]
    pub buffer_size: Option<usize>,
}

fn default_format() -> String {
    "json".to_string()
}

/// One namespace a handler subscribes to, with that kind's options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub options: Options,
}

impl Subscription {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            options: Options::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}
