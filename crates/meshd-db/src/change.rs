//! Who or what caused a mutation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance attached to a write transaction.
///
/// Only the populated fields end up in event metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContext {
    pub author_type: String,
    pub author_id: String,
    pub author_name: String,
    pub trace_id: String,
    pub source_type: String,
    pub source_auth: String,
    pub source_local: String,
    pub source_remote: String,
    pub source_method: String,
}

impl ChangeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author(mut self, kind: &str, id: &str, name: &str) -> Self {
        self.author_type = kind.to_string();
        self.author_id = id.to_string();
        self.author_name = name.to_string();
        self
    }

    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = trace_id.to_string();
        self
    }

    pub fn with_source(mut self, kind: &str, auth: &str, method: &str) -> Self {
        self.source_type = kind.to_string();
        self.source_auth = auth.to_string();
        self.source_method = method.to_string();
        self
    }

    pub fn with_addresses(mut self, local: &str, remote: &str) -> Self {
        self.source_local = local.to_string();
        self.source_remote = remote.to_string();
        self
    }

    /// Writes every non-empty field into `metadata`.
    pub fn populate_metadata(&self, metadata: &mut BTreeMap<String, Value>) {
        let fields = [
            ("author.type", &self.author_type),
            ("author.id", &self.author_id),
            ("author.name", &self.author_name),
            ("trace_id", &self.trace_id),
            ("source.type", &self.source_type),
            ("source.auth", &self.source_auth),
            ("source.local", &self.source_local),
            ("source.remote", &self.source_remote),
            ("source.method", &self.source_method),
        ];
        for (key, value) in fields {
            if !value.is_empty() {
                metadata.insert(key.to_string(), Value::String(value.clone()));
            }
        }
    }
}
