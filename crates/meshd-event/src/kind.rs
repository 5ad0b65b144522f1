//! The shape every event kind shares.

use std::sync::Arc;

use crate::handler::HandlerRef;
use crate::subscriber::Subscriber;

/// An immutable event envelope of one kind.
///
/// Every envelope carries a namespace, the id of the emitting controller
/// node, and a timestamp, plus kind-specific fields. The associated
/// constants describe the kind to the registration layer.
pub trait Event: Clone + Send + Sync + 'static {
    /// The namespace envelopes of this kind are emitted under.
    const NAMESPACE: &'static str;

    /// The namespace used before 1.4.0, if the kind existed then.
    const LEGACY_NAMESPACE: Option<&'static str> = None;

    /// Name of the handler capability, reported in configuration errors.
    const CAPABILITY: &'static str;

    /// Every legal sub-event type. Empty if the kind has no sub-types.
    const EVENT_TYPES: &'static [&'static str] = &[];

    /// The namespace this envelope is currently labelled with.
    fn namespace(&self) -> &str;

    /// Relabels the envelope. Used only on copies, by namespace adapters.
    fn set_namespace(&mut self, namespace: &str);

    /// The sub-event type of this envelope, matched against include lists.
    fn event_type_name(&self) -> &str {
        ""
    }

    /// Extracts this kind's handler capability from a subscriber.
    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>>;
}
