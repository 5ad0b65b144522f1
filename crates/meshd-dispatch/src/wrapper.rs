//! Decorators stacked on handlers at registration time.
//!
//! Every decorator answers `is_wrapping` for whatever it wraps, so removing
//! the original handler also removes the decorated registration.

use std::collections::HashSet;

use meshd_event::{matches_handler, Event, EventHandler, HandlerRef};

/// Relabels events with a legacy namespace before forwarding them.
///
/// The shared envelope is never touched; the wrapped handler gets a copy.
pub struct NamespaceAdapter<E: 'static> {
    namespace: String,
    wrapped: HandlerRef<E>,
}

impl<E: Event> NamespaceAdapter<E> {
    pub fn new(namespace: &str, wrapped: HandlerRef<E>) -> Self {
        Self {
            namespace: namespace.to_string(),
            wrapped,
        }
    }
}

impl<E: Event> EventHandler<E> for NamespaceAdapter<E> {
    fn accept(&self, event: &E) {
        let mut relabelled = event.clone();
        relabelled.set_namespace(&self.namespace);
        self.wrapped.accept(&relabelled);
    }

    fn is_wrapping(&self, handler: &HandlerRef<E>) -> bool {
        matches_handler(&self.wrapped, handler)
    }
}

/// Forwards only events whose sub-type is in the include set.
pub struct InclusionFilter<E: 'static> {
    include: HashSet<String>,
    wrapped: HandlerRef<E>,
}

impl<E: Event> InclusionFilter<E> {
    pub fn new(include: HashSet<String>, wrapped: HandlerRef<E>) -> Self {
        Self { include, wrapped }
    }
}

impl<E: Event> EventHandler<E> for InclusionFilter<E> {
    fn accept(&self, event: &E) {
        if self.include.contains(event.event_type_name()) {
            self.wrapped.accept(event);
        }
    }

    fn is_wrapping(&self, handler: &HandlerRef<E>) -> bool {
        matches_handler(&self.wrapped, handler)
    }
}

/// Applies the legacy namespace adapter when subscribed under an old name.
pub(crate) fn for_namespace<E: Event>(event_type: &str, handler: HandlerRef<E>) -> HandlerRef<E> {
    if event_type == E::NAMESPACE {
        handler
    } else {
        std::sync::Arc::new(NamespaceAdapter::new(event_type, handler))
    }
}

/// Applies an include filter if one was configured.
pub(crate) fn with_include<E: Event>(
    include: Option<HashSet<String>>,
    handler: HandlerRef<E>,
) -> HandlerRef<E> {
    match include {
        Some(include) => std::sync::Arc::new(InclusionFilter::new(include, handler)),
        None => handler,
    }
}
