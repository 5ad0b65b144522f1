//! Event dispatch for the meshd controller.
//!
//! The [`Dispatcher`] keeps a copy-on-write registry of handlers per event
//! kind and binds configured handlers to event namespaces. Most kinds are
//! delivered fire-and-forget on the blocking pool. Entity change events are
//! delivered synchronously from the storage engine's transaction hooks and
//! logged durably in the producing transaction, so a commit whose
//! notification was lost to a crash is replayed as a recovery event.

mod change_log;
mod config;
mod dispatcher;
mod entity_change;
mod entity_count;
mod error;
mod flush;
mod formatter;
mod kinds;
mod logger;
mod metrics;
mod options;
mod recovery;
mod registry;
mod session;
mod terminator;
mod topology;
mod usage;
mod wrapper;

pub use config::{EventHandlerConfig, HandlerConfig, Subscription};
pub use dispatcher::{Dispatcher, DispatcherSettings, TypeRegistrar, DEFAULT_FLUSH_QUIESCENCE};
pub use entity_change::{EntityChangeEvents, EntityChangeFilter, EntityChangeRegistrar};
pub use entity_count::{EntityCountRegistrar, DEFAULT_ENTITY_COUNT_INTERVAL};
pub use error::DispatchError;
pub use flush::run_flush_loop;
pub use formatter::{FormatterFactory, JsonFormatter, JsonFormatterFactory, DEFAULT_QUEUE_DEPTH};
pub use kinds::{DispatchedEvent, KindRegistrar};
pub use logger::{FileEventLoggerFactory, HandlerFactory, StdOutLoggerFactory};
pub use metrics::{
    ctrl_channel_mapper, extract_id, FilteredMetricsAdapter, LinkMetricsMapper, MetricsConverter,
    MetricsMapper, MetricsRegistrar,
};
pub use options::{
    bool_option, duration_option, include_filter, regex_option, string_list_option, Options,
};
pub use registry::{CopyOnWriteMap, HandlerRegistry};
pub use session::SESSION_ENTITY_TYPE;
pub use terminator::{TerminatorEventFilter, TerminatorRegistrar, TERMINATOR_ENTITY_TYPE};
pub use topology::{TerminatorInfo, Topology};
pub use usage::{
    usage_events, usage_events_v3, UsageRegistrar, UsageV3Filter, DEFAULT_USAGE_VERSION,
};
pub use wrapper::{InclusionFilter, NamespaceAdapter};

#[cfg(test)]
mod tests;
