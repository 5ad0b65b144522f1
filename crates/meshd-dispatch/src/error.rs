use meshd_db::DbError;
use thiserror::Error;

/// Errors raised while wiring handlers to the dispatcher.
///
/// Delivery itself never fails from the producer's point of view; these are
/// configuration and storage errors only.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("type {actual} doesn't implement {capability}")]
    MissingCapability {
        capability: &'static str,
        actual: &'static str,
    },

    #[error("invalid value for {namespace}.{option}, must be {expected}")]
    InvalidOption {
        namespace: String,
        option: String,
        expected: &'static str,
    },

    #[error("invalid {option} regex '{pattern}': {source}")]
    InvalidFilter {
        option: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid value '{value}' in {namespace} include list, valid values include: {valid}")]
    InvalidInclude {
        namespace: String,
        value: String,
        valid: String,
    },

    #[error("no values provided in include list for {namespace} events, either drop the include option or provide at least one value")]
    EmptyInclude { namespace: String },

    #[error("invalid handler type '{handler_type}' for handler {id}")]
    UnknownHandlerType { id: String, handler_type: String },

    #[error("unknown event format '{0}'")]
    UnknownFormat(String),

    #[error("event handler {0} doesn't define any subscriptions")]
    NoSubscriptions(String),

    #[error("invalid configuration for handler {id}: {reason}")]
    InvalidHandlerConfig { id: String, reason: String },

    #[error("entity change events were not initialized with a store")]
    NotInitialized,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] DbError),
}
