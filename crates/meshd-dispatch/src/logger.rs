//! Handler factories for the `file` and `stdout` event loggers.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use meshd_event::Subscriber;

use crate::config::HandlerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

/// Builds a configured event handler.
pub trait HandlerFactory: Send + Sync {
    fn new_event_handler(
        &self,
        id: &str,
        config: &HandlerConfig,
        dispatcher: &Dispatcher,
    ) -> Result<Arc<dyn Subscriber>, DispatchError>;
}

/// Appends formatted events to the file at `path`, creating it if needed.
pub struct FileEventLoggerFactory;

impl HandlerFactory for FileEventLoggerFactory {
    fn new_event_handler(
        &self,
        id: &str,
        config: &HandlerConfig,
        dispatcher: &Dispatcher,
    ) -> Result<Arc<dyn Subscriber>, DispatchError> {
        let path = config
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DispatchError::InvalidHandlerConfig {
                id: id.to_string(),
                reason: "file event handler requires a path".to_string(),
            })?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::info!(handler = %id, path, format = %config.format, "opened event log file");
        formatted(id, config, dispatcher, Box::new(file))
    }
}

/// Writes formatted events to standard output.
pub struct StdOutLoggerFactory;

impl HandlerFactory for StdOutLoggerFactory {
    fn new_event_handler(
        &self,
        id: &str,
        config: &HandlerConfig,
        dispatcher: &Dispatcher,
    ) -> Result<Arc<dyn Subscriber>, DispatchError> {
        formatted(id, config, dispatcher, Box::new(std::io::stdout()))
    }
}

fn formatted(
    id: &str,
    config: &HandlerConfig,
    dispatcher: &Dispatcher,
    sink: Box<dyn Write + Send>,
) -> Result<Arc<dyn Subscriber>, DispatchError> {
    let factory = dispatcher
        .formatter_factory(&config.format)
        .ok_or_else(|| DispatchError::UnknownFormat(config.format.clone()))?;
    factory.new_formatter(id, config.buffer_size, sink)
}
