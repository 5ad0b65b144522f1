//! Formatters turn events into lines on an output sink.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;

use meshd_event::{
    AlertEvent, ApiSessionEvent, AuthenticationEvent, CircuitEvent, ClusterEvent, ConnectEvent,
    EntityChangeEvent, EntityCountEvent, Event, EventHandler, HandlerRef, LinkEvent, MetricsEvent,
    RouterEvent, SdkEvent, ServiceEvent, SessionEvent, Subscriber, TerminatorEvent, UsageEvent,
    UsageEventV3,
};
use serde::Serialize;

use crate::error::DispatchError;

/// Events queued ahead of a formatter's writer before producers block.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Builds a formatting subscriber writing to `sink`.
pub trait FormatterFactory: Send + Sync {
    fn new_formatter(
        &self,
        id: &str,
        queue_depth: Option<usize>,
        sink: Box<dyn Write + Send>,
    ) -> Result<Arc<dyn Subscriber>, DispatchError>;
}

pub struct JsonFormatterFactory;

impl FormatterFactory for JsonFormatterFactory {
    fn new_formatter(
        &self,
        id: &str,
        queue_depth: Option<usize>,
        sink: Box<dyn Write + Send>,
    ) -> Result<Arc<dyn Subscriber>, DispatchError> {
        Ok(Arc::new(JsonFormatter::new(
            id,
            queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            sink,
        )?))
    }
}

/// Writes every event it receives as one JSON document per line.
///
/// Serialization happens on the delivering thread; a dedicated writer
/// thread drains a bounded queue into the sink. The writer exits once the
/// formatter is dropped and the queue is drained.
pub struct JsonFormatter {
    id: String,
    queue: SyncSender<String>,
}

impl JsonFormatter {
    pub fn new(id: &str, queue_depth: usize, sink: Box<dyn Write + Send>) -> std::io::Result<Self> {
        let (queue, lines) = mpsc::sync_channel(queue_depth);
        let writer_id = id.to_string();
        std::thread::Builder::new()
            .name(format!("event-writer-{id}"))
            .spawn(move || run_writer(&writer_id, lines, sink))?;
        Ok(Self {
            id: id.to_string(),
            queue,
        })
    }

    fn format<E: Serialize>(&self, namespace: &str, event: &E) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(handler = %self.id, namespace, error = %e, "unable to serialize event");
                return;
            }
        };
        if self.queue.send(line).is_err() {
            tracing::error!(handler = %self.id, namespace, "event writer stopped, dropping event");
        }
    }
}

fn run_writer(id: &str, lines: Receiver<String>, mut sink: Box<dyn Write + Send>) {
    for line in lines {
        let result = sink
            .write_all(line.as_bytes())
            .and_then(|()| sink.write_all(b"\n"))
            .and_then(|()| sink.flush());
        if let Err(e) = result {
            tracing::error!(handler = %id, error = %e, "error writing event");
        }
    }
    tracing::debug!(handler = %id, "event writer stopped");
}

impl<E: Event + Serialize> EventHandler<E> for JsonFormatter {
    fn accept(&self, event: &E) {
        self.format(event.namespace(), event);
    }
}

macro_rules! formats_all {
    ($($method:ident => $event:ty),+ $(,)?) => {
        impl Subscriber for JsonFormatter {
            fn type_name(&self) -> &'static str {
                "JsonFormatter"
            }

            $(
                fn $method(self: Arc<Self>) -> Option<HandlerRef<$event>> {
                    Some(self)
                }
            )+
        }
    };
}

formats_all! {
    alert_handler => AlertEvent,
    api_session_handler => ApiSessionEvent,
    authentication_handler => AuthenticationEvent,
    circuit_handler => CircuitEvent,
    cluster_handler => ClusterEvent,
    connect_handler => ConnectEvent,
    entity_change_handler => EntityChangeEvent,
    entity_count_handler => EntityCountEvent,
    link_handler => LinkEvent,
    metrics_handler => MetricsEvent,
    router_handler => RouterEvent,
    sdk_handler => SdkEvent,
    service_handler => ServiceEvent,
    session_handler => SessionEvent,
    terminator_handler => TerminatorEvent,
    usage_handler => UsageEvent,
    usage_v3_handler => UsageEventV3,
}
