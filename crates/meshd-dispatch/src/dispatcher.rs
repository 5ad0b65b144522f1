//! The dispatcher: handler registries, namespace registration and wiring.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use meshd_db::Db;
use meshd_event::{
    AlertEvent, ApiSessionEvent, AuthenticationEvent, CircuitEvent, ClusterEvent, ConnectEvent,
    EntityChangeEvent, EntityCountEvent, Event, LinkEvent, MetricsEvent, RouterEvent, SdkEvent,
    ServiceEvent, SessionEvent, Subscriber, TerminatorEvent, UsageEvent, UsageEventV3,
    USAGE_EVENT_LEGACY_NS, USAGE_EVENT_NS,
};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::{EventHandlerConfig, Subscription};
use crate::entity_change::{EntityChangeEvents, EntityChangeRegistrar};
use crate::entity_count::EntityCountRegistrar;
use crate::error::DispatchError;
use crate::formatter::{FormatterFactory, JsonFormatterFactory};
use crate::kinds::KindRegistrar;
use crate::logger::{FileEventLoggerFactory, HandlerFactory, StdOutLoggerFactory};
use crate::metrics::{
    ctrl_channel_mapper, LinkMetricsMapper, MessageHandlerRegistry, MetricsConverter,
    MetricsRegistrar, MetricsRelay,
};
use crate::options::Options;
use crate::registry::{CopyOnWriteMap, HandlerRegistry};
use crate::terminator::TerminatorRegistrar;
use crate::topology::Topology;
use crate::usage::{UsageRegistrar, UsageRelay};

/// Default quiet period before committed change log entries are removed.
pub const DEFAULT_FLUSH_QUIESCENCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Identity of this controller node, stamped on every envelope.
    pub ctrl_id: String,
    /// Reported as the `version` global metadata of entity change events.
    pub version: String,
    pub flush_quiescence: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            ctrl_id: "ctrl".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            flush_quiescence: DEFAULT_FLUSH_QUIESCENCE,
        }
    }
}

/// Binds a subscriber to the event kind behind one namespace.
pub trait TypeRegistrar: Send + Sync {
    /// Registers `subscriber` for this kind under `event_type`, which is
    /// the namespace it was subscribed with (current or legacy).
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError>;

    /// Removes every registration of `subscriber` for this kind. A no-op if
    /// it has none.
    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>);
}

/// Routes events from producers to registered handlers.
pub struct Dispatcher {
    pub(crate) me: Weak<Dispatcher>,
    pub(crate) settings: DispatcherSettings,
    pub(crate) runtime: Handle,
    pub(crate) topology: Arc<dyn Topology>,
    pub(crate) closing: watch::Receiver<bool>,

    pub(crate) alert_handlers: HandlerRegistry<AlertEvent>,
    pub(crate) api_session_handlers: HandlerRegistry<ApiSessionEvent>,
    pub(crate) authentication_handlers: HandlerRegistry<AuthenticationEvent>,
    pub(crate) circuit_handlers: HandlerRegistry<CircuitEvent>,
    pub(crate) cluster_handlers: HandlerRegistry<ClusterEvent>,
    pub(crate) connect_handlers: HandlerRegistry<ConnectEvent>,
    pub(crate) entity_count_handlers: HandlerRegistry<EntityCountEvent>,
    pub(crate) link_handlers: HandlerRegistry<LinkEvent>,
    pub(crate) metrics_handlers: HandlerRegistry<MetricsEvent>,
    pub(crate) router_handlers: HandlerRegistry<RouterEvent>,
    pub(crate) sdk_handlers: HandlerRegistry<SdkEvent>,
    pub(crate) service_handlers: HandlerRegistry<ServiceEvent>,
    pub(crate) session_handlers: HandlerRegistry<SessionEvent>,
    pub(crate) terminator_handlers: HandlerRegistry<TerminatorEvent>,
    pub(crate) usage_handlers: HandlerRegistry<UsageEvent>,
    pub(crate) usage_v3_handlers: HandlerRegistry<UsageEventV3>,

    pub(crate) metrics_msg_handlers: MessageHandlerRegistry,
    pub(crate) metrics_converter: Arc<MetricsConverter>,
    pub(crate) entity_change: Arc<EntityChangeEvents>,
    pub(crate) db: OnceLock<Arc<Db>>,

    registrars: CopyOnWriteMap<Arc<dyn TypeRegistrar>>,
    handler_factories: CopyOnWriteMap<Arc<dyn HandlerFactory>>,
    formatter_factories: CopyOnWriteMap<Arc<dyn FormatterFactory>>,
}

impl Dispatcher {
    /// Builds a dispatcher with every built-in namespace, the `file` and
    /// `stdout` handler factories and the `json` formatter registered.
    ///
    /// Concurrent deliveries run on `runtime`'s blocking pool. `closing`
    /// stops the flush loop and the entity count emitters.
    pub fn new(
        settings: DispatcherSettings,
        topology: Arc<dyn Topology>,
        runtime: Handle,
        closing: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let entity_change = Arc::new(EntityChangeEvents::new(&settings.ctrl_id, topology.clone()));
        let metrics_converter = Arc::new(MetricsConverter::new(&settings.ctrl_id));

        let dispatcher = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            runtime,
            topology: topology.clone(),
            closing,
            alert_handlers: HandlerRegistry::new(),
            api_session_handlers: HandlerRegistry::new(),
            authentication_handlers: HandlerRegistry::new(),
            circuit_handlers: HandlerRegistry::new(),
            cluster_handlers: HandlerRegistry::new(),
            connect_handlers: HandlerRegistry::new(),
            entity_count_handlers: HandlerRegistry::new(),
            link_handlers: HandlerRegistry::new(),
            metrics_handlers: HandlerRegistry::new(),
            router_handlers: HandlerRegistry::new(),
            sdk_handlers: HandlerRegistry::new(),
            service_handlers: HandlerRegistry::new(),
            session_handlers: HandlerRegistry::new(),
            terminator_handlers: HandlerRegistry::new(),
            usage_handlers: HandlerRegistry::new(),
            usage_v3_handlers: HandlerRegistry::new(),
            metrics_msg_handlers: MessageHandlerRegistry::new(),
            metrics_converter,
            entity_change,
            db: OnceLock::new(),
            registrars: CopyOnWriteMap::new(),
            handler_factories: CopyOnWriteMap::new(),
            formatter_factories: CopyOnWriteMap::new(),
        });

        dispatcher.register_kind::<AlertEvent>(Arc::new(KindRegistrar::<AlertEvent>::new()));
        dispatcher
            .register_kind::<ApiSessionEvent>(Arc::new(KindRegistrar::<ApiSessionEvent>::new()));
        dispatcher.register_kind::<AuthenticationEvent>(Arc::new(
            KindRegistrar::<AuthenticationEvent>::new(),
        ));
        dispatcher.register_kind::<CircuitEvent>(Arc::new(KindRegistrar::<CircuitEvent>::new()));
        dispatcher.register_kind::<ClusterEvent>(Arc::new(KindRegistrar::<ClusterEvent>::new()));
        dispatcher.register_kind::<ConnectEvent>(Arc::new(KindRegistrar::<ConnectEvent>::new()));
        dispatcher.register_kind::<EntityChangeEvent>(Arc::new(EntityChangeRegistrar));
        dispatcher.register_kind::<EntityCountEvent>(Arc::new(EntityCountRegistrar));
        dispatcher.register_kind::<LinkEvent>(Arc::new(KindRegistrar::<LinkEvent>::new()));
        dispatcher.register_kind::<MetricsEvent>(Arc::new(MetricsRegistrar));
        dispatcher.register_kind::<RouterEvent>(Arc::new(KindRegistrar::<RouterEvent>::new()));
        dispatcher.register_kind::<SdkEvent>(Arc::new(KindRegistrar::<SdkEvent>::new()));
        dispatcher.register_kind::<ServiceEvent>(Arc::new(KindRegistrar::<ServiceEvent>::new()));
        dispatcher.register_kind::<SessionEvent>(Arc::new(KindRegistrar::<SessionEvent>::new()));
        dispatcher.register_kind::<TerminatorEvent>(Arc::new(TerminatorRegistrar));
        // Both usage versions share one namespace; `version` picks the kind.
        dispatcher.register_event_type(USAGE_EVENT_NS, Arc::new(UsageRegistrar));
        dispatcher.register_event_type(USAGE_EVENT_LEGACY_NS, Arc::new(UsageRegistrar));

        dispatcher.register_formatter_factory("json", Arc::new(JsonFormatterFactory));
        dispatcher.register_event_handler_factory("file", Arc::new(FileEventLoggerFactory));
        dispatcher.register_event_handler_factory("stdout", Arc::new(StdOutLoggerFactory));

        dispatcher.add_metrics_mapper(Arc::new(ctrl_channel_mapper));
        dispatcher.add_metrics_mapper(LinkMetricsMapper::new(topology).into_mapper());
        dispatcher.add_metrics_message_handler(Arc::new(MetricsRelay::new(&dispatcher)));
        dispatcher.add_metrics_message_handler(Arc::new(UsageRelay::new(&dispatcher)));

        dispatcher
    }

    pub fn ctrl_id(&self) -> &str {
        &self.settings.ctrl_id
    }

    pub fn is_leader_or_leaderless(&self) -> bool {
        self.topology.is_leader_or_leaderless()
    }

    /// Registers `registrar` under the current namespace of `E` and, if it
    /// has one, its legacy namespace.
    pub fn register_kind<E: Event>(&self, registrar: Arc<dyn TypeRegistrar>) {
        self.register_event_type(E::NAMESPACE, registrar.clone());
        if let Some(legacy) = E::LEGACY_NAMESPACE {
            self.register_event_type(legacy, registrar);
        }
    }

    pub fn register_event_type(&self, event_type: &str, registrar: Arc<dyn TypeRegistrar>) {
        self.registrars.put(event_type, registrar);
    }

    /// Every namespace a subscription may name.
    pub fn event_types(&self) -> Vec<String> {
        self.registrars.keys()
    }

    pub fn register_event_handler_factory(&self, handler_type: &str, factory: Arc<dyn HandlerFactory>) {
        self.handler_factories.put(handler_type, factory);
    }

    pub fn register_formatter_factory(&self, format: &str, factory: Arc<dyn FormatterFactory>) {
        self.formatter_factories.put(format, factory);
    }

    pub fn formatter_factory(&self, format: &str) -> Option<Arc<dyn FormatterFactory>> {
        self.formatter_factories.get(format)
    }

    /// Registers `subscriber` for each subscription in turn.
    ///
    /// Unknown namespaces are logged and skipped. The first registration
    /// error aborts; registrations made before it stay in place.
    pub fn process_subscriptions(
        &self,
        subscriber: Arc<dyn Subscriber>,
        subscriptions: &[Subscription],
    ) -> Result<(), DispatchError> {
        let registrars = self.registrars.snapshot();
        for sub in subscriptions {
            tracing::info!(event_type = %sub.event_type, "processing subscription for event type");
            match registrars.get(&sub.event_type) {
                Some(registrar) => {
                    registrar.register(self, &sub.event_type, subscriber.clone(), &sub.options)?;
                    tracing::info!(event_type = %sub.event_type, "registration of event handler succeeded");
                }
                None => {
                    let valid: Vec<&str> = registrars.keys().map(String::as_str).collect();
                    tracing::warn!(
                        event_type = %sub.event_type,
                        valid_types = %valid.join(","),
                        "invalid event type"
                    );
                }
            }
        }
        Ok(())
    }

    /// Unregisters `subscriber` from every event kind.
    pub fn remove_all_subscriptions(&self, subscriber: Arc<dyn Subscriber>) {
        for registrar in self.registrars.snapshot().values() {
            registrar.unregister(self, subscriber.clone());
        }
    }

    /// Builds a handler for each configuration entry and subscribes it.
    ///
    /// Once every handler is wired, change log entries left behind by
    /// transactions whose commit notification was lost are replayed as
    /// recovery events, so the handlers just wired see them.
    pub fn wire_event_handlers(
        &self,
        configs: &BTreeMap<String, EventHandlerConfig>,
    ) -> Result<Vec<Arc<dyn Subscriber>>, DispatchError> {
        let mut wired = Vec::with_capacity(configs.len());
        for (id, config) in configs {
            if config.subscriptions.is_empty() {
                return Err(DispatchError::NoSubscriptions(id.clone()));
            }
            let handler = self.create_handler(id, config).inspect_err(|e| {
                tracing::error!(handler = %id, error = %e, "unable to create event handler");
            })?;
            self.process_subscriptions(handler.clone(), &config.subscriptions)
                .inspect_err(|e| {
                    tracing::error!(handler = %id, error = %e, "unable to process subscriptions for event handler");
                })?;
            wired.push(handler);
        }

        match self.flush_committed_tx_events(true) {
            Ok(()) => {}
            Err(DispatchError::NotInitialized) => {
                tracing::debug!("entity change events not initialized, skipping recovery flush");
            }
            Err(e) => {
                tracing::error!(error = %e, "error while flushing committed tx entity change events");
            }
        }
        Ok(wired)
    }

    fn create_handler(
        &self,
        id: &str,
        config: &EventHandlerConfig,
    ) -> Result<Arc<dyn Subscriber>, DispatchError> {
        let handler_type = &config.handler.handler_type;
        tracing::info!(handler = %id, handler_type = %handler_type, "creating event handler");
        let factory = self.handler_factories.get(handler_type).ok_or_else(|| {
            DispatchError::UnknownHandlerType {
                id: id.to_string(),
                handler_type: handler_type.clone(),
            }
        })?;
        factory.new_event_handler(id, &config.handler, self)
    }
}
