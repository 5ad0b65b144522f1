//! Controller lifecycle: storage, topology and event dispatch wiring.

use std::sync::Arc;

use meshd_db::{Db, DbError, EntityStore};
use meshd_dispatch::{run_flush_loop, DispatchError, Dispatcher};
use meshd_event::Subscriber;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::topology::StandaloneTopology;

/// Entity stores of the controller model, as `(entity type, parent type)`.
pub const ENTITY_STORES: &[(&str, Option<&str>)] = &[
    ("config", None),
    ("edgeRouter", Some("router")),
    ("edgeService", Some("service")),
    ("identity", None),
    ("router", None),
    ("service", None),
    ("servicePolicy", None),
    ("session", None),
    ("terminator", None),
];

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("event dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("startup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A running controller.
pub struct Controller {
    db: Arc<Db>,
    topology: Arc<StandaloneTopology>,
    dispatcher: Arc<Dispatcher>,
    handlers: Vec<Arc<dyn Subscriber>>,
    closing: watch::Sender<bool>,
    flush_task: JoinHandle<()>,
}

impl Controller {
    /// Opens the database and brings up event dispatch.
    ///
    /// Configured handlers are wired before the flush loop starts and
    /// before this returns, so entity changes whose notification was lost
    /// in a previous run are replayed to them as recovery events ahead of
    /// any new write.
    pub async fn start(config: &Config) -> Result<Self, StartupError> {
        let path = config.database.path.clone();
        let settings = config.db_settings();
        let db = tokio::task::spawn_blocking(move || Db::open(&path, settings)).await??;
        for (entity_type, parent) in ENTITY_STORES {
            let store = match parent {
                Some(parent) => EntityStore::with_parent(entity_type, parent),
                None => EntityStore::new(entity_type),
            };
            db.add_store(store);
        }
        let db = Arc::new(db);
        tracing::info!(path = %config.database.path, "opened controller database");

        let topology = Arc::new(StandaloneTopology::new(db.clone()));
        let (closing, closing_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            config.dispatcher_settings(),
            topology.clone(),
            Handle::current(),
            closing_rx,
        );
        dispatcher.init_entity_change_events(db.clone())?;
        dispatcher.init_terminator_events(&db)?;
        dispatcher.init_session_events(&db)?;

        if config.events.is_empty() {
            tracing::info!("no event handlers configured");
        }
        let wiring = dispatcher.clone();
        let events = config.events.clone();
        let handlers =
            tokio::task::spawn_blocking(move || wiring.wire_event_handlers(&events)).await??;

        let flush_task = tokio::spawn(run_flush_loop(dispatcher.clone()));

        tracing::info!(
            ctrl_id = dispatcher.ctrl_id(),
            handlers = handlers.len(),
            "controller started"
        );

        Ok(Self {
            db,
            topology,
            dispatcher,
            handlers,
            closing,
            flush_task,
        })
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn topology(&self) -> &Arc<StandaloneTopology> {
        &self.topology
    }

    pub fn router_connected(&self, router_id: &str) {
        if self.topology.mark_online(router_id) {
            tracing::info!(router_id, "router connected");
            self.dispatcher.router_connected(router_id);
        }
    }

    pub fn router_disconnected(&self, router_id: &str) {
        if self.topology.mark_offline(router_id) {
            tracing::info!(router_id, "router disconnected");
            self.dispatcher.router_disconnected(router_id);
        }
    }

    /// Stops the flush loop and unbinds every configured handler.
    pub async fn shutdown(self) {
        if self.closing.send(true).is_err() {
            tracing::debug!("flush loop already stopped");
        }
        if let Err(e) = self.flush_task.await {
            tracing::error!(error = %e, "flush loop join error");
        }
        for handler in self.handlers {
            self.dispatcher.remove_all_subscriptions(handler);
        }
        tracing::info!("controller stopped");
    }
}
