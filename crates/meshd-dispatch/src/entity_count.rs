//! Periodic entity count reports.
//!
//! Every `entityCount` subscription gets its own emitter task, ticking at
//! the subscription's `interval`. The emitter stops when the dispatcher
//! closes, is dropped, or the subscription is removed.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use meshd_event::{EntityCountEvent, Event, HandlerRef, Subscriber, ENTITY_COUNT_EVENT_NS};
use tokio::time::{Instant, MissedTickBehavior};

use crate::dispatcher::{Dispatcher, TypeRegistrar};
use crate::error::DispatchError;
use crate::kinds::require_handler;
use crate::options::{duration_option, Options};
use crate::wrapper::for_namespace;

pub const DEFAULT_ENTITY_COUNT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Options: `interval`, a duration such as `30s` or `5m`.
pub struct EntityCountRegistrar;

impl TypeRegistrar for EntityCountRegistrar {
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError> {
        let handler = require_handler::<EntityCountEvent>(subscriber)?;
        let handler = for_namespace(event_type, handler);
        let interval = duration_option(options, event_type, "interval")?
            .unwrap_or(DEFAULT_ENTITY_COUNT_INTERVAL);

        dispatcher.add_handler(handler.clone());
        dispatcher.runtime.spawn(run_entity_count_emitter(
            dispatcher.me.clone(),
            handler,
            interval,
        ));
        tracing::info!(
            event_type,
            interval_ms = interval.as_millis() as u64,
            "entity count events scheduled"
        );
        Ok(())
    }

    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>) {
        if let Some(handler) = EntityCountEvent::handler_of(subscriber) {
            dispatcher.remove_handler(&handler);
        }
    }
}

async fn run_entity_count_emitter(
    dispatcher: Weak<Dispatcher>,
    handler: HandlerRef<EntityCountEvent>,
    interval: Duration,
) {
    let Some(mut closing) = dispatcher.upgrade().map(|d| d.closing.clone()) else {
        return;
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *closing.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = closing.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let Some(current) = dispatcher.upgrade() else {
            break;
        };
        if !current.entity_count_handlers.contains(&handler) {
            break;
        }
        let handler = handler.clone();
        let emitted = tokio::task::spawn_blocking(move || {
            let event = current.entity_counts();
            handler.accept(&event);
        })
        .await;
        if let Err(e) = emitted {
            tracing::error!(error = %e, "entity count handler failed");
        }
    }

    tracing::debug!("entity count emitter stopped");
}

impl Dispatcher {
    /// Counts the entities of every registered store.
    ///
    /// A failed count stops the report: `error` is set and the counts read
    /// so far are kept.
    pub fn entity_counts(&self) -> EntityCountEvent {
        let mut event = EntityCountEvent {
            namespace: ENTITY_COUNT_EVENT_NS.to_string(),
            event_src_id: self.settings.ctrl_id.clone(),
            timestamp: Utc::now(),
            counts: BTreeMap::new(),
            error: String::new(),
        };
        let Some(db) = self.db.get() else {
            event.error = DispatchError::NotInitialized.to_string();
            return event;
        };
        for entity_type in db.entity_types() {
            match db.count(&entity_type) {
                Ok(count) => {
                    event.counts.insert(entity_type, count);
                }
                Err(e) => {
                    tracing::error!(entity_type = %entity_type, error = %e, "unable to count entities");
                    event.error = e.to_string();
                    break;
                }
            }
        }
        event
    }
}
