//! Session events derived from changes to the session store.

use std::sync::{Arc, Weak};

use chrono::Utc;
use meshd_db::{ChangeKind, Db, DbError, EntityChangeState, EntityConstraint, MutateContext};
use meshd_event::{SessionEvent, SessionEventType, SessionType, SESSION_EVENT_NS};
use serde::Deserialize;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

/// Entity store the session adapter listens on.
pub const SESSION_ENTITY_TYPE: &str = "session";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SessionRecord {
    token: String,
    api_session_id: String,
    identity_id: String,
    service_id: String,
    #[serde(rename = "type")]
    session_type: SessionType,
}

/// Turns created and deleted sessions into session events. Updates are
/// not reported.
pub(crate) struct SessionEventAdapter {
    dispatcher: Weak<Dispatcher>,
}

impl EntityConstraint for SessionEventAdapter {
    fn process_pre_commit(
        &self,
        _ctx: &MutateContext<'_>,
        _state: &EntityChangeState,
    ) -> Result<(), DbError> {
        Ok(())
    }

    fn process_post_commit(&self, state: &EntityChangeState) {
        if state.is_parent_event {
            return;
        }
        let (event_type, snapshot) = match state.kind {
            ChangeKind::Created => (SessionEventType::Created, &state.final_state),
            ChangeKind::Deleted => (SessionEventType::Deleted, &state.initial_state),
            ChangeKind::Updated => return,
        };
        let Some(snapshot) = snapshot else {
            return;
        };
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        let record = match serde_json::from_value::<SessionRecord>(snapshot.clone()) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    session_id = %state.entity_id,
                    error = %e,
                    "unable to read session for session event"
                );
                return;
            }
        };
        dispatcher.accept(SessionEvent {
            namespace: SESSION_EVENT_NS.to_string(),
            event_src_id: dispatcher.settings.ctrl_id.clone(),
            timestamp: Utc::now(),
            event_type,
            id: state.entity_id.clone(),
            session_type: record.session_type,
            token: record.token,
            api_session_id: record.api_session_id,
            identity_id: record.identity_id,
            service_id: record.service_id,
        });
    }
}

impl Dispatcher {
    /// Derives session events from changes to the session store of `db`.
    pub fn init_session_events(self: &Arc<Self>, db: &Db) -> Result<(), DispatchError> {
        let adapter = SessionEventAdapter {
            dispatcher: Arc::downgrade(self),
        };
        db.add_constraint(SESSION_ENTITY_TYPE, Arc::new(adapter))?;
        Ok(())
    }
}
