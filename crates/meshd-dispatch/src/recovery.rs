//! Replay and cleanup of change log entries left by earlier transactions.

use rusqlite::Connection;

use crate::change_log;
use crate::entity_change::EntityChangeEvents;

/// Processes every logged transaction other than `current_tx_id`.
///
/// With `emit` set, a recovery commit marker is delivered for each logged
/// event before its transaction's entries are deleted. Without it the
/// entries are only deleted: their commit notifications were delivered by
/// this process already. A transaction whose entries cannot be read is left
/// in place for the next scan.
pub(crate) fn process_previous_tx_events(
    events: &EntityChangeEvents,
    conn: &Connection,
    current_tx_id: u64,
    emit: bool,
) {
    let tx_ids = match change_log::pending_tx_ids(conn, current_tx_id) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "unable to read entity change log");
            return;
        }
    };

    for tx_id in tx_ids {
        tracing::debug!(tx_id, "cleaning up entity change events for tx");
        if emit {
            let logged = match change_log::tx_events(conn, tx_id) {
                Ok(logged) => logged,
                Err(e) => {
                    tracing::error!(tx_id, error = %e, "unable to read entity change events for tx");
                    continue;
                }
            };
            for (event_id, entity_type) in logged {
                tracing::debug!(tx_id, %event_id, %entity_type, "emitting recovery event for tx");
                events.emit_recovery_event(&event_id, &entity_type);
            }
        }
        if let Err(e) = change_log::delete_tx(conn, tx_id) {
            tracing::error!(tx_id, error = %e, "unable to delete entity change events for tx");
        }
    }
}
