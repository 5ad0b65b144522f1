//! The durable entity change log.
//!
//! Every entity change event is logged under the id of the transaction
//! that produced it, inside that same transaction. An entry outlives its
//! transaction only until a later scan removes it, so whatever is left in
//! the log describes transactions whose commit notification may have been
//! lost.

use rusqlite::Connection;

pub(crate) fn log_tx_event(
    conn: &Connection,
    tx_id: u64,
    event_id: &str,
    entity_type: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO entity_change_events (tx_id, event_id, entity_type) VALUES (?1, ?2, ?3)",
        (tx_id as i64, event_id, entity_type),
    )?;
    Ok(())
}

/// Ids of every logged transaction other than `current`, ascending.
pub(crate) fn pending_tx_ids(conn: &Connection, current: u64) -> rusqlite::Result<Vec<u64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT tx_id FROM entity_change_events WHERE tx_id <> ?1 ORDER BY tx_id",
    )?;
    let ids = stmt
        .query_map([current as i64], |row| row.get::<_, i64>(0))?
        .map(|id| id.map(|id| id as u64))
        .collect();
    ids
}

/// `(event_id, entity_type)` pairs logged under `tx_id`.
pub(crate) fn tx_events(conn: &Connection, tx_id: u64) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, entity_type FROM entity_change_events WHERE tx_id = ?1 ORDER BY event_id",
    )?;
    let events = stmt
        .query_map([tx_id as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect();
    events
}

pub(crate) fn delete_tx(conn: &Connection, tx_id: u64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM entity_change_events WHERE tx_id = ?1",
        [tx_id as i64],
    )
}
