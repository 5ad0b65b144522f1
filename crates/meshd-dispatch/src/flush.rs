//! Background compaction of the entity change log.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;

/// Removes concluded change log entries once writes have gone quiet.
///
/// Every post-commit notification posts a flush signal. After a signal the
/// loop waits until no further signal arrives for the configured quiescence
/// window, then runs a non-emitting scan in a fresh write transaction.
/// Returns when the dispatcher's closing signal fires.
pub async fn run_flush_loop(dispatcher: Arc<Dispatcher>) {
    let notify = dispatcher.entity_change.flush_notify.clone();
    let quiescence = dispatcher.settings.flush_quiescence;
    let mut closing = dispatcher.closing.clone();

    tracing::info!(
        quiescence_ms = quiescence.as_millis() as u64,
        "entity change flush loop started"
    );

    'outer: loop {
        if *closing.borrow() {
            break;
        }
        tokio::select! {
            _ = notify.notified() => {}
            changed = closing.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        loop {
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(quiescence) => break,
                changed = closing.changed() => {
                    if changed.is_err() || *closing.borrow() {
                        break 'outer;
                    }
                }
            }
        }

        tracing::debug!("flushing committed tx entity change events");
        let flushing = dispatcher.clone();
        match tokio::task::spawn_blocking(move || flushing.flush_committed_tx_events(false)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "error while flushing committed tx entity change events");
            }
            Err(e) => {
                tracing::error!(error = %e, "entity change flush task failed");
            }
        }
    }

    tracing::info!("entity change flush loop stopped");
}
