use std::path::Path;
use std::time::Duration;

use meshd_db::Db;
use meshd_dispatch::Subscription;
use meshd_server::{Config, Controller};
use serde_json::{json, Value};

fn config(dir: &Path, quiescence_ms: u64) -> (Config, std::path::PathBuf) {
    let log_path = dir.join("events.json");
    let raw = format!(
        r#"
        [server]
        ctrl_id = "ctrl-test"
        flush_quiescence_ms = {quiescence_ms}

        [database]
        path = {db:?}

        [events.audit.handler]
        type = "file"
        path = {log:?}

        [[events.audit.subscriptions]]
        type = "entityChange"
        include = ["service", "terminator"]

        [[events.audit.subscriptions]]
        type = "terminator"

        [[events.audit.subscriptions]]
        type = "router"
        "#,
        db = dir.join("meshd.db").to_str().unwrap(),
        log = log_path.to_str().unwrap(),
    );
    (toml::from_str(&raw).unwrap(), log_path)
}

fn read_events(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is a JSON document"))
        .collect()
}

async fn wait_for<F>(path: &Path, mut done: F) -> Vec<Value>
where
    F: FnMut(&[Value]) -> bool,
{
    for _ in 0..500 {
        let events = read_events(path);
        if done(&events) {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached, events: {:?}", read_events(path));
}

fn pending_log_entries(db: &Db) -> i64 {
    db.view(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM entity_change_events", [], |row| {
            row.get::<_, i64>(0)
        })?)
    })
    .unwrap()
}

fn find<'a>(events: &'a [Value], namespace: &str, event_type: &str) -> Option<&'a Value> {
    events
        .iter()
        .find(|e| e["namespace"] == namespace && e["event_type"] == event_type)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn model_changes_and_router_presence_reach_configured_logger() {
    let dir = tempfile::tempdir().unwrap();
    let (config, log_path) = config(dir.path(), 5_000);
    let controller = Controller::start(&config).await.unwrap();

    controller
        .db()
        .update(None, |ctx| {
            ctx.create("service", "svc-1", json!({"name": "svc-1"}))?;
            ctx.create(
                "terminator",
                "t-1",
                json!({"serviceId": "svc-1", "routerId": "r-1"}),
            )?;
            ctx.create("identity", "id-1", json!({"name": "alice"}))
        })
        .unwrap();

    let events = wait_for(&log_path, |events| {
        find(events, "terminator", "created").is_some()
            && events
                .iter()
                .filter(|e| e["namespace"] == "entityChange" && e["event_type"] == "committed")
                .count()
                == 2
    })
    .await;
    assert!(events.iter().all(|e| e["entity_type"] != "identity"));
    assert!(events.iter().all(|e| e["event_src_id"] == "ctrl-test"));

    let created = find(&events, "terminator", "created").unwrap();
    assert_eq!(created["terminator_id"], "t-1");
    assert_eq!(created["total_terminators"], 1);
    assert_eq!(created["usable_default_terminators"], 0);

    controller.router_connected("r-1");
    controller.router_connected("r-1");

    let events = wait_for(&log_path, |events| {
        find(events, "terminator", "router-online").is_some()
            && find(events, "router", "router-online").is_some()
    })
    .await;
    let online = find(&events, "terminator", "router-online").unwrap();
    assert_eq!(online["router_online"], true);
    assert_eq!(online["usable_default_terminators"], 1);
    assert_eq!(online["usable_required_terminators"], 0);

    controller.router_disconnected("r-1");
    let events = wait_for(&log_path, |events| {
        find(events, "terminator", "router-offline").is_some()
    })
    .await;
    let offline = find(&events, "terminator", "router-offline").unwrap();
    assert_eq!(offline["usable_default_terminators"], 0);
    assert_eq!(
        events
            .iter()
            .filter(|e| e["namespace"] == "router" && e["event_type"] == "router-online")
            .count(),
        1
    );

    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quiet_controller_compacts_its_change_log() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _log_path) = config(dir.path(), 50);
    let controller = Controller::start(&config).await.unwrap();

    controller
        .db()
        .update(None, |ctx| ctx.create("service", "svc-1", json!({})))
        .unwrap();

    let mut remaining = pending_log_entries(controller.db());
    for _ in 0..200 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        remaining = pending_log_entries(controller.db());
    }
    assert_eq!(remaining, 0);

    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminator_counts_are_read_with_a_single_connection_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, log_path) = config(dir.path(), 5_000);
    config.database.pool_max_size = 1;
    config.database.connection_timeout_ms = 2_000;
    let controller = Controller::start(&config).await.unwrap();

    let db = controller.db().clone();
    let started = std::time::Instant::now();
    tokio::task::spawn_blocking(move || {
        db.update(None, |ctx| {
            ctx.create("service", "svc-1", json!({"name": "svc-1"}))?;
            ctx.create(
                "terminator",
                "t-1",
                json!({"serviceId": "svc-1", "routerId": "r-1"}),
            )
        })
    })
    .await
    .unwrap()
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let events = wait_for(&log_path, |events| {
        find(events, "terminator", "created").is_some()
    })
    .await;
    assert_eq!(
        find(&events, "terminator", "created").unwrap()["total_terminators"],
        1
    );

    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sessions_and_entity_counts_reach_configured_logger() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, log_path) = config(dir.path(), 5_000);
    if let Some(audit) = config.events.get_mut("audit") {
        audit.subscriptions.push(Subscription::new("edge.sessions"));
        audit
            .subscriptions
            .push(Subscription::new("entityCount").with_option("interval", "50ms"));
    }
    let controller = Controller::start(&config).await.unwrap();

    controller
        .db()
        .update(None, |ctx| {
            ctx.create("service", "svc-1", json!({"name": "svc-1"}))?;
            ctx.create(
                "session",
                "s-1",
                json!({"apiSessionId": "as-1", "identityId": "id-1", "serviceId": "svc-1"}),
            )
        })
        .unwrap();

    let events = wait_for(&log_path, |events| {
        find(events, "edge.sessions", "created").is_some()
            && events
                .iter()
                .any(|e| e["namespace"] == "entityCount" && e["counts"]["session"] == 1)
    })
    .await;
    let created = find(&events, "edge.sessions", "created").unwrap();
    assert_eq!(created["id"], "s-1");
    assert_eq!(created["session_type"], "dial");
    assert_eq!(created["event_src_id"], "ctrl-test");

    controller.shutdown().await;
}

#[tokio::test]
async fn handler_without_subscriptions_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, _log_path) = config(dir.path(), 5_000);
    if let Some(audit) = config.events.get_mut("audit") {
        audit.subscriptions.clear();
    }
    assert!(Controller::start(&config).await.is_err());
}
