use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use meshd_db::{
    ChangeContext, Db, DbError, DbRuntimeSettings, EntityChangeState, EntityConstraint,
    EntityStore, MutateContext,
};
use meshd_event::{
    EntityChangeEvent, EntityChangeType, EntityCountEvent, EventHandler, HandlerRef,
    IntervalBucket, IntervalCounter, MetricsEvent, MetricsMessage, Precedence, RouterEvent,
    SessionEvent, SessionEventType, SessionType, Subscriber, TerminatorEvent, TerminatorEventType,
    UsageBucket, UsageCounter, UsageEvent, UsageEventV3,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::{
    run_flush_loop, DispatchError, Dispatcher, DispatcherSettings, Subscription, TerminatorInfo,
    Topology,
};

#[derive(Default)]
struct TestTopology {
    follower: AtomicBool,
    online: Mutex<HashSet<String>>,
    services: Mutex<HashSet<String>>,
    terminators: Mutex<Vec<TerminatorInfo>>,
}

impl TestTopology {
    fn set_follower(&self, follower: bool) {
        self.follower.store(follower, Ordering::SeqCst);
    }

    fn add_terminator(&self, id: &str, service: &str, router: &str, precedence: Precedence) {
        self.services.lock().unwrap().insert(service.to_string());
        self.terminators.lock().unwrap().push(TerminatorInfo {
            id: id.to_string(),
            service_id: service.to_string(),
            router_id: router.to_string(),
            precedence,
            ..Default::default()
        });
    }
}

impl Topology for TestTopology {
    fn is_leader_or_leaderless(&self) -> bool {
        !self.follower.load(Ordering::SeqCst)
    }

    fn is_router_online(&self, router_id: &str) -> bool {
        self.online.lock().unwrap().contains(router_id)
    }

    fn router_terminators(&self, router_id: &str) -> Vec<TerminatorInfo> {
        let terminators = self.terminators.lock().unwrap();
        terminators
            .iter()
            .filter(|t| t.router_id == router_id)
            .cloned()
            .collect()
    }

    fn service_terminators(&self, service_id: &str) -> Option<Vec<TerminatorInfo>> {
        if !self.services.lock().unwrap().contains(service_id) {
            return None;
        }
        let terminators = self.terminators.lock().unwrap();
        Some(
            terminators
                .iter()
                .filter(|t| t.service_id == service_id)
                .cloned()
                .collect(),
        )
    }

    fn link_endpoints(&self, _link_id: &str) -> Option<(String, String)> {
        None
    }
}

#[derive(Default)]
struct Collector {
    entity: Mutex<Vec<EntityChangeEvent>>,
    router: Mutex<Vec<RouterEvent>>,
    terminator: Mutex<Vec<TerminatorEvent>>,
    metrics: Mutex<Vec<MetricsEvent>>,
    session: Mutex<Vec<SessionEvent>>,
    usage: Mutex<Vec<UsageEvent>>,
    usage_v3: Mutex<Vec<UsageEventV3>>,
    counts: Mutex<Vec<EntityCountEvent>>,
}

impl Collector {
    fn entity_events(&self) -> Vec<EntityChangeEvent> {
        self.entity.lock().unwrap().clone()
    }
}

impl EventHandler<EntityChangeEvent> for Collector {
    fn accept(&self, event: &EntityChangeEvent) {
        self.entity.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<RouterEvent> for Collector {
    fn accept(&self, event: &RouterEvent) {
        self.router.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<TerminatorEvent> for Collector {
    fn accept(&self, event: &TerminatorEvent) {
        self.terminator.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<MetricsEvent> for Collector {
    fn accept(&self, event: &MetricsEvent) {
        self.metrics.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<SessionEvent> for Collector {
    fn accept(&self, event: &SessionEvent) {
        self.session.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<UsageEvent> for Collector {
    fn accept(&self, event: &UsageEvent) {
        self.usage.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<UsageEventV3> for Collector {
    fn accept(&self, event: &UsageEventV3) {
        self.usage_v3.lock().unwrap().push(event.clone());
    }
}

impl EventHandler<EntityCountEvent> for Collector {
    fn accept(&self, event: &EntityCountEvent) {
        self.counts.lock().unwrap().push(event.clone());
    }
}

impl Subscriber for Collector {
    fn entity_change_handler(self: Arc<Self>) -> Option<HandlerRef<EntityChangeEvent>> {
        Some(self)
    }

    fn router_handler(self: Arc<Self>) -> Option<HandlerRef<RouterEvent>> {
        Some(self)
    }

    fn terminator_handler(self: Arc<Self>) -> Option<HandlerRef<TerminatorEvent>> {
        Some(self)
    }

    fn metrics_handler(self: Arc<Self>) -> Option<HandlerRef<MetricsEvent>> {
        Some(self)
    }

    fn session_handler(self: Arc<Self>) -> Option<HandlerRef<SessionEvent>> {
        Some(self)
    }

    fn usage_handler(self: Arc<Self>) -> Option<HandlerRef<UsageEvent>> {
        Some(self)
    }

    fn usage_v3_handler(self: Arc<Self>) -> Option<HandlerRef<UsageEventV3>> {
        Some(self)
    }

    fn entity_count_handler(self: Arc<Self>) -> Option<HandlerRef<EntityCountEvent>> {
        Some(self)
    }
}

struct Nothing;

impl Subscriber for Nothing {}

/// Delivers pre-commit events and logs them, but loses every commit
/// notification, as a crash right after commit would.
struct NoPostCommit(Arc<dyn EntityConstraint>);

impl EntityConstraint for NoPostCommit {
    fn process_pre_commit(
        &self,
        ctx: &MutateContext<'_>,
        state: &EntityChangeState,
    ) -> Result<(), DbError> {
        self.0.process_pre_commit(ctx, state)
    }

    fn process_post_commit(&self, _state: &EntityChangeState) {}
}

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    db: Arc<Db>,
    topology: Arc<TestTopology>,
    closing: watch::Sender<bool>,
    dir: TempDir,
}

fn open_db(dir: &TempDir) -> Arc<Db> {
    let path = dir.path().join("meshd.db");
    let db = Db::open(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    db.add_store(EntityStore::new("service"));
    db.add_store(EntityStore::new("identity"));
    db.add_store(EntityStore::with_parent("edgeService", "service"));
    db.add_store(EntityStore::new("router"));
    db.add_store(EntityStore::new("terminator"));
    db.add_store(EntityStore::new("session"));
    Arc::new(db)
}

fn new_dispatcher(
    settings: DispatcherSettings,
    topology: Arc<TestTopology>,
) -> (Arc<Dispatcher>, watch::Sender<bool>) {
    let (closing_tx, closing_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(settings, topology, Handle::current(), closing_rx);
    (dispatcher, closing_tx)
}

fn settings() -> DispatcherSettings {
    DispatcherSettings {
        ctrl_id: "ctrl1".to_string(),
        version: "1.2.3".to_string(),
        ..Default::default()
    }
}

fn fixture_with(settings: DispatcherSettings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let topology = Arc::new(TestTopology::default());
    let (dispatcher, closing) = new_dispatcher(settings, topology.clone());
    dispatcher.init_entity_change_events(db.clone()).unwrap();
    dispatcher.init_terminator_events(&db).unwrap();
    dispatcher.init_session_events(&db).unwrap();
    Fixture {
        dispatcher,
        db,
        topology,
        closing,
        dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(settings())
}

fn logged(db: &Db) -> Vec<(u64, String, String)> {
    db.view(|conn| {
        let mut stmt = conn.prepare(
            "SELECT tx_id, event_id, entity_type FROM entity_change_events ORDER BY tx_id, event_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .unwrap()
}

fn create_service(db: &Db, id: &str) -> u64 {
    db.update(None, |ctx| {
        ctx.create("service", id, json!({"name": id}))?;
        Ok(ctx.tx_id())
    })
    .unwrap()
}

fn subscribe(fx: &Fixture, collector: &Arc<Collector>, subscription: Subscription) {
    fx.dispatcher
        .process_subscriptions(collector.clone(), &[subscription])
        .unwrap();
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn change_and_commit_events_share_an_event_id() {
    let fx = fixture();
    let collector = Arc::new(Collector::default());
    fx.dispatcher.add_entity_change_handler(collector.clone());

    let ctx = ChangeContext::new()
        .with_author("identity", "id-1", "admin")
        .with_trace_id("trace-9");
    let tx_id = fx
        .db
        .update(Some(ctx), |ctx| {
            ctx.create("service", "svc-1", json!({"name": "svc-1"}))?;
            Ok(ctx.tx_id())
        })
        .unwrap();

    let events = collector.entity_events();
    assert_eq!(events.len(), 2);
    let (created, committed) = (&events[0], &events[1]);
    assert_eq!(created.event_type, EntityChangeType::Created);
    assert_eq!(created.entity_type, "service");
    assert_eq!(created.event_src_id, "ctrl1");
    assert_eq!(created.final_state, Some(json!({"name": "svc-1"})));
    assert_eq!(created.metadata["author.name"], "admin");
    assert_eq!(created.metadata["trace_id"], "trace-9");
    assert_eq!(created.metadata["version"], "1.2.3");
    assert!(created.propagate_indicator);

    assert_eq!(committed.event_type, EntityChangeType::Committed);
    assert_eq!(committed.event_id, created.event_id);
    assert!(committed.metadata.is_empty());
    assert!(!committed.is_recovery_event);

    assert_eq!(
        logged(&fx.db),
        vec![(tx_id, created.event_id.clone(), "service".to_string())]
    );
}

#[tokio::test]
async fn next_write_cleans_up_without_recovering() {
    let fx = fixture();
    let collector = Arc::new(Collector::default());
    fx.dispatcher.add_entity_change_handler(collector.clone());

    create_service(&fx.db, "svc-1");
    let second = create_service(&fx.db, "svc-2");

    let log = logged(&fx.db);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, second);
    assert!(collector.entity_events().iter().all(|e| !e.is_recovery_event));
}

#[tokio::test]
async fn failed_write_leaves_no_log_entry() {
    let fx = fixture();
    create_service(&fx.db, "svc-1");
    let err = fx
        .db
        .update(None, |ctx| ctx.create("service", "svc-1", json!({})))
        .unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists { .. }));
    assert_eq!(logged(&fx.db).len(), 1);
}

#[tokio::test]
async fn lost_commit_notification_is_recovered_exactly_once() {
    let dir = tempfile::tempdir().unwrap();

    let lost_event_id = {
        let db = open_db(&dir);
        let (dispatcher, _closing) =
            new_dispatcher(settings(), Arc::new(TestTopology::default()));
        let collector = Arc::new(Collector::default());
        dispatcher.add_entity_change_handler(collector.clone());
        db.add_constraint(
            "service",
            Arc::new(NoPostCommit(dispatcher.entity_change_constraint())),
        )
        .unwrap();

        create_service(&db, "svc-1");
        let events = collector.entity_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EntityChangeType::Created);
        events[0].event_id.clone()
    };

    let db = open_db(&dir);
    assert_eq!(logged(&db).len(), 1);
    let (dispatcher, _closing) = new_dispatcher(settings(), Arc::new(TestTopology::default()));
    dispatcher.init_entity_change_events(db.clone()).unwrap();
    let collector = Arc::new(Collector::default());
    dispatcher.add_entity_change_handler(collector.clone());

    dispatcher.flush_committed_tx_events(true).unwrap();
    let recovered = collector.entity_events();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].event_id, lost_event_id);
    assert_eq!(recovered[0].entity_type, "service");
    assert_eq!(recovered[0].event_type, EntityChangeType::Committed);
    assert!(recovered[0].is_recovery_event);
    assert!(logged(&db).is_empty());

    dispatcher.flush_committed_tx_events(true).unwrap();
    assert_eq!(collector.entity_events().len(), 1);
}

#[tokio::test]
async fn recovery_event_passes_leadership_gate_with_reduced_fields() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open_db(&dir);
        let (dispatcher, _closing) =
            new_dispatcher(settings(), Arc::new(TestTopology::default()));
        db.add_constraint(
            "service",
            Arc::new(NoPostCommit(dispatcher.entity_change_constraint())),
        )
        .unwrap();
        create_service(&db, "svc-1");
    }

    let db = open_db(&dir);
    let topology = Arc::new(TestTopology::default());
    topology.set_follower(true);
    let (dispatcher, _closing) = new_dispatcher(settings(), topology);
    dispatcher.init_entity_change_events(db.clone()).unwrap();
    let collector = Arc::new(Collector::default());
    dispatcher
        .process_subscriptions(collector.clone(), &[Subscription::new("entityChange")])
        .unwrap();

    dispatcher.flush_committed_tx_events(true).unwrap();
    let events = collector.entity_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_recovery_event);
    assert_eq!(events[0].entity_type, "");
    assert_eq!(events[0].is_parent_event, None);
}

#[tokio::test]
async fn subscription_filter_reduces_committed_copies_only() {
    let fx = fixture();
    let raw = Arc::new(Collector::default());
    let filtered = Arc::new(Collector::default());
    fx.dispatcher.add_entity_change_handler(raw.clone());
    subscribe(&fx, &filtered, Subscription::new("entityChange"));

    create_service(&fx.db, "svc-1");

    let raw_events = raw.entity_events();
    let filtered_events = filtered.entity_events();
    assert_eq!(raw_events.len(), 2);
    assert_eq!(filtered_events.len(), 2);

    assert_eq!(filtered_events[0].entity_type, "service");
    assert_eq!(filtered_events[1].event_type, EntityChangeType::Committed);
    assert_eq!(filtered_events[1].entity_type, "");
    assert_eq!(filtered_events[1].is_parent_event, None);

    assert_eq!(raw_events[1].entity_type, "service");
    assert_eq!(raw_events[1].is_parent_event, Some(false));
}

#[tokio::test]
async fn parent_events_need_opt_in() {
    let fx = fixture();
    let plain = Arc::new(Collector::default());
    let with_parents = Arc::new(Collector::default());
    subscribe(&fx, &plain, Subscription::new("entityChange"));
    subscribe(
        &fx,
        &with_parents,
        Subscription::new("entityChange").with_option("includeParentEvents", "TRUE"),
    );

    fx.db
        .update(None, |ctx| ctx.create("edgeService", "svc-1", json!({})))
        .unwrap();

    let plain_types: Vec<String> = plain
        .entity_events()
        .iter()
        .filter(|e| e.event_type == EntityChangeType::Created)
        .map(|e| e.entity_type.clone())
        .collect();
    assert_eq!(plain_types, ["edgeService"]);

    let all = with_parents.entity_events();
    assert!(all.iter().any(|e| e.is_parent()));
    assert_eq!(
        all.iter()
            .filter(|e| e.event_type == EntityChangeType::Created)
            .count(),
        2
    );
}

#[tokio::test]
async fn include_limits_entity_types() {
    let fx = fixture();
    let collector = Arc::new(Collector::default());
    subscribe(
        &fx,
        &collector,
        Subscription::new("entityChange").with_option("include", json!(["identity"])),
    );

    create_service(&fx.db, "svc-1");
    fx.db
        .update(None, |ctx| ctx.create("identity", "id-1", json!({})))
        .unwrap();

    let created: Vec<EntityChangeEvent> = collector
        .entity_events()
        .into_iter()
        .filter(|e| e.event_type == EntityChangeType::Created)
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].entity_type, "identity");

    let err = fx
        .dispatcher
        .process_subscriptions(
            collector.clone(),
            &[Subscription::new("entityChange").with_option("include", "widget")],
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidInclude { .. }));
    assert!(err.to_string().contains("identity"));
}

#[tokio::test]
async fn follower_withholds_events_but_still_logs() {
    let fx = fixture();
    fx.topology.set_follower(true);
    let gated = Arc::new(Collector::default());
    let always = Arc::new(Collector::default());
    subscribe(&fx, &gated, Subscription::new("entityChange"));
    subscribe(
        &fx,
        &always,
        Subscription::new("entityChange").with_option("propagateAlways", true),
    );

    create_service(&fx.db, "svc-1");

    assert!(gated.entity_events().is_empty());
    assert_eq!(always.entity_events().len(), 2);
    assert_eq!(logged(&fx.db).len(), 1);
}

#[tokio::test]
async fn registration_errors_are_reported() {
    let fx = fixture();

    let err = fx
        .dispatcher
        .process_subscriptions(Arc::new(Nothing), &[Subscription::new("entityChange")])
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingCapability { .. }));
    assert!(err.to_string().contains("EntityChangeEventHandler"));
    assert!(err.to_string().contains("Nothing"));

    let err = fx
        .dispatcher
        .process_subscriptions(
            Arc::new(Collector::default()),
            &[Subscription::new("metrics").with_option("sourceFilter", "(")],
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidFilter { .. }));

    let err = fx
        .dispatcher
        .process_subscriptions(
            Arc::new(Collector::default()),
            &[Subscription::new("terminator").with_option("propagateAlways", 3)],
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidOption { .. }));

    let err = fx
        .dispatcher
        .process_subscriptions(
            Arc::new(Collector::default()),
            &[Subscription::new("usage").with_option("version", 4)],
        )
        .unwrap_err();
    assert!(err.to_string().contains("usage.version"));

    let err = fx
        .dispatcher
        .process_subscriptions(
            Arc::new(Collector::default()),
            &[Subscription::new("entityCount").with_option("interval", "soon")],
        )
        .unwrap_err();
    assert!(err.to_string().contains("entityCount.interval"));
    assert!(fx.dispatcher.entity_count_handlers.is_empty());

    let err = fx
        .dispatcher
        .process_subscriptions(
            Arc::new(Nothing),
            &[Subscription::new("fabric.usage").with_option("version", "3")],
        )
        .unwrap_err();
    assert!(err.to_string().contains("UsageEventV3Handler"));

    fx.dispatcher
        .process_subscriptions(Arc::new(Nothing), &[Subscription::new("no.such.events")])
        .unwrap();
}

#[tokio::test]
async fn every_namespace_is_registered() {
    let fx = fixture();
    let types = fx.dispatcher.event_types();
    for ns in [
        "alert",
        "apiSession",
        "edge.apiSessions",
        "authentication",
        "edge.authentications",
        "circuit",
        "fabric.circuits",
        "cluster",
        "connect",
        "entityChange",
        "link",
        "fabric.links",
        "metrics",
        "router",
        "fabric.routers",
        "sdk",
        "service",
        "services",
        "terminator",
        "fabric.terminators",
        "entityCount",
        "edge.entityCounts",
        "usage",
        "fabric.usage",
        "session",
        "edge.sessions",
    ] {
        assert!(types.iter().any(|t| t == ns), "{ns} not registered");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_all_subscriptions_unwraps_every_registration() {
    let fx = fixture();
    let collector = Arc::new(Collector::default());
    fx.dispatcher
        .process_subscriptions(
            collector.clone(),
            &[
                Subscription::new("router"),
                Subscription::new("fabric.routers"),
                Subscription::new("terminator"),
                Subscription::new("metrics").with_option("metricFilter", "count"),
                Subscription::new("entityChange").with_option("propagateAlways", true),
            ],
        )
        .unwrap();
    assert_eq!(fx.dispatcher.router_handlers.len(), 2);
    assert_eq!(fx.dispatcher.metrics_msg_handlers.snapshot().len(), 3);

    fx.dispatcher.remove_all_subscriptions(collector.clone());

    assert!(fx.dispatcher.router_handlers.is_empty());
    assert!(fx.dispatcher.terminator_handlers.is_empty());
    assert!(fx.dispatcher.entity_change.handlers.is_empty());
    assert_eq!(fx.dispatcher.metrics_msg_handlers.snapshot().len(), 2);

    fx.dispatcher.router_connected("r1");
    create_service(&fx.db, "svc-1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(collector.router.lock().unwrap().is_empty());
    assert!(collector.entity_events().is_empty());

    fx.dispatcher.remove_all_subscriptions(collector);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn legacy_namespace_subscribers_see_relabelled_copies() {
    let fx = fixture();
    let current = Arc::new(Collector::default());
    let legacy = Arc::new(Collector::default());
    subscribe(&fx, &current, Subscription::new("router"));
    subscribe(&fx, &legacy, Subscription::new("fabric.routers"));

    fx.dispatcher.router_connected("r1");

    eventually("router events", || {
        current.router.lock().unwrap().len() == 1 && legacy.router.lock().unwrap().len() == 1
    })
    .await;
    assert_eq!(current.router.lock().unwrap()[0].namespace, "router");
    let relabelled = legacy.router.lock().unwrap()[0].clone();
    assert_eq!(relabelled.namespace, "fabric.routers");
    assert!(relabelled.router_online);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn router_presence_reports_terminator_availability() {
    let fx = fixture();
    fx.topology.add_terminator("t1", "svc-1", "r1", Precedence::Default);
    fx.topology.add_terminator("t2", "svc-1", "r1", Precedence::Required);
    fx.topology.add_terminator("t3", "svc-1", "r2", Precedence::Default);
    fx.topology.online.lock().unwrap().insert("r1".to_string());

    let collector = Arc::new(Collector::default());
    subscribe(
        &fx,
        &collector,
        Subscription::new("terminator").with_option("include", "router-online"),
    );

    fx.dispatcher.router_connected("r1");

    eventually("terminator events", || {
        collector.terminator.lock().unwrap().len() == 2
    })
    .await;
    let events = collector.terminator.lock().unwrap().clone();
    for event in &events {
        assert_eq!(event.event_type, TerminatorEventType::RouterOnline);
        assert_eq!(event.total_terminators, 3);
        assert_eq!(event.usable_default_terminators, 1);
        assert_eq!(event.usable_required_terminators, 1);
        assert!(event.router_online);
    }
    let mut ids: Vec<&str> = events.iter().map(|e| e.terminator_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["t1", "t2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminator_store_changes_become_terminator_events() {
    let fx = fixture();
    fx.topology.set_follower(true);
    let gated = Arc::new(Collector::default());
    let always = Arc::new(Collector::default());
    subscribe(&fx, &gated, Subscription::new("terminator"));
    subscribe(
        &fx,
        &always,
        Subscription::new("fabric.terminators").with_option("propagateAlways", "true"),
    );

    fx.db
        .update(None, |ctx| {
            ctx.create(
                "terminator",
                "t9",
                json!({"service": "svc-unknown", "router": "r1", "cost": 7}),
            )
        })
        .unwrap();

    eventually("terminator event", || always.terminator.lock().unwrap().len() == 1).await;
    let event = always.terminator.lock().unwrap()[0].clone();
    assert_eq!(event.namespace, "fabric.terminators");
    assert_eq!(event.event_type, TerminatorEventType::Created);
    assert_eq!(event.terminator_id, "t9");
    assert_eq!(event.static_cost, 7);
    assert_eq!(event.total_terminators, -1);
    assert_eq!(event.usable_default_terminators, -1);
    assert!(!event.propagate_indicator);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gated.terminator.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_subscribers_get_filtered_events() {
    let fx = fixture();
    let collector = Arc::new(Collector::default());
    subscribe(
        &fx,
        &collector,
        Subscription::new("metrics")
            .with_option("sourceFilter", "^router-")
            .with_option("metricFilter", "bytes"),
    );

    let mut msg = MetricsMessage {
        source_id: "router-a".to_string(),
        timestamp: Utc::now(),
        ..Default::default()
    };
    msg.int_values.insert("tx.bytes".to_string(), 10);
    msg.int_values.insert("tx.msgs".to_string(), 3);

    let mut relayed = msg.clone();
    relayed.do_not_propagate = true;
    fx.dispatcher.accept_metrics_msg(relayed);

    let mut other = msg.clone();
    other.source_id = "ctrl-b".to_string();
    fx.dispatcher.accept_metrics_msg(other);

    fx.dispatcher.accept_metrics_msg(msg);

    eventually("metrics event", || !collector.metrics.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = collector.metrics.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metric, "tx.bytes");
    assert_eq!(events[0].source_id, "router-a");
    assert_eq!(events[0].event_src_id, "ctrl1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_store_changes_become_session_events() {
    let fx = fixture();
    let current = Arc::new(Collector::default());
    let legacy = Arc::new(Collector::default());
    subscribe(&fx, &current, Subscription::new("session"));
    subscribe(
        &fx,
        &legacy,
        Subscription::new("edge.sessions").with_option("include", "deleted"),
    );

    let state = json!({
        "token": "tok-1",
        "apiSessionId": "as-1",
        "identityId": "id-1",
        "serviceId": "svc-1",
        "type": "bind",
    });
    fx.db
        .update(None, |ctx| ctx.create("session", "s-1", state.clone()))
        .unwrap();
    fx.db
        .update(None, |ctx| ctx.update("session", "s-1", json!({"token": "tok-2"})))
        .unwrap();
    fx.db
        .update(None, |ctx| ctx.delete("session", "s-1"))
        .unwrap();

    eventually("session events", || {
        current.session.lock().unwrap().len() == 2 && legacy.session.lock().unwrap().len() == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut events = current.session.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    events.sort_by_key(|e| e.event_type.as_str());
    let created = &events[0];
    assert_eq!(created.event_type, SessionEventType::Created);
    assert_eq!(created.namespace, "session");
    assert_eq!(created.id, "s-1");
    assert_eq!(created.session_type, SessionType::Bind);
    assert_eq!(created.api_session_id, "as-1");
    assert_eq!(created.service_id, "svc-1");
    assert_eq!(created.event_src_id, "ctrl1");

    let deleted = legacy.session.lock().unwrap()[0].clone();
    assert_eq!(deleted.namespace, "edge.sessions");
    assert_eq!(deleted.event_type, SessionEventType::Deleted);
    assert_eq!(deleted.token, "tok-2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn usage_subscribers_get_the_version_they_asked_for() {
    let fx = fixture();
    let v2 = Arc::new(Collector::default());
    let v3 = Arc::new(Collector::default());
    subscribe(
        &fx,
        &v2,
        Subscription::new("usage").with_option("include", "ingress.tx"),
    );
    subscribe(
        &fx,
        &v3,
        Subscription::new("fabric.usage").with_option("version", 3),
    );

    let mut msg = MetricsMessage {
        source_id: "router-a".to_string(),
        timestamp: Utc::now(),
        ..Default::default()
    };
    for name in ["usage.ingress.tx", "usage.egress.rx"] {
        msg.interval_counters.insert(
            name.to_string(),
            IntervalCounter {
                interval_length: 60,
                buckets: vec![IntervalBucket {
                    interval_start_utc: 600,
                    values: BTreeMap::from([("c1".to_string(), 128)]),
                }],
            },
        );
    }
    msg.usage_counters.push(UsageCounter {
        interval_start_utc: 600,
        interval_length: 60,
        buckets: BTreeMap::from([(
            "c1".to_string(),
            UsageBucket {
                values: BTreeMap::from([("ingress.tx".to_string(), 128)]),
                ..Default::default()
            },
        )]),
    });

    let mut relayed = msg.clone();
    relayed.do_not_propagate = true;
    fx.dispatcher.accept_metrics_msg(relayed);
    fx.dispatcher.accept_metrics_msg(msg);

    eventually("usage events", || {
        !v2.usage.lock().unwrap().is_empty() && !v3.usage_v3.lock().unwrap().is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = v2.usage.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "usage.ingress.tx");
    assert_eq!(events[0].namespace, "usage");
    assert_eq!(events[0].usage, 128);
    assert!(v2.usage_v3.lock().unwrap().is_empty());

    let events = v3.usage_v3.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].namespace, "fabric.usage");
    assert_eq!(events[0].circuit_id, "c1");
    assert!(v3.usage.lock().unwrap().is_empty());

    fx.dispatcher.remove_all_subscriptions(v2.clone());
    fx.dispatcher.remove_all_subscriptions(v3.clone());
    assert!(fx.dispatcher.usage_handlers.is_empty());
    assert!(fx.dispatcher.usage_v3_handlers.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entity_counts_repeat_until_unsubscribed() {
    let fx = fixture();
    create_service(&fx.db, "svc-1");
    let collector = Arc::new(Collector::default());
    subscribe(
        &fx,
        &collector,
        Subscription::new("edge.entityCounts").with_option("interval", "50ms"),
    );

    eventually("two count reports", || collector.counts.lock().unwrap().len() >= 2).await;
    let report = collector.counts.lock().unwrap()[0].clone();
    assert_eq!(report.namespace, "edge.entityCounts");
    assert_eq!(report.event_src_id, "ctrl1");
    assert_eq!(report.counts["service"], 1);
    assert_eq!(report.counts["identity"], 0);
    assert!(report.error.is_empty());

    fx.dispatcher.remove_all_subscriptions(collector.clone());
    tokio::time::sleep(Duration::from_millis(150)).await;
    let seen = collector.counts.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collector.counts.lock().unwrap().len(), seen);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entity_counts_stop_when_dispatcher_closes() {
    let fx = fixture();
    let collector = Arc::new(Collector::default());
    subscribe(
        &fx,
        &collector,
        Subscription::new("entityCount").with_option("interval", "50ms"),
    );

    eventually("a count report", || !collector.counts.lock().unwrap().is_empty()).await;
    assert_eq!(collector.counts.lock().unwrap()[0].namespace, "entityCount");

    fx.closing.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let seen = collector.counts.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collector.counts.lock().unwrap().len(), seen);
    assert_eq!(fx.dispatcher.entity_count_handlers.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_does_not_starve_others() {
    let fx = fixture();
    let panicking: HandlerRef<RouterEvent> =
        Arc::new(meshd_event::HandlerFn::new(|_: &RouterEvent| panic!("handler bug")));
    let collector = Arc::new(Collector::default());
    fx.dispatcher.add_handler(panicking);
    fx.dispatcher.add_handler::<RouterEvent>(collector.clone());

    fx.dispatcher.router_connected("r1");
    fx.dispatcher.router_disconnected("r1");

    eventually("both router events", || collector.router.lock().unwrap().len() == 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_handler_delays_neither_producer_nor_others() {
    let fx = fixture();
    let (release, gate) = std::sync::mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    let entered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let blocked_entered = entered.clone();
    let blocked: HandlerRef<RouterEvent> =
        Arc::new(meshd_event::HandlerFn::new(move |_: &RouterEvent| {
            blocked_entered.fetch_add(1, Ordering::SeqCst);
            let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(10));
        }));
    let collector = Arc::new(Collector::default());
    fx.dispatcher.add_handler(blocked);
    fx.dispatcher.add_handler::<RouterEvent>(collector.clone());

    let started = std::time::Instant::now();
    fx.dispatcher.router_connected("r1");
    fx.dispatcher.router_disconnected("r1");
    assert!(started.elapsed() < Duration::from_secs(1));

    eventually("both router events", || collector.router.lock().unwrap().len() == 2).await;
    assert!(entered.load(Ordering::SeqCst) >= 1);
    assert!(started.elapsed() < Duration::from_secs(5));

    drop(release);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_loop_compacts_after_quiet_period_and_stops_on_close() {
    let fx = fixture_with(DispatcherSettings {
        flush_quiescence: Duration::from_millis(100),
        ..settings()
    });
    let task = tokio::spawn(run_flush_loop(fx.dispatcher.clone()));

    let db = fx.db.clone();
    tokio::task::spawn_blocking(move || create_service(&db, "svc-1"))
        .await
        .unwrap();

    let db = fx.db.clone();
    eventually("log compaction", move || logged(&db).is_empty()).await;

    fx.closing.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("flush loop should stop")
        .unwrap();
}

#[tokio::test]
async fn flush_requires_initialized_dispatcher() {
    let (dispatcher, _closing) = new_dispatcher(settings(), Arc::new(TestTopology::default()));
    assert!(matches!(
        dispatcher.flush_committed_tx_events(false),
        Err(DispatchError::NotInitialized)
    ));
    assert!(matches!(
        dispatcher.add_entity_change_source("service"),
        Err(DispatchError::NotInitialized)
    ));
    let counts = dispatcher.entity_counts();
    assert!(counts.counts.is_empty());
    assert!(!counts.error.is_empty());
}

#[tokio::test]
async fn wire_rejects_handlers_without_subscriptions_or_known_type() {
    let fx = fixture();
    let mut configs = BTreeMap::new();
    configs.insert(
        "quiet".to_string(),
        toml::from_str::<crate::EventHandlerConfig>("[handler]\ntype = \"stdout\"").unwrap(),
    );
    assert!(matches!(
        fx.dispatcher.wire_event_handlers(&configs),
        Err(DispatchError::NoSubscriptions(id)) if id == "quiet"
    ));

    let mut configs = BTreeMap::new();
    configs.insert(
        "odd".to_string(),
        toml::from_str::<crate::EventHandlerConfig>(
            "[handler]\ntype = \"syslog\"\n[[subscriptions]]\ntype = \"router\"",
        )
        .unwrap(),
    );
    assert!(matches!(
        fx.dispatcher.wire_event_handlers(&configs),
        Err(DispatchError::UnknownHandlerType { .. })
    ));

    let path = fx.dir.path().join("events.log");
    let mut configs = BTreeMap::new();
    configs.insert(
        "xml".to_string(),
        toml::from_str::<crate::EventHandlerConfig>(&format!(
            "[handler]\ntype = \"file\"\nformat = \"xml\"\npath = {:?}\n[[subscriptions]]\ntype = \"router\"",
            path.to_str().unwrap()
        ))
        .unwrap(),
    );
    assert!(matches!(
        fx.dispatcher.wire_event_handlers(&configs),
        Err(DispatchError::UnknownFormat(f)) if f == "xml"
    ));
}
