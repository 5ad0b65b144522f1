//! Topology view for a controller running without a cluster.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use meshd_db::Db;
use meshd_dispatch::{TerminatorInfo, Topology, TERMINATOR_ENTITY_TYPE};
use serde_json::Value;

/// Leaderless topology backed by the local terminator store.
///
/// Router presence and links are tracked in memory; they are reported by
/// the control channel and do not survive a restart.
///
/// Uses `std::sync::RwLock`: every acquisition is a brief set or map
/// operation that never spans an `.await` point, so a poisoned lock still
/// holds consistent data and is recovered.
pub struct StandaloneTopology {
    db: Arc<Db>,
    online_routers: RwLock<HashSet<String>>,
    links: RwLock<HashMap<String, (String, String)>>,
}

impl StandaloneTopology {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            online_routers: RwLock::new(HashSet::new()),
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Marks `router_id` online. Returns `false` if it already was.
    pub fn mark_online(&self, router_id: &str) -> bool {
        write(&self.online_routers).insert(router_id.to_string())
    }

    /// Marks `router_id` offline and drops the links it terminates.
    /// Returns `false` if it was not online.
    pub fn mark_offline(&self, router_id: &str) -> bool {
        let removed = write(&self.online_routers).remove(router_id);
        if removed {
            write(&self.links).retain(|_, (src, dst)| src != router_id && dst != router_id);
        }
        removed
    }

    pub fn link_established(&self, link_id: &str, src_router_id: &str, dst_router_id: &str) {
        write(&self.links).insert(
            link_id.to_string(),
            (src_router_id.to_string(), dst_router_id.to_string()),
        );
    }

    pub fn link_removed(&self, link_id: &str) {
        write(&self.links).remove(link_id);
    }

    fn terminators(&self) -> Vec<TerminatorInfo> {
        let rows = match self.db.list(TERMINATOR_ENTITY_TYPE) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to list terminators");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|(id, state)| parse_terminator(&id, state))
            .collect()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!("topology lock poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!("topology lock poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

fn parse_terminator(id: &str, state: Value) -> Option<TerminatorInfo> {
    match serde_json::from_value::<TerminatorInfo>(state) {
        Ok(mut terminator) => {
            if terminator.id.is_empty() {
                terminator.id = id.to_string();
            }
            Some(terminator)
        }
        Err(e) => {
            tracing::warn!(terminator_id = id, error = %e, "skipping malformed terminator");
            None
        }
    }
}

impl Topology for StandaloneTopology {
    fn is_leader_or_leaderless(&self) -> bool {
        true
    }

    fn is_router_online(&self, router_id: &str) -> bool {
        read(&self.online_routers).contains(router_id)
    }

    fn router_terminators(&self, router_id: &str) -> Vec<TerminatorInfo> {
        self.terminators()
            .into_iter()
            .filter(|t| t.router_id == router_id)
            .collect()
    }

    fn service_terminators(&self, service_id: &str) -> Option<Vec<TerminatorInfo>> {
        match self.db.get("service", service_id) {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(service_id, error = %e, "failed to load service");
                return None;
            }
        }

        Some(
            self.terminators()
                .into_iter()
                .filter(|t| t.service_id == service_id)
                .collect(),
        )
    }

    fn link_endpoints(&self, link_id: &str) -> Option<(String, String)> {
        read(&self.links).get(link_id).cloned()
    }
}
