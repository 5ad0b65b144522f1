//! What the dispatcher needs to know about the network and the cluster.

use meshd_event::Precedence;
use serde::{Deserialize, Serialize};

/// A terminator as stored in the `terminator` entity store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatorInfo {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "service")]
    pub service_id: String,
    #[serde(alias = "router")]
    pub router_id: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub precedence: Precedence,
    #[serde(default, alias = "cost")]
    pub static_cost: u16,
}

/// Read access to leadership, router presence and the terminator model.
///
/// Implemented by the domain layer. Every method must be cheap and must not
/// open a write transaction: several are called from inside one.
pub trait Topology: Send + Sync {
    /// `true` if this node is the cluster leader or no leader exists.
    fn is_leader_or_leaderless(&self) -> bool;

    fn is_router_online(&self, router_id: &str) -> bool;

    /// Terminators hosted on `router_id`.
    fn router_terminators(&self, router_id: &str) -> Vec<TerminatorInfo>;

    /// All terminators of `service_id`, or `None` if the service is unknown.
    fn service_terminators(&self, service_id: &str) -> Option<Vec<TerminatorInfo>>;

    /// Source and destination router of `link_id`, if the link is known.
    fn link_endpoints(&self, link_id: &str) -> Option<(String, String)>;

    fn dynamic_cost(&self, _terminator_id: &str) -> u16 {
        0
    }
}
