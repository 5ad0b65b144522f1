//! Controller cluster membership and leadership events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const CLUSTER_EVENT_NS: &str = "cluster";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterEventType {
    #[serde(rename = "peer.connected")]
    PeerConnected,
    #[serde(rename = "peer.disconnected")]
    PeerDisconnected,
    #[serde(rename = "members.changed")]
    MembersChanged,
    #[serde(rename = "leadership.gained")]
    LeadershipGained,
    #[serde(rename = "leadership.lost")]
    LeadershipLost,
    #[serde(rename = "state.has_leader")]
    HasLeader,
    #[serde(rename = "state.is_leaderless")]
    IsLeaderless,
    #[serde(rename = "state.ro")]
    ReadOnly,
    #[serde(rename = "state.rw")]
    ReadWrite,
    #[serde(rename = "peer.not_member")]
    PeerNotMember,
}

impl ClusterEventType {
    pub const ALL: &'static [&'static str] = &[
        "peer.connected",
        "peer.disconnected",
        "members.changed",
        "leadership.gained",
        "leadership.lost",
        "state.has_leader",
        "state.is_leaderless",
        "state.ro",
        "state.rw",
        "peer.not_member",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerConnected => "peer.connected",
            Self::PeerDisconnected => "peer.disconnected",
            Self::MembersChanged => "members.changed",
            Self::LeadershipGained => "leadership.gained",
            Self::LeadershipLost => "leadership.lost",
            Self::HasLeader => "state.has_leader",
            Self::IsLeaderless => "state.is_leaderless",
            Self::ReadOnly => "state.ro",
            Self::ReadWrite => "state.rw",
            Self::PeerNotMember => "peer.not_member",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPeer {
    pub id: String,
    pub addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: ClusterEventType,
    /// Raft log index the event was observed at.
    #[serde(default)]
    pub index: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<ClusterPeer>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub leader_id: String,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} index={} peers={} leaderId={}",
            self.namespace,
            self.event_type.as_str(),
            self.index,
            self.peers.len(),
            self.leader_id
        )
    }
}

impl Event for ClusterEvent {
    const NAMESPACE: &'static str = CLUSTER_EVENT_NS;
    const CAPABILITY: &'static str = "ClusterEventHandler";
    const EVENT_TYPES: &'static [&'static str] = ClusterEventType::ALL;

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn event_type_name(&self) -> &str {
        self.event_type.as_str()
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.cluster_handler()
    }
}
