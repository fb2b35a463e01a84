//! This module contains types associated with messages traded
//! between replicas, and their canonical JSON encoding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::bft::crypto::Digest;
use crate::bft::error::*;

/// A `NodeId` is the hex-encoded uncompressed public key of a replica.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new<S: Into<String>>(hex_pubkey: S) -> Self {
        Self(hex_pubkey.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A single member of the committee.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Replica {
    #[serde(rename = "publicKey")]
    pub public_key: NodeId,
    pub host: String,
    pub port: u16,
}

impl Replica {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The ordered list of replicas taking part in consensus.
///
/// Immutable after construction: membership discovery is a collaborator
/// out of scope for this engine.
#[derive(Clone, Debug)]
pub struct Committee {
    replicas: Vec<Replica>,
}

impl Committee {
    pub fn new(replicas: Vec<Replica>) -> Result<Self> {
        if replicas.is_empty() {
            return Err("a committee needs at least one replica")
                .simple_msg(ErrorKind::Communication, "empty committee");
        }
        Ok(Self { replicas })
    }

    /// Total number of replicas, N.
    pub fn n(&self) -> usize {
        self.replicas.len()
    }

    /// Maximum tolerated Byzantine replicas, f = floor(N/3).
    pub fn f(&self) -> usize {
        self.replicas.len() / 3
    }

    /// The primary is, by convention, the first committee member.
    pub fn primary(&self) -> &Replica {
        &self.replicas[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.iter()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Replica> {
        self.replicas.iter().find(|r| &r.public_key == id)
    }

    /// Every replica other than `self_id`.
    pub fn peers<'a>(&'a self, self_id: &'a NodeId) -> impl Iterator<Item = &'a Replica> {
        self.replicas.iter().filter(move |r| &r.public_key != self_id)
    }
}

/// The view this core's consensus instances run in.
///
/// The view is fixed at construction time: view changes and leader
/// rotation are out of scope.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ViewId(pub u64);

/// The documented initial view id constant.
pub const INITIAL_VIEW_ID: ViewId = ViewId(10_000_000_000);

/// A client request to be ordered.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub client_id: String,
    pub timestamp: i64,
    pub operation: serde_json::Value,
    pub sequence_id: u64,
    pub height: u64,
    pub payload: Vec<u8>,
}

impl RequestMessage {
    pub fn digest(&self) -> Result<Digest> {
        Digest::of(self)
    }
}

/// The `PRE-PREPARE` message, sent by the primary to start a new instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrePrepareMsg {
    pub view_id: u64,
    pub sequence_id: u64,
    pub digest: Digest,
    pub request_msg: RequestMessage,
}

/// Discriminates a `VoteMsg` between the `PREPARE` and `COMMIT` phases.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum VoteKind {
    Prepare,
    Commit,
}

/// A `PREPARE` or `COMMIT` vote.
///
/// `pass` is only ever populated for `Commit` votes: it carries the
/// opaque signature blob produced by the verifier's `sign_msg`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMsg {
    pub msg_type: VoteKind,
    pub view_id: u64,
    pub sequence_id: u64,
    pub digest: Digest,
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<Vec<u8>>,
}

/// A prepare vote stripped of heavy fields, suitable for relaying
/// on the wire at the `/prepare` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPrepareMsg {
    pub view_id: u64,
    pub sequence_id: u64,
    pub digest: Digest,
    pub node_id: NodeId,
    pub msg_type: VoteKind,
}

impl From<&VoteMsg> for StoredPrepareMsg {
    fn from(v: &VoteMsg) -> Self {
        Self {
            view_id: v.view_id,
            sequence_id: v.sequence_id,
            digest: v.digest,
            node_id: v.node_id.clone(),
            msg_type: v.msg_type,
        }
    }
}

impl From<StoredPrepareMsg> for VoteMsg {
    fn from(s: StoredPrepareMsg) -> Self {
        Self {
            msg_type: s.msg_type,
            view_id: s.view_id,
            sequence_id: s.sequence_id,
            digest: s.digest,
            node_id: s.node_id,
            pass: None,
        }
    }
}

/// The reply handed to the verifier once an instance commits.
///
/// Not transmitted over the wire in this core; it is delivered
/// directly to `Verifier::reply_result`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMsg {
    pub view_id: u64,
    pub timestamp: i64,
    pub client_id: String,
    pub node_id: NodeId,
    pub result: u8,
}

/// The sentinel `nodeId` value that, when matched, makes
/// `Verifier::reply_result`'s `res` parameter 1 instead of 0.
pub const EXECUTED_SENTINEL: &str = "Executed";

/// The tagged sum of every message kind that crosses the entrance
/// queue, dispatched by the dispatcher on this very tag.
#[derive(Clone, Debug)]
pub enum Message {
    Request(RequestMessage),
    PrePrepare(PrePrepareMsg),
    Prepare(VoteMsg),
    Commit(VoteMsg),
}

/// A map from peer id to the transport error encountered broadcasting
/// to it, returned by the broadcast helper.
pub type BroadcastFailures = HashMap<NodeId, Error>;
