//! The append-only log of committed decisions: a sequence id, the
//! request that was ordered, and the reply produced for it, recoverable
//! in order. No checkpoint or state-transfer machinery (out of scope).
//!
//! Call sites that also need the `log` crate's tracing macros import
//! them item-by-item (`use log::{info, warn}`) rather than glob-import
//! this module, so the two `log` names never collide.

use crate::bft::message::{ReplyMsg, RequestMessage};

/// One committed decision: the request that was ordered and the reply
/// the engine produced for it.
#[derive(Clone, Debug)]
pub struct Decision {
    pub sequence_id: u64,
    pub request: RequestMessage,
    pub reply: ReplyMsg,
}

/// An in-memory, append-only record of every decision this replica has
/// committed, ordered by `sequence_id`.
#[derive(Default)]
pub struct CommittedLog {
    decisions: Vec<Decision>,
}

impl CommittedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freshly committed decision.
    ///
    /// Panics if `sequence_id` is not strictly greater than the last
    /// appended entry: the resolver is the only writer and must never
    /// append out of order.
    pub fn append(&mut self, sequence_id: u64, request: RequestMessage, reply: ReplyMsg) {
        if let Some(last) = self.decisions.last() {
            assert!(
                sequence_id > last.sequence_id,
                "committed log must grow monotonically"
            );
        }
        self.decisions.push(Decision {
            sequence_id,
            request,
            reply,
        });
    }

    /// The sequence id of the most recently committed decision, or 0
    /// if nothing has been committed yet.
    pub fn last_sequence_id(&self) -> u64 {
        self.decisions.last().map(|d| d.sequence_id).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn get(&self, sequence_id: u64) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|d| d.sequence_id == sequence_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::message::NodeId;

    fn sample(seq: u64) -> (RequestMessage, ReplyMsg) {
        let req = RequestMessage {
            client_id: "c1".into(),
            timestamp: 0,
            operation: serde_json::json!(null),
            sequence_id: seq,
            height: 1,
            payload: vec![],
        };
        let reply = ReplyMsg {
            view_id: 10,
            timestamp: 0,
            client_id: "c1".into(),
            node_id: NodeId::new("n1"),
            result: 1,
        };
        (req, reply)
    }

    #[test]
    fn append_tracks_last_sequence_id() {
        let mut log = CommittedLog::new();
        assert_eq!(log.last_sequence_id(), 0);
        let (req, reply) = sample(1);
        log.append(1, req, reply);
        assert_eq!(log.last_sequence_id(), 1);
        let (req, reply) = sample(2);
        log.append(2, req, reply);
        assert_eq!(log.last_sequence_id(), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    #[should_panic(expected = "monotonically")]
    fn append_out_of_order_panics() {
        let mut log = CommittedLog::new();
        let (req, reply) = sample(2);
        log.append(2, req, reply);
        let (req, reply) = sample(1);
        log.append(1, req, reply);
    }

    #[test]
    fn get_finds_by_sequence_id() {
        let mut log = CommittedLog::new();
        let (req, reply) = sample(5);
        log.append(5, req, reply);
        assert!(log.get(5).is_some());
        assert!(log.get(6).is_none());
    }
}
