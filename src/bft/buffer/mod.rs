//! The dispatcher's message buffer.
//!
//! Four flat FIFOs, one per message kind, holding entries that arrived
//! out of phase with the live consensus instance. Owned exclusively by
//! the dispatcher task; the resolver never touches it.

use std::collections::VecDeque;

use crate::bft::message::{PrePrepareMsg, RequestMessage, VoteMsg};

/// Buffers messages the dispatcher cannot yet release to the resolver.
#[derive(Default)]
pub struct MsgBuffer {
    requests: VecDeque<RequestMessage>,
    pre_prepares: VecDeque<PrePrepareMsg>,
    prepares: VecDeque<VoteMsg>,
    commits: VecDeque<VoteMsg>,
}

impl MsgBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_request(&mut self, req: RequestMessage) {
        self.requests.push_back(req);
    }

    pub fn push_pre_prepare(&mut self, ppm: PrePrepareMsg) {
        self.pre_prepares.push_back(ppm);
    }

    pub fn push_prepare(&mut self, vote: VoteMsg) {
        self.prepares.push_back(vote);
    }

    pub fn push_commit(&mut self, vote: VoteMsg) {
        self.commits.push_back(vote);
    }

    pub fn pop_request(&mut self) -> Option<RequestMessage> {
        self.requests.pop_front()
    }

    pub fn pop_pre_prepare(&mut self) -> Option<PrePrepareMsg> {
        self.pre_prepares.pop_front()
    }

    pub fn pop_prepare(&mut self) -> Option<VoteMsg> {
        self.prepares.pop_front()
    }

    pub fn pop_commit(&mut self) -> Option<VoteMsg> {
        self.commits.pop_front()
    }

    /// Drains every buffered request, in FIFO order, leaving the
    /// buffer empty for this kind.
    pub fn drain_requests(&mut self) -> Vec<RequestMessage> {
        self.requests.drain(..).collect()
    }

    pub fn drain_pre_prepares(&mut self) -> Vec<PrePrepareMsg> {
        self.pre_prepares.drain(..).collect()
    }

    pub fn drain_prepares(&mut self) -> Vec<VoteMsg> {
        self.prepares.drain(..).collect()
    }

    pub fn drain_commits(&mut self) -> Vec<VoteMsg> {
        self.commits.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.pre_prepares.is_empty()
            && self.prepares.is_empty()
            && self.commits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len() + self.pre_prepares.len() + self.prepares.len() + self.commits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::Digest;
    use crate::bft::message::{NodeId, VoteKind};

    fn sample_vote() -> VoteMsg {
        VoteMsg {
            msg_type: VoteKind::Prepare,
            view_id: 1,
            sequence_id: 1,
            digest: Digest::of(&"x").unwrap(),
            node_id: NodeId::new("n1"),
            pass: None,
        }
    }

    #[test]
    fn fifo_order_is_preserved_per_kind() {
        let mut buf = MsgBuffer::new();
        let mut v1 = sample_vote();
        v1.node_id = NodeId::new("first");
        let mut v2 = sample_vote();
        v2.node_id = NodeId::new("second");

        buf.push_prepare(v1);
        buf.push_prepare(v2);

        assert_eq!(buf.pop_prepare().unwrap().node_id.as_str(), "first");
        assert_eq!(buf.pop_prepare().unwrap().node_id.as_str(), "second");
        assert!(buf.pop_prepare().is_none());
    }

    #[test]
    fn kinds_do_not_interfere() {
        let mut buf = MsgBuffer::new();
        buf.push_prepare(sample_vote());
        assert!(buf.pop_commit().is_none());
        assert_eq!(buf.len(), 1);
        assert!(!buf.is_empty());
    }
}
