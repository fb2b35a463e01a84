//! The consensus state machine driving a single PBFT instance at a time.
//!
//! A phase-gated dispatch: each operation only transitions the instance
//! when the message it receives matches the live stage, with a
//! two-threshold vote tally (2f prepares, 2f+1 commits). No pipelining:
//! only one instance is ever live at a time.

use std::collections::HashMap;
use std::fmt;

use crate::bft::crypto::Digest;
use crate::bft::message::{NodeId, PrePrepareMsg, RequestMessage, VoteKind, VoteMsg};

/// The stage of the live (or idle) consensus instance.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConsensusStage {
    Idle,
    PrePrepared,
    Prepared,
    Committed,
}

/// Failure modes raised directly by the state machine operations.
///
/// `ViewMismatch`, `SequenceMismatch` and duplicate senders are never
/// raised as errors: they are silently dropped, surfacing as `Ok(None)`
/// instead.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConsensusError {
    InstanceInProgress,
    WrongStage,
    DigestMismatch,
    NoLiveInstance,
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ConsensusError {}

/// A vote the caller must still attribute to itself (`node_id`) and,
/// for commit votes, sign (`pass`) through the verifier port.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoteTemplate {
    pub msg_type: VoteKind,
    pub view_id: u64,
    pub sequence_id: u64,
    pub digest: Digest,
}

/// A reply the caller must still attribute to itself (`node_id`) and
/// compute `result` for.
#[derive(Clone, Debug)]
pub struct ReplyTemplate {
    pub view_id: u64,
    pub timestamp: i64,
    pub client_id: String,
}

/// Tracks one consensus instance's worth of votes.
#[derive(Default)]
struct MsgLogs {
    req_msg: Option<RequestMessage>,
    prepare_msgs: HashMap<NodeId, VoteMsg>,
    commit_msgs: HashMap<NodeId, VoteMsg>,
}

/// Drives the pre-prepare/prepare/commit state machine for one replica.
///
/// `view_id` is fixed at construction (view changes are out of scope).
/// `last_sequence_id` persists across instances and is only advanced
/// when an instance commits, so that `start_consensus` always proposes
/// `last_sequence_id + 1`.
pub struct Consensus {
    view_id: u64,
    last_sequence_id: u64,
    stage: ConsensusStage,
    sequence_id: u64,
    digest: Option<Digest>,
    logs: MsgLogs,
}

impl Consensus {
    pub fn new(view_id: u64) -> Self {
        Self {
            view_id,
            last_sequence_id: 0,
            stage: ConsensusStage::Idle,
            sequence_id: 0,
            digest: None,
            logs: MsgLogs::default(),
        }
    }

    pub fn stage(&self) -> ConsensusStage {
        self.stage
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn has_live_instance(&self) -> bool {
        !matches!(self.stage, ConsensusStage::Idle)
    }

    /// Primary entry: assign the next sequence id and emit a `PRE-PREPARE`.
    pub fn start_consensus(&mut self, mut req: RequestMessage) -> Result<PrePrepareMsg, ConsensusError> {
        if self.has_live_instance() {
            return Err(ConsensusError::InstanceInProgress);
        }
        let sequence_id = self.last_sequence_id + 1;
        req.sequence_id = sequence_id;
        let digest = req
            .digest()
            .expect("hashing a request's canonical encoding cannot fail");

        self.sequence_id = sequence_id;
        self.digest = Some(digest);
        self.logs.req_msg = Some(req.clone());
        self.stage = ConsensusStage::PrePrepared;

        Ok(PrePrepareMsg {
            view_id: self.view_id,
            sequence_id,
            digest,
            request_msg: req,
        })
    }

    /// Participant entry: validate and record a `PRE-PREPARE`, emitting
    /// a matching `PREPARE` template.
    pub fn pre_prepare(&mut self, ppm: PrePrepareMsg) -> Result<Option<VoteTemplate>, ConsensusError> {
        if self.has_live_instance() {
            return Err(ConsensusError::WrongStage);
        }
        if ppm.view_id != self.view_id {
            // view mismatch: dropped silently
            return Ok(None);
        }

        let recomputed = ppm
            .request_msg
            .digest()
            .expect("hashing a request's canonical encoding cannot fail");
        if recomputed != ppm.digest {
            return Err(ConsensusError::DigestMismatch);
        }

        self.sequence_id = ppm.sequence_id;
        self.digest = Some(ppm.digest);
        self.logs.req_msg = Some(ppm.request_msg);
        self.stage = ConsensusStage::PrePrepared;

        Ok(Some(VoteTemplate {
            msg_type: VoteKind::Prepare,
            view_id: self.view_id,
            sequence_id: self.sequence_id,
            digest: ppm.digest,
        }))
    }

    /// Accepts a `PREPARE` vote, transitioning to `Prepared` once 2f
    /// distinct remote votes are tallied.
    pub fn prepare(&mut self, vote: VoteMsg, f: usize) -> Result<Option<VoteTemplate>, ConsensusError> {
        if !self.has_live_instance() {
            return Err(ConsensusError::NoLiveInstance);
        }
        if !self.matches_live_instance(&vote, VoteKind::Prepare) {
            return Ok(None);
        }

        // duplicate sender: silently ignored, not re-tallied
        if self.logs.prepare_msgs.contains_key(&vote.node_id) {
            return Ok(None);
        }
        self.logs.prepare_msgs.insert(vote.node_id.clone(), vote);

        if self.stage == ConsensusStage::PrePrepared && self.logs.prepare_msgs.len() >= 2 * f {
            self.stage = ConsensusStage::Prepared;
            return Ok(Some(VoteTemplate {
                msg_type: VoteKind::Commit,
                view_id: self.view_id,
                sequence_id: self.sequence_id,
                digest: self.digest.expect("live instance always has a digest"),
            }));
        }

        // recorded for forensic use, but no re-emission once Prepared
        Ok(None)
    }

    /// Accepts a `COMMIT` vote, transitioning to `Committed` once 2f+1
    /// distinct remote votes are tallied.
    pub fn commit(
        &mut self,
        vote: VoteMsg,
        f: usize,
    ) -> Result<Option<(ReplyTemplate, RequestMessage)>, ConsensusError> {
        if !self.has_live_instance() {
            return Err(ConsensusError::NoLiveInstance);
        }
        if !self.matches_live_instance(&vote, VoteKind::Commit) {
            return Ok(None);
        }

        if self.logs.commit_msgs.contains_key(&vote.node_id) {
            return Ok(None);
        }
        self.logs.commit_msgs.insert(vote.node_id.clone(), vote);

        if self.stage == ConsensusStage::Prepared && self.logs.commit_msgs.len() >= 2 * f + 1 {
            self.stage = ConsensusStage::Committed;
            self.last_sequence_id = self.sequence_id;

            let req = self
                .logs
                .req_msg
                .clone()
                .expect("a live instance always has a stored request");
            let reply = ReplyTemplate {
                view_id: self.view_id,
                timestamp: req.timestamp,
                client_id: req.client_id.clone(),
            };
            return Ok(Some((reply, req)));
        }

        Ok(None)
    }

    /// Clears the live instance back to `Idle`, per Open Question (b):
    /// the engine never does this on its own, it must be invoked
    /// explicitly once the application has handled the committed reply.
    pub fn reset(&mut self) {
        self.stage = ConsensusStage::Idle;
        self.digest = None;
        self.logs = MsgLogs::default();
    }

    /// Number of distinct remote nodes in the prepare tally.
    pub fn prepare_count(&self) -> usize {
        self.logs.prepare_msgs.len()
    }

    /// Number of distinct remote nodes in the commit tally.
    pub fn commit_count(&self) -> usize {
        self.logs.commit_msgs.len()
    }

    fn matches_live_instance(&self, vote: &VoteMsg, expected: VoteKind) -> bool {
        vote.msg_type == expected
            && vote.view_id == self.view_id
            && vote.sequence_id == self.sequence_id
            && self.digest.map(|d| d == vote.digest).unwrap_or(false)
    }
}
