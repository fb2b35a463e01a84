//! A single-replica PBFT agreement engine.
//!
//! Wires together three cooperating tasks — dispatcher, resolver,
//! alarm — communicating exclusively over `tokio::sync::mpsc` queues.
//! `Engine` is an owned value rather than a global singleton, so
//! multiple instances can coexist in the same process.

pub mod alarm;
pub mod buffer;
pub mod consensus;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod message;
pub mod resolver;
pub mod transport;
pub mod verifier;

use std::sync::Arc;

use tokio::sync::mpsc;

use dispatcher::StageUpdate;
use message::{Committee, Message, NodeId, PrePrepareMsg, RequestMessage, VoteMsg};
use resolver::Control;
use verifier::SharedVerifier;

/// The handle entry points given to the transport layer: pushes a
/// decoded message onto the entrance queue and returns immediately.
/// Cheap to clone; every inbound HTTP handler gets one.
pub struct EngineHandle {
    entrance_tx: mpsc::UnboundedSender<Message>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl EngineHandle {
    pub fn get_req(&self, req: RequestMessage) {
        let _ = self.entrance_tx.send(Message::Request(req));
    }

    pub fn get_pre_prepare(&self, ppm: PrePrepareMsg) {
        let _ = self.entrance_tx.send(Message::PrePrepare(ppm));
    }

    pub fn get_prepare(&self, vote: VoteMsg) {
        let _ = self.entrance_tx.send(Message::Prepare(vote));
    }

    pub fn get_commit(&self, vote: VoteMsg) {
        let _ = self.entrance_tx.send(Message::Commit(vote));
    }

    /// `ReplyMsg` is never transmitted over the wire in this core:
    /// replies are delivered directly to the verifier by the resolver
    /// when an instance commits. This entry point exists for symmetry
    /// with the other `Get*` methods but is intentionally inert.
    pub fn get_reply(&self, _reply: message::ReplyMsg) {
        ::log::trace!("get_reply is inert: replies are delivered to the verifier, not the wire");
    }

    /// Clears a `Committed` instance so a new request can be started.
    pub fn reset_instance(&self) {
        let _ = self.control_tx.send(Control::ResetInstance);
    }
}

/// Owns the three long-lived tasks backing a single replica.
pub struct Engine {
    handle: Arc<EngineHandle>,
}

impl Engine {
    /// Spawns the dispatcher, resolver and alarm tasks and wires their
    /// queues together. `self_id` must be a member of `committee`.
    pub fn new(self_id: NodeId, verifier: SharedVerifier, committee: Committee) -> Self {
        let committee = Arc::new(committee);
        let http_client = reqwest::Client::builder()
            .timeout(transport::BROADCAST_TIMEOUT)
            .build()
            .expect("building the broadcast http client cannot fail");

        let (entrance_tx, entrance_rx) = mpsc::unbounded_channel();
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = mpsc::unbounded_channel::<StageUpdate>();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatcher::run(entrance_rx, alarm_rx, stage_rx, delivery_tx));
        tokio::spawn(resolver::run(
            self_id,
            committee,
            verifier,
            http_client,
            delivery_rx,
            control_rx,
            stage_tx,
        ));
        tokio::spawn(alarm::run(alarm_tx));

        Self {
            handle: Arc::new(EngineHandle {
                entrance_tx,
                control_tx,
            }),
        }
    }

    /// A cheap, shareable handle for the transport layer to push
    /// inbound messages through.
    pub fn handle(&self) -> Arc<EngineHandle> {
        self.handle.clone()
    }

    pub fn reset_instance(&self) {
        self.handle.reset_instance();
    }
}
