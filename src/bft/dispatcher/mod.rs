//! Single owner of the `MsgBuffer`; routes entrance, alarm and
//! stage-update events into homogeneous batches for the resolver.
//!
//! Messages that arrive ahead of the live instance's stage are buffered
//! per kind and released together once the stage catches up, or on the
//! next alarm tick — never one at a time.

use log::{debug, trace};
use tokio::sync::mpsc;

use crate::bft::buffer::MsgBuffer;
use crate::bft::consensus::ConsensusStage;
use crate::bft::message::{Message, PrePrepareMsg, RequestMessage, VoteMsg};

/// A homogeneous group of messages released to the resolver together.
#[derive(Debug)]
pub enum Batch {
    Requests(Vec<RequestMessage>),
    PrePrepares(Vec<PrePrepareMsg>),
    Prepares(Vec<VoteMsg>),
    Commits(Vec<VoteMsg>),
}

/// The resolver's last-reported view of the live instance, as received
/// on the stage-update queue. Starts `(false, Idle)`, matching an
/// engine with no live instance yet.
#[derive(Copy, Clone, Debug)]
pub struct StageUpdate {
    pub has_live_instance: bool,
    pub stage: ConsensusStage,
}

impl Default for StageUpdate {
    fn default() -> Self {
        Self {
            has_live_instance: false,
            stage: ConsensusStage::Idle,
        }
    }
}

/// Runs the dispatcher loop until the entrance queue is closed.
pub async fn run(
    mut entrance_rx: mpsc::UnboundedReceiver<Message>,
    mut alarm_rx: mpsc::UnboundedReceiver<()>,
    mut stage_rx: mpsc::UnboundedReceiver<StageUpdate>,
    delivery_tx: mpsc::UnboundedSender<Batch>,
) {
    let mut buffer = MsgBuffer::new();
    let mut stage = StageUpdate::default();

    loop {
        tokio::select! {
            msg = entrance_rx.recv() => {
                match msg {
                    Some(msg) => handle_message(msg, &mut buffer, stage, &delivery_tx),
                    None => break,
                }
            }
            tick = alarm_rx.recv() => {
                match tick {
                    Some(()) => handle_alarm(&mut buffer, stage, &delivery_tx),
                    None => break,
                }
            }
            update = stage_rx.recv() => {
                match update {
                    Some(update) => {
                        debug!(
                            "dispatcher observed stage update: live={} stage={:?}",
                            update.has_live_instance, update.stage
                        );
                        stage = update;
                    }
                    None => break,
                }
            }
        }
    }
}

fn handle_message(
    msg: Message,
    buffer: &mut MsgBuffer,
    stage: StageUpdate,
    delivery_tx: &mpsc::UnboundedSender<Batch>,
) {
    match msg {
        Message::Request(req) => {
            if !stage.has_live_instance {
                let mut batch = buffer.drain_requests();
                batch.push(req);
                send(delivery_tx, Batch::Requests(batch));
            } else {
                trace!("buffering request: live instance in progress");
                buffer.push_request(req);
            }
        }
        Message::PrePrepare(ppm) => {
            if !stage.has_live_instance {
                let mut batch = buffer.drain_pre_prepares();
                batch.push(ppm);
                send(delivery_tx, Batch::PrePrepares(batch));
            } else {
                trace!("buffering pre-prepare: live instance in progress");
                buffer.push_pre_prepare(ppm);
            }
        }
        Message::Prepare(vote) => {
            if stage.has_live_instance && stage.stage == ConsensusStage::PrePrepared {
                let mut batch = buffer.drain_prepares();
                batch.push(vote);
                send(delivery_tx, Batch::Prepares(batch));
            } else {
                trace!("buffering prepare: stage not PrePrepared");
                buffer.push_prepare(vote);
            }
        }
        Message::Commit(vote) => {
            if stage.has_live_instance && stage.stage == ConsensusStage::Prepared {
                let mut batch = buffer.drain_commits();
                batch.push(vote);
                send(delivery_tx, Batch::Commits(batch));
            } else {
                trace!("buffering commit: stage not Prepared");
                buffer.push_commit(vote);
            }
        }
    }
}

fn handle_alarm(buffer: &mut MsgBuffer, stage: StageUpdate, delivery_tx: &mpsc::UnboundedSender<Batch>) {
    if !stage.has_live_instance {
        let reqs = buffer.drain_requests();
        if !reqs.is_empty() {
            send(delivery_tx, Batch::Requests(reqs));
        }
        let pre_prepares = buffer.drain_pre_prepares();
        if !pre_prepares.is_empty() {
            send(delivery_tx, Batch::PrePrepares(pre_prepares));
        }
        return;
    }

    match stage.stage {
        ConsensusStage::PrePrepared => {
            let prepares = buffer.drain_prepares();
            if !prepares.is_empty() {
                send(delivery_tx, Batch::Prepares(prepares));
            }
        }
        ConsensusStage::Prepared => {
            let commits = buffer.drain_commits();
            if !commits.is_empty() {
                send(delivery_tx, Batch::Commits(commits));
            }
        }
        ConsensusStage::Idle | ConsensusStage::Committed => {}
    }
}

fn send(delivery_tx: &mpsc::UnboundedSender<Batch>, batch: Batch) {
    // the resolver outlives the dispatcher for the engine's whole
    // lifetime, so this can only fail during shutdown
    let _ = delivery_tx.send(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::Digest;
    use crate::bft::message::{NodeId, VoteKind};

    fn sample_request() -> RequestMessage {
        RequestMessage {
            client_id: "c1".into(),
            timestamp: 0,
            operation: serde_json::json!(null),
            sequence_id: 1,
            height: 1,
            payload: vec![],
        }
    }

    fn sample_vote(msg_type: VoteKind) -> VoteMsg {
        VoteMsg {
            msg_type,
            view_id: 1,
            sequence_id: 1,
            digest: Digest::of(&"x").unwrap(),
            node_id: NodeId::new("n1"),
            pass: None,
        }
    }

    #[tokio::test]
    async fn request_releases_immediately_with_no_live_instance() {
        let (entrance_tx, entrance_rx) = mpsc::unbounded_channel();
        let (_alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (_stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(entrance_rx, alarm_rx, stage_rx, delivery_tx));

        entrance_tx.send(Message::Request(sample_request())).unwrap();
        let batch = delivery_rx.recv().await.unwrap();
        assert!(matches!(batch, Batch::Requests(v) if v.len() == 1));

        drop(entrance_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn prepare_is_buffered_until_stage_is_pre_prepared() {
        let (entrance_tx, entrance_rx) = mpsc::unbounded_channel();
        let (_alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(entrance_rx, alarm_rx, stage_rx, delivery_tx));

        entrance_tx
            .send(Message::Prepare(sample_vote(VoteKind::Prepare)))
            .unwrap();
        tokio::task::yield_now().await;

        stage_tx
            .send(StageUpdate {
                has_live_instance: true,
                stage: ConsensusStage::PrePrepared,
            })
            .unwrap();
        tokio::task::yield_now().await;

        entrance_tx
            .send(Message::Prepare(sample_vote(VoteKind::Prepare)))
            .unwrap();

        let batch = delivery_rx.recv().await.unwrap();
        match batch {
            Batch::Prepares(v) => assert_eq!(v.len(), 2),
            other => panic!("unexpected batch: {:?}", other),
        }

        drop(entrance_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn alarm_flushes_buffered_pre_prepares_when_idle() {
        let (entrance_tx, entrance_rx) = mpsc::unbounded_channel();
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(entrance_rx, alarm_rx, stage_rx, delivery_tx));

        // force a live instance so the pre-prepare buffers instead of releasing
        stage_tx
            .send(StageUpdate {
                has_live_instance: true,
                stage: ConsensusStage::PrePrepared,
            })
            .unwrap();
        tokio::task::yield_now().await;
        entrance_tx
            .send(Message::PrePrepare(PrePrepareMsg {
                view_id: 1,
                sequence_id: 1,
                digest: Digest::of(&"x").unwrap(),
                request_msg: sample_request(),
            }))
            .unwrap();
        tokio::task::yield_now().await;

        // now report idle again and tick the alarm: buffered pre-prepare flushes
        stage_tx
            .send(StageUpdate {
                has_live_instance: false,
                stage: ConsensusStage::Idle,
            })
            .unwrap();
        tokio::task::yield_now().await;
        alarm_tx.send(()).unwrap();

        let batch = delivery_rx.recv().await.unwrap();
        assert!(matches!(batch, Batch::PrePrepares(v) if v.len() == 1));

        drop(entrance_tx);
        task.await.unwrap();
    }
}
