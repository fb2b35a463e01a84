//! Sole consumer of the delivery queue: drives the consensus state
//! machine, talks to the verifier, and broadcasts outbound messages.
//!
//! The only task that ever touches `Consensus`/`CommittedLog`: per-kind
//! batches are dispatched in turn, each transition reported on the
//! stage queue and any resulting vote broadcast immediately.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::bft::consensus::{Consensus, ConsensusStage};
use crate::bft::dispatcher::{Batch, StageUpdate};
use crate::bft::log::CommittedLog;
use crate::bft::message::{Committee, NodeId, ReplyMsg, VoteKind, VoteMsg, EXECUTED_SENTINEL};
use crate::bft::transport::{broadcast_commit, broadcast_pre_prepare, broadcast_prepare};
use crate::bft::verifier::SharedVerifier;

/// Control signals the resolver accepts outside the delivery queue.
pub enum Control {
    /// Clears a `Committed` instance so a new one can start. The engine
    /// never does this on its own; the application must invoke it once
    /// it has finished handling the committed reply.
    ResetInstance,
}

/// Spawns a broadcast as a detached task: the resolver never waits on
/// peer I/O, so one slow or hung peer can never stall consensus
/// progress for later batches. Failures surface as warnings only.
fn spawn_broadcast<F>(label: &'static str, fut: F)
where
    F: std::future::Future<Output = crate::bft::message::BroadcastFailures> + Send + 'static,
{
    tokio::spawn(async move {
        let failures = fut.await;
        for (peer, err) in failures {
            warn!("{} broadcast to {} failed: {}", label, peer, err);
        }
    });
}

/// Runs the resolver loop until both the delivery and control queues
/// are closed.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    self_id: NodeId,
    committee: Arc<Committee>,
    verifier: SharedVerifier,
    http_client: reqwest::Client,
    mut delivery_rx: mpsc::UnboundedReceiver<Batch>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    stage_tx: mpsc::UnboundedSender<StageUpdate>,
) {
    let f = committee.f();
    let mut consensus = Consensus::new(crate::bft::message::INITIAL_VIEW_ID.0);
    let mut committed_log = CommittedLog::new();

    loop {
        tokio::select! {
            batch = delivery_rx.recv() => {
                match batch {
                    Some(batch) => {
                        process_batch(
                            batch,
                            &self_id,
                            &committee,
                            &verifier,
                            &http_client,
                            f,
                            &mut consensus,
                            &mut committed_log,
                            &stage_tx,
                        )
                        .await;
                    }
                    None => break,
                }
            }
            ctrl = control_rx.recv() => {
                match ctrl {
                    Some(Control::ResetInstance) => {
                        consensus.reset();
                        report_stage(&consensus, &stage_tx);
                    }
                    None => break,
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_batch(
    batch: Batch,
    self_id: &NodeId,
    committee: &Arc<Committee>,
    verifier: &SharedVerifier,
    http_client: &reqwest::Client,
    f: usize,
    consensus: &mut Consensus,
    committed_log: &mut CommittedLog,
    stage_tx: &mpsc::UnboundedSender<StageUpdate>,
) {
    match batch {
        Batch::Requests(reqs) => {
            let is_primary = &committee.primary().public_key == self_id;
            for req in reqs {
                if !is_primary {
                    continue;
                }
                if let Err(e) = verifier.check_msg(&req) {
                    warn!("request from {} rejected by verifier: {}", req.client_id, e);
                    continue;
                }
                match consensus.start_consensus(req) {
                    Ok(ppm) => {
                        report_stage(consensus, stage_tx);
                        let (client, committee, self_id) =
                            (http_client.clone(), committee.clone(), self_id.clone());
                        spawn_broadcast("pre-prepare", async move {
                            broadcast_pre_prepare(&client, &committee, &self_id, &ppm).await
                        });
                    }
                    Err(e) => warn!("start_consensus failed: {}", e),
                }
            }
        }
        Batch::PrePrepares(ppms) => {
            for ppm in ppms {
                match consensus.pre_prepare(ppm) {
                    Ok(Some(template)) => {
                        report_stage(consensus, stage_tx);
                        let vote = VoteMsg {
                            msg_type: VoteKind::Prepare,
                            view_id: template.view_id,
                            sequence_id: template.sequence_id,
                            digest: template.digest,
                            node_id: self_id.clone(),
                            pass: None,
                        };
                        let (client, committee, self_id) =
                            (http_client.clone(), committee.clone(), self_id.clone());
                        spawn_broadcast("prepare", async move {
                            broadcast_prepare(&client, &committee, &self_id, &vote).await
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!("pre_prepare failed: {}", e),
                }
            }
        }
        Batch::Prepares(votes) => {
            for vote in votes {
                match consensus.prepare(vote, f) {
                    Ok(Some(template)) => {
                        report_stage(consensus, stage_tx);
                        let pass = match verifier.sign_msg(self_id, template.digest.as_ref()) {
                            Ok(pass) => pass,
                            Err(e) => {
                                warn!("sign_msg failed for commit vote: {}", e);
                                continue;
                            }
                        };
                        let vote = VoteMsg {
                            msg_type: VoteKind::Commit,
                            view_id: template.view_id,
                            sequence_id: template.sequence_id,
                            digest: template.digest,
                            node_id: self_id.clone(),
                            pass: Some(pass),
                        };
                        let (client, committee, self_id) =
                            (http_client.clone(), committee.clone(), self_id.clone());
                        spawn_broadcast("commit", async move {
                            broadcast_commit(&client, &committee, &self_id, &vote).await
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!("prepare failed: {}", e),
                }
            }
        }
        Batch::Commits(votes) => {
            for vote in votes {
                match consensus.commit(vote, f) {
                    Ok(Some((reply_template, req))) => {
                        report_stage(consensus, stage_tx);
                        let reply = ReplyMsg {
                            view_id: reply_template.view_id,
                            timestamp: reply_template.timestamp,
                            client_id: reply_template.client_id,
                            node_id: self_id.clone(),
                            result: if self_id.as_str() == EXECUTED_SENTINEL { 1 } else { 0 },
                        };
                        committed_log.append(req.sequence_id, req.clone(), reply.clone());
                        info!(
                            "committed request {} at sequence {}",
                            req.client_id, req.sequence_id
                        );
                        if let Err(e) = verifier.reply_result(&req, reply.result) {
                            warn!("reply_result failed: {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("commit failed: {}", e),
                }
            }
        }
    }
}

fn report_stage(consensus: &Consensus, stage_tx: &mpsc::UnboundedSender<StageUpdate>) {
    let update = StageUpdate {
        has_live_instance: consensus.has_live_instance(),
        stage: consensus.stage(),
    };
    let _ = stage_tx.send(update);
}
