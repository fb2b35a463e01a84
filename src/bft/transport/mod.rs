//! HTTP/JSON transport: inbound server routes and the outbound
//! broadcast helper.
//!
//! Peers are addressed by `host:port` from the committee config;
//! outbound requests POST canonical JSON and never retry.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};
use log::{error, trace};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::bft::error::{Error, ErrorKind, Result};
use crate::bft::message::{
    BroadcastFailures, Committee, NodeId, PrePrepareMsg, RequestMessage, StoredPrepareMsg, VoteMsg,
};
use crate::bft::EngineHandle;

/// How long a single peer is given to answer a broadcast before it
/// counts as a failure. Applied to the shared `reqwest::Client`, not
/// per request, so every send this client issues is bounded by it.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcasts `payload` to every peer in `committee` other than
/// `self_id`, POSTing its canonical JSON encoding to `path` on each
/// peer's address, concurrently. Never retries; failures are collected,
/// not fatal.
pub async fn broadcast<T: Serialize>(
    client: &reqwest::Client,
    committee: &Committee,
    self_id: &NodeId,
    path: &str,
    payload: &T,
) -> BroadcastFailures {
    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(e) => {
            error!("failed to encode payload for broadcast on {}: {}", path, e);
            return BroadcastFailures::new();
        }
    };

    let mut sends = JoinSet::new();
    for peer in committee.peers(self_id) {
        let client = client.clone();
        let url = format!("http://{}{}", peer.address(), path);
        let peer_id = peer.public_key.clone();
        let body = body.clone();
        sends.spawn(async move {
            let result = client
                .post(&url)
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await;
            (peer_id, result)
        });
    }

    let mut failures = BroadcastFailures::new();
    while let Some(joined) = sends.join_next().await {
        match joined {
            Ok((peer_id, Ok(resp))) if resp.status().is_success() => {
                trace!("broadcast to {} on {} succeeded", peer_id, path);
            }
            Ok((peer_id, Ok(resp))) => {
                error!(
                    "broadcast to {} on {} returned status {}",
                    peer_id,
                    path,
                    resp.status()
                );
                failures.insert(peer_id, Error::simple(ErrorKind::TransportError));
            }
            Ok((peer_id, Err(e))) => {
                error!("broadcast to {} on {} failed: {}", peer_id, path, e);
                failures.insert(peer_id, Error::wrapped(ErrorKind::TransportError, e));
            }
            Err(join_err) => {
                error!("broadcast task on {} panicked: {}", path, join_err);
            }
        }
    }
    failures
}

pub async fn broadcast_pre_prepare(
    client: &reqwest::Client,
    committee: &Committee,
    self_id: &NodeId,
    ppm: &PrePrepareMsg,
) -> BroadcastFailures {
    broadcast(client, committee, self_id, "/preprepare", ppm).await
}

pub async fn broadcast_prepare(
    client: &reqwest::Client,
    committee: &Committee,
    self_id: &NodeId,
    vote: &VoteMsg,
) -> BroadcastFailures {
    let stored: StoredPrepareMsg = vote.into();
    broadcast(client, committee, self_id, "/prepare", &stored).await
}

pub async fn broadcast_commit(
    client: &reqwest::Client,
    committee: &Committee,
    self_id: &NodeId,
    vote: &VoteMsg,
) -> BroadcastFailures {
    broadcast(client, committee, self_id, "/commit", vote).await
}

/// Shared state handed to every actix-web handler: just the engine
/// handle needed to push onto the entrance queue.
struct AppState {
    engine: Arc<EngineHandle>,
}

async fn handle_req(state: web::Data<AppState>, body: web::Json<RequestMessage>) -> HttpResponse {
    state.engine.get_req(body.into_inner());
    HttpResponse::Ok().finish()
}

async fn handle_pre_prepare(
    state: web::Data<AppState>,
    body: web::Json<PrePrepareMsg>,
) -> HttpResponse {
    state.engine.get_pre_prepare(body.into_inner());
    HttpResponse::Ok().finish()
}

async fn handle_prepare(
    state: web::Data<AppState>,
    body: web::Json<StoredPrepareMsg>,
) -> HttpResponse {
    state.engine.get_prepare(body.into_inner().into());
    HttpResponse::Ok().finish()
}

async fn handle_commit(state: web::Data<AppState>, body: web::Json<VoteMsg>) -> HttpResponse {
    state.engine.get_commit(body.into_inner());
    HttpResponse::Ok().finish()
}

/// Binds and runs the inbound HTTP server on `bind_addr`, forwarding
/// every decoded message to `engine`. Runs until the process exits;
/// intended to be spawned as its own task by the example binary.
pub async fn serve(bind_addr: &str, engine: Arc<EngineHandle>) -> Result<()> {
    let state = web::Data::new(AppState { engine });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/req", web::post().to(handle_req))
            .route("/preprepare", web::post().to(handle_pre_prepare))
            .route("/prepare", web::post().to(handle_prepare))
            .route("/commit", web::post().to(handle_commit))
    })
    .bind(bind_addr)
    .map_err(|e| Error::wrapped(ErrorKind::TransportError, e))?
    .run()
    .await
    .map_err(|e| Error::wrapped(ErrorKind::TransportError, e))
}
