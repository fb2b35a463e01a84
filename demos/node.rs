//! A runnable single-replica node, wiring the engine to a TOML config
//! file and a CLI flag. Kept thin: all protocol logic lives in the
//! library, this binary only supplies configuration, logging setup and
//! a minimal application (`Verifier`) that accepts every request.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;
use serde::Deserialize;

use pbft_engine::bft::error::{Error, ErrorKind, Result};
use pbft_engine::bft::message::{Committee, NodeId, Replica, RequestMessage};
use pbft_engine::bft::transport;
use pbft_engine::bft::verifier::Verifier;
use pbft_engine::bft::Engine;

#[derive(Parser)]
#[command(about = "Runs a single PBFT replica")]
struct Cli {
    #[arg(long, default_value = "./node.toml")]
    config: PathBuf,
}

#[derive(Deserialize)]
struct ReplicaConfig {
    public_key: String,
    host: String,
    port: u16,
}

#[derive(Deserialize)]
struct EngineConfig {
    node_id: String,
    bind: String,
    committee: Vec<ReplicaConfig>,
}

/// Accepts every request and logs the outcome; stands in for a real
/// application's validation and execution logic.
struct AcceptingVerifier;

impl Verifier for AcceptingVerifier {
    fn check_msg(&self, req: &RequestMessage) -> Result<()> {
        info!("checking request from {}", req.client_id);
        Ok(())
    }

    fn sign_msg(&self, node_id: &NodeId, _digest: &[u8]) -> Result<Vec<u8>> {
        Ok(node_id.as_str().as_bytes().to_vec())
    }

    fn reply_result(&self, req: &RequestMessage, res: u8) -> Result<()> {
        info!("reply for {}: result={}", req.client_id, res);
        Ok(())
    }
}

fn load_config(path: &PathBuf) -> Result<EngineConfig> {
    config::Config::builder()
        .add_source(config::File::from(path.clone()))
        .build()
        .map_err(|e| Error::wrapped(ErrorKind::Communication, e))?
        .try_deserialize()
        .map_err(|e| Error::wrapped(ErrorKind::Communication, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    let self_id = NodeId::new(cfg.node_id);
    let replicas = cfg
        .committee
        .into_iter()
        .map(|r| Replica {
            public_key: NodeId::new(r.public_key),
            host: r.host,
            port: r.port,
        })
        .collect();
    let committee = Committee::new(replicas)?;

    info!("starting node {} bound on {}", self_id, cfg.bind);

    let engine = Engine::new(self_id, Arc::new(AcceptingVerifier), committee);
    transport::serve(&cfg.bind, engine.handle()).await
}
