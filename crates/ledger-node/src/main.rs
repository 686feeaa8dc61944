//! Node binary: reads a genesis file and an identity seed from the
//! environment, wires the block coordinator and chain sync service
//! together, and runs the reactor until `Ctrl+C`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use ledger_node::{GenesisFile, NodeContainer};
use ledger_telemetry::NodeConfig;
use shared_crypto::Ed25519KeyPair;
use shared_types::Identity;

fn load_genesis() -> Result<GenesisFile> {
    let path = std::env::var("LEDGER_GENESIS_PATH").context(
        "LEDGER_GENESIS_PATH must point at a JSON v4 genesis file",
    )?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading genesis file at {path}"))?;
    let genesis: GenesisFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing genesis file at {path}"))?;
    genesis.validate().context("genesis file failed validation")?;
    Ok(genesis)
}

fn load_identity() -> Identity {
    let key_pair = match std::env::var("LEDGER_IDENTITY_SEED_HEX") {
        Ok(hex) => {
            let seed = hex_decode(&hex).unwrap_or([0u8; 32]);
            Ed25519KeyPair::from_seed(seed)
        }
        Err(_) => {
            tracing::warn!("LEDGER_IDENTITY_SEED_HEX not set, generating an ephemeral identity");
            Ed25519KeyPair::generate()
        }
    };
    Identity::new(*key_pair.public_key().as_bytes())
}

fn hex_decode(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in out.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env();
    let _telemetry = ledger_telemetry::init_telemetry(&config)
        .await
        .context("initializing telemetry")?;

    tracing::info!(service = %config.service_name, "starting node");

    let genesis = load_genesis()?;
    let own_identity = load_identity();

    let mut container = NodeContainer::new(genesis, &config, own_identity)
        .context("wiring node container")?;
    let stop = container.stop_handle();

    let stop_for_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            stop_for_signal.store(true, Ordering::SeqCst);
        }
    });

    tokio::task::spawn_blocking(move || container.reactor.run())
        .await
        .context("reactor thread panicked")?;

    tracing::info!("node stopped");
    Ok(())
}
