//! tessera-node — the Tessera full-node binary.
//!
//! Startup sequence:
//!   1. Load chain parameters and open block storage
//!   2. Derive the node wallet (miner + validator accounts)
//!   3. Replay blocks from disk into the ledger state
//!   4. Start the miner worker pool
//!   5. Run the main loop: assemble → mine → PoS-sign → finalize
//!
//! Peer transport and the dashboard are external collaborators; this binary
//! owns the consensus loop and publishes [`NodeEvent`]s for them.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use tessera_core::params::Network;
use tessera_core::types::AddressType;
use tessera_core::ChainParams;
use tessera_crypto::kdf::{Kdf, KdfProfile};
use tessera_miner::{Miner, MinerEvent};
use tessera_node::{AdminCommand, Blockchain, NodeEvent};
use tessera_storage::BlockStore;
use tessera_wallet::{TransactionBuilder, Wallet};

#[derive(Parser, Debug)]
#[command(
    name = "tessera-node",
    version,
    about = "Tessera full node — hybrid PoW/PoS over a UTXO ledger"
)]
struct Args {
    /// Directory for block storage.
    #[arg(long, default_value = "~/.tessera/data")]
    data_dir: PathBuf,

    /// Wallet mnemonic. The default is for local development only.
    #[arg(long)]
    mnemonic: Option<String>,

    /// Miner worker threads (1..=16).
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Path to a chain-parameters JSON file.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Run with dev parameters (fast Argon2, low difficulty).
    #[arg(long)]
    dev: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tessera=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("Tessera node starting");

    // ── Chain parameters ──────────────────────────────────────────────────────
    let params = match (&args.params, args.dev) {
        (Some(path), _) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading chain params from {}", path.display()))?;
            ChainParams::from_json(&json).context("parsing chain params")?
        }
        (None, true) => ChainParams::dev(),
        (None, false) => ChainParams::default(),
    };
    let profile = if params.network == Network::Dev {
        KdfProfile::Dev
    } else {
        KdfProfile::Protocol
    };
    let kdf = Kdf::new(profile, params.network).context("building argon2 hasher")?;

    // ── Wallet ────────────────────────────────────────────────────────────────
    let mnemonic = args.mnemonic.unwrap_or_else(|| {
        warn!("no --mnemonic given; using the built-in dev phrase — DO NOT USE IN PRODUCTION");
        "tessera dev wallet phrase".into()
    });
    let mut wallet = Wallet::from_mnemonic(&mnemonic, kdf.clone(), params.clone())
        .context("opening wallet")?;
    let miner_account = wallet
        .derive_accounts(1, AddressType::W)
        .context("deriving miner account")?
        .remove(0);
    info!(address = %miner_account.address(), "miner account ready");

    // ── Storage and ledger state ──────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    let store = BlockStore::open(&data_dir)
        .with_context(|| format!("opening block store at {}", data_dir.display()))?;

    let mut chain = Blockchain::new(
        params.clone(),
        kdf.clone(),
        miner_account.address().clone(),
        None,
    );
    let miner_address = miner_account.address().clone();
    chain.register_validator_key(miner_address.clone(), miner_account.keypair);

    if let Some(tip) = store.tip_index() {
        info!(tip, "replaying stored blocks");
        for block in store.load_range(0, tip).context("loading stored blocks")? {
            chain
                .finalize(block, now_ms())
                .context("replaying stored block")?;
        }
    } else {
        info!("fresh data directory — starting from genesis");
    }
    chain.attach_store(store);

    // ── Channels ──────────────────────────────────────────────────────────────
    let (miner_tx, mut miner_rx) = tokio::sync::mpsc::channel::<MinerEvent>(64);
    let (node_event_tx, mut node_event_rx) = tokio::sync::mpsc::channel::<NodeEvent>(64);
    let (_admin_tx, mut admin_rx) = tokio::sync::mpsc::channel::<AdminCommand>(16);

    // Dashboard stand-in: the external event stream consumer.
    tokio::spawn(async move {
        while let Some(event) = node_event_rx.recv().await {
            debug!(?event, "node event");
        }
    });

    let mut miner = Miner::new(args.workers, miner_tx).map_err(|e| anyhow::anyhow!("{e}"))?;

    // ── Main loop ─────────────────────────────────────────────────────────────
    let candidate = chain
        .assemble_candidate(now_ms())
        .map_err(|e| anyhow::anyhow!("assembling first candidate: {e}"))?;
    let mut generation = miner.mine(candidate.pow_preimage(), candidate.difficulty);
    info!(height = chain.height(), "node ready — mining");

    loop {
        tokio::select! {
            Some(event) = miner_rx.recv() => match event {
                MinerEvent::Solved { generation: g, nonce, hash_time_ms, .. } if g == generation => {
                    match chain
                        .block_proposal(nonce, hash_time_ms, now_ms())
                        .and_then(|signed| {
                            let block = signed.clone();
                            chain.finalize(signed, now_ms()).map(|()| block)
                        }) {
                        Ok(block) => {
                            let _ = node_event_tx
                                .send(NodeEvent::BroadcastFinalizedBlock(block))
                                .await;
                            let status = chain.status();
                            let _ = node_event_tx
                                .send(NodeEvent::NodeInfo {
                                    height: status.height,
                                    head_hash: status.hash,
                                    mempool_txs: chain.mempool().len(),
                                    mempool_bytes: chain.mempool().total_bytes(),
                                })
                                .await;
                        }
                        Err(e) => {
                            // A validator we cannot sign for: advance the
                            // legitimacy round and reselect.
                            warn!(error = %e, "proposal rejected");
                            chain.bump_legitimacy();
                        }
                    }
                    let candidate = chain
                        .assemble_candidate(now_ms())
                        .map_err(|e| anyhow::anyhow!("assembling candidate: {e}"))?;
                    generation = miner.mine(candidate.pow_preimage(), candidate.difficulty);
                }
                MinerEvent::Solved { .. } => {
                    // A find for an invalidated candidate; drop it.
                }
                MinerEvent::HashRate { hps } => {
                    debug!(hps, "hash rate");
                    let _ = node_event_tx.send(NodeEvent::HashRateUpdated { hps }).await;
                }
            },
            Some(command) = admin_rx.recv() => match command {
                AdminCommand::SetMinerThreads(n) => {
                    if let Err(e) = miner.set_workers(n) {
                        warn!(error = %e, "rejected worker resize");
                    }
                }
                AdminCommand::NewUnsignedTransaction(mut tx) => {
                    let signer = wallet
                        .activate(wallet.records(AddressType::W)[0].clone())
                        .expect("node wallet account rederives");
                    TransactionBuilder::sign(&mut tx, &[&signer]);
                    match chain.submit_transaction(tx) {
                        Ok(()) => info!("admin transaction admitted"),
                        Err(e) => warn!(error = %e, "admin transaction rejected"),
                    }
                }
            },
        }
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
