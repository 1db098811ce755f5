use arbor_common::{
    config::BLOCK_INTERVAL,
    crypto::KeyPair,
    transaction::ChainId,
};
use arbor_daemon::{
    config::NodeConfig,
    core::{
        blockchain::{Blockchain, ChainEvent},
        error::BlockchainError,
        mempool::Mempool,
        storage::{ChainStore, KeyValueStore, MemoryStore, SledStore},
        validator::{BlockValidator, EngineKind, SoloProofValidator},
    },
};
use clap::Parser;
use log::{error, info, warn};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};

// Exit codes: 0 clean, 1 configuration error, 2 data dir unusable,
// 3 consensus plugin init failed, 4 fatal corruption
const EXIT_CONFIG: i32 = 1;
const EXIT_DATA_DIR: i32 = 2;
const EXIT_CONSENSUS: i32 = 3;
const EXIT_CORRUPTION: i32 = 4;

fn main() {
    let config = NodeConfig::parse();

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();

    let code = match run(config) {
        Ok(()) => 0,
        Err((code, message)) => {
            error!("{}", message);
            code
        }
    };
    std::process::exit(code);
}

fn run(config: NodeConfig) -> Result<(), (i32, String)> {
    let chain_id = match &config.chain_id {
        Some(hex) => ChainId::from_str(hex)
            .map_err(|e| (EXIT_CONFIG, format!("invalid chain id: {}", e)))?,
        None => ChainId::zero(),
    };

    let engine = match config.engine.as_str() {
        "solo" => EngineKind::Solo,
        "bft" => EngineKind::Bft,
        other => return Err((EXIT_CONFIG, format!("unknown engine '{}'", other))),
    };

    let leader = match &config.leader_key {
        Some(hex) => {
            let bytes = hex::decode(hex.strip_prefix("0x").unwrap_or(hex))
                .map_err(|e| (EXIT_CONFIG, format!("invalid leader key: {}", e)))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| (EXIT_CONFIG, "leader key must be 32 bytes".to_string()))?;
            Some(
                KeyPair::from_secret_bytes(&bytes)
                    .map_err(|e| (EXIT_CONFIG, format!("invalid leader key: {}", e)))?,
            )
        }
        None => None,
    };

    let kv: Arc<dyn KeyValueStore> = if config.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SledStore::open(&config.data_dir)
                .map_err(|e| (EXIT_DATA_DIR, format!("cannot open data dir: {}", e)))?,
        )
    };

    let proof_validator = match engine {
        EngineKind::Solo => Arc::new(SoloProofValidator),
        // The BFT plugin ships separately and registers its own
        // proof validator at startup
        EngineKind::Bft => {
            return Err((
                EXIT_CONSENSUS,
                "bft engine plugin is not linked into this build".to_string(),
            ))
        }
    };

    let store = Arc::new(ChainStore::new(kv));
    let mempool = Arc::new(Mempool::new(Arc::clone(&store)));
    let validator = BlockValidator::new(chain_id.clone(), proof_validator);

    let chain = Blockchain::new(chain_id, store, validator, Arc::clone(&mempool))
        .map_err(|e| (exit_code_for(&e), format!("chain init failed: {}", e)))?;
    let chain = Arc::new(chain);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| (EXIT_CONFIG, format!("runtime init failed: {}", e)))?;

    runtime.block_on(async move {
        let (quit_tx, quit_rx) = watch::channel(false);

        // Pool reconciliation loop fed by the chain manager
        let (senders_tx, senders_rx) = mpsc::channel(64);
        chain.set_pool_notify_channel(senders_tx);
        let reconciler = tokio::spawn(
            Arc::clone(&mempool).run_reconciler(senders_rx, quit_rx.clone()),
        );

        // Tip logger
        let mut events = chain.subscribe();
        let event_logger = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ChainEvent::NewBlock { hash, height } => {
                        info!("chain advanced to {} at height {}", hash, height)
                    }
                    ChainEvent::DetachBlock { hash } => {
                        info!("block {} left the canonical chain", hash)
                    }
                }
            }
        });

        // Solo block production
        let producer = leader.map(|leader| {
            let chain = Arc::clone(&chain);
            let mut quit = quit_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(BLOCK_INTERVAL));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match chain.propose_block(&leader) {
                                Ok(block) => {
                                    if let Err(e) = chain.apply_block(block) {
                                        warn!("produced block rejected: {}", e);
                                    }
                                }
                                Err(e) => warn!("block production failed: {}", e),
                            }
                        }
                        _ = quit.changed() => {
                            if *quit.borrow() {
                                return;
                            }
                        }
                    }
                }
            })
        });

        info!("node is up at height {}", chain.best_height().unwrap_or(0));

        if tokio::signal::ctrl_c().await.is_err() {
            warn!("signal handler unavailable, shutting down");
        }
        info!("shutting down");
        let _ = quit_tx.send(true);

        if let Some(producer) = producer {
            let _ = producer.await;
        }
        event_logger.abort();
        let _ = reconciler.await;
    });

    Ok(())
}

fn exit_code_for(error: &BlockchainError) -> i32 {
    if error.is_fatal() {
        EXIT_CORRUPTION
    } else {
        EXIT_DATA_DIR
    }
}
