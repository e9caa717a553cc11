use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use pali_coin::{NodeConfig, RocksDbStorage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = NodeConfig::load_default()?;

    let level: log::LevelFilter = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    pali_coin::init_logging_with_level(level);

    info!("starting pali-node {}", pali_coin::VERSION);

    let data_dir = config.data_dir.to_string_lossy().to_string();
    let storage = Arc::new(RocksDbStorage::open(&data_dir)?);
    let node = pali_coin::Node::new(storage)?;

    info!("ledger initialized at height {}", node.height());

    node.start_p2p(config.p2p_port);

    for peer in &config.seed_peers {
        if let Err(e) = node.connect_to_peer(peer).await {
            error!("failed to connect to seed peer {peer}: {e}");
        }
    }

    if let Some(miner_address) = config.miner_address.clone() {
        info!("mining enabled for {miner_address}");
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            loop {
                match node.mine(&miner_address).await {
                    Ok(block) => info!("mined block {} (hash {})", block.index, block.hash),
                    Err(e) => error!("mining failed: {e}"),
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
    } else {
        info!("mining disabled; set miner_address in the config file to enable it");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.close().await?;
    Ok(())
}
