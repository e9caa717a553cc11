//! # Pali Coin
//!
//! A minimal proof-of-work cryptocurrency node:
//! - account-based ledger with nonce-ordered transactions
//! - ECDSA-P256 signatures over a canonical JSON transaction preimage
//! - nonce-search proof-of-work mining and longest-valid-chain fork choice
//! - a length-prefixed JSON wire protocol for peer gossip

pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod mempool;
pub mod node;
pub mod p2p;
pub mod protocol;
pub mod storage;
pub mod types;

pub use config::NodeConfig;
pub use error::NodeError;
pub use ledger::Ledger;
pub use mempool::Mempool;
pub use node::Node;
pub use storage::{MemoryStorage, RocksDbStorage, Storage};
pub use types::{Block, Transaction, ONE_UNIT};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initializes logging at the `info` level from `RUST_LOG`, falling back to the default.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

pub fn init_logging_with_level(level: log::LevelFilter) {
    env_logger::Builder::from_default_env().filter_level(level).init();
}

/// Formats an atom amount as a decimal PALI string, e.g. `150000000` -> `"1.50000000 PALI"`.
pub fn format_amount(amount: u64) -> String {
    let whole = amount / ONE_UNIT;
    let frac = amount % ONE_UNIT;
    format!("{whole}.{frac:08} PALI")
}

/// Parses a decimal PALI string (e.g. `"1.5"`) into atoms.
pub fn parse_amount(amount_str: &str) -> Result<u64, NodeError> {
    let parts: Vec<&str> = amount_str.split('.').collect();
    if parts.len() > 2 {
        return Err(NodeError::Config("too many decimal points".to_string()));
    }

    let whole_part: u64 = parts[0]
        .parse()
        .map_err(|_| NodeError::Config("invalid whole number".to_string()))?;

    let fractional_part = if parts.len() == 2 {
        let frac_str = format!("{:0<8}", parts[1]);
        if frac_str.len() > 8 {
            return Err(NodeError::Config("too many decimal places".to_string()));
        }
        frac_str[..8]
            .parse::<u64>()
            .map_err(|_| NodeError::Config("invalid decimal number".to_string()))?
    } else {
        0
    };

    Ok(whole_part * ONE_UNIT + fractional_part)
}
