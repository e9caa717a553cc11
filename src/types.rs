//! Entity schemas and domain constants: `Transaction`, `Block`, and the fixed parameters
//! of the network.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::TransactionError;

/// Atoms per display unit (one PALI = 10^8 atoms).
pub const ONE_UNIT: u64 = 100_000_000;

/// Fixed coinbase reward, in atoms.
pub const COINBASE_REWARD: u64 = 50 * ONE_UNIT;

/// Sentinel sender address for coinbase transactions: 40 ASCII '0' characters.
pub const COINBASE_SENDER: &str = "0000000000000000000000000000000000000000";

/// Fixed genesis block timestamp, for deterministic genesis across nodes.
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

/// Required lowercase-hex prefix on a valid block hash.
pub const TARGET_PREFIX: &str = "0000";

/// Maximum number of non-coinbase transactions accepted into one block.
pub const MAX_TX_PER_BLOCK: usize = 100;

/// Maximum wire frame size, in bytes.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// A signed value transfer between two addresses, or a coinbase issuance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
    pub timestamp: i64,
    #[serde(rename = "pubKey")]
    pub pub_key: String,
    pub signature: String,
}

fn id_preimage(sender: &str, receiver: &str, amount: u64, fee: u64, nonce: u64, timestamp: i64) -> String {
    format!("{sender}:{receiver}:{amount}:{fee}:{nonce}:{timestamp}")
}

impl Transaction {
    /// Constructs an unsigned transaction stamped with the current wall-clock time.
    /// The caller attaches `signature` afterward, typically via an external signer
    /// calling [`Transaction::signable_bytes`].
    pub fn construct(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: u64,
        fee: u64,
        nonce: u64,
        pub_key: impl Into<String>,
    ) -> Transaction {
        let sender = sender.into();
        let receiver = receiver.into();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as i64;
        let id = crypto::sha256_hex(id_preimage(&sender, &receiver, amount, fee, nonce, timestamp).as_bytes());
        Transaction {
            id,
            sender,
            receiver,
            amount,
            fee,
            nonce,
            timestamp,
            pub_key: pub_key.into(),
            signature: String::new(),
        }
    }

    /// Builds the coinbase transaction for a mined block.
    pub fn coinbase(miner: impl Into<String>, reward: u64) -> Transaction {
        let receiver = miner.into();
        let timestamp = GENESIS_TIMESTAMP;
        let id = crypto::sha256_hex(
            id_preimage(COINBASE_SENDER, &receiver, reward, 0, 0, timestamp).as_bytes(),
        );
        Transaction {
            id,
            sender: COINBASE_SENDER.to_string(),
            receiver,
            amount: reward,
            fee: 0,
            nonce: 0,
            timestamp,
            pub_key: String::new(),
            signature: String::new(),
        }
    }

    fn recomputed_id(&self) -> String {
        crypto::sha256_hex(
            id_preimage(
                &self.sender,
                &self.receiver,
                self.amount,
                self.fee,
                self.nonce,
                self.timestamp,
            )
            .as_bytes(),
        )
    }

    /// The 32 bytes an external signer signs over to produce `signature`.
    pub fn signable_bytes(&self) -> [u8; 32] {
        crypto::sha256(
            id_preimage(
                &self.sender,
                &self.receiver,
                self.amount,
                self.fee,
                self.nonce,
                self.timestamp,
            )
            .as_bytes(),
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_SENDER
    }

    /// Verifies the signature in isolation (coinbase transactions always verify).
    pub fn verify_signature(&self) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let pub_key = hex::decode(&self.pub_key).map_err(|_| TransactionError::BadPubKey)?;
        if pub_key.len() != crypto::PUB_KEY_LEN {
            return Err(TransactionError::BadPubKey);
        }

        let derived = crypto::address_from_pub_key(&pub_key).ok_or(TransactionError::BadPubKey)?;
        if derived != self.sender {
            return Err(TransactionError::AddressMismatch);
        }

        let signature = hex::decode(&self.signature).map_err(|_| TransactionError::BadSignatureFormat)?;
        if signature.len() != crypto::SIGNATURE_LEN {
            return Err(TransactionError::BadSignatureFormat);
        }

        crypto::verify(&pub_key, &self.signable_bytes(), &signature)
    }

    /// Structural validity plus signature verification; does not touch ledger state.
    pub fn is_valid(&self) -> Result<(), TransactionError> {
        if self.sender.is_empty() {
            return Err(TransactionError::EmptySender);
        }
        if self.receiver.is_empty() {
            return Err(TransactionError::EmptyReceiver);
        }
        if !self.is_coinbase() && self.sender == self.receiver {
            return Err(TransactionError::SameEndpoints);
        }
        if self.amount == 0 {
            return Err(TransactionError::ZeroAmount);
        }
        if self.id != self.recomputed_id() {
            return Err(TransactionError::HashMismatch);
        }
        self.verify_signature()
    }
}

/// A hash-linked, mined collection of transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    pub nonce: u64,
    pub miner: String,
    pub hash: String,
}

/// Mirror of `Block` without the `hash` field, used as the canonical hash preimage.
/// Declaration order here is the canonical field order and must never change.
#[derive(Debug, Clone, Serialize)]
struct BlockHashPayload<'a> {
    index: u64,
    timestamp: i64,
    transactions: &'a [Transaction],
    #[serde(rename = "prevHash")]
    prev_hash: &'a str,
    nonce: u64,
    miner: &'a str,
}

impl Block {
    /// Recomputes the canonical hash over every field except `hash` itself.
    pub fn compute_hash(&self) -> String {
        let payload = BlockHashPayload {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            prev_hash: &self.prev_hash,
            nonce: self.nonce,
            miner: &self.miner,
        };
        let bytes = serde_json::to_vec(&payload).expect("block payload is always serializable");
        crypto::sha256_hex(&bytes)
    }

    /// True if `hash` starts with the required proof-of-work target prefix.
    pub fn meets_target(&self) -> bool {
        self.hash.starts_with(TARGET_PREFIX)
    }

    /// Builds the deterministic genesis block (not yet hashed or mined).
    pub fn genesis_unhashed() -> Block {
        Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions: Vec::new(),
            prev_hash: "0".to_string(),
            nonce: 0,
            miner: String::new(),
            hash: String::new(),
        }
    }
}
