//! Error taxonomy for Pali Coin. Each subsystem owns its own error enum instead of one
//! flat crate-wide type; the orchestrator aggregates them into `NodeError`.

use thiserror::Error;

/// Errors from constructing or validating a single transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("sender address is empty")]
    EmptySender,

    #[error("receiver address is empty")]
    EmptyReceiver,

    #[error("sender and receiver are the same address")]
    SameEndpoints,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("transaction id does not match recomputed hash")]
    HashMismatch,

    #[error("public key is malformed")]
    BadPubKey,

    #[error("signature is malformed")]
    BadSignatureFormat,

    #[error("sender address does not match the public key")]
    AddressMismatch,

    #[error("signature does not verify")]
    SignatureInvalid,
}

/// Errors from ledger-level operations: everything `TransactionError` covers plus
/// state-dependent and chain-shape checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("insufficient balance: sender {address} has {balance}, needs {required}")]
    InsufficientBalance {
        address: String,
        balance: u64,
        required: u64,
    },

    #[error("bad nonce for {address}: expected {expected}, got {got}")]
    BadNonce {
        address: String,
        expected: u64,
        got: u64,
    },

    #[error("block index {got} does not follow tip index {expected_prev}")]
    BadIndex { expected_prev: u64, got: u64 },

    #[error("block prev_hash {got} does not match tip hash {expected}")]
    BadPrevHash { expected: String, got: String },

    #[error("block hash does not match its recomputed canonical hash")]
    BlockHashMismatch,

    #[error("block hash does not meet the proof-of-work target")]
    InsufficientProofOfWork,

    #[error("block is missing a valid coinbase transaction")]
    MissingCoinbase,

    #[error("coinbase reward amount is wrong: expected {expected}, got {got}")]
    BadCoinbaseReward { expected: u64, got: u64 },

    #[error("block contains {count} non-coinbase transactions, exceeding the limit of {limit}")]
    TooManyTransactions { count: usize, limit: usize },

    #[error("candidate chain is not longer than, or not valid relative to, the local chain")]
    ChainNotBetter,

    #[error("chain is empty")]
    EmptyChain,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt record at key {0}")]
    Corrupt(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors from the P2P protocol codec and server.
#[derive(Error, Debug)]
pub enum P2pError {
    #[error("frame exceeds the maximum size of {limit} bytes ({got} bytes)")]
    FrameTooLarge { limit: u32, got: u32 },

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer {0} is not registered")]
    UnknownPeer(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Top-level error surface returned by the node orchestrator.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    P2p(#[from] P2pError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl NodeError {
    /// Category used for structured log lines, matching the error-kind table in the spec.
    pub fn category(&self) -> &'static str {
        match self {
            NodeError::Ledger(LedgerError::Storage(_)) => "storage",
            NodeError::Ledger(_) => "validation",
            NodeError::Transaction(_) => "validation",
            NodeError::Storage(_) => "storage",
            NodeError::P2p(P2pError::FrameTooLarge { .. }) => "protocol",
            NodeError::P2p(P2pError::Malformed(_)) => "protocol",
            NodeError::P2p(P2pError::Io(_)) => "resource",
            NodeError::P2p(P2pError::UnknownPeer(_)) => "resource",
            NodeError::P2p(P2pError::ConnectionClosed) => "resource",
            NodeError::Config(_) => "logic",
        }
    }

    pub fn is_validation_error(&self) -> bool {
        self.category() == "validation"
    }
}
