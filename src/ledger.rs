//! The ledger state machine: chain, balances, nonces. Owns a single readers-writer lock
//! over the whole aggregate so that `mine`, `add_block`, `replace_chain`, and `credit`
//! observe and mutate a consistent snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::error::LedgerError;
use crate::storage::Storage;
use crate::types::{Block, Transaction, COINBASE_REWARD, MAX_TX_PER_BLOCK};

struct LedgerState {
    chain: Vec<Block>,
    balances: HashMap<String, u64>,
    nonces: HashMap<String, u64>,
}

pub struct Ledger {
    state: RwLock<LedgerState>,
    storage: Arc<dyn Storage>,
}

/// Applies one transaction's effect to `balances`/`nonces`, rejecting it rather than
/// wrapping on unsigned underflow if the sender's balance is insufficient.
fn apply_tx_checked(
    balances: &mut HashMap<String, u64>,
    nonces: &mut HashMap<String, u64>,
    tx: &Transaction,
    miner: &str,
) -> Result<(), LedgerError> {
    if tx.is_coinbase() {
        *balances.entry(tx.receiver.clone()).or_insert(0) += tx.amount;
        return Ok(());
    }

    let required = tx.amount + tx.fee;
    let balance = *balances.get(&tx.sender).unwrap_or(&0);
    if balance < required {
        return Err(LedgerError::InsufficientBalance {
            address: tx.sender.clone(),
            balance,
            required,
        });
    }

    balances.insert(tx.sender.clone(), balance - required);
    *balances.entry(tx.receiver.clone()).or_insert(0) += tx.amount;
    *balances.entry(miner.to_string()).or_insert(0) += tx.fee;

    let nonce_entry = nonces.entry(tx.sender.clone()).or_insert(0);
    *nonce_entry = (*nonce_entry).max(tx.nonce + 1);
    Ok(())
}

/// Structural validity plus balance/nonce checks against the given state snapshot.
/// Coinbase transactions skip the balance/nonce checks.
fn validate_transaction_against(
    tx: &Transaction,
    balances: &HashMap<String, u64>,
    nonces: &HashMap<String, u64>,
) -> Result<(), LedgerError> {
    tx.is_valid()?;

    if !tx.is_coinbase() {
        let balance = *balances.get(&tx.sender).unwrap_or(&0);
        let required = tx.amount + tx.fee;
        if balance < required {
            return Err(LedgerError::InsufficientBalance {
                address: tx.sender.clone(),
                balance,
                required,
            });
        }

        let expected_nonce = *nonces.get(&tx.sender).unwrap_or(&0);
        if tx.nonce != expected_nonce {
            return Err(LedgerError::BadNonce {
                address: tx.sender.clone(),
                expected: expected_nonce,
                got: tx.nonce,
            });
        }
    }

    Ok(())
}

/// Checks a candidate block against its expected parent and, as a hardening beyond the
/// bare minimal reading, against ledger state evolving through the block's own
/// transactions (see DESIGN.md "Block validation consensus hole").
fn validate_block_against(
    block: &Block,
    tip: &Block,
    balances: &HashMap<String, u64>,
    nonces: &HashMap<String, u64>,
) -> Result<(), LedgerError> {
    if block.index != tip.index + 1 {
        return Err(LedgerError::BadIndex {
            expected_prev: tip.index,
            got: block.index,
        });
    }
    if block.prev_hash != tip.hash {
        return Err(LedgerError::BadPrevHash {
            expected: tip.hash.clone(),
            got: block.prev_hash.clone(),
        });
    }
    if block.hash != block.compute_hash() {
        return Err(LedgerError::BlockHashMismatch);
    }
    if !block.meets_target() {
        return Err(LedgerError::InsufficientProofOfWork);
    }

    let non_coinbase_count = block.transactions.len().saturating_sub(1);
    if non_coinbase_count > MAX_TX_PER_BLOCK {
        return Err(LedgerError::TooManyTransactions {
            count: non_coinbase_count,
            limit: MAX_TX_PER_BLOCK,
        });
    }

    let coinbase = block.transactions.first().ok_or(LedgerError::MissingCoinbase)?;
    if !coinbase.is_coinbase() {
        return Err(LedgerError::MissingCoinbase);
    }
    coinbase.is_valid()?;
    if coinbase.amount != COINBASE_REWARD {
        return Err(LedgerError::BadCoinbaseReward {
            expected: COINBASE_REWARD,
            got: coinbase.amount,
        });
    }

    let mut sim_balances = balances.clone();
    let mut sim_nonces = nonces.clone();
    for tx in block.transactions.iter().skip(1) {
        validate_transaction_against(tx, &sim_balances, &sim_nonces)?;
        apply_tx_checked(&mut sim_balances, &mut sim_nonces, tx, &block.miner)?;
    }

    Ok(())
}

/// `true` if `new_chain` is longer than `local_chain` and every link, hash, and
/// proof-of-work in it (from index 1 onward) checks out.
fn chain_is_better(new_chain: &[Block], local_chain: &[Block]) -> bool {
    if new_chain.len() <= local_chain.len() {
        return false;
    }
    match new_chain.first() {
        Some(genesis) if genesis.prev_hash == "0" => {}
        _ => return false,
    }

    for i in 1..new_chain.len() {
        let block = &new_chain[i];
        let prev = &new_chain[i - 1];
        if block.index != prev.index + 1 {
            return false;
        }
        if block.prev_hash != prev.hash {
            return false;
        }
        if block.hash != block.compute_hash() {
            return false;
        }
        if !block.meets_target() {
            return false;
        }
    }

    true
}

fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

impl Ledger {
    /// Loads the chain from `storage`, creating genesis if storage is empty, then
    /// rebuilds balances and nonces by replaying every block in order.
    pub fn init(storage: Arc<dyn Storage>) -> Result<Ledger, LedgerError> {
        let mut chain = storage.load_chain()?;

        if chain.is_empty() {
            let mut genesis = Block::genesis_unhashed();
            genesis.hash = genesis.compute_hash();
            storage.save_block(&genesis)?;
            info!("created genesis block with hash {}", genesis.hash);
            chain.push(genesis);
        }

        let mut balances = HashMap::new();
        let mut nonces = HashMap::new();
        for block in &chain {
            for tx in &block.transactions {
                apply_tx_checked(&mut balances, &mut nonces, tx, &block.miner)?;
            }
        }
        storage.save_balances(&balances)?;
        storage.save_nonces(&nonces)?;

        info!("ledger initialized at height {}", chain.len());
        Ok(Ledger {
            state: RwLock::new(LedgerState {
                chain,
                balances,
                nonces,
            }),
            storage,
        })
    }

    /// Assembles a block from up to 100 valid `pending_transactions`, mines it by
    /// nonce search, applies the resulting state delta, and persists it. Holds the
    /// ledger's write lock for the whole call, including the proof-of-work search.
    pub fn mine(&self, miner_address: &str, pending_transactions: &[Transaction]) -> Result<Block, LedgerError> {
        let mut state = self.state.write().expect("ledger lock poisoned");

        let tip = state.chain.last().ok_or(LedgerError::EmptyChain)?.clone();

        let mut sim_balances = state.balances.clone();
        let mut sim_nonces = state.nonces.clone();
        let mut accepted = Vec::new();
        for tx in pending_transactions {
            if accepted.len() >= MAX_TX_PER_BLOCK {
                break;
            }
            if validate_transaction_against(tx, &sim_balances, &sim_nonces).is_ok() {
                apply_tx_checked(&mut sim_balances, &mut sim_nonces, tx, miner_address)
                    .expect("transaction accepted by validation must apply cleanly");
                accepted.push(tx.clone());
            }
        }

        let coinbase = Transaction::coinbase(miner_address, COINBASE_REWARD);
        apply_tx_checked(&mut sim_balances, &mut sim_nonces, &coinbase, miner_address)
            .expect("coinbase always applies cleanly");

        let mut transactions = Vec::with_capacity(accepted.len() + 1);
        transactions.push(coinbase);
        transactions.extend(accepted);

        let mut block = Block {
            index: tip.index + 1,
            timestamp: now_seconds(),
            transactions,
            prev_hash: tip.hash.clone(),
            nonce: 0,
            miner: miner_address.to_string(),
            hash: String::new(),
        };

        loop {
            block.hash = block.compute_hash();
            if block.meets_target() {
                break;
            }
            block.nonce += 1;
        }

        state.chain.push(block.clone());
        state.balances = sim_balances;
        state.nonces = sim_nonces;

        self.storage.save_block(&block)?;
        self.storage.save_balances(&state.balances)?;
        self.storage.save_nonces(&state.nonces)?;

        info!(
            "mined block {} with {} transactions, hash {}",
            block.index,
            block.transactions.len(),
            block.hash
        );
        Ok(block)
    }

    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let state = self.state.read().expect("ledger lock poisoned");
        validate_transaction_against(tx, &state.balances, &state.nonces)
    }

    pub fn validate_block(&self, block: &Block) -> Result<(), LedgerError> {
        let state = self.state.read().expect("ledger lock poisoned");
        let tip = state.chain.last().ok_or(LedgerError::EmptyChain)?;
        validate_block_against(block, tip, &state.balances, &state.nonces)
    }

    /// Validates `block`, applies its state delta, appends it, and persists it.
    pub fn add_block(&self, block: Block) -> Result<(), LedgerError> {
        let mut state = self.state.write().expect("ledger lock poisoned");
        let tip = state.chain.last().ok_or(LedgerError::EmptyChain)?.clone();
        validate_block_against(&block, &tip, &state.balances, &state.nonces)?;

        for tx in &block.transactions {
            apply_tx_checked(&mut state.balances, &mut state.nonces, tx, &block.miner)?;
        }
        state.chain.push(block.clone());

        self.storage.save_block(&block)?;
        self.storage.save_balances(&state.balances)?;
        self.storage.save_nonces(&state.nonces)?;

        info!("added block {} from peer, hash {}", block.index, block.hash);
        Ok(())
    }

    pub fn should_replace_chain(&self, new_chain: &[Block]) -> bool {
        let state = self.state.read().expect("ledger lock poisoned");
        chain_is_better(new_chain, &state.chain)
    }

    /// If `new_chain` is better, atomically replaces the local chain and rebuilds
    /// balances/nonces from scratch by replaying it. Rejects a chain whose replay
    /// would underflow a balance, leaving local state untouched.
    pub fn replace_chain(&self, new_chain: Vec<Block>) -> Result<(), LedgerError> {
        let mut state = self.state.write().expect("ledger lock poisoned");
        if !chain_is_better(&new_chain, &state.chain) {
            return Err(LedgerError::ChainNotBetter);
        }

        let mut balances = HashMap::new();
        let mut nonces = HashMap::new();
        for block in &new_chain {
            for tx in &block.transactions {
                apply_tx_checked(&mut balances, &mut nonces, tx, &block.miner)?;
            }
        }

        for block in &new_chain {
            self.storage.save_block(block)?;
        }
        self.storage.save_balances(&balances)?;
        self.storage.save_nonces(&nonces)?;

        let new_height = new_chain.len();
        state.chain = new_chain;
        state.balances = balances;
        state.nonces = nonces;

        warn!("replaced local chain with a longer chain, new height {new_height}");
        Ok(())
    }

    /// Unchecked balance increment for external tooling (faucet). Not broadcast; a node
    /// that uses this diverges from peers until a reorg heals it.
    pub fn credit(&self, address: &str, amount: u64) {
        let mut state = self.state.write().expect("ledger lock poisoned");
        *state.balances.entry(address.to_string()).or_insert(0) += amount;
        if let Err(e) = self.storage.save_balances(&state.balances) {
            warn!("failed to persist balances after credit: {e}");
        }
    }

    pub fn height(&self) -> usize {
        let state = self.state.read().expect("ledger lock poisoned");
        state.chain.len()
    }

    pub fn get_block(&self, index: u64) -> Option<Block> {
        let state = self.state.read().expect("ledger lock poisoned");
        state.chain.get(index as usize).cloned()
    }

    pub fn get_latest(&self) -> Option<Block> {
        let state = self.state.read().expect("ledger lock poisoned");
        state.chain.last().cloned()
    }

    pub fn get_chain(&self) -> Vec<Block> {
        let state = self.state.read().expect("ledger lock poisoned");
        state.chain.clone()
    }

    pub fn balance(&self, address: &str) -> u64 {
        let state = self.state.read().expect("ledger lock poisoned");
        *state.balances.get(address).unwrap_or(&0)
    }

    pub fn nonce(&self, address: &str) -> u64 {
        let state = self.state.read().expect("ledger lock poisoned");
        *state.nonces.get(address).unwrap_or(&0)
    }

    pub fn find_transaction(&self, id: &str) -> Option<Transaction> {
        let state = self.state.read().expect("ledger lock poisoned");
        state
            .chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .find(|tx| tx.id == id)
            .cloned()
    }

    pub fn address_transactions(&self, address: &str) -> Vec<Transaction> {
        let state = self.state.read().expect("ledger lock poisoned");
        state
            .chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.sender == address || tx.receiver == address)
            .cloned()
            .collect()
    }

    pub fn close(&self) -> Result<(), LedgerError> {
        self.storage.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::storage::MemoryStorage;
    use crate::types::ONE_UNIT;

    fn new_ledger() -> Ledger {
        Ledger::init(Arc::new(MemoryStorage::new())).unwrap()
    }

    fn keypair_address() -> (Vec<u8>, String, String) {
        let (private_key, pub_key_hex) = crypto::generate_keypair().unwrap();
        let pub_key_bytes = hex::decode(&pub_key_hex).unwrap();
        let address = crypto::address_from_pub_key(&pub_key_bytes).unwrap();
        (private_key, pub_key_hex, address)
    }

    fn signed_transfer(
        private_key: &[u8],
        pub_key_hex: &str,
        sender: &str,
        receiver: &str,
        amount: u64,
        fee: u64,
        nonce: u64,
    ) -> Transaction {
        let mut tx = Transaction::construct(sender, receiver, amount, fee, nonce, pub_key_hex);
        let sig = crypto::sign(private_key, &tx.signable_bytes()).unwrap();
        tx.signature = hex::encode(sig);
        tx
    }

    #[test]
    fn s1_genesis() {
        let ledger = new_ledger();
        assert_eq!(ledger.height(), 1);
        let genesis = ledger.get_block(0).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, "0");
        assert_eq!(genesis.timestamp, crate::types::GENESIS_TIMESTAMP);
    }

    #[test]
    fn two_fresh_ledgers_agree_on_genesis_hash() {
        let a = new_ledger();
        let b = new_ledger();
        assert_eq!(a.get_block(0).unwrap().hash, b.get_block(0).unwrap().hash);
    }

    #[test]
    fn s2_mine_empty_block() {
        let ledger = new_ledger();
        let block = ledger.mine("miner1", &[]).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].receiver, "miner1");
        assert_eq!(block.transactions[0].amount, COINBASE_REWARD);
        assert!(block.hash.starts_with("0000"));
        assert_eq!(ledger.balance("miner1"), COINBASE_REWARD);
    }

    #[test]
    fn s3_transfer() {
        let ledger = new_ledger();
        let (private_key_a, pub_key_a, addr_a) = keypair_address();
        let (_, _, addr_b) = keypair_address();

        ledger.credit(&addr_a, 100 * ONE_UNIT);

        let tx = signed_transfer(&private_key_a, &pub_key_a, &addr_a, &addr_b, 10 * ONE_UNIT, 1 * ONE_UNIT, 0);
        assert!(ledger.validate_transaction(&tx).is_ok());

        let block = ledger.mine("minerM", &[tx]).unwrap();
        assert_eq!(block.transactions.len(), 2);

        assert_eq!(ledger.balance(&addr_a), 89 * ONE_UNIT);
        assert_eq!(ledger.balance(&addr_b), 10 * ONE_UNIT);
        assert_eq!(ledger.balance("minerM"), 50 * ONE_UNIT + 1 * ONE_UNIT);
        assert_eq!(ledger.nonce(&addr_a), 1);
    }

    #[test]
    fn s4_bad_nonce_rejection() {
        let ledger = new_ledger();
        let (private_key_a, pub_key_a, addr_a) = keypair_address();
        let (_, _, addr_b) = keypair_address();
        ledger.credit(&addr_a, 100 * ONE_UNIT);

        let tx0 = signed_transfer(&private_key_a, &pub_key_a, &addr_a, &addr_b, 10 * ONE_UNIT, ONE_UNIT, 0);
        ledger.mine("minerM", &[tx0]).unwrap();

        let replay = signed_transfer(&private_key_a, &pub_key_a, &addr_a, &addr_b, 10 * ONE_UNIT, ONE_UNIT, 0);
        let err = ledger.validate_transaction(&replay).unwrap_err();
        assert_eq!(
            err,
            LedgerError::BadNonce {
                address: addr_a.clone(),
                expected: 1,
                got: 0,
            }
        );
    }

    #[test]
    fn s5_fork_choice() {
        let x = new_ledger();
        let y = new_ledger();

        for _ in 0..3 {
            x.mine("x-miner", &[]).unwrap();
        }
        for _ in 0..5 {
            y.mine("y-miner", &[]).unwrap();
        }

        let y_chain = y.get_chain();
        assert!(x.should_replace_chain(&y_chain));
        x.replace_chain(y_chain).unwrap();

        assert_eq!(x.height(), 6);
        assert_eq!(x.balance("y-miner"), y.balance("y-miner"));
        assert_eq!(x.balance("x-miner"), 0);
    }

    #[test]
    fn replace_chain_rejects_shorter_chain() {
        let ledger = new_ledger();
        ledger.mine("miner1", &[]).unwrap();
        ledger.mine("miner1", &[]).unwrap();
        let short_chain = vec![ledger.get_block(0).unwrap()];
        assert!(!ledger.should_replace_chain(&short_chain));
        assert!(ledger.replace_chain(short_chain).is_err());
        assert_eq!(ledger.height(), 3);
    }

    #[test]
    fn replay_equivalence_across_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        let (addr_a, addr_b) = {
            let ledger = Ledger::init(storage.clone()).unwrap();
            let (private_key_a, pub_key_a, addr_a) = keypair_address();
            let (_, _, addr_b) = keypair_address();
            ledger.credit(&addr_a, 50 * ONE_UNIT);
            let tx = signed_transfer(&private_key_a, &pub_key_a, &addr_a, &addr_b, 5 * ONE_UNIT, 0, 0);
            ledger.mine("minerM", &[tx]).unwrap();
            ledger.mine("minerM", &[]).unwrap();
            ledger.close().unwrap();
            (addr_a, addr_b)
        };

        let reopened = Ledger::init(storage).unwrap();
        assert_eq!(reopened.height(), 3);
        assert_eq!(reopened.balance(&addr_b), 5 * ONE_UNIT);
        assert!(reopened.balance(&addr_a) > 0);
    }

    #[test]
    fn mining_n_blocks_injects_at_least_n_rewards() {
        let ledger = new_ledger();
        for _ in 0..4 {
            ledger.mine("miner1", &[]).unwrap();
        }
        assert!(ledger.balance("miner1") >= 4 * COINBASE_REWARD);
    }
}
