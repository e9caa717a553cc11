//! Orchestrator: wires the ledger, mempool, and P2P server together and routes inbound
//! peer messages to the right subsystem.

use std::sync::Arc;

use log::{info, warn};

use crate::error::NodeError;
use crate::ledger::Ledger;
use crate::mempool::Mempool;
use crate::p2p::{MessageHandler, P2pServer};
use crate::protocol::Message;
use crate::storage::Storage;
use crate::types::{Block, Transaction, MAX_TX_PER_BLOCK};

pub struct Node {
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    p2p: Arc<P2pServer>,
}

impl Node {
    /// Builds a node over an already-open `storage` handle. The P2P server is
    /// constructed but not yet listening; call [`Node::start_p2p`] to bind a port.
    pub fn new(storage: Arc<dyn Storage>) -> Result<Arc<Node>, NodeError> {
        let ledger = Arc::new(Ledger::init(storage)?);
        let mempool = Arc::new(Mempool::new());

        Ok(Arc::new_cyclic(|weak_node: &std::sync::Weak<Node>| {
            let weak_node = weak_node.clone();
            let handler: MessageHandler = Arc::new(move |addr, message| {
                let node = weak_node.clone();
                tokio::spawn(async move {
                    if let Some(node) = node.upgrade() {
                        node.handle_peer_message(addr, message).await;
                    }
                });
            });

            Node {
                ledger,
                mempool,
                p2p: P2pServer::new(handler),
            }
        }))
    }

    /// Binds the P2P listener on `port`. `P2pServer::start` spawns and owns the accept
    /// loop's task handle internally, so [`Node::close`] can stop it via `p2p.stop()`.
    pub fn start_p2p(self: &Arc<Self>, port: u16) {
        let p2p = Arc::clone(&self.p2p);
        tokio::spawn(async move {
            if let Err(e) = p2p.start(port).await {
                warn!("p2p: failed to start listener: {e}");
            }
        });
    }

    pub async fn connect_to_peer(&self, address: &str) -> Result<(), NodeError> {
        self.p2p.connect_to_peer(address).await?;
        Ok(())
    }

    /// Validates a transaction, admits it to the mempool, and broadcasts it to peers.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        self.ledger.validate_transaction(&tx)?;
        self.mempool.add(tx.clone());
        self.p2p.broadcast_transaction(tx.clone()).await;
        info!("transaction {} submitted and broadcast", tx.id);
        Ok(())
    }

    /// Mines a block from the current mempool contents, clears confirmed transactions,
    /// and broadcasts the result. The nonce search itself runs on a blocking-pool
    /// thread so it never stalls the async executor.
    pub async fn mine(&self, miner_address: &str) -> Result<Block, NodeError> {
        let pending = self.mempool.get_pending(MAX_TX_PER_BLOCK);
        let ledger = Arc::clone(&self.ledger);
        let miner_address = miner_address.to_string();

        let block = tokio::task::spawn_blocking(move || ledger.mine(&miner_address, &pending))
            .await
            .map_err(|e| NodeError::Config(format!("mining task panicked: {e}")))??;

        self.mempool.remove_confirmed(&block.transactions);
        self.p2p.broadcast_block(block.clone()).await;
        Ok(block)
    }

    async fn handle_peer_message(&self, addr: String, message: Message) {
        match message {
            Message::Transaction { transaction } => {
                if let Err(e) = self.ledger.validate_transaction(&transaction) {
                    warn!("received invalid transaction from {addr}: {e}");
                    return;
                }
                info!("received transaction {} from {addr}", transaction.id);
                self.mempool.add(transaction);
            }

            Message::Block { block } => {
                let index = block.index;
                if let Err(e) = self.ledger.add_block(block.clone()) {
                    warn!("received invalid block from {addr}: {e}");
                    return;
                }
                self.mempool.remove_confirmed(&block.transactions);
                info!("added block {index} received from {addr}");
            }

            Message::GetBlocks => {
                let chain = self.ledger.get_chain();
                let len = chain.len();
                self.p2p.send_chain(&addr, chain).await;
                info!("sent chain ({len} blocks) to {addr}");
            }

            Message::Chain { chain } => {
                if self.ledger.should_replace_chain(&chain) {
                    let len = chain.len();
                    if let Err(e) = self.ledger.replace_chain(chain) {
                        warn!("failed to replace chain from {addr}: {e}");
                        return;
                    }
                    info!("replaced local chain with longer chain ({len} blocks) from {addr}");
                }
            }

            Message::Ping | Message::Pong => {
                // handled at the p2p layer before reaching the dispatch table
            }
        }
    }

    pub fn height(&self) -> usize {
        self.ledger.height()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.ledger.balance(address)
    }

    pub fn nonce(&self, address: &str) -> u64 {
        self.ledger.nonce(address)
    }

    pub fn pending_count(&self) -> usize {
        self.mempool.count()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.mempool.get_all()
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.ledger.get_chain()
    }

    pub fn get_block(&self, index: u64) -> Option<Block> {
        self.ledger.get_block(index)
    }

    pub fn find_transaction(&self, id: &str) -> Option<Transaction> {
        self.ledger.find_transaction(id)
    }

    pub fn address_transactions(&self, address: &str) -> Vec<Transaction> {
        self.ledger.address_transactions(address)
    }

    /// Unconditionally credits `address`, bypassing consensus. See [`Ledger::credit`] for
    /// why this does not survive a restart or propagate to peers on its own.
    pub fn credit(&self, address: &str, amount: u64) {
        self.ledger.credit(address, amount);
    }

    pub async fn peer_count(&self) -> usize {
        self.p2p.peer_count().await
    }

    pub async fn peer_addresses(&self) -> Vec<String> {
        self.p2p.peer_addresses().await
    }

    pub async fn close(&self) -> Result<(), NodeError> {
        self.p2p.stop().await;
        self.ledger.close()?;
        Ok(())
    }
}
