//! P2P networking: a TCP accept loop, outbound dialing, a peer registry, and broadcast
//! helpers. Message semantics (what to do with a decoded [`Message`]) live in `node.rs`;
//! this module only owns connections and framing.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::P2pError;
use crate::protocol::{self, Message};

/// Invoked once per decoded, non-PING message, tagged with the sending peer's address.
/// PING/PONG are handled inline by this module and never reach the handler.
pub type MessageHandler = Arc<dyn Fn(String, Message) + Send + Sync>;

struct Peer {
    writer: Mutex<WriteHalf<TcpStream>>,
}

/// Owns the listening socket and the set of live peer connections.
pub struct P2pServer {
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    handler: MessageHandler,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

impl P2pServer {
    pub fn new(handler: MessageHandler) -> Arc<P2pServer> {
        Arc::new(P2pServer {
            peers: RwLock::new(HashMap::new()),
            handler,
            listener_handle: Mutex::new(None),
        })
    }

    /// Binds `0.0.0.0:<port>` and spawns the accept loop as a background task, storing
    /// its handle so [`P2pServer::stop`] can abort it later.
    pub async fn start(self: &Arc<Self>, port: u16) -> Result<(), P2pError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("p2p: listening on port {port}");

        let server = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&server);
                        tokio::spawn(async move {
                            server.handle_connection(stream, addr.to_string()).await;
                        });
                    }
                    Err(e) => {
                        warn!("p2p: accept loop stopped: {e}");
                        break;
                    }
                }
            }
        });

        *self.listener_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Dials `address`, registers the connection, requests the peer's chain, then spawns
    /// a read loop for it.
    pub async fn connect_to_peer(self: &Arc<Self>, address: &str) -> Result<(), P2pError> {
        let stream = TcpStream::connect(address).await?;
        info!("p2p: connected to peer {address}");

        let server = Arc::clone(self);
        let address = address.to_string();
        let registered = server.register(stream, address.clone()).await;
        server.send_to(&address, &Message::GetBlocks).await.ok();

        tokio::spawn(async move {
            server.read_loop(registered, address).await;
        });
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: String) {
        info!("p2p: peer connected: {addr}");
        let reader = self.register(stream, addr.clone()).await;
        self.read_loop(reader, addr).await;
    }

    async fn register(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: String,
    ) -> tokio::io::ReadHalf<TcpStream> {
        let (read_half, write_half) = tokio::io::split(stream);
        let peer = Arc::new(Peer {
            writer: Mutex::new(write_half),
        });
        self.peers.write().await.insert(addr, peer);
        read_half
    }

    async fn read_loop(self: Arc<Self>, mut reader: tokio::io::ReadHalf<TcpStream>, addr: String) {
        loop {
            match protocol::read_message(&mut reader).await {
                Ok(Message::Ping) => {
                    if self.send_to(&addr, &Message::Pong).await.is_err() {
                        break;
                    }
                }
                Ok(message) => (self.handler)(addr.clone(), message),
                Err(e) => {
                    debug!("p2p: peer {addr} read error: {e}");
                    break;
                }
            }
        }
        self.peers.write().await.remove(&addr);
        info!("p2p: peer disconnected: {addr}");
    }

    async fn send_to(&self, addr: &str, message: &Message) -> Result<(), P2pError> {
        let peer = {
            let peers = self.peers.read().await;
            peers.get(addr).cloned()
        };
        let peer = peer.ok_or_else(|| P2pError::UnknownPeer(addr.to_string()))?;
        let mut writer = peer.writer.lock().await;
        protocol::write_message(&mut *writer, message).await
    }

    pub async fn broadcast_transaction(&self, transaction: crate::types::Transaction) {
        self.broadcast(Message::Transaction { transaction }).await;
    }

    pub async fn broadcast_block(&self, block: crate::types::Block) {
        self.broadcast(Message::Block { block }).await;
    }

    pub async fn send_chain(&self, addr: &str, chain: Vec<crate::types::Block>) {
        if let Err(e) = self.send_to(addr, &Message::Chain { chain }).await {
            warn!("p2p: failed to send chain to {addr}: {e}");
        }
    }

    async fn broadcast(&self, message: Message) {
        let addrs: Vec<String> = self.peers.read().await.keys().cloned().collect();
        for addr in addrs {
            if let Err(e) = self.send_to(&addr, &message).await {
                warn!("p2p: failed to send to {addr}: {e}");
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_addresses(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Closes the listener, closes every registered connection, and clears the registry.
    pub async fn stop(&self) {
        if let Some(handle) = self.listener_handle.lock().await.take() {
            handle.abort();
            debug!("p2p: stopped accept loop");
        }

        let mut peers = self.peers.write().await;
        for (addr, peer) in peers.drain() {
            let mut writer = peer.writer.lock().await;
            let _ = writer.shutdown().await;
            debug!("p2p: closed connection to {addr}");
        }
    }
}
