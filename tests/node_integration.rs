//! Cross-module integration tests: real TCP connections between two `Node`s, exercising
//! the P2P layer end to end rather than unit-testing `Ledger`/`P2pServer` in isolation.

use std::sync::Arc;
use std::time::Duration;

use pali_coin::storage::MemoryStorage;
use pali_coin::types::COINBASE_REWARD;
use pali_coin::Node;

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

async fn spawn_node_on(port: u16) -> Arc<Node> {
    let node = Node::new(Arc::new(MemoryStorage::new())).unwrap();
    node.start_p2p(port);
    tokio::time::sleep(Duration::from_millis(50)).await;
    node
}

#[tokio::test]
async fn new_peer_catches_up_to_the_longer_chain_on_connect() {
    let a = spawn_node_on(19201).await;
    let b = spawn_node_on(19202).await;

    for _ in 0..3 {
        a.mine("miner-a").await.unwrap();
    }

    b.connect_to_peer("127.0.0.1:19201").await.unwrap();

    let caught_up = wait_until(|| b.height() == a.height(), Duration::from_secs(2)).await;
    assert!(caught_up, "peer b never caught up to peer a's chain");
    assert_eq!(b.balance("miner-a"), 3 * COINBASE_REWARD);
}

#[tokio::test]
async fn mined_block_is_broadcast_to_connected_peers() {
    let a = spawn_node_on(19203).await;
    let b = spawn_node_on(19204).await;

    b.connect_to_peer("127.0.0.1:19203").await.unwrap();
    wait_until(|| b.height() == a.height(), Duration::from_secs(2)).await;

    a.mine("miner-a").await.unwrap();

    let propagated = wait_until(|| b.height() == a.height(), Duration::from_secs(2)).await;
    assert!(propagated, "mined block never reached the connected peer");
    assert_eq!(b.balance("miner-a"), COINBASE_REWARD);
}

#[tokio::test]
async fn submitted_transaction_propagates_to_peer_mempool() {
    let a = spawn_node_on(19205).await;
    let b = spawn_node_on(19206).await;
    b.connect_to_peer("127.0.0.1:19205").await.unwrap();
    wait_until(|| b.height() == a.height(), Duration::from_secs(2)).await;

    let (private_key, pub_key) = pali_coin::crypto::generate_keypair().unwrap();
    let pub_key_bytes = hex::decode(&pub_key).unwrap();
    let sender = pali_coin::crypto::address_from_pub_key(&pub_key_bytes).unwrap();

    // credit() is a local, unbroadcast operation: both nodes must see the funds for
    // the receiving side's mempool admission check to accept the transaction too.
    a.credit(&sender, 50 * pali_coin::types::ONE_UNIT);
    b.credit(&sender, 50 * pali_coin::types::ONE_UNIT);

    let mut tx = pali_coin::types::Transaction::construct(
        &sender,
        "receiver-address-000000000000000000",
        10 * pali_coin::types::ONE_UNIT,
        0,
        0,
        pub_key,
    );
    let sig = pali_coin::crypto::sign(&private_key, &tx.signable_bytes()).unwrap();
    tx.signature = hex::encode(sig);

    a.submit_transaction(tx).await.unwrap();

    let received = wait_until(|| b.pending_count() == 1, Duration::from_secs(2)).await;
    assert!(received, "peer never received the broadcast transaction");
}
