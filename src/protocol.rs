//! Wire protocol: a length-prefixed JSON frame format and the six message kinds nodes
//! exchange with each other.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::P2pError;
use crate::types::{Block, Transaction, MAX_FRAME_SIZE};

/// A message exchanged between peers, tagged on the wire by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "TRANSACTION")]
    Transaction { transaction: Transaction },

    #[serde(rename = "BLOCK")]
    Block { block: Block },

    #[serde(rename = "GET_BLOCKS")]
    GetBlocks,

    #[serde(rename = "CHAIN")]
    Chain { chain: Vec<Block> },

    #[serde(rename = "PING")]
    Ping,

    #[serde(rename = "PONG")]
    Pong,
}

/// Writes `message` as a 4-byte big-endian length prefix followed by its JSON encoding.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), P2pError>
where
    W: AsyncWriteExt + Unpin,
{
    let data = serde_json::to_vec(message)?;
    let length = data.len() as u32;
    writer.write_all(&length.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON message, rejecting frames over [`MAX_FRAME_SIZE`].
pub async fn read_message<R>(reader: &mut R) -> Result<Message, P2pError>
where
    R: AsyncReadExt + Unpin,
{
    let mut length_bytes = [0u8; 4];
    reader.read_exact(&mut length_bytes).await?;
    let length = u32::from_be_bytes(length_bytes);

    if length > MAX_FRAME_SIZE {
        return Err(P2pError::FrameTooLarge {
            limit: MAX_FRAME_SIZE,
            got: length,
        });
    }

    let mut buffer = vec![0u8; length as usize];
    reader.read_exact(&mut buffer).await?;

    let message = serde_json::from_slice(&buffer)?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Block;

    #[tokio::test]
    async fn round_trips_ping() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::Ping).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_message(&mut cursor).await.unwrap();
        assert!(matches!(decoded, Message::Ping));
    }

    #[tokio::test]
    async fn round_trips_chain() {
        let chain = vec![Block::genesis_unhashed()];
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::Chain { chain: chain.clone() })
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match read_message(&mut cursor).await.unwrap() {
            Message::Chain { chain: decoded } => assert_eq!(decoded.len(), chain.len()),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn round_trips_block_with_a_hundred_transactions() {
        let mut block = Block::genesis_unhashed();
        block.transactions = (0..100)
            .map(|n| Transaction::coinbase(format!("miner-{n}"), crate::types::COINBASE_REWARD))
            .collect();
        block.hash = block.compute_hash();

        let mut buf = Vec::new();
        write_message(&mut buf, &Message::Block { block: block.clone() })
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match read_message(&mut cursor).await.unwrap() {
            Message::Block { block: decoded } => assert_eq!(decoded, block),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, P2pError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn rejects_truncated_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(b"short");
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, P2pError::Io(_)));
    }
}
