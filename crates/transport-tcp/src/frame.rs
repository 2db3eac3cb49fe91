//! Wire frames: u32 big-endian length prefix, bincode body.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted in either direction (256 MiB).
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

const HELLO_CONTEXT: &[u8] = b"shoot-hello:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame on every connection, in both directions.
    Hello {
        public_key: [u8; 32],
        listen_port: u16,
        signature: Vec<u8>,
    },
    Message {
        kind_id: u8,
        payload: Vec<u8>,
    },
    Binary {
        file_name: String,
        info: String,
        nonce: u64,
        data: Vec<u8>,
    },
    BinaryAck {
        info: String,
        nonce: u64,
    },
}

/// Bytes covered by the hello signature.
pub fn hello_transcript(public_key: &[u8; 32], listen_port: u16) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HELLO_CONTEXT.len() + 32 + 2);
    msg.extend_from_slice(HELLO_CONTEXT);
    msg.extend_from_slice(public_key);
    msg.extend_from_slice(&listen_port.to_be_bytes());
    msg
}

async fn write_lp<T: AsyncWrite + Unpin + Send>(
    transport: &mut T,
    data: &[u8]
) -> std::io::Result<()> {
    if data.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large"
        ));
    }
    transport.write_all(&(data.len() as u32).to_be_bytes()).await?;
    transport.write_all(data).await?;
    transport.flush().await?;
    Ok(())
}

async fn read_lp<T: AsyncRead + Unpin + Send>(
    transport: &mut T
) -> std::io::Result<Vec<u8>> {
    let mut lenb = [0u8; 4];
    transport.read_exact(&mut lenb).await?;
    let len = u32::from_be_bytes(lenb) as usize;

    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large"
        ));
    }

    let mut buf = vec![0u8; len];
    transport.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame<T: AsyncWrite + Unpin + Send>(
    transport: &mut T,
    frame: &Frame,
) -> std::io::Result<()> {
    let bytes = bincode::serialize(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_lp(transport, &bytes).await
}

pub async fn read_frame<T: AsyncRead + Unpin + Send>(transport: &mut T) -> std::io::Result<Frame> {
    let bytes = read_lp(transport).await?;
    bincode::deserialize(&bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
