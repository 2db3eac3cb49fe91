//! The seam between the core and the peer overlay.
//!
//! The overlay owns discovery, transport and the large-binary transfer
//! primitive. It pushes [`OverlayEvent`]s into the core and accepts
//! fire-and-forget sends through [`Overlay`].

use crate::message::MessageKind;
use crate::peer::{PeerHandle, PeerId};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::{MemoryNetwork, MemoryOverlay};

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("overlay is shut down")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload handed to the binary-transfer primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTransfer {
    pub file_name: String,
    /// Hex-encoded content hash, carried as transfer metadata.
    pub info: String,
    pub data: Vec<u8>,
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.transferred as f64 / self.total as f64
        }
    }
}

/// Everything the overlay can tell the core.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    PeerIntroduced(PeerHandle),
    Message {
        source: PeerHandle,
        kind_id: u8,
        payload: Vec<u8>,
    },
    ReceiveProgress {
        source: PeerHandle,
        state: String,
        progress: TransferProgress,
    },
    ReceiveComplete {
        source: PeerHandle,
        file_name: String,
        info: String,
        data: Vec<u8>,
    },
    SendProgress {
        peer: PeerHandle,
        state: String,
        progress: TransferProgress,
    },
    SendComplete {
        peer: PeerHandle,
        info: String,
        nonce: u64,
    },
    SendFailed {
        peer: PeerHandle,
        info: String,
        reason: String,
    },
}

/// Outbound capabilities the core needs from the overlay.
///
/// Both sends only enqueue; results arrive later as [`OverlayEvent`]s.
#[async_trait]
pub trait Overlay: Send + Sync {
    fn local_peer(&self) -> PeerId;

    async fn send_message(
        &self,
        peer: &PeerHandle,
        kind: MessageKind,
        payload: Vec<u8>,
    ) -> Result<(), OverlayError>;

    async fn send_binary(
        &self,
        peer: &PeerHandle,
        transfer: BinaryTransfer,
    ) -> Result<(), OverlayError>;
}
