//! File transfer coordination.
//!
//! The sender's hash is authoritative: it travels as hex metadata with the
//! bytes. The receiver recomputes it and refuses to write on mismatch.

use crate::overlay::{BinaryTransfer, Overlay, OverlayError, TransferProgress};
use crate::peer::{PeerHandle, PeerId};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::Storage;
use thiserror::Error;
use tokio::sync::RwLock;

/// Log target for rejected inbound content.
pub const INTEGRITY_TARGET: &str = "shoot::integrity";

pub type ContentHash = [u8; 20];

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("content hash mismatch for {file_name}: expected {expected}, got {actual}")]
    Integrity {
        file_name: String,
        expected: String,
        actual: String,
    },
    #[error("no output directory configured")]
    NoOutputDir,
    #[error("failed to write {file_name}: {reason}")]
    Write { file_name: String, reason: String },
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

pub fn content_hash(data: &[u8]) -> ContentHash {
    Sha1::digest(data).into()
}

/// First 8 bytes of `hash`, big-endian, zero-padded when shorter.
pub fn nonce_from_hash(hash: &[u8]) -> u64 {
    (0..8).fold(0u64, |nonce, i| {
        (nonce << 8) | u64::from(hash.get(i).copied().unwrap_or(0))
    })
}

/// Transfer nonce for `data`. Identical content always maps to the same nonce.
pub fn nonce(data: &[u8]) -> u64 {
    nonce_from_hash(&content_hash(data))
}

/// One outbound file, alive only until the overlay accepts it.
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    pub file_name: String,
    pub content_hash: ContentHash,
    pub nonce: u64,
    pub payload: Vec<u8>,
}

impl TransferDescriptor {
    pub fn new(file_name: impl Into<String>, payload: Vec<u8>) -> Self {
        let content_hash = content_hash(&payload);
        Self {
            file_name: file_name.into(),
            content_hash,
            nonce: nonce_from_hash(&content_hash),
            payload,
        }
    }

    pub fn info(&self) -> String {
        hex::encode(self.content_hash)
    }

    pub fn receipt(&self) -> SendReceipt {
        SendReceipt {
            file_name: self.file_name.clone(),
            info: self.info(),
            nonce: self.nonce,
            size: self.payload.len(),
        }
    }

    pub fn into_binary(self) -> BinaryTransfer {
        BinaryTransfer {
            info: self.info(),
            file_name: self.file_name,
            data: self.payload,
            nonce: self.nonce,
        }
    }
}

/// What was handed to the overlay for one `send_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub file_name: String,
    pub info: String,
    pub nonce: u64,
    pub size: usize,
}

pub struct TransferCoordinator<O: ?Sized, S> {
    overlay: Arc<O>,
    storage: Arc<S>,
    output_dir: RwLock<Option<PathBuf>>,
}

impl<O, S> TransferCoordinator<O, S>
where
    O: Overlay + ?Sized,
    S: Storage,
{
    pub fn new(overlay: Arc<O>, storage: Arc<S>, output_dir: Option<PathBuf>) -> Self {
        Self {
            overlay,
            storage,
            output_dir: RwLock::new(output_dir),
        }
    }

    pub async fn output_dir(&self) -> Option<PathBuf> {
        self.output_dir.read().await.clone()
    }

    pub async fn set_output_dir(&self, dir: Option<PathBuf>) {
        *self.output_dir.write().await = dir;
    }

    /// Read `path` and hand it to the overlay for `peer`.
    ///
    /// An unreadable file aborts the send; nothing reaches the overlay.
    pub async fn send_file(&self, peer: &PeerHandle, path: &Path) -> Result<SendReceipt, TransferError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?
            .to_string();

        let bytes = match self.storage.read_file(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to read file {} bound for {}: {:#}", path.display(), peer.mid, e);
                return Err(TransferError::Read {
                    path: path.to_path_buf(),
                    reason: format!("{:#}", e),
                });
            }
        };

        let descriptor = TransferDescriptor::new(file_name, bytes);
        let receipt = descriptor.receipt();
        tracing::debug!(
            "Sending file {} ({} bytes) to {} with nonce {}",
            receipt.file_name, receipt.size, peer.mid, receipt.nonce
        );

        if let Err(e) = self.overlay.send_binary(peer, descriptor.into_binary()).await {
            tracing::error!("Overlay rejected {} for {}: {}", receipt.file_name, peer.mid, e);
            return Err(e.into());
        }
        Ok(receipt)
    }

    /// Verify and persist a completed inbound transfer.
    pub async fn handle_receive_complete(
        &self,
        source: &PeerHandle,
        file_name: &str,
        info: &str,
        data: &[u8],
    ) -> Result<PathBuf, TransferError> {
        let Some(dir) = self.output_dir().await else {
            tracing::warn!("No output directory set; not writing {} from {}", file_name, source.mid.short());
            return Err(TransferError::NoOutputDir);
        };

        let actual = hex::encode(content_hash(data));
        if !actual.eq_ignore_ascii_case(info) {
            tracing::warn!(
                target: INTEGRITY_TARGET,
                peer = %source.mid,
                file = file_name,
                expected = info,
                actual = %actual,
                "content hash mismatch; file rejected"
            );
            return Err(TransferError::Integrity {
                file_name: file_name.to_string(),
                expected: info.to_string(),
                actual,
            });
        }

        let name = match sanitize_file_name(file_name) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("Rejecting file {:?} from {}: unusable name", file_name, source.mid);
                return Err(e);
            }
        };
        match self.storage.write_file(&dir, name, data).await {
            Ok(path) => {
                tracing::info!("Received {} ({} bytes) from {}", path.display(), data.len(), source.mid);
                Ok(path)
            }
            Err(e) => {
                tracing::error!("Failed to write {} from {}: {:#}", name, source.mid, e);
                Err(TransferError::Write {
                    file_name: name.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    pub fn on_receive_progress(&self, source: &str, state: &str, progress: &TransferProgress) {
        tracing::debug!(
            "Receive progress from {}: {} {}/{} ({:.0}%)",
            source, state, progress.transferred, progress.total, progress.fraction() * 100.0
        );
    }

    pub fn on_send_progress(&self, peer: &str, state: &str, progress: &TransferProgress) {
        tracing::debug!(
            "Send progress to {}: {} {}/{} ({:.0}%)",
            peer, state, progress.transferred, progress.total, progress.fraction() * 100.0
        );
    }

    pub fn on_send_complete(&self, peer: &str, info: &str, nonce: u64) {
        tracing::info!("Sent file {} to {} with nonce {}", info, peer, nonce);
    }

    pub fn on_send_failed(&self, peer: &str, info: &str, reason: &str) {
        tracing::warn!("Transfer {} to {} failed: {}", info, peer, reason);
    }
}

/// Keep only the final path component of a sender-supplied name.
fn sanitize_file_name(file_name: &str) -> Result<&str, TransferError> {
    Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TransferError::InvalidFileName(file_name.to_string()))
}
