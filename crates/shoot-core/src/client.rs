//! Node orchestration: routes overlay events to the greeting protocol and
//! the transfer coordinator.
//!
//! The client is generic over the overlay and a Storage implementation.
//! Peer-specific callbacks are resolved through the registry's current
//! snapshot, once per event.

use crate::config::ShootConfig;
use crate::greeting::GreetingProtocol;
use crate::overlay::{Overlay, OverlayEvent};
use crate::peer::{PeerHandle, PeerId, ShootPeer};
use crate::registry::PeerRegistry;
use crate::transfer::{SendReceipt, TransferCoordinator, TransferError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::Storage;
use tokio::sync::mpsc;

pub struct Client<O: ?Sized, S> {
    pub cfg: ShootConfig,
    overlay: Arc<O>,
    registry: PeerRegistry,
    greeting: GreetingProtocol<O>,
    transfers: TransferCoordinator<O, S>,
}

impl<O, S> Client<O, S>
where
    O: Overlay + ?Sized,
    S: Storage,
{
    /// Must be called from within a tokio runtime (spawns the registry).
    pub fn new(overlay: Arc<O>, storage: S, cfg: ShootConfig) -> Self {
        let registry = PeerRegistry::spawn();
        let greeting = GreetingProtocol::new(overlay.clone(), cfg.instance_id.clone(), registry.clone());
        let transfers = TransferCoordinator::new(overlay.clone(), Arc::new(storage), cfg.output_dir.clone());
        Self {
            cfg,
            overlay,
            registry,
            greeting,
            transfers,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.overlay.local_peer()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn greeting(&self) -> &GreetingProtocol<O> {
        &self.greeting
    }

    pub fn transfers(&self) -> &TransferCoordinator<O, S> {
        &self.transfers
    }

    pub async fn set_output_dir(&self, dir: Option<PathBuf>) {
        match &dir {
            Some(d) => tracing::info!("Output directory set to {}", d.display()),
            None => tracing::info!("Output directory cleared; inbound files will be refused"),
        }
        self.transfers.set_output_dir(dir).await;
    }

    /// Consume overlay events in delivery order until the overlay closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<OverlayEvent>) {
        tracing::info!("Client {} running as {}", self.local_peer().short(), self.cfg.instance_id);
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("Overlay event stream closed");
    }

    /// Handle one event. Failures are logged and end here.
    pub async fn handle_event(&self, event: OverlayEvent) {
        match event {
            OverlayEvent::PeerIntroduced(peer) => {
                self.greeting.on_peer_introduced(&peer).await;
            }
            OverlayEvent::Message { source, kind_id, payload } => {
                self.greeting.on_message(&source, kind_id, &payload).await;
            }
            OverlayEvent::ReceiveProgress { source, state, progress } => {
                self.transfers.on_receive_progress(&self.label(&source), &state, &progress);
            }
            OverlayEvent::ReceiveComplete { source, file_name, info, data } => {
                if self.registry.resolve(&source.mid).is_none() {
                    tracing::debug!("Receiving {} from ungreeted peer {}", file_name, source.mid.short());
                }
                if let Err(e) = self
                    .transfers
                    .handle_receive_complete(&source, &file_name, &info, &data)
                    .await
                {
                    tracing::debug!("Dropped inbound {} from {}: {}", file_name, source.mid.short(), e);
                }
            }
            OverlayEvent::SendProgress { peer, state, progress } => {
                self.transfers.on_send_progress(&self.label(&peer), &state, &progress);
            }
            OverlayEvent::SendComplete { peer, info, nonce } => {
                self.transfers.on_send_complete(&self.label(&peer), &info, nonce);
            }
            OverlayEvent::SendFailed { peer, info, reason } => {
                self.transfers.on_send_failed(&self.label(&peer), &info, &reason);
            }
        }
    }

    /// Send a file to a greeted peer, looked up by `mid`.
    pub async fn send_file_to(&self, mid: &PeerId, path: &Path) -> Result<SendReceipt, TransferError> {
        let Some(peer) = self.registry.resolve(mid) else {
            tracing::warn!("Cannot send {}: {} has not been greeted", path.display(), mid);
            return Err(TransferError::UnknownPeer(*mid));
        };
        self.send_file(&peer, path).await
    }

    pub async fn send_file(&self, peer: &ShootPeer, path: &Path) -> Result<SendReceipt, TransferError> {
        tracing::info!("Sending {} to {}", path.display(), peer);
        self.transfers.send_file(&peer.identity, path).await
    }

    fn label(&self, peer: &PeerHandle) -> String {
        match self.registry.resolve(&peer.mid) {
            Some(known) => known.to_string(),
            None => peer.mid.to_string(),
        }
    }
}
