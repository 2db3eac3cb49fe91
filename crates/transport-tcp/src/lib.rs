//! TCP overlay.
//!
//! Every connection opens with a signed hello in both directions; the
//! peer's `mid` is derived from the verified public key. After that the
//! connection carries greeting messages and whole-file binary transfers.
//! Binary frames are acknowledged so the sender can report completion.

use async_trait::async_trait;
use shoot_core::overlay::{BinaryTransfer, Overlay, OverlayError, OverlayEvent, TransferProgress};
use shoot_core::{Identity, MessageKind, PeerHandle, PeerId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

pub mod frame;

use frame::{hello_transcript, read_frame, write_frame, Frame};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid hello: {0}")]
    BadHello(String),
    #[error("refusing connection to ourselves")]
    SelfConnection,
}

struct Connection {
    tx: mpsc::UnboundedSender<Frame>,
    /// Who opened the connection. Breaks ties when both sides dial at once.
    dialer: PeerId,
}

pub struct TcpOverlay {
    identity: Identity,
    local: PeerId,
    local_addr: SocketAddr,
    peers: Mutex<HashMap<PeerId, Connection>>,
    events: mpsc::UnboundedSender<OverlayEvent>,
}

impl TcpOverlay {
    /// Listen on `addr` and start accepting peers.
    pub async fn bind(
        identity: Identity,
        addr: SocketAddr,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<OverlayEvent>), TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, rx) = mpsc::unbounded_channel();

        let overlay = Arc::new(Self {
            local: identity.peer_id(),
            identity,
            local_addr,
            peers: Mutex::new(HashMap::new()),
            events,
        });
        tracing::info!("Overlay {} listening on {}", overlay.local.short(), local_addr);

        tokio::spawn(overlay.clone().accept_loop(listener));
        Ok((overlay, rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dial a peer and complete the hello exchange.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<PeerId, TransportError> {
        tracing::debug!("Connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        self.clone().establish(stream, addr, true).await
    }

    pub async fn is_connected(&self, mid: &PeerId) -> bool {
        self.peers.lock().await.contains_key(mid)
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.lock().await.keys().copied().collect()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let overlay = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = overlay.establish(stream, addr, false).await {
                            tracing::warn!("Inbound connection from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => tracing::warn!("Accept failed: {}", e),
            }
        }
    }

    fn hello(&self) -> Frame {
        let public_key = self.identity.public_key_bytes();
        let listen_port = self.local_addr.port();
        let signature = self
            .identity
            .sign(&hello_transcript(&public_key, listen_port))
            .to_bytes()
            .to_vec();
        Frame::Hello { public_key, listen_port, signature }
    }

    async fn establish(
        self: Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        outbound: bool,
    ) -> Result<PeerId, TransportError> {
        let (mut reader, mut writer) = stream.into_split();
        write_frame(&mut writer, &self.hello()).await?;
        let (mid, listen_port) = verify_hello(read_frame(&mut reader).await?)?;
        if mid == self.local {
            return Err(TransportError::SelfConnection);
        }

        let dialer = if outbound { self.local } else { mid };
        let handle = PeerHandle::with_address(mid, SocketAddr::new(remote.ip(), listen_port));
        let (tx, rx) = mpsc::unbounded_channel();

        let superseded = {
            let mut peers = self.peers.lock().await;
            // Both sides keep the connection dialed by the smaller mid.
            let loses = peers
                .get(&mid)
                .is_some_and(|existing| existing.dialer != dialer && existing.dialer < dialer);
            if !loses {
                peers.insert(mid, Connection { tx: tx.clone(), dialer });
            }
            loses
        };

        tokio::spawn(write_loop(writer, rx, handle.clone(), self.events.clone()));
        if superseded {
            // The peer may already have queued frames here; read until it hangs up.
            tracing::debug!("Draining duplicate connection to {}", mid.short());
        } else {
            tracing::info!("Connected to {} at {}", mid, remote);
            let _ = self.events.send(OverlayEvent::PeerIntroduced(handle.clone()));
        }
        tokio::spawn(self.clone().read_loop(reader, handle, tx));
        Ok(mid)
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        peer: PeerHandle,
        tx: mpsc::UnboundedSender<Frame>,
    ) {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(frame) => frame,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::UnexpectedEof {
                        tracing::warn!("Read from {} failed: {}", peer.mid.short(), e);
                    }
                    break;
                }
            };

            match frame {
                Frame::Hello { .. } => {
                    tracing::warn!("Unexpected second hello from {}", peer.mid.short());
                }
                Frame::Message { kind_id, payload } => {
                    self.emit(OverlayEvent::Message { source: peer.clone(), kind_id, payload });
                }
                Frame::Binary { file_name, info, nonce, data } => {
                    let total = data.len() as u64;
                    self.emit(OverlayEvent::ReceiveProgress {
                        source: peer.clone(),
                        state: "finished".to_string(),
                        progress: TransferProgress { transferred: total, total },
                    });
                    self.emit(OverlayEvent::ReceiveComplete {
                        source: peer.clone(),
                        file_name,
                        info: info.clone(),
                        data,
                    });
                    let _ = tx.send(Frame::BinaryAck { info, nonce });
                }
                Frame::BinaryAck { info, nonce } => {
                    self.emit(OverlayEvent::SendComplete { peer: peer.clone(), info, nonce });
                }
            }
        }

        let mut peers = self.peers.lock().await;
        if peers.get(&peer.mid).is_some_and(|c| c.tx.same_channel(&tx)) {
            peers.remove(&peer.mid);
        }
        tracing::info!("Connection to {} closed", peer.mid);
    }

    fn emit(&self, event: OverlayEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Overlay event dropped; no consumer");
        }
    }

    async fn enqueue(&self, mid: &PeerId, frame: Frame) -> Result<(), OverlayError> {
        let peers = self.peers.lock().await;
        let conn = peers.get(mid).ok_or(OverlayError::NotConnected(*mid))?;
        conn.tx.send(frame).map_err(|_| OverlayError::NotConnected(*mid))
    }
}

#[async_trait]
impl Overlay for TcpOverlay {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    async fn send_message(
        &self,
        peer: &PeerHandle,
        kind: MessageKind,
        payload: Vec<u8>,
    ) -> Result<(), OverlayError> {
        self.enqueue(&peer.mid, Frame::Message { kind_id: kind.id(), payload }).await
    }

    async fn send_binary(
        &self,
        peer: &PeerHandle,
        transfer: BinaryTransfer,
    ) -> Result<(), OverlayError> {
        let frame = Frame::Binary {
            file_name: transfer.file_name,
            info: transfer.info,
            nonce: transfer.nonce,
            data: transfer.data,
        };
        self.enqueue(&peer.mid, frame).await
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    peer: PeerHandle,
    events: mpsc::UnboundedSender<OverlayEvent>,
) {
    while let Some(frame) = rx.recv().await {
        let binary = match &frame {
            Frame::Binary { info, data, .. } => Some((info.clone(), data.len() as u64)),
            _ => None,
        };

        if let Some((info, total)) = &binary {
            let _ = events.send(OverlayEvent::SendProgress {
                peer: peer.clone(),
                state: format!("sending {}", info),
                progress: TransferProgress { transferred: 0, total: *total },
            });
        }

        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::warn!("Write to {} failed: {}", peer.mid.short(), e);
            if let Some((info, _)) = binary {
                let _ = events.send(OverlayEvent::SendFailed {
                    peer: peer.clone(),
                    info,
                    reason: e.to_string(),
                });
            }
            // A frame that is merely too large leaves the stream intact.
            if e.kind() == std::io::ErrorKind::InvalidData {
                continue;
            }
            break;
        }

        if let Some((info, total)) = binary {
            let _ = events.send(OverlayEvent::SendProgress {
                peer: peer.clone(),
                state: format!("sent {}", info),
                progress: TransferProgress { transferred: total, total },
            });
        }
    }
}

fn verify_hello(frame: Frame) -> Result<(PeerId, u16), TransportError> {
    let Frame::Hello { public_key, listen_port, signature } = frame else {
        return Err(TransportError::BadHello("first frame was not a hello".into()));
    };
    Identity::verify_raw(&public_key, &hello_transcript(&public_key, listen_port), &signature)
        .map_err(|e| TransportError::BadHello(e.to_string()))?;
    Ok((PeerId::from_public_key(&public_key), listen_port))
}
