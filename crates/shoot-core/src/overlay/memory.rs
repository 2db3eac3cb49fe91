//! In-process overlay: routes messages between nodes without sockets.

use super::{BinaryTransfer, Overlay, OverlayError, OverlayEvent, TransferProgress};
use crate::message::MessageKind;
use crate::peer::{PeerHandle, PeerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type Inboxes = HashMap<PeerId, mpsc::UnboundedSender<OverlayEvent>>;

/// A message recorded by [`MemoryOverlay::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: PeerId,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// A simulated overlay network shared by every joined node.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inboxes: Arc<Mutex<Inboxes>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network as `mid`, returning the node's overlay and event stream.
    pub fn join(&self, mid: PeerId) -> (Arc<MemoryOverlay>, mpsc::UnboundedReceiver<OverlayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inboxes).insert(mid, tx);
        let overlay = MemoryOverlay {
            mid,
            inboxes: self.inboxes.clone(),
            sent_messages: Mutex::new(Vec::new()),
            sent_transfers: Mutex::new(Vec::new()),
        };
        (Arc::new(overlay), rx)
    }

    pub fn leave(&self, mid: &PeerId) {
        lock(&self.inboxes).remove(mid);
    }

    /// Tell `to` that `peer` has become reachable.
    pub fn introduce(&self, to: PeerId, peer: PeerId) -> bool {
        deliver(&self.inboxes, &to, OverlayEvent::PeerIntroduced(PeerHandle::new(peer)))
    }

    /// Introduce two nodes to each other.
    pub fn introduce_pair(&self, a: PeerId, b: PeerId) {
        self.introduce(a, b);
        self.introduce(b, a);
    }
}

/// One node's view of a [`MemoryNetwork`].
///
/// Every send is recorded before delivery, whether or not the target has
/// joined, so tests can assert on exactly what left the node.
pub struct MemoryOverlay {
    mid: PeerId,
    inboxes: Arc<Mutex<Inboxes>>,
    sent_messages: Mutex<Vec<SentMessage>>,
    sent_transfers: Mutex<Vec<(PeerId, BinaryTransfer)>>,
}

impl MemoryOverlay {
    /// A node with no network behind it; sends are recorded and dropped.
    pub fn detached(mid: PeerId) -> Arc<Self> {
        Arc::new(Self {
            mid,
            inboxes: Arc::new(Mutex::new(HashMap::new())),
            sent_messages: Mutex::new(Vec::new()),
            sent_transfers: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        lock(&self.sent_messages).clone()
    }

    pub fn sent_transfers(&self) -> Vec<(PeerId, BinaryTransfer)> {
        lock(&self.sent_transfers).clone()
    }

    pub fn count_sent(&self, to: &PeerId, kind: MessageKind) -> usize {
        lock(&self.sent_messages)
            .iter()
            .filter(|m| &m.to == to && m.kind == kind)
            .count()
    }
}

#[async_trait]
impl Overlay for MemoryOverlay {
    fn local_peer(&self) -> PeerId {
        self.mid
    }

    async fn send_message(
        &self,
        peer: &PeerHandle,
        kind: MessageKind,
        payload: Vec<u8>,
    ) -> Result<(), OverlayError> {
        lock(&self.sent_messages).push(SentMessage {
            to: peer.mid,
            kind,
            payload: payload.clone(),
        });

        let event = OverlayEvent::Message {
            source: PeerHandle::new(self.mid),
            kind_id: kind.id(),
            payload,
        };
        if !deliver(&self.inboxes, &peer.mid, event) {
            tracing::debug!("memory overlay: {} not joined, message dropped", peer.mid.short());
        }
        Ok(())
    }

    async fn send_binary(
        &self,
        peer: &PeerHandle,
        transfer: BinaryTransfer,
    ) -> Result<(), OverlayError> {
        lock(&self.sent_transfers).push((peer.mid, transfer.clone()));

        let total = transfer.data.len() as u64;
        let source = PeerHandle::new(self.mid);
        let progress = OverlayEvent::ReceiveProgress {
            source: source.clone(),
            state: "finished".to_string(),
            progress: TransferProgress { transferred: total, total },
        };
        let complete = OverlayEvent::ReceiveComplete {
            source,
            file_name: transfer.file_name,
            info: transfer.info.clone(),
            data: transfer.data,
        };

        let delivered = deliver(&self.inboxes, &peer.mid, progress)
            && deliver(&self.inboxes, &peer.mid, complete);

        let outcome = if delivered {
            OverlayEvent::SendComplete {
                peer: peer.clone(),
                info: transfer.info,
                nonce: transfer.nonce,
            }
        } else {
            OverlayEvent::SendFailed {
                peer: peer.clone(),
                info: transfer.info,
                reason: "peer not reachable".to_string(),
            }
        };
        deliver(&self.inboxes, &self.mid, outcome);
        Ok(())
    }
}

fn deliver(inboxes: &Mutex<Inboxes>, to: &PeerId, event: OverlayEvent) -> bool {
    match lock(inboxes).get(to) {
        Some(tx) => tx.send(event).is_ok(),
        None => false,
    }
}

// A poisoned lock only means a panicking test thread; the data is still usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_is_recorded_and_delivered() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.join(PeerId([1; 20]));
        let (_b, mut b_rx) = net.join(PeerId([2; 20]));

        a.send_message(&PeerHandle::new(PeerId([2; 20])), MessageKind::GreetingRequest, b"a".to_vec())
            .await
            .unwrap();

        assert_eq!(a.count_sent(&PeerId([2; 20]), MessageKind::GreetingRequest), 1);
        match b_rx.recv().await {
            Some(OverlayEvent::Message { source, kind_id, payload }) => {
                assert_eq!(source.mid, PeerId([1; 20]));
                assert_eq!(kind_id, MessageKind::GREETING_REQUEST);
                assert_eq!(payload, b"a".to_vec());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_binary_to_missing_peer_reports_failure() {
        let net = MemoryNetwork::new();
        let (a, mut a_rx) = net.join(PeerId([1; 20]));

        let transfer = BinaryTransfer {
            file_name: "x".into(),
            info: "00".into(),
            data: vec![1, 2, 3],
            nonce: 5,
        };
        a.send_binary(&PeerHandle::new(PeerId([9; 20])), transfer).await.unwrap();

        assert_eq!(a.sent_transfers().len(), 1);
        assert!(matches!(a_rx.recv().await, Some(OverlayEvent::SendFailed { .. })));
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(TransferProgress { transferred: 5, total: 10 }.fraction(), 0.5);
        assert_eq!(TransferProgress { transferred: 0, total: 0 }.fraction(), 1.0);
    }
}
