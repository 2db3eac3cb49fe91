//! Greeting protocol.
//!
//! Turns "peer introduced" events into a deduplicated identity exchange.
//! Per peer: UNKNOWN -> REQUEST_SENT -> GREETED, or UNKNOWN -> GREETED when
//! the other side asks first. Both directions feed the registry.

use crate::message::{self, GreetingMessage, MessageKind};
use crate::overlay::Overlay;
use crate::peer::{PeerHandle, PeerId, ShootPeer};
use crate::registry::PeerRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct GreetingProtocol<O: ?Sized> {
    overlay: Arc<O>,
    instance_id: String,
    /// Peers we have sent a request to. Only grows.
    greeted: Mutex<HashSet<PeerId>>,
    registry: PeerRegistry,
}

impl<O> GreetingProtocol<O>
where
    O: Overlay + ?Sized,
{
    pub fn new(overlay: Arc<O>, instance_id: impl Into<String>, registry: PeerRegistry) -> Self {
        Self {
            overlay,
            instance_id: instance_id.into(),
            greeted: Mutex::new(HashSet::new()),
            registry,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Handle an introduction. Returns true if a request went out.
    ///
    /// The check-and-mark happens under one lock, so concurrent
    /// introductions of the same peer send a single request.
    pub async fn on_peer_introduced(&self, peer: &PeerHandle) -> bool {
        if peer.mid == self.overlay.local_peer() {
            tracing::debug!("Ignoring introduction to ourselves");
            return false;
        }

        let fresh = self.greeted.lock().await.insert(peer.mid);
        if !fresh {
            tracing::debug!("Already greeted {}", peer.mid.short());
            return false;
        }

        tracing::info!("Sending greeting to {}: {}", peer.mid, self.instance_id);
        self.send(peer, MessageKind::GreetingRequest).await;
        true
    }

    /// Handle an inbound overlay message. Malformed payloads are dropped.
    pub async fn on_message(&self, source: &PeerHandle, kind_id: u8, payload: &[u8]) {
        let (kind, greeting) = match message::decode(kind_id, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("Dropping message from {}: {}", source.mid.short(), e);
                return;
            }
        };

        tracing::info!("Received {:?} from {}: {}", kind, source.mid, greeting.user_name);
        self.registry.record(ShootPeer::new(greeting.user_name, source.clone()));

        if kind == MessageKind::GreetingRequest {
            self.send(source, MessageKind::GreetingResponse).await;
        }
    }

    pub async fn has_requested(&self, mid: &PeerId) -> bool {
        self.greeted.lock().await.contains(mid)
    }

    pub async fn requested_count(&self) -> usize {
        self.greeted.lock().await.len()
    }

    async fn send(&self, peer: &PeerHandle, kind: MessageKind) {
        let payload = GreetingMessage::new(self.instance_id.as_str()).to_bytes();
        if let Err(e) = self.overlay.send_message(peer, kind, payload).await {
            tracing::warn!("Failed to send {:?} to {}: {}", kind, peer.mid.short(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::MemoryOverlay;

    const LOCAL: PeerId = PeerId([0; 20]);
    const REMOTE: PeerId = PeerId([1; 20]);

    fn protocol() -> (Arc<MemoryOverlay>, PeerRegistry, GreetingProtocol<MemoryOverlay>) {
        let overlay = MemoryOverlay::detached(LOCAL);
        let registry = PeerRegistry::spawn();
        let protocol = GreetingProtocol::new(overlay.clone(), "me@host", registry.clone());
        (overlay, registry, protocol)
    }

    #[tokio::test]
    async fn test_duplicate_introductions_send_one_request() {
        let (overlay, _registry, protocol) = protocol();
        let peer = PeerHandle::new(REMOTE);

        assert!(protocol.on_peer_introduced(&peer).await);
        assert!(!protocol.on_peer_introduced(&peer).await);

        assert_eq!(overlay.count_sent(&REMOTE, MessageKind::GreetingRequest), 1);
        let sent = overlay.sent_messages();
        assert_eq!(sent[0].payload, b"me@host".to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_introductions_send_one_request() {
        let (overlay, _registry, protocol) = protocol();
        let protocol = Arc::new(protocol);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let protocol = protocol.clone();
            handles.push(tokio::spawn(async move {
                protocol.on_peer_introduced(&PeerHandle::new(REMOTE)).await
            }));
        }
        let mut sent = 0;
        for handle in handles {
            if handle.await.unwrap() {
                sent += 1;
            }
        }

        assert_eq!(sent, 1);
        assert_eq!(overlay.count_sent(&REMOTE, MessageKind::GreetingRequest), 1);
    }

    #[tokio::test]
    async fn test_every_request_gets_one_response_and_registers() {
        let (overlay, registry, protocol) = protocol();
        let peer = PeerHandle::new(REMOTE);

        protocol.on_message(&peer, MessageKind::GREETING_REQUEST, b"bob@one").await;
        registry.observe().wait_for(|s| s.contains(&REMOTE)).await.unwrap();
        assert_eq!(overlay.count_sent(&REMOTE, MessageKind::GreetingResponse), 1);

        // Already known: still answered, name updated.
        protocol.on_message(&peer, MessageKind::GREETING_REQUEST, b"bob@two").await;
        registry
            .observe()
            .wait_for(|s| s.get(&REMOTE).map(|p| p.display_name.as_str()) == Some("bob@two"))
            .await
            .unwrap();
        assert_eq!(overlay.count_sent(&REMOTE, MessageKind::GreetingResponse), 2);
        assert_eq!(overlay.count_sent(&REMOTE, MessageKind::GreetingRequest), 0);
        assert_eq!(registry.current().len(), 1);
    }

    #[tokio::test]
    async fn test_response_registers_without_reply() {
        let (overlay, registry, protocol) = protocol();

        protocol
            .on_message(&PeerHandle::new(REMOTE), MessageKind::GREETING_RESPONSE, b"carol@x")
            .await;

        let snapshot = registry.observe().wait_for(|s| s.contains(&REMOTE)).await.unwrap();
        assert_eq!(snapshot.get(&REMOTE).unwrap().display_name, "carol@x");
        assert!(overlay.sent_messages().is_empty());
        // A response does not count as having requested.
        assert!(!protocol.has_requested(&REMOTE).await);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let (overlay, registry, protocol) = protocol();
        let peer = PeerHandle::new(REMOTE);

        protocol.on_message(&peer, MessageKind::GREETING_REQUEST, &[0xc3, 0x28]).await;
        protocol.on_message(&peer, 42, b"fine").await;

        // A later valid event proves the reducer drained everything before it.
        protocol.on_message(&PeerHandle::new(PeerId([2; 20])), MessageKind::GREETING_RESPONSE, b"d").await;
        let snapshot = registry.observe().wait_for(|s| s.len() == 1).await.unwrap();
        assert!(!snapshot.contains(&REMOTE));
        assert!(overlay.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_self_introduction_is_ignored() {
        let (overlay, _registry, protocol) = protocol();
        assert!(!protocol.on_peer_introduced(&PeerHandle::new(LOCAL)).await);
        assert!(overlay.sent_messages().is_empty());
    }
}
