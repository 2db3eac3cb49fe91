//! Peer registry.
//!
//! A single reducer task folds "peer greeted" events into immutable
//! snapshots and publishes each one through a watch channel. Readers never
//! block the writer and never see a half-applied update.

use crate::peer::{PeerId, ShootPeer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub type PeerMap = HashMap<PeerId, ShootPeer>;

/// Point-in-time view of every greeted peer.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Number of greeted events folded in so far.
    pub version: u64,
    peers: Arc<PeerMap>,
}

impl RegistrySnapshot {
    /// Fold one greeted peer in. Existing keys are replaced, never removed.
    pub fn with_peer(&self, peer: ShootPeer) -> Self {
        let mut peers = (*self.peers).clone();
        peers.insert(peer.mid(), peer);
        Self {
            version: self.version + 1,
            peers: Arc::new(peers),
        }
    }

    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    pub fn get(&self, mid: &PeerId) -> Option<&ShootPeer> {
        self.peers.get(mid)
    }

    pub fn contains(&self, mid: &PeerId) -> bool {
        self.peers.contains_key(mid)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers ordered by display name, then mid.
    pub fn sorted(&self) -> Vec<ShootPeer> {
        let mut peers: Vec<ShootPeer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| (&a.display_name, a.mid()).cmp(&(&b.display_name, b.mid())));
        peers
    }
}

/// Handle to the registry. Cheap to clone; all clones share one reducer.
#[derive(Clone)]
pub struct PeerRegistry {
    events: mpsc::UnboundedSender<ShootPeer>,
    snapshots: watch::Receiver<RegistrySnapshot>,
}

impl PeerRegistry {
    /// Start the reducer task. Must be called from within a tokio runtime.
    ///
    /// The task exits once every clone of the returned handle is dropped.
    pub fn spawn() -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let (tx, snapshots) = watch::channel(RegistrySnapshot::default());
        tokio::spawn(reduce(rx, tx));
        Self { events, snapshots }
    }

    /// Queue a "peer greeted" event. Applied in the order recorded.
    pub fn record(&self, peer: ShootPeer) {
        if self.events.send(peer).is_err() {
            tracing::warn!("peer registry reducer has stopped; update dropped");
        }
    }

    pub fn current(&self) -> RegistrySnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn resolve(&self, mid: &PeerId) -> Option<ShootPeer> {
        self.snapshots.borrow().get(mid).cloned()
    }

    /// Subscribe: yields the current snapshot, then each later one.
    pub fn observe(&self) -> RegistryObserver {
        let mut rx = self.snapshots.clone();
        let pending = Some(rx.borrow_and_update().clone());
        RegistryObserver { rx, pending }
    }
}

pub struct RegistryObserver {
    rx: watch::Receiver<RegistrySnapshot>,
    pending: Option<RegistrySnapshot>,
}

impl RegistryObserver {
    /// Next snapshot, or `None` once the registry has shut down.
    ///
    /// A slow observer may skip intermediate versions; it always receives
    /// the latest one.
    pub async fn next(&mut self) -> Option<RegistrySnapshot> {
        if let Some(snapshot) = self.pending.take() {
            return Some(snapshot);
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub async fn wait_for<F>(&mut self, mut pred: F) -> Option<RegistrySnapshot>
    where
        F: FnMut(&RegistrySnapshot) -> bool,
    {
        loop {
            let snapshot = self.next().await?;
            if pred(&snapshot) {
                return Some(snapshot);
            }
        }
    }
}

async fn reduce(
    mut events: mpsc::UnboundedReceiver<ShootPeer>,
    snapshots: watch::Sender<RegistrySnapshot>,
) {
    while let Some(peer) = events.recv().await {
        tracing::debug!("registry: {} greeted", peer);
        let next = snapshots.borrow().with_peer(peer);
        snapshots.send_replace(next);
    }
    tracing::debug!("registry reducer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerHandle;
    use std::collections::HashSet;

    fn peer(n: u8, name: &str) -> ShootPeer {
        ShootPeer::new(name, PeerHandle::new(PeerId([n; 20])))
    }

    #[test]
    fn test_fold_is_monotonic_and_last_write_wins() {
        let events = vec![peer(1, "a"), peer(2, "b"), peer(1, "a2"), peer(3, "c")];

        let mut snapshot = RegistrySnapshot::default();
        let mut prev_keys: HashSet<PeerId> = HashSet::new();
        for event in events {
            snapshot = snapshot.with_peer(event);
            let keys: HashSet<PeerId> = snapshot.peers().keys().copied().collect();
            assert!(keys.is_superset(&prev_keys));
            prev_keys = keys;
        }

        assert_eq!(snapshot.version, 4);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get(&PeerId([1; 20])).unwrap().display_name, "a2");
    }

    #[tokio::test]
    async fn test_observer_sees_current_then_updates() {
        let registry = PeerRegistry::spawn();
        registry.record(peer(1, "a"));

        let mut early = registry.observe();
        early.wait_for(|s| s.contains(&PeerId([1; 20]))).await.unwrap();

        let mut late = registry.observe();
        let first = late.next().await.unwrap();
        assert!(first.contains(&PeerId([1; 20])));

        registry.record(peer(2, "b"));
        let next = late.wait_for(|s| s.len() == 2).await.unwrap();
        assert!(next.version > first.version);
        assert_eq!(registry.resolve(&PeerId([2; 20])).unwrap().display_name, "b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_not_lost() {
        let registry = PeerRegistry::spawn();

        let mut handles = Vec::new();
        for n in 0..32u8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.record(peer(n, &format!("peer-{}", n)));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = registry.observe().wait_for(|s| s.len() == 32).await.unwrap();
        assert_eq!(snapshot.version, 32);
        assert_eq!(registry.current().len(), 32);
    }

    #[test]
    fn test_sorted_orders_by_name() {
        let snapshot = RegistrySnapshot::default()
            .with_peer(peer(2, "zed"))
            .with_peer(peer(1, "amy"));
        let names: Vec<String> = snapshot.sorted().into_iter().map(|p| p.display_name).collect();
        assert_eq!(names, vec!["amy", "zed"]);
    }
}
