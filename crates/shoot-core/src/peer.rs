//! Peer identities and registry entries.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

/// Overlay-assigned peer identity (`mid`): SHA-1 of the peer's public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn from_public_key(key: &[u8]) -> Self {
        Self(Sha1::digest(key).into())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// First 4 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}...)", self.short())
    }
}

/// Reference to a peer in the overlay's peer table.
///
/// The core only records the association; the overlay owns the peer's
/// lifecycle. Two handles are the same peer iff their `mid`s match.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub mid: PeerId,
    pub address: Option<SocketAddr>,
}

impl PeerHandle {
    pub fn new(mid: PeerId) -> Self {
        Self { mid, address: None }
    }

    pub fn with_address(mid: PeerId, address: SocketAddr) -> Self {
        Self { mid, address: Some(address) }
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.mid == other.mid
    }
}

impl Eq for PeerHandle {}

impl Hash for PeerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mid.hash(state);
    }
}

/// A peer that has completed a greeting, labelled with its instance id.
#[derive(Debug, Clone)]
pub struct ShootPeer {
    pub display_name: String,
    pub identity: PeerHandle,
}

impl ShootPeer {
    pub fn new(display_name: impl Into<String>, identity: PeerHandle) -> Self {
        Self {
            display_name: display_name.into(),
            identity,
        }
    }

    pub fn mid(&self) -> PeerId {
        self.identity.mid
    }
}

impl PartialEq for ShootPeer {
    fn eq(&self, other: &Self) -> bool {
        self.identity.mid == other.identity.mid
    }
}

impl Eq for ShootPeer {}

impl Hash for ShootPeer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.mid.hash(state);
    }
}

impl fmt::Display for ShootPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.identity.mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_peer_id_hex_roundtrip_and_length_check() {
        let id = PeerId::from_public_key(b"some public key");
        assert_eq!(PeerId::from_hex(&id.to_hex()).unwrap(), id);
        assert!(PeerId::from_hex("abcd").is_err());
        assert!(PeerId::from_hex("zz").is_err());
    }

    #[test]
    fn test_shoot_peer_identity_is_mid_only() {
        let mid = PeerId([7; 20]);
        let a = ShootPeer::new("alice@one", PeerHandle::new(mid));
        let b = ShootPeer::new(
            "alice@two",
            PeerHandle::with_address(mid, "127.0.0.1:9000".parse().unwrap()),
        );
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
        assert_ne!(
            ShootPeer::new("alice@one", PeerHandle::new(PeerId([8; 20]))),
            ShootPeer::new("alice@one", PeerHandle::new(mid))
        );
    }
}
