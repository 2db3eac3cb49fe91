//! Shoot Core - greeting handshake and file transfer coordination
//!
//! Peers on an overlay greet each other with their instance identifiers,
//! accumulate into a live registry, and exchange hash-verified files.

pub mod config;
pub mod keys;
pub mod peer;
pub mod message;
pub mod overlay;
pub mod registry;
pub mod greeting;
pub mod transfer;
pub mod client;

// Re-export commonly used types
pub use config::ShootConfig;
pub use keys::Identity;
pub use peer::{PeerHandle, PeerId, ShootPeer};
pub use message::{GreetingMessage, MessageKind};
pub use overlay::{BinaryTransfer, Overlay, OverlayError, OverlayEvent, TransferProgress};
pub use registry::{PeerRegistry, RegistryObserver, RegistrySnapshot};
pub use greeting::GreetingProtocol;
pub use transfer::{SendReceipt, TransferCoordinator, TransferDescriptor, TransferError};
pub use client::Client;
