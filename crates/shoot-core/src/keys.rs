use ed25519_dalek::{SigningKey, VerifyingKey, Signature, Signer, Verifier};
use rand_core::OsRng;
use anyhow::{Context, Result};
use storage::Preferences;

use crate::peer::PeerId;

pub const KEY_PRIVATE_KEY: &str = "privateKey";

/// Ed25519 keypair behind this node's overlay identity.
///
/// NOTE: the secret lives hex-encoded in the preferences file. Fine for a
/// desktop tool, not for shared machines.
#[derive(Clone)]
pub struct Identity {
    pub signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_secret_hex(hex_key: &str) -> Result<Self> {
        let data = hex::decode(hex_key.trim()).context("decoding private key")?;
        if data.len() != 32 {
            anyhow::bail!("Invalid key length: expected 32 bytes, got {}", data.len());
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&data);
        Ok(Self { signing_key: SigningKey::from_bytes(&key_bytes) })
    }

    /// Use the key stored under `privateKey`, or generate and store one.
    pub fn load_or_generate(prefs: &mut Preferences) -> Result<Self> {
        let stored = prefs.get(KEY_PRIVATE_KEY, "");
        if stored.is_empty() {
            tracing::info!("Generating/saving new private key");
            let identity = Self::generate();
            prefs.set(KEY_PRIVATE_KEY, &hex::encode(identity.signing_key.to_bytes()))?;
            Ok(identity)
        } else {
            tracing::info!("Using existing private key");
            Self::from_secret_hex(&stored)
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key_bytes())
    }

    /// Get a short fingerprint for display (first 8 hex chars of pubkey).
    pub fn fingerprint(&self) -> String {
        let pubkey = self.public_key_bytes();
        hex::encode(&pubkey[..4])
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }

    /// Verify a signature by a public key.
    pub fn verify_with_pubkey(
        pubkey: &[u8; 32],
        msg: &[u8],
        sig: &Signature
    ) -> Result<(), ed25519_dalek::SignatureError> {
        let pk = VerifyingKey::from_bytes(pubkey)?;
        pk.verify(msg, sig)
    }

    /// Same as [`Identity::verify_with_pubkey`] for a raw 64-byte signature.
    pub fn verify_raw(
        pubkey: &[u8; 32],
        msg: &[u8],
        sig: &[u8]
    ) -> Result<(), ed25519_dalek::SignatureError> {
        let sig = Signature::from_slice(sig)?;
        Self::verify_with_pubkey(pubkey, msg, &sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_generated_once_and_reused() -> Result<()> {
        let mut prefs = Preferences::in_memory();
        let first = Identity::load_or_generate(&mut prefs)?;
        let second = Identity::load_or_generate(&mut prefs)?;

        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
        assert_eq!(first.peer_id(), second.peer_id());
        assert_eq!(first.peer_id(), PeerId::from_public_key(&first.public_key_bytes()));
        Ok(())
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = Identity::generate();
        let sig = identity.sign(b"hello");
        assert!(Identity::verify_with_pubkey(&identity.public_key_bytes(), b"hello", &sig).is_ok());
        assert!(Identity::verify_with_pubkey(&identity.public_key_bytes(), b"other", &sig).is_err());
    }

    #[test]
    fn test_bad_stored_key_is_an_error() {
        assert!(Identity::from_secret_hex("abcd").is_err());
        assert!(Identity::from_secret_hex("not hex").is_err());
    }
}
