//! Ed25519 service keypair.

use ed25519_dalek::{SecretKey, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{KeystoreError, Result};

/// Length of the exported secret: seed followed by public key.
pub const EXPORTED_SECRET_LEN: usize = 64;

/// The keypair this service signs ledger operations with.
///
/// The public key doubles as the service's ledger address, rendered in
/// base58.
#[derive(Clone)]
pub struct ServiceKeypair {
    signing: SigningKey,
}

impl ServiceKeypair {
    /// Generates a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        let mut seed: Zeroizing<SecretKey> = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut seed[..]);
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Rebuilds a keypair from its 32-byte seed.
    pub fn from_seed(seed: &SecretKey) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Parses the base58 64-byte export produced by [`Self::export_base58`].
    pub fn from_base58(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            bs58::decode(encoded.trim())
                .into_vec()
                .map_err(|e| KeystoreError::Format(format!("invalid base58 secret: {e}")))?,
        );
        if bytes.len() != EXPORTED_SECRET_LEN {
            return Err(KeystoreError::Format(format!(
                "secret has {} bytes, expected {EXPORTED_SECRET_LEN}",
                bytes.len()
            )));
        }
        let mut seed: Zeroizing<SecretKey> = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes[..32]);
        let keypair = Self::from_seed(&seed);
        if keypair.public_key_bytes()[..] != bytes[32..] {
            return Err(KeystoreError::Format(
                "embedded public key does not match seed".to_string(),
            ));
        }
        Ok(keypair)
    }

    /// Exports seed and public key as one base58 string.
    pub fn export_base58(&self) -> Zeroizing<String> {
        Zeroizing::new(bs58::encode(self.signing.to_keypair_bytes()).into_string())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Base58 address of the public key.
    pub fn public_key(&self) -> String {
        bs58::encode(self.public_key_bytes()).into_string()
    }

    /// Signs `message` and returns the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for ServiceKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceKeypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
