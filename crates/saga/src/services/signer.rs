//! Service signing capability.

use keystore::ServiceKeypair;

/// Signs ledger messages on behalf of this service.
pub trait ServiceSigner: Send + Sync {
    /// Base58 ledger address.
    fn public_key(&self) -> String;

    fn public_key_bytes(&self) -> [u8; 32];

    fn sign(&self, message: &[u8]) -> [u8; 64];
}

impl ServiceSigner for ServiceKeypair {
    fn public_key(&self) -> String {
        ServiceKeypair::public_key(self)
    }

    fn public_key_bytes(&self) -> [u8; 32] {
        ServiceKeypair::public_key_bytes(self)
    }

    fn sign(&self, message: &[u8]) -> [u8; 64] {
        ServiceKeypair::sign(self, message)
    }
}
