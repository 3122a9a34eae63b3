//! Password-encrypted storage for the service signing keypair.
//!
//! A keystore file is JSON `{address, keydata, version}` where `keydata` is
//! `base64(salt || nonce || ciphertext)`. The encryption key is derived from
//! the password with Argon2 and the secret is sealed with AES-256-GCM.

pub mod error;
pub mod keypair;
pub mod store;

pub use error::{KeystoreError, Result};
pub use keypair::ServiceKeypair;
pub use store::{EncryptedKeystore, KEYSTORE_FILE_NAME, generate_keystore, load_keypair};
