//! Keystore error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while creating or unlocking a keystore.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// A keystore already exists at the target path.
    #[error("Keystore already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Filesystem access failed.
    #[error("Keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid keystore document.
    #[error("Keystore format error: {0}")]
    Format(String),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Sealing the secret failed.
    #[error("Failed to encrypt keystore")]
    Encryption,

    /// Wrong password or tampered ciphertext.
    #[error("Failed to decrypt keystore (wrong password or corrupted file)")]
    Decryption,

    /// The decrypted key does not match the recorded address.
    #[error("Keystore address mismatch: file says {expected}, key is {actual}")]
    AddressMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for keystore results.
pub type Result<T> = std::result::Result<T, KeystoreError>;
