//! Encrypted keystore files.

use std::fs;
use std::path::Path;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{KeystoreError, Result};
use crate::keypair::ServiceKeypair;

/// File name written inside the keystore directory.
pub const KEYSTORE_FILE_NAME: &str = "routerkey.json";

/// Current on-disk format version.
pub const KEYSTORE_VERSION: u32 = 1;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// On-disk keystore document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeystore {
    /// Base58 public key of the sealed keypair.
    pub address: String,
    /// `base64(salt || nonce || ciphertext)`.
    pub keydata: String,
    pub version: u32,
}

impl EncryptedKeystore {
    /// Seals `keypair` under `password`.
    pub fn seal(keypair: &ServiceKeypair, password: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = cipher_for(password, &salt)?;
        let secret = keypair.export_base58();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
            .map_err(|_| KeystoreError::Encryption)?;

        let mut combined = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(Self {
            address: keypair.public_key(),
            keydata: STANDARD.encode(&combined),
            version: KEYSTORE_VERSION,
        })
    }

    /// Decrypts the keypair and checks it against the recorded address.
    pub fn unseal(&self, password: &str) -> Result<ServiceKeypair> {
        if self.version != KEYSTORE_VERSION {
            return Err(KeystoreError::Format(format!(
                "unsupported keystore version {}",
                self.version
            )));
        }

        let combined = STANDARD
            .decode(self.keydata.trim())
            .map_err(|e| KeystoreError::Format(format!("invalid keydata encoding: {e}")))?;
        if combined.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(KeystoreError::Format("keydata too short".to_string()));
        }

        let (salt, rest) = combined.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let cipher = cipher_for(password, salt)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| KeystoreError::Decryption)?,
        );
        let secret = std::str::from_utf8(&plaintext)
            .map_err(|_| KeystoreError::Format("secret is not valid UTF-8".to_string()))?;

        let keypair = ServiceKeypair::from_base58(secret)?;
        let actual = keypair.public_key();
        if actual != self.address {
            return Err(KeystoreError::AddressMismatch {
                expected: self.address.clone(),
                actual,
            });
        }
        Ok(keypair)
    }
}

fn cipher_for(password: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeystoreError::KeyDerivation(e.to_string()))?;
    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| KeystoreError::KeyDerivation(e.to_string()))
}

/// Generates a new keypair and writes it to `dir/routerkey.json`.
///
/// Refuses to overwrite an existing keystore. On Unix the directory is
/// created `0700` and the file `0600`.
pub fn generate_keystore(dir: &Path, password: &str) -> Result<(ServiceKeypair, EncryptedKeystore)> {
    let path = dir.join(KEYSTORE_FILE_NAME);
    if path.exists() {
        return Err(KeystoreError::AlreadyExists(path));
    }

    create_private_dir(dir)?;

    let keypair = ServiceKeypair::generate();
    let keystore = EncryptedKeystore::seal(&keypair, password)?;
    let document = serde_json::to_vec_pretty(&keystore)?;
    write_private_file(&path, &document)?;

    tracing::info!(address = %keystore.address, path = %path.display(), "keystore generated");
    Ok((keypair, keystore))
}

/// Loads and unlocks the keystore at `path`.
///
/// `path` may be the keystore file itself or the directory containing it.
pub fn load_keypair(path: &Path, password: &str) -> Result<ServiceKeypair> {
    let path = if path.is_dir() {
        path.join(KEYSTORE_FILE_NAME)
    } else {
        path.to_path_buf()
    };

    let contents = fs::read(&path)?;
    let keystore: EncryptedKeystore = serde_json::from_slice(&contents)?;
    let keypair = keystore.unseal(password)?;

    tracing::info!(address = %keystore.address, "keystore unlocked");
    Ok(keypair)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let keypair = ServiceKeypair::generate();
        let sealed = EncryptedKeystore::seal(&keypair, "hunter2").unwrap();
        assert_eq!(sealed.address, keypair.public_key());
        assert_eq!(sealed.version, KEYSTORE_VERSION);

        let opened = sealed.unseal("hunter2").unwrap();
        assert_eq!(opened.public_key(), keypair.public_key());
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = EncryptedKeystore::seal(&ServiceKeypair::generate(), "right").unwrap();
        assert!(matches!(
            sealed.unseal("wrong"),
            Err(KeystoreError::Decryption)
        ));
    }

    #[test]
    fn test_address_mismatch_detected() {
        let mut sealed = EncryptedKeystore::seal(&ServiceKeypair::generate(), "pw").unwrap();
        sealed.address = ServiceKeypair::generate().public_key();
        assert!(matches!(
            sealed.unseal("pw"),
            Err(KeystoreError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_keydata_rejected() {
        let mut sealed = EncryptedKeystore::seal(&ServiceKeypair::generate(), "pw").unwrap();
        sealed.keydata = STANDARD.encode([0u8; 20]);
        assert!(matches!(sealed.unseal("pw"), Err(KeystoreError::Format(_))));
    }

    #[test]
    fn test_generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("keys");
        let (keypair, _) = generate_keystore(&target, "pw").unwrap();

        let from_dir = load_keypair(&target, "pw").unwrap();
        let from_file = load_keypair(&target.join(KEYSTORE_FILE_NAME), "pw").unwrap();
        assert_eq!(from_dir.public_key(), keypair.public_key());
        assert_eq!(from_file.public_key(), keypair.public_key());
    }

    #[test]
    fn test_generate_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        generate_keystore(dir.path(), "pw").unwrap();
        assert!(matches!(
            generate_keystore(dir.path(), "pw"),
            Err(KeystoreError::AlreadyExists(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("private");
        generate_keystore(&target, "pw").unwrap();

        let dir_mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(target.join(KEYSTORE_FILE_NAME))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
