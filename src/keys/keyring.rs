//! Unwrapping of `encryptedKey` through the OS credential store.
//!
//! Signal Desktop (like every Chromium/Electron app) keeps a random secret in
//! the credential store, derives an AES-128 key from it with PBKDF2-HMAC-SHA1
//! (salt `saltysalt`, one iteration) and encrypts the hex database key with
//! AES-128-CBC under a fixed IV of sixteen spaces. The parameters are the host
//! application's and must stay exactly as they are.

use std::collections::HashMap;

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use secret_service::blocking::SecretService;
use secret_service::EncryptionType;
use sha1::Sha1;
use zeroize::Zeroize;

use super::models::{DatabaseKey, SafeStorageBackend};
use crate::errors::{ArchiveError, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// PBKDF2 salt used by Chromium's OSCrypt on Linux
pub const KEYRING_SALT: &[u8] = b"saltysalt";

/// PBKDF2 iteration count used by Chromium's OSCrypt on Linux
pub const KEYRING_ITERATIONS: u32 = 1;

/// Prefix marking ciphertext encrypted with a keyring-held secret
pub const VERSION_PREFIX: &[u8] = b"v11";

/// Fixed CBC initialisation vector (sixteen ASCII spaces)
const CBC_IV: [u8; 16] = [b' '; 16];

/// Default libsecret `application` attribute Signal stores its secret under
pub const DEFAULT_APPLICATION: &str = "Signal";

/// Attribute name libsecret tags OSCrypt items with
const APPLICATION_ATTRIBUTE: &str = "application";

/// Source of the wrapping secret for a given backend
pub trait CredentialStore: Send + Sync {
    /// Look up the secret. Implementations return the raw secret string.
    fn lookup(&self, backend: SafeStorageBackend) -> Result<String>;
}

/// Reads the secret from the Secret Service (GNOME keyring, KWallet's
/// Secret Service bridge, ...) over D-Bus
#[derive(Debug, Clone)]
pub struct LibsecretStore {
    /// Value of the `application` attribute on the stored item
    pub application: String,
}

impl Default for LibsecretStore {
    fn default() -> Self {
        Self {
            application: DEFAULT_APPLICATION.to_string(),
        }
    }
}

impl LibsecretStore {
    fn search_attributes(&self) -> HashMap<&str, &str> {
        HashMap::from([(APPLICATION_ATTRIBUTE, self.application.as_str())])
    }
}

fn store_unavailable(e: secret_service::Error) -> ArchiveError {
    ArchiveError::CredentialStoreUnavailable(e.to_string())
}

/// Decode a stored secret, dropping the trailing newline some tools add
fn secret_from_bytes(mut bytes: Vec<u8>) -> Result<String> {
    let secret = match std::str::from_utf8(&bytes) {
        Ok(text) => Ok(text.trim_end_matches(['\r', '\n']).to_string()),
        Err(_) => Err(ArchiveError::CredentialStoreUnavailable(
            "secret is not valid UTF-8".to_string(),
        )),
    };
    bytes.zeroize();
    secret
}

impl CredentialStore for LibsecretStore {
    fn lookup(&self, backend: SafeStorageBackend) -> Result<String> {
        log::info!(
            "Looking up '{}' secret in the Secret Service ({})",
            self.application,
            backend.as_str()
        );

        let service = SecretService::connect(EncryptionType::Dh).map_err(store_unavailable)?;
        let found = service
            .search_items(self.search_attributes())
            .map_err(store_unavailable)?;

        let item = match found.unlocked.into_iter().next() {
            Some(item) => item,
            None => {
                let item = found.locked.into_iter().next().ok_or_else(|| {
                    ArchiveError::CredentialStoreUnavailable(format!(
                        "no secret stored for application '{}'",
                        self.application
                    ))
                })?;
                item.unlock().map_err(store_unavailable)?;
                item
            }
        };

        secret_from_bytes(item.get_secret().map_err(store_unavailable)?)
    }
}

/// A secret obtained out-of-band (e.g. copied from the Signal host)
#[derive(Clone)]
pub struct StaticCredentialStore {
    secret: String,
}

impl StaticCredentialStore {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl CredentialStore for StaticCredentialStore {
    fn lookup(&self, _backend: SafeStorageBackend) -> Result<String> {
        Ok(self.secret.clone())
    }
}

impl Drop for StaticCredentialStore {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Derive the 16-byte AES key from the keyring secret.
///
/// The secret is used as-is (its UTF-8 bytes), never base64-decoded.
pub fn derive_wrapping_key(secret: &str) -> [u8; 16] {
    let mut key = [0u8; 16];
    pbkdf2::pbkdf2_hmac::<Sha1>(secret.as_bytes(), KEYRING_SALT, KEYRING_ITERATIONS, &mut key);
    key
}

/// Decrypt the hex-encoded `encryptedKey` with an already derived AES key
pub fn decrypt_wrapped_key(encrypted_key_hex: &str, wrapping_key: &[u8; 16]) -> Result<DatabaseKey> {
    let blob = hex::decode(encrypted_key_hex.trim())
        .map_err(|e| ArchiveError::KeyUnwrapFailed(format!("encryptedKey is not hex: {}", e)))?;

    let ciphertext = blob
        .strip_prefix(VERSION_PREFIX)
        .ok_or(ArchiveError::MissingVersionPrefix)?;

    let cipher = Aes128CbcDec::new_from_slices(wrapping_key, &CBC_IV)
        .map_err(|e| ArchiveError::KeyUnwrapFailed(e.to_string()))?;

    let mut plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ArchiveError::KeyUnwrapFailed("invalid padding (wrong secret?)".to_string()))?;

    let decoded = std::str::from_utf8(&plaintext)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(hex::decode);
    plaintext.zeroize();

    match decoded {
        Some(Ok(key)) => DatabaseKey::new(key),
        _ => Err(ArchiveError::KeyUnwrapFailed(
            "decrypted key is not a hex string".to_string(),
        )),
    }
}

/// Full unwrap: fetch the secret, derive the AES key, decrypt `encryptedKey`
pub fn unwrap_encrypted_key(
    encrypted_key_hex: &str,
    backend: &str,
    store: &dyn CredentialStore,
) -> Result<DatabaseKey> {
    let backend = SafeStorageBackend::parse(backend)?;

    let mut secret = store.lookup(backend)?;
    if secret.is_empty() {
        return Err(ArchiveError::EmptyCredential);
    }

    let mut wrapping_key = derive_wrapping_key(&secret);
    secret.zeroize();

    let result = decrypt_wrapped_key(encrypted_key_hex, &wrapping_key);
    wrapping_key.zeroize();

    if result.is_ok() {
        log::info!("Unwrapped database key using {} secret", backend.as_str());
    }
    result
}
