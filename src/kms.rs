//! Remote key-management capability consumed by the KMS wrapping strategy.

use std::collections::HashMap;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN};

/// Provider failure. Timeouts and outages are retryable; everything else
/// means the request itself can never succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmsError {
    #[error("KMS request timed out")]
    Timeout,

    #[error("KMS unavailable: {0}")]
    Unavailable(String),

    #[error("KMS rejected the ciphertext")]
    InvalidCiphertext,

    #[error("KMS key '{0}' not found")]
    KeyNotFound(String),

    #[error("KMS access denied: {0}")]
    AccessDenied(String),
}

impl KmsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, KmsError::Timeout | KmsError::Unavailable(_))
    }
}

/// Blocking encrypt/decrypt against a master key held by a provider.
///
/// Ciphertext blobs are self-describing: `decrypt` needs no key id.
/// Implementations own their network timeouts and report them as
/// [`KmsError::Timeout`].
pub trait KmsClient: Send + Sync {
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;
    fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}

/// In-process KMS with named 256-bit master keys, for development and tests.
///
/// Blob layout:
/// ```text
/// KEY_ID_LEN (1) | KEY_ID | NONCE (24) | CIPHERTEXT
/// ```
#[derive(Default)]
pub struct LocalKmsClient {
    keys: HashMap<String, Zeroizing<[u8; KEY_LEN]>>,
}

impl LocalKmsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key_id: impl Into<String>, master_key: [u8; KEY_LEN]) -> Self {
        self.keys.insert(key_id.into(), Zeroizing::new(master_key));
        self
    }

    fn key(&self, key_id: &str) -> Result<&[u8; KEY_LEN], KmsError> {
        self.keys
            .get(key_id)
            .map(|k| &**k)
            .ok_or_else(|| KmsError::KeyNotFound(key_id.to_string()))
    }
}

impl std::fmt::Debug for LocalKmsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKmsClient")
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KmsClient for LocalKmsClient {
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let id_len = u8::try_from(key_id.len())
            .map_err(|_| KmsError::KeyNotFound(key_id.to_string()))?;
        let key = self.key(key_id)?;

        let sealed = crypto::seal(key, plaintext)
            .map_err(|e| KmsError::Unavailable(e.to_string()))?;

        let mut blob = Vec::with_capacity(1 + key_id.len() + sealed.len());
        blob.push(id_len);
        blob.extend_from_slice(key_id.as_bytes());
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let (&id_len, rest) = ciphertext_blob
            .split_first()
            .ok_or(KmsError::InvalidCiphertext)?;
        let id_len = usize::from(id_len);
        if rest.len() < id_len {
            return Err(KmsError::InvalidCiphertext);
        }

        let (key_id, sealed) = rest.split_at(id_len);
        let key_id = std::str::from_utf8(key_id).map_err(|_| KmsError::InvalidCiphertext)?;
        let key = self.key(key_id)?;

        crypto::open(key, sealed).map_err(|_| KmsError::InvalidCiphertext)
    }
}
