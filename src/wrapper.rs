//! Wrapping strategies for the random data key.
//!
//! A wrapped key is self-describing: KMS output carries the literal `KMSx`
//! prefix, locally encrypted output never does.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN};
use crate::error::EncryptionError;
use crate::kms::{KmsClient, KmsError};

/// Marker prepended to KMS ciphertext blobs.
pub const KMS_PREFIX: &[u8; 4] = b"KMSx";

/// Fresh nonces tried before giving up on a locally wrapped key.
const MAX_SEAL_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Local,
    Kms,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Local => f.write_str("local"),
            Strategy::Kms => f.write_str("kms"),
        }
    }
}

/// Wrapped key material, tagged by the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrappedKey {
    /// `nonce || ciphertext` under the pepper key.
    Local(Vec<u8>),
    /// Provider ciphertext blob, without the prefix.
    Kms(Vec<u8>),
}

impl WrappedKey {
    /// Classify serialized bytes by their prefix.
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes.strip_prefix(KMS_PREFIX.as_slice()) {
            Some(blob) => WrappedKey::Kms(blob.to_vec()),
            None => WrappedKey::Local(bytes.to_vec()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            WrappedKey::Local(_) => Strategy::Local,
            WrappedKey::Kms(_) => Strategy::Kms,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            WrappedKey::Local(bytes) => bytes.clone(),
            WrappedKey::Kms(blob) => {
                let mut out = Vec::with_capacity(KMS_PREFIX.len() + blob.len());
                out.extend_from_slice(KMS_PREFIX);
                out.extend_from_slice(blob);
                out
            }
        }
    }
}

pub trait KeyWrapper: Send + Sync {
    fn strategy(&self) -> Strategy;
    fn wrap(&self, key_material: &[u8]) -> Result<WrappedKey, EncryptionError>;
    fn unwrap(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, EncryptionError>;
}

/// Encrypts key material under a key derived from the password pepper.
pub struct LocalKeyWrapper {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl LocalKeyWrapper {
    pub fn new(pepper: &str) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&Sha256::digest(pepper.as_bytes()));
        Self { key }
    }
}

impl KeyWrapper for LocalKeyWrapper {
    fn strategy(&self) -> Strategy {
        Strategy::Local
    }

    fn wrap(&self, key_material: &[u8]) -> Result<WrappedKey, EncryptionError> {
        seal_without_kms_prefix(|| crypto::seal(&self.key, key_material)).map(WrappedKey::Local)
    }

    fn unwrap(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
        match wrapped {
            WrappedKey::Local(sealed) => {
                crypto::open(&self.key, sealed).map_err(|_| EncryptionError::LocalUnwrap)
            }
            WrappedKey::Kms(_) => Err(EncryptionError::LocalUnwrap),
        }
    }
}

// A nonce that happens to start with the KMS marker would be misrouted on unlock.
fn seal_without_kms_prefix(
    mut seal: impl FnMut() -> Result<Vec<u8>, EncryptionError>,
) -> Result<Vec<u8>, EncryptionError> {
    for _ in 0..MAX_SEAL_ATTEMPTS {
        let sealed = seal()?;
        if !sealed.starts_with(KMS_PREFIX) {
            return Ok(sealed);
        }
    }
    Err(EncryptionError::Cipher)
}

/// Encrypts key material with a remote master key.
pub struct KmsKeyWrapper {
    client: Arc<dyn KmsClient>,
    key_id: String,
    retries: u32,
}

impl KmsKeyWrapper {
    pub fn new(client: Arc<dyn KmsClient>, key_id: impl Into<String>, retries: u32) -> Self {
        Self {
            client,
            key_id: key_id.into(),
            retries,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn with_retries<T>(
        &self,
        op: &'static str,
        mut call: impl FnMut() -> Result<T, KmsError>,
    ) -> Result<T, EncryptionError> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, "retrying KMS request");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl KeyWrapper for KmsKeyWrapper {
    fn strategy(&self) -> Strategy {
        Strategy::Kms
    }

    fn wrap(&self, key_material: &[u8]) -> Result<WrappedKey, EncryptionError> {
        let blob = self.with_retries("encrypt", || {
            self.client.encrypt(&self.key_id, key_material)
        })?;
        debug!(key_id = %self.key_id, "wrapped key with KMS");
        Ok(WrappedKey::Kms(blob))
    }

    fn unwrap(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
        match wrapped {
            WrappedKey::Kms(blob) => self.with_retries("decrypt", || self.client.decrypt(blob)),
            WrappedKey::Local(_) => Err(KmsError::InvalidCiphertext.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::LocalKmsClient;
    use std::sync::atomic::{AtomicU32, Ordering};

    const PEPPER: &str = "0123456789abcdef0123456789abcdef";

    struct FlakyKms {
        failures: AtomicU32,
        inner: LocalKmsClient,
    }

    impl KmsClient for FlakyKms {
        fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(KmsError::Timeout);
            }
            self.inner.encrypt(key_id, plaintext)
        }

        fn decrypt(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, KmsError> {
            self.inner.decrypt(blob)
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyKms> {
        Arc::new(FlakyKms {
            failures: AtomicU32::new(failures),
            inner: LocalKmsClient::new().with_key("k", [5u8; KEY_LEN]),
        })
    }

    #[test]
    fn detect_routes_on_prefix() {
        assert_eq!(
            WrappedKey::detect(b"KMSxblob"),
            WrappedKey::Kms(b"blob".to_vec())
        );
        assert_eq!(
            WrappedKey::detect(b"abcdef.blob"),
            WrappedKey::Local(b"abcdef.blob".to_vec())
        );
        assert_eq!(WrappedKey::detect(b"KMS").strategy(), Strategy::Local);
    }

    #[test]
    fn to_bytes_restores_prefix() {
        let wrapped = WrappedKey::Kms(b"ciphertext".to_vec());
        let bytes = wrapped.to_bytes();
        assert_eq!(&bytes[..4], KMS_PREFIX);
        assert_eq!(WrappedKey::detect(&bytes), wrapped);
    }

    #[test]
    fn local_seal_resamples_a_kms_looking_nonce() {
        let mut calls = 0;
        let sealed = seal_without_kms_prefix(|| {
            calls += 1;
            Ok(if calls == 1 { b"KMSxnonce".to_vec() } else { b"nonce".to_vec() })
        })
        .unwrap();

        assert_eq!(sealed, b"nonce");
        assert_eq!(calls, 2);
    }

    #[test]
    fn local_seal_gives_up_after_bounded_attempts() {
        let mut calls = 0;
        let result = seal_without_kms_prefix(|| {
            calls += 1;
            Ok(b"KMSxnonce".to_vec())
        });

        assert!(matches!(result, Err(EncryptionError::Cipher)));
        assert_eq!(calls, MAX_SEAL_ATTEMPTS);
    }

    #[test]
    fn local_roundtrip() {
        let wrapper = LocalKeyWrapper::new(PEPPER);
        let wrapped = wrapper.wrap(&[4u8; 32]).unwrap();

        assert_eq!(wrapped.strategy(), Strategy::Local);
        assert_eq!(*wrapper.unwrap(&wrapped).unwrap(), vec![4u8; 32]);
    }

    #[test]
    fn local_unwrap_with_other_pepper_fails() {
        let wrapped = LocalKeyWrapper::new(PEPPER).wrap(b"key").unwrap();
        let other = LocalKeyWrapper::new("fedcba9876543210fedcba9876543210");

        assert!(matches!(
            other.unwrap(&wrapped),
            Err(EncryptionError::LocalUnwrap)
        ));
    }

    #[test]
    fn kms_roundtrip() {
        let wrapper = KmsKeyWrapper::new(flaky(0), "k", 0);
        let wrapped = wrapper.wrap(&[8u8; 32]).unwrap();

        assert_eq!(wrapped.strategy(), Strategy::Kms);
        assert!(wrapped.to_bytes().starts_with(KMS_PREFIX));
        assert_eq!(*wrapper.unwrap(&wrapped).unwrap(), vec![8u8; 32]);
    }

    #[test]
    fn kms_timeouts_are_retried() {
        let wrapper = KmsKeyWrapper::new(flaky(2), "k", 2);
        assert!(wrapper.wrap(b"key").is_ok());
    }

    #[test]
    fn kms_timeout_surfaces_after_retries() {
        let wrapper = KmsKeyWrapper::new(flaky(3), "k", 2);
        let err = wrapper.wrap(b"key").unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(err, EncryptionError::Kms(KmsError::Timeout)));
    }
}
