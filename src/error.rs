use thiserror::Error;

use crate::kms::KmsError;
use crate::slot::Mismatch;

/// Invalid or missing process configuration. Never retryable.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid scrypt cost '{cost}': {reason}")]
    InvalidCost { cost: String, reason: String },

    #[error("password pepper is not configured")]
    MissingPepper,

    #[error("password pepper must be at least {min} bytes")]
    WeakPepper { min: usize },

    #[error("KMS is enabled but no {0} is configured")]
    MissingKms(&'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Failure while wrapping or unwrapping key material.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption key is not valid base64")]
    InvalidBase64,

    #[error("wrapped key is {len} bytes; at least 32 are required")]
    CiphertextTooShort { len: usize },

    #[error("random key cannot be blank")]
    BlankRandomKey,

    #[error("KMS operation failed: {0}")]
    Kms(#[from] KmsError),

    #[error("key was wrapped with KMS but no KMS client is configured")]
    KmsNotConfigured,

    #[error("unable to unwrap locally encrypted key")]
    LocalUnwrap,

    #[error("OS random generator unavailable")]
    RandomUnavailable,

    #[error("encryption failed")]
    Cipher,
}

impl EncryptionError {
    /// KMS timeouts and outages; callers retry or surface a server error
    /// instead of reporting a failed verification.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            EncryptionError::Kms(e) => e.is_retryable(),
            EncryptionError::KmsNotConfigured | EncryptionError::RandomUnavailable => true,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EncryptionError::Kms(e) if e.is_retryable())
    }
}

/// Ciphertext could not be decrypted. Deliberately carries no detail so a
/// wrong key and a corrupted payload look the same.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unable to decrypt data")]
pub struct DecryptionError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// A password or personal key did not verify. The reason is for logs.
    #[error("invalid credentials")]
    Rejected(Mismatch),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
