use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::debug;
use zeroize::Zeroizing;

use crate::access_key::{BuiltKey, MadeKey, UnlockedKey};
use crate::config::EncryptionConfig;
use crate::error::{ConfigurationError, EncryptionError};
use crate::kms::KmsClient;
use crate::wrapper::{KeyWrapper, KmsKeyWrapper, LocalKeyWrapper, Strategy, WrappedKey};

/// Chooses the wrapping strategy for new keys and routes stored keys back
/// to the strategy that produced them.
pub struct EncryptedKeyMaker {
    local: LocalKeyWrapper,
    kms: Option<KmsKeyWrapper>,
    use_kms: bool,
}

impl EncryptedKeyMaker {
    /// A KMS client is required when `use_kms` is set, and optional
    /// otherwise (it is still needed to read KMS-wrapped records).
    pub fn new(
        config: &EncryptionConfig,
        kms: Option<Arc<dyn KmsClient>>,
    ) -> Result<Self, ConfigurationError> {
        let kms = match (kms, config.kms_key_id()) {
            (Some(client), Some(key_id)) => Some(KmsKeyWrapper::new(
                client,
                key_id,
                config.kms_retries(),
            )),
            (Some(_), None) if config.use_kms() => {
                return Err(ConfigurationError::MissingKms("key id"));
            }
            (Some(client), None) => Some(KmsKeyWrapper::new(client, "", config.kms_retries())),
            (None, _) if config.use_kms() => return Err(ConfigurationError::MissingKms("client")),
            (None, _) => None,
        };

        Ok(Self {
            local: LocalKeyWrapper::new(config.password_pepper()),
            kms,
            use_kms: config.use_kms(),
        })
    }

    /// Strategy used for newly wrapped keys.
    pub fn strategy(&self) -> Strategy {
        self.active().strategy()
    }

    fn active(&self) -> &dyn KeyWrapper {
        match &self.kms {
            Some(kms) if self.use_kms => kms,
            _ => &self.local,
        }
    }

    fn unwrap(&self, wrapped: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
        match wrapped.strategy() {
            Strategy::Local => self.local.unwrap(wrapped),
            Strategy::Kms => self
                .kms
                .as_ref()
                .ok_or(EncryptionError::KmsNotConfigured)?
                .unwrap(wrapped),
        }
    }

    /// Generate and wrap a fresh random key for `key`.
    pub fn make(&self, key: BuiltKey) -> Result<MadeKey, EncryptionError> {
        let made = key.wrap(self.active())?;
        debug!(strategy = %made.strategy(), "made encryption key");
        Ok(made)
    }

    /// Recover the random key from a stored `encryption_key`.
    pub fn unlock(&self, key: BuiltKey, encryption_key: &str) -> Result<UnlockedKey, EncryptionError> {
        let masked = STANDARD
            .decode(encryption_key.trim())
            .map_err(|_| EncryptionError::InvalidBase64)?;
        let wrapped = WrappedKey::detect(&key.xor(&masked));
        debug!(strategy = %wrapped.strategy(), "unlocking encryption key");

        let random_key = self.unwrap(&wrapped)?;
        key.unlock(random_key)
    }

    /// Encrypt a value with the active strategy, without a password layer.
    pub fn encrypt_contextless(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(self.active().wrap(plaintext)?.to_bytes())
    }

    /// Reverse of [`Self::encrypt_contextless`], whichever strategy produced it.
    pub fn decrypt_contextless(
        &self,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
        self.unwrap(&WrappedKey::detect(ciphertext))
    }
}

impl std::fmt::Debug for EncryptedKeyMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedKeyMaker")
            .field("strategy", &self.strategy())
            .field("kms_key_id", &self.kms.as_ref().map(|k| k.key_id()))
            .finish()
    }
}
