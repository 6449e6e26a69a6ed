use std::sync::Arc;

use crate::config::EncryptionConfig;
use crate::crypto::ScryptCost;
use crate::error::ConfigurationError;
use crate::fingerprint::Fingerprinter;
use crate::key_maker::EncryptedKeyMaker;
use crate::kms::{KmsClient, LocalKmsClient};

/// Everything the envelope operations need, built once at startup and
/// shared by reference. Holds no mutable state.
#[derive(Debug)]
pub struct EncryptionContext {
    config: EncryptionConfig,
    key_maker: EncryptedKeyMaker,
    fingerprinter: Fingerprinter,
}

impl EncryptionContext {
    pub fn new(
        config: EncryptionConfig,
        kms: Option<Arc<dyn KmsClient>>,
    ) -> Result<Self, ConfigurationError> {
        let key_maker = EncryptedKeyMaker::new(&config, kms)?;
        let fingerprinter = Fingerprinter::new(&config);

        Ok(Self {
            config,
            key_maker,
            fingerprinter,
        })
    }

    /// Uses an in-process KMS when the config carries a local master key.
    pub fn from_config(config: EncryptionConfig) -> Result<Self, ConfigurationError> {
        let kms: Option<Arc<dyn KmsClient>> = match (config.local_kms_key(), config.kms_key_id()) {
            (Some(master), Some(key_id)) => {
                Some(Arc::new(LocalKmsClient::new().with_key(key_id, *master)))
            }
            _ => None,
        };
        Self::new(config, kms)
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    pub fn key_maker(&self) -> &EncryptedKeyMaker {
        &self.key_maker
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Cost applied to newly created records.
    pub fn default_cost(&self) -> &ScryptCost {
        self.config.scrypt_cost()
    }
}
