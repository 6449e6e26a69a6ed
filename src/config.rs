//! Process-wide encryption settings, read once at startup and passed by value
//! into [`crate::EncryptionContext`].

use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, ScryptCost};
use crate::error::ConfigurationError;

pub const DEFAULT_SCRYPT_COST: &str = "4000$8$1$";
pub const DEFAULT_KMS_RETRIES: u32 = 2;
pub const DEFAULT_PERSONAL_KEY_WORDS: usize = 4;
pub const MIN_PEPPER_LEN: usize = 32;

pub const ENV_PASSWORD_PEPPER: &str = "PII_VAULT_PASSWORD_PEPPER";
pub const ENV_OLD_PASSWORD_PEPPERS: &str = "PII_VAULT_OLD_PASSWORD_PEPPERS";
pub const ENV_SCRYPT_COST: &str = "PII_VAULT_SCRYPT_COST";
pub const ENV_USE_KMS: &str = "PII_VAULT_USE_KMS";
pub const ENV_KMS_KEY_ID: &str = "PII_VAULT_KMS_KEY_ID";
pub const ENV_KMS_RETRIES: &str = "PII_VAULT_KMS_RETRIES";
pub const ENV_PERSONAL_KEY_WORDS: &str = "PII_VAULT_PERSONAL_KEY_WORDS";
pub const ENV_LOCAL_KMS_KEY: &str = "PII_VAULT_LOCAL_KMS_KEY";

#[derive(Clone)]
pub struct EncryptionConfig {
    password_pepper: Zeroizing<String>,
    old_password_peppers: Vec<Zeroizing<String>>,
    scrypt_cost: ScryptCost,
    use_kms: bool,
    kms_key_id: Option<String>,
    kms_retries: u32,
    personal_key_words: usize,
    local_kms_key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

// Custom Debug implementation to prevent secret leakage
impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("password_pepper", &"[REDACTED]")
            .field("old_password_peppers", &self.old_password_peppers.len())
            .field("scrypt_cost", &self.scrypt_cost.as_str())
            .field("use_kms", &self.use_kms)
            .field("kms_key_id", &self.kms_key_id)
            .field("kms_retries", &self.kms_retries)
            .field("personal_key_words", &self.personal_key_words)
            .field("local_kms_key", &self.local_kms_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn validate_pepper(pepper: &str) -> Result<(), ConfigurationError> {
    if pepper.is_empty() {
        return Err(ConfigurationError::MissingPepper);
    }
    if pepper.len() < MIN_PEPPER_LEN {
        return Err(ConfigurationError::WeakPepper {
            min: MIN_PEPPER_LEN,
        });
    }
    Ok(())
}

impl EncryptionConfig {
    /// Local wrapping with the default cost.
    pub fn new(password_pepper: impl Into<String>) -> Result<Self, ConfigurationError> {
        let password_pepper = Zeroizing::new(password_pepper.into());
        validate_pepper(&password_pepper)?;

        Ok(Self {
            password_pepper,
            old_password_peppers: Vec::new(),
            scrypt_cost: DEFAULT_SCRYPT_COST.parse()?,
            use_kms: false,
            kms_key_id: None,
            kms_retries: DEFAULT_KMS_RETRIES,
            personal_key_words: DEFAULT_PERSONAL_KEY_WORDS,
            local_kms_key: None,
        })
    }

    pub fn with_scrypt_cost(mut self, cost: ScryptCost) -> Self {
        self.scrypt_cost = cost;
        self
    }

    pub fn with_kms(mut self, key_id: impl Into<String>) -> Self {
        self.use_kms = true;
        self.kms_key_id = Some(key_id.into());
        self
    }

    pub fn with_kms_retries(mut self, retries: u32) -> Self {
        self.kms_retries = retries;
        self
    }

    pub fn with_personal_key_words(mut self, words: usize) -> Result<Self, ConfigurationError> {
        if words == 0 {
            return Err(ConfigurationError::InvalidSetting {
                name: ENV_PERSONAL_KEY_WORDS,
                reason: "must be at least 1".into(),
            });
        }
        self.personal_key_words = words;
        Ok(self)
    }

    /// Retired peppers, still accepted when checking fingerprints.
    pub fn with_old_password_peppers(mut self, peppers: Vec<String>) -> Self {
        self.old_password_peppers = peppers.into_iter().map(Zeroizing::new).collect();
        self
    }

    pub fn with_local_kms_key(mut self, key: [u8; KEY_LEN]) -> Self {
        self.local_kms_key = Some(Zeroizing::new(key));
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let pepper = lookup(ENV_PASSWORD_PEPPER).ok_or(ConfigurationError::MissingPepper)?;
        let mut config = Self::new(pepper)?;

        if let Some(cost) = lookup(ENV_SCRYPT_COST) {
            config = config.with_scrypt_cost(cost.trim().parse()?);
        }

        if let Some(old) = lookup(ENV_OLD_PASSWORD_PEPPERS) {
            let peppers = old
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            config = config.with_old_password_peppers(peppers);
        }

        let use_kms = match lookup(ENV_USE_KMS) {
            Some(v) => parse_bool(ENV_USE_KMS, &v)?,
            None => false,
        };
        // A key id without USE_KMS still lets existing KMS records be read.
        match lookup(ENV_KMS_KEY_ID).filter(|id| !id.trim().is_empty()) {
            Some(key_id) if use_kms => config = config.with_kms(key_id),
            Some(key_id) => config.kms_key_id = Some(key_id),
            None if use_kms => return Err(ConfigurationError::MissingKms("key id")),
            None => {}
        }

        if let Some(retries) = lookup(ENV_KMS_RETRIES) {
            let retries: u32 = retries
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigurationError::InvalidSetting {
                    name: ENV_KMS_RETRIES,
                    reason: e.to_string(),
                })?;
            config = config.with_kms_retries(retries);
        }

        if let Some(words) = lookup(ENV_PERSONAL_KEY_WORDS) {
            let words: usize = words
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigurationError::InvalidSetting {
                    name: ENV_PERSONAL_KEY_WORDS,
                    reason: e.to_string(),
                })?;
            config = config.with_personal_key_words(words)?;
        }

        if let Some(hex_key) = lookup(ENV_LOCAL_KMS_KEY) {
            let bytes = Zeroizing::new(hex::decode(hex_key.trim()).map_err(|e| {
                ConfigurationError::InvalidSetting {
                    name: ENV_LOCAL_KMS_KEY,
                    reason: e.to_string(),
                }
            })?);
            let key: [u8; KEY_LEN] =
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ConfigurationError::InvalidSetting {
                        name: ENV_LOCAL_KMS_KEY,
                        reason: format!("must be {KEY_LEN} bytes ({} hex chars)", KEY_LEN * 2),
                    })?;
            config = config.with_local_kms_key(key);
        }

        Ok(config)
    }

    pub fn password_pepper(&self) -> &str {
        &self.password_pepper
    }

    pub fn old_password_peppers(&self) -> impl Iterator<Item = &str> {
        self.old_password_peppers.iter().map(|p| p.as_str())
    }

    pub fn scrypt_cost(&self) -> &ScryptCost {
        &self.scrypt_cost
    }

    pub fn use_kms(&self) -> bool {
        self.use_kms
    }

    pub fn kms_key_id(&self) -> Option<&str> {
        self.kms_key_id.as_deref()
    }

    pub fn kms_retries(&self) -> u32 {
        self.kms_retries
    }

    pub fn personal_key_words(&self) -> usize {
        self.personal_key_words
    }

    pub fn local_kms_key(&self) -> Option<&[u8; KEY_LEN]> {
        self.local_kms_key.as_deref()
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigurationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigurationError::InvalidSetting {
            name,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}
