//! Encryption of PII payloads under a content encryption key.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::access_key::{BuiltKey, Cek};
use crate::context::EncryptionContext;
use crate::crypto;
use crate::error::{DecryptionError, EncryptionError, Error, Result};
use crate::slot::generate_salt;

pub struct PiiEncryptor;

impl PiiEncryptor {
    /// Base64 of `nonce || ciphertext`.
    pub fn encrypt(plaintext: &[u8], cek: &Cek) -> Result<String, EncryptionError> {
        Ok(STANDARD.encode(crypto::seal(cek.as_bytes(), plaintext)?))
    }

    pub fn decrypt(ciphertext: &str, cek: &Cek) -> Result<Zeroizing<Vec<u8>>, DecryptionError> {
        let sealed = STANDARD.decode(ciphertext).map_err(|_| DecryptionError)?;
        crypto::open(cek.as_bytes(), &sealed)
    }
}

/// A payload sealed under a secret, carrying everything needed to open it
/// again except the secret itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PiiCiphertext {
    encrypted_data: String,
    salt: String,
    cost: String,
    encryption_key: String,
}

impl PiiCiphertext {
    pub fn seal(ctx: &EncryptionContext, secret: &str, plaintext: &[u8]) -> Result<Self> {
        let salt = generate_salt()?;
        let built = BuiltKey::build(secret, &salt, ctx.default_cost())?;
        let made = ctx.key_maker().make(built)?;

        Ok(Self {
            encrypted_data: PiiEncryptor::encrypt(plaintext, made.cek())?,
            salt,
            cost: made.cost().to_string(),
            encryption_key: made.encryption_key().to_string(),
        })
    }

    /// A wrong secret yields [`DecryptionError`]; KMS outages propagate as
    /// encryption errors so callers can retry.
    pub fn open(&self, ctx: &EncryptionContext, secret: &str) -> Result<Zeroizing<Vec<u8>>> {
        let cost = self
            .cost
            .parse()
            .map_err(|e| Error::InvalidRecord(format!("ciphertext cost: {e}")))?;
        let built = BuiltKey::build(secret, &self.salt, &cost)?;

        let unlocked = match ctx.key_maker().unlock(built, &self.encryption_key) {
            Ok(unlocked) => unlocked,
            Err(e) if e.is_infrastructure() => return Err(e.into()),
            Err(_) => return Err(DecryptionError.into()),
        };
        Ok(PiiEncryptor::decrypt(&self.encrypted_data, unlocked.cek())?)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidRecord(format!("ciphertext: {e}")))
    }
}

/// Identity attributes collected during proofing.
#[derive(Serialize, Deserialize, Default, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pii {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub dob: Option<String>,
    pub ssn: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: Option<String>,
}

impl Pii {
    pub fn to_json(&self) -> Result<Zeroizing<Vec<u8>>> {
        serde_json::to_vec(self)
            .map(Zeroizing::new)
            .map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|_| DecryptionError.into())
    }
}

// Custom Debug implementation to prevent PII leakage
impl std::fmt::Debug for Pii {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pii([REDACTED])")
    }
}
