//! Persisted key slot: the fields a user or profile row stores per secret.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::access_key::{BuiltKey, MadeKey, UnlockedKey};
use crate::context::EncryptionContext;
use crate::crypto::{self, ScryptCost};
use crate::error::{EncryptionError, Error, Result};

/// Characters in a generated salt.
pub const SALT_LEN: usize = 20;

/// Outcome of checking a secret against a slot.
#[derive(Debug)]
pub enum Verification {
    Verified(UnlockedKey),
    Mismatch(Mismatch),
}

/// Why a secret was rejected. For logs only; users see one generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// No slot to check against.
    Missing,
    /// Input could not be normalized into a candidate secret.
    Malformed,
    /// The secret does not match.
    WrongSecret,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified(_))
    }

    pub fn verified(self) -> Option<UnlockedKey> {
        match self {
            Verification::Verified(key) => Some(key),
            Verification::Mismatch(_) => None,
        }
    }

    pub fn mismatch(&self) -> Option<Mismatch> {
        match self {
            Verification::Verified(_) => None,
            Verification::Mismatch(reason) => Some(*reason),
        }
    }

    /// Turn a mismatch into [`Error::Rejected`].
    pub fn into_verified(self) -> Result<UnlockedKey> {
        match self {
            Verification::Verified(key) => Ok(key),
            Verification::Mismatch(reason) => Err(Error::Rejected(reason)),
        }
    }
}

/// 20-character URL-safe random token, avoiding look-alike characters.
pub fn generate_salt() -> std::result::Result<String, EncryptionError> {
    let mut bytes = [0u8; SALT_LEN * 3 / 4];
    crypto::random_bytes(&mut bytes)?;

    Ok(URL_SAFE_NO_PAD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            'l' => 's',
            'I' => 'x',
            'O' => 'y',
            '0' => 'z',
            c => c,
        })
        .collect())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeySlot {
    salt: String,
    cost: String,
    encryption_key: String,
    /// `hash_F`, lowercase hex.
    encrypted_password: String,
    created_at: String,
}

impl KeySlot {
    /// Seal a new slot for `secret` with a fresh salt and the default cost.
    pub fn create(ctx: &EncryptionContext, secret: &str) -> Result<(Self, MadeKey)> {
        let salt = generate_salt()?;
        let built = BuiltKey::build(secret, &salt, ctx.default_cost())?;
        let made = ctx.key_maker().make(built)?;

        let slot = Self {
            salt,
            cost: made.cost().to_string(),
            encryption_key: made.encryption_key().to_string(),
            encrypted_password: made.verification_digest().to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        Ok((slot, made))
    }

    /// Rebuild the envelope from `secret` and compare digests.
    ///
    /// Wrong secrets are a [`Verification::Mismatch`]; only KMS outages and
    /// unreadable records are errors.
    pub fn verify(&self, ctx: &EncryptionContext, secret: &str) -> Result<Verification> {
        let built = BuiltKey::build(secret, &self.salt, &self.cost()?)?;

        let unlocked = match ctx.key_maker().unlock(built, &self.encryption_key) {
            Ok(unlocked) => unlocked,
            Err(e) if e.is_infrastructure() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "unable to unlock key slot");
                return Ok(Verification::Mismatch(Mismatch::WrongSecret));
            }
        };

        let matches = unlocked
            .verification_digest()
            .as_bytes()
            .ct_eq(self.encrypted_password.as_bytes());
        if bool::from(matches) {
            Ok(Verification::Verified(unlocked))
        } else {
            debug!("verification digest mismatch");
            Ok(Verification::Mismatch(Mismatch::WrongSecret))
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn cost(&self) -> Result<ScryptCost> {
        self.cost
            .parse()
            .map_err(|e| Error::InvalidRecord(format!("key slot cost: {e}")))
    }

    /// The cost string exactly as stored.
    pub fn cost_str(&self) -> &str {
        &self.cost
    }

    pub fn encryption_key(&self) -> &str {
        &self.encryption_key
    }

    pub fn verification_digest(&self) -> &str {
        &self.encrypted_password
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }
}
