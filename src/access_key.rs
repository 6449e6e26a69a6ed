//! The user access key: a password-derived envelope around a random data key.
//!
//! ```text
//! BuiltKey --wrap--> MadeKey       (fresh random key, new encryption_key)
//!          --unlock-> UnlockedKey  (random key recovered from storage)
//! ```
//!
//! `hash_E = SHA256(Z2 || R)` is the content encryption key and
//! `hash_F = SHA256(hash_E)` is the persisted verification digest.

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{self, DerivedHalves, HALF_LEN, KEY_LEN, ScryptCost};
use crate::error::{ConfigurationError, EncryptionError};
use crate::wrapper::{KeyWrapper, Strategy};

/// Length of the random data key R.
pub const RANDOM_KEY_LEN: usize = 32;
/// Minimum length of a serialized wrapped key.
pub const MIN_WRAPPED_LEN: usize = 32;

/// Content encryption key (`hash_E`).
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct Cek([u8; KEY_LEN]);

impl Cek {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Cek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cek([REDACTED])")
    }
}

/// Output of a successful make or unlock.
struct OpenedKey {
    random_key: Zeroizing<Vec<u8>>,
    cek: Cek,
    digest: String,
}

impl OpenedKey {
    fn new(halves: &DerivedHalves, random_key: Zeroizing<Vec<u8>>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(halves.z2());
        hasher.update(&*random_key);
        let mut cek = Cek([0u8; KEY_LEN]);
        cek.0.copy_from_slice(&hasher.finalize());
        let digest = hex::encode(Sha256::digest(cek.as_bytes()));

        Self {
            random_key,
            cek,
            digest,
        }
    }
}

/// Secret-derived halves bound to a salt and cost; no random key yet.
#[derive(Debug)]
pub struct BuiltKey {
    salt: String,
    cost: ScryptCost,
    halves: DerivedHalves,
}

impl BuiltKey {
    pub fn build(secret: &str, salt: &str, cost: &ScryptCost) -> Result<Self, ConfigurationError> {
        let halves = crypto::derive(secret, salt, cost)?;
        Ok(Self {
            salt: salt.to_string(),
            cost: cost.clone(),
            halves,
        })
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn cost(&self) -> &ScryptCost {
        &self.cost
    }

    /// XOR `data` with Z1 left-padded by ASCII `'0'` to `data.len()`.
    ///
    /// Self-inverse. When `data` is shorter than Z1 only the leading bytes
    /// of Z1 are used. Existing wrapped keys depend on this exact padding.
    pub fn xor(&self, data: &[u8]) -> Vec<u8> {
        let pad = data.len().saturating_sub(HALF_LEN);
        let padded_z1 = std::iter::repeat_n(b'0', pad).chain(self.halves.z1().iter().copied());

        data.iter().zip(padded_z1).map(|(d, z)| d ^ z).collect()
    }

    /// Generate a fresh random key and wrap it.
    pub fn wrap(self, wrapper: &dyn KeyWrapper) -> Result<MadeKey, EncryptionError> {
        let mut random_key = Zeroizing::new(vec![0u8; RANDOM_KEY_LEN]);
        crypto::random_bytes(&mut random_key)?;

        let wrapped = wrapper.wrap(&random_key)?.to_bytes();
        if wrapped.len() < MIN_WRAPPED_LEN {
            return Err(EncryptionError::CiphertextTooShort { len: wrapped.len() });
        }
        let encryption_key = STANDARD.encode(self.xor(&wrapped));
        let opened = OpenedKey::new(&self.halves, random_key);

        Ok(MadeKey {
            built: self,
            opened,
            encryption_key,
            strategy: wrapper.strategy(),
        })
    }

    /// Accept a random key recovered from a stored encryption key.
    pub fn unlock(self, random_key: Zeroizing<Vec<u8>>) -> Result<UnlockedKey, EncryptionError> {
        if random_key.is_empty() {
            return Err(EncryptionError::BlankRandomKey);
        }
        let opened = OpenedKey::new(&self.halves, random_key);
        Ok(UnlockedKey {
            built: self,
            opened,
        })
    }
}

/// A freshly generated envelope, ready to persist.
pub struct MadeKey {
    built: BuiltKey,
    opened: OpenedKey,
    encryption_key: String,
    strategy: Strategy,
}

impl MadeKey {
    /// Base64 of the Z1-masked wrapped key.
    pub fn encryption_key(&self) -> &str {
        &self.encryption_key
    }

    /// `hash_F`, lowercase hex.
    pub fn verification_digest(&self) -> &str {
        &self.opened.digest
    }

    pub fn cek(&self) -> &Cek {
        &self.opened.cek
    }

    pub fn random_key(&self) -> &[u8] {
        &self.opened.random_key
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn salt(&self) -> &str {
        self.built.salt()
    }

    pub fn cost(&self) -> &ScryptCost {
        self.built.cost()
    }
}

impl std::fmt::Debug for MadeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MadeKey")
            .field("salt", &self.built.salt)
            .field("cost", &self.built.cost)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// An envelope opened from storage.
pub struct UnlockedKey {
    built: BuiltKey,
    opened: OpenedKey,
}

impl UnlockedKey {
    /// `hash_F`, lowercase hex.
    pub fn verification_digest(&self) -> &str {
        &self.opened.digest
    }

    pub fn cek(&self) -> &Cek {
        &self.opened.cek
    }

    pub fn random_key(&self) -> &[u8] {
        &self.opened.random_key
    }

    pub fn salt(&self) -> &str {
        self.built.salt()
    }

    pub fn cost(&self) -> &ScryptCost {
        self.built.cost()
    }
}

impl std::fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedKey")
            .field("salt", &self.built.salt)
            .field("cost", &self.built.cost)
            .finish_non_exhaustive()
    }
}
