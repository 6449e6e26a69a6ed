use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{DERIVED_LEN, HALF_LEN, ScryptCost};
use crate::error::ConfigurationError;

/// The two halves of the scrypt output: Z1 masks the wrapped key, Z2 feeds
/// the verification hash.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedHalves {
    z1: [u8; HALF_LEN],
    z2: [u8; HALF_LEN],
}

impl DerivedHalves {
    pub fn z1(&self) -> &[u8; HALF_LEN] {
        &self.z1
    }

    pub fn z2(&self) -> &[u8; HALF_LEN] {
        &self.z2
    }
}

impl std::fmt::Debug for DerivedHalves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedHalves([REDACTED])")
    }
}

/// `cost || hex(SHA256(salt))`, the scrypt cost-string salt.
pub fn cost_tagged_salt(salt: &str, cost: &ScryptCost) -> String {
    format!("{cost}{}", hex::encode(Sha256::digest(salt.as_bytes())))
}

/// Derive Z1/Z2 from a low-entropy secret.
///
/// The work factor comes from the cost prefix of the tagged salt and the
/// scrypt salt is the decoded digest that follows it, so a record created
/// under an older cost keeps deriving the same halves.
pub fn derive(
    secret: &str,
    salt: &str,
    cost: &ScryptCost,
) -> Result<DerivedHalves, ConfigurationError> {
    let tagged = cost_tagged_salt(salt, cost);
    let digest_hex = tagged
        .strip_prefix(cost.as_str())
        .ok_or_else(|| ConfigurationError::InvalidCost {
            cost: cost.to_string(),
            reason: "cost prefix mismatch".into(),
        })?;
    let scrypt_salt = hex::decode(digest_hex).map_err(|e| ConfigurationError::InvalidCost {
        cost: cost.to_string(),
        reason: e.to_string(),
    })?;

    let params = cost.params()?;
    let mut output = [0u8; DERIVED_LEN];
    scrypt::scrypt(secret.as_bytes(), &scrypt_salt, &params, &mut output).map_err(|e| {
        ConfigurationError::InvalidCost {
            cost: cost.to_string(),
            reason: e.to_string(),
        }
    })?;

    let mut halves = DerivedHalves {
        z1: [0u8; HALF_LEN],
        z2: [0u8; HALF_LEN],
    };
    halves.z1.copy_from_slice(&output[..HALF_LEN]);
    halves.z2.copy_from_slice(&output[HALF_LEN..]);
    output.zeroize();

    Ok(halves)
}
