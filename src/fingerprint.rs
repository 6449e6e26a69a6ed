//! Keyed fingerprints for looking up encrypted values without decrypting them.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::config::EncryptionConfig;

type HmacSha256 = Hmac<Sha256>;

pub struct Fingerprinter {
    current: Zeroizing<String>,
    retired: Vec<Zeroizing<String>>,
}

impl Fingerprinter {
    pub fn new(config: &EncryptionConfig) -> Self {
        Self {
            current: Zeroizing::new(config.password_pepper().to_string()),
            retired: config
                .old_password_peppers()
                .map(|p| Zeroizing::new(p.to_string()))
                .collect(),
        }
    }

    /// HMAC-SHA256 of `text` under the current pepper, lowercase hex.
    pub fn fingerprint(&self, text: &str) -> String {
        Self::compute(&self.current, text)
    }

    /// Whether `fingerprint` matches `text` under the current or a retired pepper.
    pub fn verify(&self, text: &str, fingerprint: &str) -> bool {
        std::iter::once(&self.current)
            .chain(self.retired.iter())
            .any(|key| {
                let candidate = Self::compute(key, text);
                bool::from(candidate.as_bytes().ct_eq(fingerprint.as_bytes()))
            })
    }

    /// True when `fingerprint` was not produced with the current pepper.
    pub fn is_stale(&self, text: &str, fingerprint: &str) -> bool {
        let current = self.fingerprint(text);
        !bool::from(current.as_bytes().ct_eq(fingerprint.as_bytes()))
    }

    fn compute(key: &str, text: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(text.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("retired_keys", &self.retired.len())
            .finish_non_exhaustive()
    }
}
