//! Single encrypted attribute (such as an email address) with a lookup
//! fingerprint. Encrypted with the contextless strategy: no user secret is
//! involved, only the pepper or the KMS master key.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::context::EncryptionContext;
use crate::error::{EncryptionError, Error, Result};

#[derive(Clone)]
pub struct EncryptedAttribute {
    encrypted: String,
    decrypted: Zeroizing<String>,
    fingerprint: String,
}

/// What a record stores for an attribute.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredAttribute {
    pub encrypted: String,
    pub fingerprint: String,
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl EncryptedAttribute {
    pub fn new_from_decrypted(ctx: &EncryptionContext, decrypted: &str) -> Result<Self> {
        let encrypted = STANDARD.encode(ctx.key_maker().encrypt_contextless(decrypted.as_bytes())?);
        Ok(Self::assemble(ctx, encrypted, decrypted.to_string()))
    }

    pub fn from_encrypted(ctx: &EncryptionContext, encrypted: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encrypted)
            .map_err(|_| EncryptionError::InvalidBase64)?;
        let plaintext = ctx.key_maker().decrypt_contextless(&bytes)?;
        let decrypted = String::from_utf8(plaintext.to_vec())
            .map_err(|_| Error::InvalidRecord("attribute is not UTF-8".into()))?;

        Ok(Self::assemble(ctx, encrypted.to_string(), decrypted))
    }

    fn assemble(ctx: &EncryptionContext, encrypted: String, decrypted: String) -> Self {
        let fingerprint = ctx.fingerprinter().fingerprint(&normalize(&decrypted));
        Self {
            encrypted,
            decrypted: Zeroizing::new(decrypted),
            fingerprint,
        }
    }

    /// Fingerprint of `value` as it would be stored, for lookups.
    pub fn fingerprint_of(ctx: &EncryptionContext, value: &str) -> String {
        ctx.fingerprinter().fingerprint(&normalize(value))
    }

    pub fn encrypted(&self) -> &str {
        &self.encrypted
    }

    pub fn decrypted(&self) -> &str {
        &self.decrypted
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether `stored` was fingerprinted with a pepper that has since been rotated.
    pub fn is_stale(&self, ctx: &EncryptionContext, stored_fingerprint: &str) -> bool {
        ctx.fingerprinter()
            .is_stale(&normalize(&self.decrypted), stored_fingerprint)
    }

    pub fn to_stored(&self) -> StoredAttribute {
        StoredAttribute {
            encrypted: self.encrypted.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl std::fmt::Debug for EncryptedAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedAttribute")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionConfig;
    use crate::crypto::KEY_LEN;
    use crate::kms::{KmsClient, LocalKmsClient};
    use std::sync::Arc;

    const PEPPER: &str = "0123456789abcdef0123456789abcdef";
    const OLD_PEPPER: &str = "ffffffffffffffffffffffffffffffff";

    fn ctx(config: EncryptionConfig) -> EncryptionContext {
        EncryptionContext::from_config(config).unwrap()
    }

    #[test]
    fn roundtrip_through_ciphertext() {
        let ctx = ctx(EncryptionConfig::new(PEPPER).unwrap());
        let attr = EncryptedAttribute::new_from_decrypted(&ctx, "User@Example.com").unwrap();

        let loaded = EncryptedAttribute::from_encrypted(&ctx, attr.encrypted()).unwrap();
        assert_eq!(loaded.decrypted(), "User@Example.com");
        assert_eq!(loaded.fingerprint(), attr.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        let ctx = ctx(EncryptionConfig::new(PEPPER).unwrap());
        let attr = EncryptedAttribute::new_from_decrypted(&ctx, " User@Example.com ").unwrap();

        assert_eq!(
            attr.fingerprint(),
            EncryptedAttribute::fingerprint_of(&ctx, "user@example.com")
        );
    }

    #[test]
    fn kms_attribute_is_readable_after_kms_is_disabled() {
        let client: Arc<dyn KmsClient> =
            Arc::new(LocalKmsClient::new().with_key("alias/email", [6u8; KEY_LEN]));
        let kms_ctx = EncryptionContext::new(
            EncryptionConfig::new(PEPPER).unwrap().with_kms("alias/email"),
            Some(client.clone()),
        )
        .unwrap();
        let attr = EncryptedAttribute::new_from_decrypted(&kms_ctx, "a@b.c").unwrap();
        assert!(STANDARD.decode(attr.encrypted()).unwrap().starts_with(b"KMSx"));

        let local_ctx =
            EncryptionContext::new(EncryptionConfig::new(PEPPER).unwrap(), Some(client)).unwrap();
        let loaded = EncryptedAttribute::from_encrypted(&local_ctx, attr.encrypted()).unwrap();
        assert_eq!(loaded.decrypted(), "a@b.c");
    }

    #[test]
    fn stale_after_pepper_rotation() {
        let old_ctx = ctx(EncryptionConfig::new(OLD_PEPPER).unwrap());
        let stored = EncryptedAttribute::new_from_decrypted(&old_ctx, "a@b.c")
            .unwrap()
            .to_stored();

        let rotated = ctx(
            EncryptionConfig::new(PEPPER)
                .unwrap()
                .with_old_password_peppers(vec![OLD_PEPPER.to_string()]),
        );
        let fresh = EncryptedAttribute::new_from_decrypted(&rotated, "a@b.c").unwrap();

        assert!(fresh.is_stale(&rotated, &stored.fingerprint));
        assert!(!fresh.is_stale(&rotated, fresh.fingerprint()));
        assert!(rotated.fingerprinter().verify("a@b.c", &stored.fingerprint));
    }

    #[test]
    fn garbage_ciphertext_is_rejected() {
        let ctx = ctx(EncryptionConfig::new(PEPPER).unwrap());
        assert!(EncryptedAttribute::from_encrypted(&ctx, "!!!").is_err());
        assert!(EncryptedAttribute::from_encrypted(&ctx, "AAAA").is_err());
    }
}
