//! Verified identity attached to a user.
//!
//! The PII bundle is stored twice: once sealed under the user's password and
//! once under their personal key, so a forgotten password does not lose it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::EncryptionContext;
use crate::error::{DecryptionError, Error, Result};
use crate::personal_key::{PersonalKey, PersonalKeyGenerator};
use crate::pii::{Pii, PiiCiphertext};
use crate::slot::KeySlot;
use crate::user::UserKeys;

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Profile {
    encrypted_pii: Option<String>,
    encrypted_pii_recovery: Option<String>,
    /// Fingerprint of the SSN, for duplicate detection.
    ssn_signature: Option<String>,
    /// RFC 3339, UTC.
    updated_at: Option<String>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pii(&self) -> bool {
        self.encrypted_pii.is_some()
    }

    pub fn has_recovery(&self) -> bool {
        self.encrypted_pii_recovery.is_some()
    }

    pub fn ssn_signature(&self) -> Option<&str> {
        self.ssn_signature.as_deref()
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now().to_rfc3339());
    }
}

fn open_pii(ctx: &EncryptionContext, sealed: Option<&str>, secret: &str) -> Result<Pii> {
    let sealed = sealed.ok_or_else(|| Error::InvalidRecord("profile has no encrypted PII".into()))?;
    let plaintext = PiiCiphertext::from_json(sealed)?.open(ctx, secret)?;
    Pii::from_json(&plaintext)
}

fn seal_pii(ctx: &EncryptionContext, pii: &Pii, secret: &str) -> Result<String> {
    PiiCiphertext::seal(ctx, secret, &pii.to_json()?)?.to_json()
}

/// A personal key with its slot and the recovery copy sealed under it.
/// Nothing is written until [`Recovery::commit`].
struct Recovery {
    key: PersonalKey,
    slot: KeySlot,
    sealed: String,
}

impl Recovery {
    fn prepare(ctx: &EncryptionContext, pii: &Pii) -> Result<Self> {
        let (key, slot) = PersonalKeyGenerator::new(ctx).issue()?;
        let sealed = seal_pii(ctx, pii, key.as_str())?;
        Ok(Self { key, slot, sealed })
    }

    fn commit(self, profile: &mut Profile, user: &mut UserKeys) -> PersonalKey {
        user.set_personal_key_slot(self.slot);
        profile.encrypted_pii_recovery = Some(self.sealed);
        profile.touch();
        self.key
    }
}

/// Profile updates seal every new value before touching the records, so a
/// failed call (a KMS timeout, say) leaves `profile` and `user` unchanged.
pub struct ProfileEncryptor<'a> {
    ctx: &'a EncryptionContext,
}

impl<'a> ProfileEncryptor<'a> {
    pub fn new(ctx: &'a EncryptionContext) -> Self {
        Self { ctx }
    }

    /// Store `pii` on the profile and issue a new personal key for recovery.
    ///
    /// The password must verify against the user's password slot.
    pub fn encrypt_pii(
        &self,
        profile: &mut Profile,
        user: &mut UserKeys,
        pii: &Pii,
        password: &str,
    ) -> Result<PersonalKey> {
        user.verify_password(self.ctx, password)?.into_verified()?;

        let sealed = seal_pii(self.ctx, pii, password)?;
        let recovery = Recovery::prepare(self.ctx, pii)?;

        profile.encrypted_pii = Some(sealed);
        profile.ssn_signature = pii
            .ssn
            .as_deref()
            .map(|ssn| self.ctx.fingerprinter().fingerprint(ssn));
        let personal_key = recovery.commit(profile, user);

        info!("profile PII encrypted");
        Ok(personal_key)
    }

    pub fn decrypt_pii(&self, profile: &Profile, password: &str) -> Result<Pii> {
        open_pii(self.ctx, profile.encrypted_pii.as_deref(), password)
    }

    /// Open the recovery copy. Malformed keys fail the same way wrong ones do.
    pub fn recover_pii(&self, profile: &Profile, personal_key: &str) -> Result<Pii> {
        let Some(normalized) = PersonalKeyGenerator::new(self.ctx).normalize(personal_key) else {
            debug!("personal key failed normalization");
            return Err(DecryptionError.into());
        };
        open_pii(self.ctx, profile.encrypted_pii_recovery.as_deref(), &normalized)
    }

    /// Replace the personal key, resealing the recovery copy under it.
    pub fn regenerate_personal_key(
        &self,
        profile: &mut Profile,
        user: &mut UserKeys,
        password: &str,
    ) -> Result<PersonalKey> {
        user.verify_password(self.ctx, password)?.into_verified()?;
        let pii = self.decrypt_pii(profile, password)?;

        let personal_key = Recovery::prepare(self.ctx, &pii)?.commit(profile, user);
        info!("personal key regenerated");
        Ok(personal_key)
    }

    /// Reactivate a profile after a password reset.
    ///
    /// The personal key proves ownership and unlocks the recovery copy. Once
    /// used it is replaced, so a new personal key is returned.
    pub fn reset_password_with_personal_key(
        &self,
        profile: &mut Profile,
        user: &mut UserKeys,
        personal_key: &str,
        new_password: &str,
    ) -> Result<PersonalKey> {
        PersonalKeyGenerator::new(self.ctx)
            .verify(user, personal_key)?
            .into_verified()?;
        let pii = self.recover_pii(profile, personal_key)?;

        let (password_slot, _) = KeySlot::create(self.ctx, new_password)?;
        let sealed = seal_pii(self.ctx, &pii, new_password)?;
        let recovery = Recovery::prepare(self.ctx, &pii)?;

        user.set_password_slot(password_slot);
        profile.encrypted_pii = Some(sealed);
        let personal_key = recovery.commit(profile, user);

        info!("profile reactivated with personal key");
        Ok(personal_key)
    }
}

/// Operations on a profile the user has already unlocked with their password.
pub struct ActiveProfileEncryptor<'a> {
    ctx: &'a EncryptionContext,
}

impl<'a> ActiveProfileEncryptor<'a> {
    pub fn new(ctx: &'a EncryptionContext) -> Self {
        Self { ctx }
    }

    /// Reseal the password copy under `new_password` and replace the
    /// password slot. The recovery copy is left alone.
    pub fn change_password(
        &self,
        profile: &mut Profile,
        user: &mut UserKeys,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        user.verify_password(self.ctx, old_password)?.into_verified()?;

        let sealed = if profile.has_pii() {
            let pii = open_pii(self.ctx, profile.encrypted_pii.as_deref(), old_password)?;
            Some(seal_pii(self.ctx, &pii, new_password)?)
        } else {
            None
        };
        let (password_slot, _) = KeySlot::create(self.ctx, new_password)?;

        if let Some(sealed) = sealed {
            profile.encrypted_pii = Some(sealed);
            profile.touch();
        }
        user.set_password_slot(password_slot);

        info!("password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionConfig;
    use crate::crypto::KEY_LEN;
    use crate::kms::{KmsClient, KmsError, LocalKmsClient};
    use crate::slot::Mismatch;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use zeroize::Zeroizing;

    const PASSWORD: &str = "correct horse battery staple";

    fn ctx() -> EncryptionContext {
        let config = EncryptionConfig::new("0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_scrypt_cost("800$8$1$".parse().unwrap());
        EncryptionContext::new(config, None).unwrap()
    }

    fn jane() -> Pii {
        let mut pii = Pii::default();
        pii.first_name = Some("Jane".into());
        pii.last_name = Some("Doe".into());
        pii.ssn = Some("900-12-3456".into());
        pii
    }

    fn enrolled(ctx: &EncryptionContext) -> (Profile, UserKeys, PersonalKey) {
        let mut user = UserKeys::new();
        user.set_password(ctx, PASSWORD).unwrap();
        let mut profile = Profile::new();
        let key = ProfileEncryptor::new(ctx)
            .encrypt_pii(&mut profile, &mut user, &jane(), PASSWORD)
            .unwrap();
        (profile, user, key)
    }

    #[test]
    fn encrypt_then_decrypt_and_recover() {
        let ctx = ctx();
        let (profile, user, key) = enrolled(&ctx);
        let encryptor = ProfileEncryptor::new(&ctx);

        assert_eq!(encryptor.decrypt_pii(&profile, PASSWORD).unwrap(), jane());
        assert_eq!(encryptor.recover_pii(&profile, key.as_str()).unwrap(), jane());
        assert_eq!(
            encryptor
                .recover_pii(&profile, &key.as_str().to_lowercase())
                .unwrap(),
            jane()
        );
        assert!(user.personal_key_slot().is_some());
        assert!(profile.updated_at().is_some());
    }

    #[test]
    fn ssn_signature_is_a_fingerprint() {
        let ctx = ctx();
        let (profile, _, _) = enrolled(&ctx);

        let signature = profile.ssn_signature().unwrap();
        assert!(ctx.fingerprinter().verify("900-12-3456", signature));
        assert!(!signature.contains("3456"));
    }

    #[test]
    fn encrypt_requires_the_users_password() {
        let ctx = ctx();
        let mut user = UserKeys::new();
        user.set_password(&ctx, PASSWORD).unwrap();
        let mut profile = Profile::new();

        let result =
            ProfileEncryptor::new(&ctx).encrypt_pii(&mut profile, &mut user, &jane(), "nope");
        assert!(matches!(result, Err(Error::Rejected(Mismatch::WrongSecret))));
        assert!(!profile.has_pii());
    }

    #[test]
    fn wrong_secrets_do_not_decrypt() {
        let ctx = ctx();
        let (profile, _, _) = enrolled(&ctx);
        let encryptor = ProfileEncryptor::new(&ctx);

        assert!(matches!(
            encryptor.decrypt_pii(&profile, "wrong"),
            Err(Error::Decryption(_))
        ));
        assert!(matches!(
            encryptor.recover_pii(&profile, "0000-0000-0000-0000"),
            Err(Error::Decryption(_))
        ));
        assert!(matches!(
            encryptor.recover_pii(&profile, "not a key"),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn change_password_keeps_recovery() {
        let ctx = ctx();
        let (mut profile, mut user, key) = enrolled(&ctx);
        let recovery_before = profile.encrypted_pii_recovery.clone();

        ActiveProfileEncryptor::new(&ctx)
            .change_password(&mut profile, &mut user, PASSWORD, "new password")
            .unwrap();

        let encryptor = ProfileEncryptor::new(&ctx);
        assert_eq!(encryptor.decrypt_pii(&profile, "new password").unwrap(), jane());
        assert!(encryptor.decrypt_pii(&profile, PASSWORD).is_err());
        assert_eq!(profile.encrypted_pii_recovery, recovery_before);
        assert_eq!(encryptor.recover_pii(&profile, key.as_str()).unwrap(), jane());
        assert!(user.verify_password(&ctx, "new password").unwrap().is_verified());
    }

    #[test]
    fn change_password_rejects_wrong_old_password() {
        let ctx = ctx();
        let (mut profile, mut user, _) = enrolled(&ctx);

        let result = ActiveProfileEncryptor::new(&ctx).change_password(
            &mut profile,
            &mut user,
            "wrong",
            "new password",
        );
        assert!(matches!(result, Err(Error::Rejected(_))));
        assert!(user.verify_password(&ctx, PASSWORD).unwrap().is_verified());
    }

    #[test]
    fn regenerate_replaces_the_personal_key() {
        let ctx = ctx();
        let (mut profile, mut user, old_key) = enrolled(&ctx);
        let encryptor = ProfileEncryptor::new(&ctx);

        let new_key = encryptor
            .regenerate_personal_key(&mut profile, &mut user, PASSWORD)
            .unwrap();

        assert_ne!(new_key, old_key);
        assert_eq!(encryptor.recover_pii(&profile, new_key.as_str()).unwrap(), jane());
        assert!(encryptor.recover_pii(&profile, old_key.as_str()).is_err());
        assert!(
            !PersonalKeyGenerator::new(&ctx)
                .verify(&user, old_key.as_str())
                .unwrap()
                .is_verified()
        );
    }

    #[test]
    fn reset_password_with_personal_key_reactivates() {
        let ctx = ctx();
        let (mut profile, mut user, key) = enrolled(&ctx);
        let encryptor = ProfileEncryptor::new(&ctx);

        let next_key = encryptor
            .reset_password_with_personal_key(&mut profile, &mut user, key.as_str(), "fresh start")
            .unwrap();

        assert!(user.verify_password(&ctx, "fresh start").unwrap().is_verified());
        assert_eq!(encryptor.decrypt_pii(&profile, "fresh start").unwrap(), jane());
        assert_eq!(encryptor.recover_pii(&profile, next_key.as_str()).unwrap(), jane());
        assert!(encryptor.recover_pii(&profile, key.as_str()).is_err());
    }

    #[test]
    fn reset_password_rejects_malformed_personal_key() {
        let ctx = ctx();
        let (mut profile, mut user, _) = enrolled(&ctx);

        let result = ProfileEncryptor::new(&ctx).reset_password_with_personal_key(
            &mut profile,
            &mut user,
            "UUUU",
            "fresh start",
        );
        assert!(matches!(result, Err(Error::Rejected(Mismatch::Malformed))));
        assert!(user.verify_password(&ctx, PASSWORD).unwrap().is_verified());
    }

    #[test]
    fn decrypt_without_pii_is_an_invalid_record() {
        let ctx = ctx();
        assert!(matches!(
            ProfileEncryptor::new(&ctx).decrypt_pii(&Profile::new(), PASSWORD),
            Err(Error::InvalidRecord(_))
        ));
    }

    /// Lets `remaining` encrypt calls through, then times out.
    struct BudgetKms {
        remaining: AtomicU32,
        inner: LocalKmsClient,
    }

    impl BudgetKms {
        fn allow(&self, calls: u32) {
            self.remaining.store(calls, Ordering::SeqCst);
        }
    }

    impl KmsClient for BudgetKms {
        fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> std::result::Result<Vec<u8>, KmsError> {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return Err(KmsError::Timeout);
            }
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            self.inner.encrypt(key_id, plaintext)
        }

        fn decrypt(&self, blob: &[u8]) -> std::result::Result<Zeroizing<Vec<u8>>, KmsError> {
            self.inner.decrypt(blob)
        }
    }

    fn kms_ctx() -> (EncryptionContext, Arc<BudgetKms>) {
        let kms = Arc::new(BudgetKms {
            remaining: AtomicU32::new(u32::MAX),
            inner: LocalKmsClient::new().with_key("alias/pii", [7u8; KEY_LEN]),
        });
        let config = EncryptionConfig::new("0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_scrypt_cost("800$8$1$".parse().unwrap())
            .with_kms("alias/pii")
            .with_kms_retries(0);
        let client: Arc<dyn KmsClient> = kms.clone();
        (EncryptionContext::new(config, Some(client)).unwrap(), kms)
    }

    fn assert_unchanged(ctx: &EncryptionContext, profile: &Profile, user: &UserKeys, key: &PersonalKey) {
        let encryptor = ProfileEncryptor::new(ctx);
        assert!(user.verify_password(ctx, PASSWORD).unwrap().is_verified());
        assert_eq!(encryptor.decrypt_pii(profile, PASSWORD).unwrap(), jane());
        assert!(
            PersonalKeyGenerator::new(ctx)
                .verify(user, key.as_str())
                .unwrap()
                .is_verified()
        );
        assert_eq!(encryptor.recover_pii(profile, key.as_str()).unwrap(), jane());
    }

    #[test]
    fn encrypt_pii_failing_midway_leaves_profile_empty() {
        let (ctx, kms) = kms_ctx();
        let mut user = UserKeys::new();
        user.set_password(&ctx, PASSWORD).unwrap();
        let mut profile = Profile::new();

        for calls in 0..3 {
            kms.allow(calls);
            let result =
                ProfileEncryptor::new(&ctx).encrypt_pii(&mut profile, &mut user, &jane(), PASSWORD);
            assert!(result.is_err(), "succeeded with {calls} encrypt calls");
            assert_eq!(profile, Profile::new());
            assert!(user.personal_key_slot().is_none());
        }
    }

    #[test]
    fn change_password_failing_midway_keeps_old_password() {
        let (ctx, kms) = kms_ctx();
        let (mut profile, mut user, key) = enrolled(&ctx);
        let before = profile.clone();

        for calls in 0..2 {
            kms.allow(calls);
            let result = ActiveProfileEncryptor::new(&ctx).change_password(
                &mut profile,
                &mut user,
                PASSWORD,
                "new password",
            );
            assert!(result.is_err(), "succeeded with {calls} encrypt calls");
            assert_eq!(profile, before);
            assert!(ProfileEncryptor::new(&ctx).decrypt_pii(&profile, "new password").is_err());
            assert_unchanged(&ctx, &profile, &user, &key);
        }
    }

    #[test]
    fn regenerate_failing_midway_keeps_old_personal_key() {
        let (ctx, kms) = kms_ctx();
        let (mut profile, mut user, key) = enrolled(&ctx);
        let before = profile.clone();

        for calls in 0..2 {
            kms.allow(calls);
            let result =
                ProfileEncryptor::new(&ctx).regenerate_personal_key(&mut profile, &mut user, PASSWORD);
            assert!(result.is_err(), "succeeded with {calls} encrypt calls");
            assert_eq!(profile, before);
            assert_unchanged(&ctx, &profile, &user, &key);
        }
    }

    #[test]
    fn reset_failing_midway_keeps_old_password_and_key() {
        let (ctx, kms) = kms_ctx();
        let (mut profile, mut user, key) = enrolled(&ctx);
        let before = profile.clone();

        for calls in 0..4 {
            kms.allow(calls);
            let result = ProfileEncryptor::new(&ctx).reset_password_with_personal_key(
                &mut profile,
                &mut user,
                key.as_str(),
                "fresh start",
            );
            assert!(result.is_err(), "succeeded with {calls} encrypt calls");
            assert_eq!(profile, before);
            assert!(!user.verify_password(&ctx, "fresh start").unwrap().is_verified());
            assert_unchanged(&ctx, &profile, &user, &key);
        }

        kms.allow(4);
        ProfileEncryptor::new(&ctx)
            .reset_password_with_personal_key(&mut profile, &mut user, key.as_str(), "fresh start")
            .unwrap();
        assert!(user.verify_password(&ctx, "fresh start").unwrap().is_verified());
    }

    #[test]
    fn updated_at_is_utc_rfc3339() {
        let ctx = ctx();
        let (profile, _, _) = enrolled(&ctx);

        let stamp = chrono::DateTime::parse_from_rfc3339(profile.updated_at().unwrap()).unwrap();
        assert_eq!(stamp.offset().local_minus_utc(), 0);
    }
}
