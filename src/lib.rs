//! Envelope encryption for personally identifiable information.
//!
//! Each secret (a password or a personal key) is stretched with scrypt into
//! a user access key. The access key protects a random content key, which is
//! wrapped either locally with a server pepper or by a KMS, and the content
//! key seals the PII itself.

pub mod access_key;
pub mod attribute;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod fingerprint;
pub mod key_maker;
pub mod kms;
pub mod personal_key;
pub mod pii;
pub mod profile;
pub mod slot;
mod storage;
pub mod user;
pub mod wrapper;

pub use crate::access_key::{BuiltKey, Cek, MadeKey, UnlockedKey};
pub use crate::attribute::{EncryptedAttribute, StoredAttribute};
pub use crate::config::EncryptionConfig;
pub use crate::context::EncryptionContext;
pub use crate::crypto::ScryptCost;
pub use crate::error::{ConfigurationError, DecryptionError, EncryptionError, Error};
pub use crate::key_maker::EncryptedKeyMaker;
pub use crate::personal_key::{PersonalKey, PersonalKeyGenerator};
pub use crate::pii::{Pii, PiiCiphertext, PiiEncryptor};
pub use crate::profile::{ActiveProfileEncryptor, Profile, ProfileEncryptor};
pub use crate::slot::{KeySlot, Mismatch, Verification};
pub use crate::storage::Storage;
pub use crate::user::UserKeys;
pub use crate::wrapper::Strategy;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record layout version written by this build.
pub const RECORD_VERSION: u32 = 1;

/// On-disk stand-in for the user and profile rows.
#[derive(Serialize, Deserialize, Debug)]
struct VaultRecord {
    version: u32,
    created_at: String,
    user: UserKeys,
    profile: Profile,
    email: Option<StoredAttribute>,
}

/// A user record persisted as JSON.
pub struct Vault {
    record: VaultRecord,
    storage: Storage,
}

impl Vault {
    /// Create a user with `password`, encrypt `pii` onto their profile and
    /// return the personal key issued for it.
    pub fn init_with_storage(
        ctx: &EncryptionContext,
        storage: Storage,
        password: &str,
        email: Option<&str>,
        pii: &Pii,
    ) -> Result<(Self, PersonalKey)> {
        if storage.exists() {
            bail!("vault already exists at {}", storage.path().display());
        }

        let mut user = UserKeys::new();
        user.set_password(ctx, password)
            .context("failed to create password slot")?;

        let mut profile = Profile::new();
        let personal_key = ProfileEncryptor::new(ctx)
            .encrypt_pii(&mut profile, &mut user, pii, password)
            .context("failed to encrypt PII")?;

        let email = email
            .map(|address| EncryptedAttribute::new_from_decrypted(ctx, address))
            .transpose()
            .context("failed to encrypt email")?
            .map(|attr| attr.to_stored());

        let vault = Self {
            record: VaultRecord {
                version: RECORD_VERSION,
                created_at: Utc::now().to_rfc3339(),
                user,
                profile,
                email,
            },
            storage,
        };
        vault.save()?;

        Ok((vault, personal_key))
    }

    pub fn open_with_storage(storage: Storage) -> Result<Self> {
        if !storage.exists() {
            bail!("vault does not exist at {}", storage.path().display());
        }

        let record: VaultRecord = storage.load_record()?;
        if record.version != RECORD_VERSION {
            bail!("unsupported vault version {}", record.version);
        }

        Ok(Self { record, storage })
    }

    pub fn save(&self) -> Result<()> {
        self.storage.save_record(&self.record)
    }

    pub fn user(&self) -> &UserKeys {
        &self.record.user
    }

    pub fn profile(&self) -> &Profile {
        &self.record.profile
    }

    /// Both rows, for operations that update them together.
    pub fn parts_mut(&mut self) -> (&mut Profile, &mut UserKeys) {
        (&mut self.record.profile, &mut self.record.user)
    }

    pub fn email(&self, ctx: &EncryptionContext) -> Result<Option<EncryptedAttribute>> {
        self.record
            .email
            .as_ref()
            .map(|stored| EncryptedAttribute::from_encrypted(ctx, &stored.encrypted))
            .transpose()
            .context("failed to decrypt email")
    }

    pub fn info(&self, ctx: &EncryptionContext) -> VaultInfo {
        let slot = self.record.user.password_slot();
        VaultInfo {
            path: self.storage.path().display().to_string(),
            version: self.record.version,
            created_at: self.record.created_at.clone(),
            password_cost: slot.map(|s| s.cost_str().to_string()),
            password_created_at: slot.map(|s| s.created_at().to_string()),
            has_personal_key: self.record.user.personal_key_slot().is_some(),
            has_pii: self.record.profile.has_pii(),
            has_recovery: self.record.profile.has_recovery(),
            has_ssn_signature: self.record.profile.ssn_signature().is_some(),
            updated_at: self.record.profile.updated_at().map(str::to_string),
            strategy: ctx.key_maker().strategy(),
            default_cost: ctx.default_cost().to_string(),
        }
    }
}

/// Non-secret summary of a vault.
#[derive(Debug)]
pub struct VaultInfo {
    pub path: String,
    pub version: u32,
    pub created_at: String,
    pub password_cost: Option<String>,
    pub password_created_at: Option<String>,
    pub has_personal_key: bool,
    pub has_pii: bool,
    pub has_recovery: bool,
    pub has_ssn_signature: bool,
    pub updated_at: Option<String>,
    pub strategy: Strategy,
    pub default_cost: String,
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

impl fmt::Display for VaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Path:              {}", self.path)?;
        writeln!(f, "Version:           {}", self.version)?;
        writeln!(f, "Created:           {}", self.created_at)?;
        writeln!(
            f,
            "Password cost:     {}",
            self.password_cost.as_deref().unwrap_or("-")
        )?;
        writeln!(
            f,
            "Password set:      {}",
            self.password_created_at.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "Personal key:      {}", yes_no(self.has_personal_key))?;
        writeln!(f, "PII:               {}", yes_no(self.has_pii))?;
        writeln!(f, "Recovery copy:     {}", yes_no(self.has_recovery))?;
        writeln!(f, "SSN signature:     {}", yes_no(self.has_ssn_signature))?;
        writeln!(
            f,
            "Profile updated:   {}",
            self.updated_at.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "Key wrapping:      {}", self.strategy)?;
        write!(f, "Default cost:      {}", self.default_cost)
    }
}

pub fn default_storage() -> Result<Storage> {
    let project_dirs =
        ProjectDirs::from("", "", "pii-vault").context("could not determine platform directories")?;

    let path = project_dirs.data_dir().join("vault.json");

    Ok(Storage::new(path))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const PASSWORD: &str = "correct horse battery staple";

    fn ctx() -> EncryptionContext {
        let config = EncryptionConfig::new("0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_scrypt_cost("800$8$1$".parse().unwrap());
        EncryptionContext::new(config, None).unwrap()
    }

    fn pii() -> Pii {
        let mut pii = Pii::default();
        pii.first_name = Some("Jane".into());
        pii.ssn = Some("900-12-3456".into());
        pii
    }

    #[test]
    fn init_and_open_roundtrip() {
        let ctx = ctx();
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("vault.json"));

        let (_, key) =
            Vault::init_with_storage(&ctx, storage.clone(), PASSWORD, Some("jane@example.com"), &pii())
                .unwrap();

        let vault = Vault::open_with_storage(storage).unwrap();
        let encryptor = ProfileEncryptor::new(&ctx);
        assert_eq!(encryptor.decrypt_pii(vault.profile(), PASSWORD).unwrap(), pii());
        assert_eq!(encryptor.recover_pii(vault.profile(), key.as_str()).unwrap(), pii());
        assert_eq!(
            vault.email(&ctx).unwrap().unwrap().decrypted(),
            "jane@example.com"
        );
    }

    #[test]
    fn init_fails_if_vault_exists() {
        let ctx = ctx();
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("vault.json"));

        Vault::init_with_storage(&ctx, storage.clone(), PASSWORD, None, &pii()).unwrap();
        assert!(Vault::init_with_storage(&ctx, storage, PASSWORD, None, &pii()).is_err());
    }

    #[test]
    fn open_fails_if_missing_or_corrupt() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("vault.json"));
        assert!(Vault::open_with_storage(storage.clone()).is_err());

        std::fs::write(storage.path(), b"{not json").unwrap();
        assert!(Vault::open_with_storage(storage).is_err());
    }

    #[test]
    fn changes_persist_after_save() {
        let ctx = ctx();
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("vault.json"));
        let (mut vault, _) =
            Vault::init_with_storage(&ctx, storage.clone(), PASSWORD, None, &pii()).unwrap();

        let (profile, user) = vault.parts_mut();
        ActiveProfileEncryptor::new(&ctx)
            .change_password(profile, user, PASSWORD, "new password")
            .unwrap();
        vault.save().unwrap();

        let reopened = Vault::open_with_storage(storage).unwrap();
        assert!(
            reopened
                .user()
                .verify_password(&ctx, "new password")
                .unwrap()
                .is_verified()
        );
        assert!(vault.email(&ctx).unwrap().is_none());
    }

    #[test]
    fn newer_record_version_is_refused() {
        let ctx = ctx();
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("vault.json"));
        Vault::init_with_storage(&ctx, storage.clone(), PASSWORD, None, &pii()).unwrap();

        let mut record: VaultRecord = storage.load_record().unwrap();
        chrono::DateTime::parse_from_rfc3339(&record.created_at).unwrap();
        record.version = RECORD_VERSION + 1;
        storage.save_record(&record).unwrap();

        let err = Vault::open_with_storage(storage).err().unwrap();
        assert!(err.to_string().contains("unsupported vault version"));
    }

    #[test]
    fn info_reports_without_secrets() {
        let ctx = ctx();
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("vault.json"));
        let (vault, _) = Vault::init_with_storage(&ctx, storage, PASSWORD, None, &pii()).unwrap();

        let info = vault.info(&ctx);
        assert_eq!(info.password_cost.as_deref(), Some("800$8$1$"));
        assert!(info.has_personal_key && info.has_pii && info.has_recovery);
        assert_eq!(info.strategy, Strategy::Local);

        let text = info.to_string();
        assert!(text.contains("Key wrapping:      local"));
        assert!(!text.contains("900-12-3456"));
    }
}
