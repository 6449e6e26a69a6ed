use serde::{Deserialize, Serialize};

use crate::context::EncryptionContext;
use crate::error::Result;
use crate::slot::{KeySlot, Mismatch, Verification};

/// Key slots stored on a user record.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct UserKeys {
    password: Option<KeySlot>,
    personal_key: Option<KeySlot>,
}

impl UserKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the password slot.
    pub fn set_password(&mut self, ctx: &EncryptionContext, password: &str) -> Result<()> {
        let (slot, _) = KeySlot::create(ctx, password)?;
        self.set_password_slot(slot);
        Ok(())
    }

    pub fn verify_password(&self, ctx: &EncryptionContext, password: &str) -> Result<Verification> {
        match &self.password {
            Some(slot) => slot.verify(ctx, password),
            None => Ok(Verification::Mismatch(Mismatch::Missing)),
        }
    }

    pub fn password_slot(&self) -> Option<&KeySlot> {
        self.password.as_ref()
    }

    pub fn personal_key_slot(&self) -> Option<&KeySlot> {
        self.personal_key.as_ref()
    }

    pub(crate) fn set_password_slot(&mut self, slot: KeySlot) {
        self.password = Some(slot);
    }

    pub(crate) fn set_personal_key_slot(&mut self, slot: KeySlot) {
        self.personal_key = Some(slot);
    }
}
