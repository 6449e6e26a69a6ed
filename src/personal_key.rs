//! Recovery phrases made of Crockford Base32 words.
//!
//! A personal key such as `7RZK-3M1Q-B8WD-XPHN` is shown to the user once.
//! Input is normalized before use: separators and punctuation are dropped,
//! case is ignored and the look-alikes `O`, `I` and `L` read as `0`, `1`, `1`.

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::context::EncryptionContext;
use crate::crypto;
use crate::error::Result;
use crate::slot::{KeySlot, Mismatch, Verification};
use crate::user::UserKeys;

/// Crockford Base32 symbols.
pub const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
/// Symbols per word.
pub const WORD_LENGTH: usize = 4;
pub const SEPARATOR: char = '-';

/// A raw personal key. Zeroized on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct PersonalKey(Zeroizing<String>);

impl PersonalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PersonalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PersonalKey([REDACTED])")
    }
}

impl std::fmt::Display for PersonalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn decode_symbol(c: char) -> Option<char> {
    let c = match c.to_ascii_uppercase() {
        'O' => '0',
        'I' | 'L' => '1',
        c => c,
    };
    (c.is_ascii() && ALPHABET.contains(&(c as u8))).then_some(c)
}

/// Canonical form of a candidate phrase, or `None` if it cannot be one.
pub fn normalize(candidate: &str, words: usize) -> Option<Zeroizing<String>> {
    let symbols: Zeroizing<Vec<char>> = Zeroizing::new(
        candidate
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .map(decode_symbol)
            .collect::<Option<Vec<char>>>()?,
    );
    if symbols.len() != words * WORD_LENGTH {
        return None;
    }

    let mut out = Zeroizing::new(String::with_capacity(words * (WORD_LENGTH + 1)));
    for (i, word) in symbols.chunks(WORD_LENGTH).enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.extend(word.iter());
    }
    Some(out)
}

pub struct PersonalKeyGenerator<'a> {
    ctx: &'a EncryptionContext,
}

impl<'a> PersonalKeyGenerator<'a> {
    pub fn new(ctx: &'a EncryptionContext) -> Self {
        Self { ctx }
    }

    fn words(&self) -> usize {
        self.ctx.config().personal_key_words()
    }

    /// Random phrase; each symbol is uniform because the alphabet has 32 entries.
    pub fn generate(&self) -> Result<PersonalKey> {
        let words = self.words();
        let mut bytes = Zeroizing::new(vec![0u8; words * WORD_LENGTH]);
        crypto::random_bytes(&mut bytes)?;

        let mut phrase = Zeroizing::new(String::with_capacity(words * (WORD_LENGTH + 1)));
        for (i, chunk) in bytes.chunks(WORD_LENGTH).enumerate() {
            if i > 0 {
                phrase.push(SEPARATOR);
            }
            phrase.extend(chunk.iter().map(|b| ALPHABET[usize::from(b & 0x1f)] as char));
        }
        Ok(PersonalKey(phrase))
    }

    /// Replace the user's personal key. The returned phrase cannot be
    /// recovered later.
    pub fn create(&self, user: &mut UserKeys) -> Result<PersonalKey> {
        let (key, slot) = self.issue()?;
        user.set_personal_key_slot(slot);
        info!("personal key created");
        Ok(key)
    }

    /// A new phrase and its sealed slot, not yet attached to any user.
    pub(crate) fn issue(&self) -> Result<(PersonalKey, KeySlot)> {
        let key = self.generate()?;
        let (slot, _) = KeySlot::create(self.ctx, key.as_str())?;
        Ok((key, slot))
    }

    pub fn normalize(&self, candidate: &str) -> Option<Zeroizing<String>> {
        normalize(candidate, self.words())
    }

    pub fn verify(&self, user: &UserKeys, candidate: &str) -> Result<Verification> {
        let Some(slot) = user.personal_key_slot() else {
            return Ok(Verification::Mismatch(Mismatch::Missing));
        };
        let Some(normalized) = self.normalize(candidate) else {
            debug!("personal key failed normalization");
            return Ok(Verification::Mismatch(Mismatch::Malformed));
        };
        slot.verify(self.ctx, &normalized)
    }
}
