//! Cryptographic primitives for the envelope scheme.
//!
//! Provides the scrypt cost string, key derivation into the two half-keys,
//! and the authenticated cipher used for wrapping and PII payloads.

pub mod aead;
pub mod cost;
pub mod kdf;

pub use aead::{decrypt, encrypt, open, random_bytes, seal};
pub use cost::ScryptCost;
pub use kdf::{DerivedHalves, cost_tagged_salt, derive};

/// Length of the nonce (24 bytes for XChaCha20-Poly1305).
pub const NONCE_LEN: usize = 24;
/// Length of a symmetric key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the Poly1305 tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;
/// Length of the scrypt output (32 bytes), split into Z1 and Z2.
pub const DERIVED_LEN: usize = 32;
/// Length of each half-key (16 bytes).
pub const HALF_LEN: usize = DERIVED_LEN / 2;
