use super::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{DecryptionError, EncryptionError};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use getrandom::fill;
use zeroize::Zeroizing;

/// Fill buffer with cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) -> Result<(), EncryptionError> {
    fill(buf).map_err(|_| EncryptionError::RandomUnavailable)
}

/// Generate a random nonce
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], EncryptionError> {
    let mut nonce = [0u8; NONCE_LEN];
    random_bytes(&mut nonce)?;
    Ok(nonce)
}

/// Encrypt plaintext under the given nonce
pub fn encrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| EncryptionError::Cipher)
}

/// Decrypt ciphertext
pub fn decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, DecryptionError> {
    if nonce.len() != NONCE_LEN {
        return Err(DecryptionError);
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| DecryptionError)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt with a fresh nonce and return `nonce || ciphertext`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let nonce = generate_nonce()?;
    let ciphertext = encrypt(key, &nonce, plaintext)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`seal`].
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, DecryptionError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(DecryptionError);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    decrypt(key, nonce, ciphertext)
}
