use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};

use crate::CryptoError;

const NONCE_LEN: usize = 12;

/// Encrypt with AES-256-GCM. The random nonce is prepended to the returned
/// ciphertext.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
  let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
  let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
  let ciphertext = cipher
    .encrypt(&nonce, plaintext)
    .map_err(|e| CryptoError::Cipher(e.to_string()))?;

  let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
  out.extend_from_slice(nonce.as_slice());
  out.extend_from_slice(&ciphertext);
  Ok(out)
}

/// Decrypt a nonce-prefixed AES-256-GCM ciphertext.
pub fn decrypt(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
  if data.len() < NONCE_LEN {
    return Err(CryptoError::Cipher("ciphertext shorter than nonce".to_string()));
  }

  let (nonce, ciphertext) = data.split_at(NONCE_LEN);
  let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
  cipher
    .decrypt(Nonce::from_slice(nonce), ciphertext)
    .map_err(|e| CryptoError::Cipher(e.to_string()))
}
