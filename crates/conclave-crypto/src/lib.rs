//! Secure channel primitives.
//!
//! All parties are identified by a P-256 key pair: the public half (a
//! hex-encoded SEC1 point) is the party's wire identity, the private half
//! both signs call arguments and derives shared symmetric keys. One curve
//! serves signature verification and key agreement so that a single
//! [`Identity`] is the whole of a party's credential.

mod agreement;
mod cipher;
mod identity;
mod sign;

pub use agreement::shared_secret;
pub use cipher::{decrypt, encrypt};
pub use identity::Identity;
pub use sign::{Proof, args_digest, sign_args, verify_args};

/// Error type for crypto operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
  /// Key bytes did not parse as valid curve material.
  #[error("invalid key material: {0}")]
  InvalidKey(String),

  /// A recomputed argument digest differed from the transmitted one.
  #[error("argument digest mismatch: expected {expected}, got {actual}")]
  DigestMismatch { expected: String, actual: String },

  /// A proof was supplied with no signatures in it.
  #[error("empty signature set")]
  EmptySignatureSet,

  /// A signature failed to parse or verify.
  #[error("invalid signature: {0}")]
  InvalidSignature(String),

  /// Symmetric encryption or decryption failed.
  #[error("cipher failure: {0}")]
  Cipher(String),

  /// Hex decoding failed.
  #[error("malformed hex: {0}")]
  Hex(#[from] hex::FromHexError),
}
