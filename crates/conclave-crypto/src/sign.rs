//! Argument signatures.
//!
//! Mutating calls can be authenticated by signing their positional
//! arguments: the digest is SHA-256 over the raw concatenation of the
//! arguments, in call order, with no separator. A [`Proof`] travels with the
//! call carrying the hex digest and a list of hex signatures; verification
//! recomputes the digest from the same ordered arguments, demands exact
//! equality, and then checks the first signature against the claimed public
//! key.

use p256::ecdsa::Signature;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::parse_verifying;
use crate::{CryptoError, Identity};

/// Digest and signature set accompanying a signed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
  /// Hex SHA-256 digest of the concatenated positional arguments.
  pub digest: String,
  /// Hex-encoded signatures over the digest. Only the first is verified.
  pub signatures: Vec<String>,
}

/// SHA-256 over the raw concatenation of the arguments.
pub fn args_digest(args: &[&str]) -> [u8; 32] {
  let mut hasher = Sha256::new();
  for arg in args {
    hasher.update(arg.as_bytes());
  }
  hasher.finalize().into()
}

/// Sign the positional arguments with the given identity.
pub fn sign_args(identity: &Identity, args: &[&str]) -> Result<Proof, CryptoError> {
  let digest = args_digest(args);
  let signature: Signature = identity
    .signing_key()
    .sign_prehash(&digest)
    .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

  Ok(Proof {
    digest: hex::encode(digest),
    signatures: vec![hex::encode(signature.to_bytes())],
  })
}

/// Verify a proof over the positional arguments, keyed by `public_hex`.
pub fn verify_args(args: &[&str], proof: &Proof, public_hex: &str) -> Result<(), CryptoError> {
  let expected = hex::encode(args_digest(args));
  if proof.digest != expected {
    return Err(CryptoError::DigestMismatch {
      expected,
      actual: proof.digest.clone(),
    });
  }

  let first = match proof.signatures.first() {
    Some(sig) if !sig.is_empty() => sig,
    _ => return Err(CryptoError::EmptySignatureSet),
  };

  let signature = Signature::from_slice(&hex::decode(first)?)
    .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
  let verifying = parse_verifying(public_hex)?;
  let digest = hex::decode(&proof.digest)?;

  verifying
    .verify_prehash(&digest, &signature)
    .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
}
