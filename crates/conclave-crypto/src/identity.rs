use p256::PublicKey;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;

use crate::CryptoError;

/// A party's long-lived P-256 key pair.
///
/// The orchestrator provisions one identity per process: it is the default
/// requester used when bundling tasks, and the private half that unwraps the
/// encrypted keys data owners address to the orchestrator.
#[derive(Clone)]
pub struct Identity {
  signing: SigningKey,
}

impl Identity {
  /// Generate a fresh identity from OS entropy.
  pub fn generate() -> Self {
    Self {
      signing: SigningKey::random(&mut OsRng),
    }
  }

  /// Restore an identity from a hex-encoded private scalar.
  pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
    let bytes = hex::decode(secret_hex)?;
    let signing =
      SigningKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(Self { signing })
  }

  /// Hex-encoded private scalar.
  pub fn secret_hex(&self) -> String {
    hex::encode(self.signing.to_bytes())
  }

  /// Hex-encoded uncompressed SEC1 public point. This is the party's wire
  /// identity: the `owner`, `requester`, and `executor` strings are all
  /// public keys in this form.
  pub fn public_hex(&self) -> String {
    let point = self.signing.verifying_key().to_encoded_point(false);
    hex::encode(point.as_bytes())
  }

  pub(crate) fn signing_key(&self) -> &SigningKey {
    &self.signing
  }
}

impl std::fmt::Debug for Identity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Identity")
      .field("public", &self.public_hex())
      .finish_non_exhaustive()
  }
}

/// Parse a hex-encoded SEC1 point into a curve public key.
pub(crate) fn parse_public(public_hex: &str) -> Result<PublicKey, CryptoError> {
  let bytes = hex::decode(public_hex)?;
  PublicKey::from_sec1_bytes(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Parse a hex-encoded SEC1 point into a signature-verification key.
pub(crate) fn parse_verifying(public_hex: &str) -> Result<VerifyingKey, CryptoError> {
  let bytes = hex::decode(public_hex)?;
  VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}
