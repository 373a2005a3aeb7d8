use sha2::{Digest, Sha256};

use crate::identity::parse_public;
use crate::{CryptoError, Identity};

/// Derive the shared symmetric key between this identity and a peer.
///
/// ECDH on the fixed curve: the secret is the SHA-256 digest of the
/// x-coordinate of the scalar multiplication, used directly as an AES-256
/// key. Both sides of an exchange arrive at the same 32 bytes.
pub fn shared_secret(identity: &Identity, peer_public_hex: &str) -> Result<[u8; 32], CryptoError> {
  let peer = parse_public(peer_public_hex)?;
  let shared = p256::ecdh::diffie_hellman(
    identity.signing_key().as_nonzero_scalar(),
    peer.as_affine(),
  );

  Ok(Sha256::digest(shared.raw_secret_bytes()).into())
}
