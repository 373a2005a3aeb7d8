use conclave_store::DataStoreType;
use serde::{Deserialize, Serialize};

/// An encrypted data record shared into the registry.
///
/// The id is assigned from the enclosing operation and never changes; the
/// owner is immutable. Updates replace the ciphertext, hash, description,
/// and signature set only. Records are never deleted and their full version
/// history stays retrievable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedData {
  pub id: String,
  /// Owner-encrypted payload, or a reference to it.
  pub ciphertext: String,
  /// Hex SHA-256 of the plaintext; the commitment tasks verify against.
  pub hash: String,
  pub description: String,
  /// Hex public key of the owning party.
  pub owner: String,
  pub created_seconds: i64,
  pub updated_seconds: i64,
  /// Hex signatures from the upload, when the owner chose to sign.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub signatures: Vec<String>,
}

impl SharedData {
  /// Whether the record was signed at upload. Signed records require every
  /// later mutation and request against them to be signed too.
  pub fn is_signed(&self) -> bool {
    self.signatures.first().is_some_and(|sig| !sig.is_empty())
  }
}

/// Authorization state of a single request for a single data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
  /// Initial state, set by request.
  UnAuthorized,
  /// Terminal: the owner granted access.
  Authorized,
  /// Terminal: the owner refused access.
  Refused,
}

impl AuthStatus {
  /// Stable index-key digit; status-bearing composite indexes use this.
  pub fn as_key(&self) -> &'static str {
    match self {
      AuthStatus::UnAuthorized => "0",
      AuthStatus::Authorized => "1",
      AuthStatus::Refused => "2",
    }
  }
}

impl std::fmt::Display for AuthStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      AuthStatus::UnAuthorized => "unauthorized",
      AuthStatus::Authorized => "authorized",
      AuthStatus::Refused => "refused",
    };
    f.write_str(name)
  }
}

/// Which parts of a granted item are encrypted with the agreed key.
///
/// The address site and the payload site each consult this enum and act on
/// disjoint members: the address is ciphertext for `AddressOnly`/`All`, the
/// payload for `DataOnly`/`All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptedType {
  UnEncrypted,
  AddressOnly,
  DataOnly,
  All,
}

impl EncryptedType {
  /// Stable wire key, used in signed argument lists.
  pub fn as_key(&self) -> &'static str {
    match self {
      EncryptedType::UnEncrypted => "0",
      EncryptedType::AddressOnly => "1",
      EncryptedType::DataOnly => "2",
      EncryptedType::All => "3",
    }
  }

  /// Whether the storage address must be decrypted before use.
  pub fn address_encrypted(&self) -> bool {
    matches!(self, EncryptedType::AddressOnly | EncryptedType::All)
  }

  /// Whether the downloaded payload must be decrypted before use.
  pub fn payload_encrypted(&self) -> bool {
    matches!(self, EncryptedType::DataOnly | EncryptedType::All)
  }
}

/// How a granted item is stored and encrypted, set exactly once when the
/// owner authorizes a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInfo {
  /// Where the payload lives; plaintext or ciphertext per `encrypted_type`.
  pub data_store_address: String,
  pub data_store_type: DataStoreType,
  /// The owner-side public key the executing party agrees a key with.
  pub encrypted_key: String,
  pub encrypted_type: EncryptedType,
}

/// The record tracking whether one requester has been granted, denied, or
/// not yet decided access to one shared data item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: String,
  /// Snapshot of the shared data the request was made against.
  pub data: SharedData,
  /// Hex public key of the requesting party.
  pub requester: String,
  pub requested_seconds: i64,
  pub status: AuthStatus,
  #[serde(default)]
  pub authorized_seconds: i64,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub refused_reason: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_info: Option<DataInfo>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encrypted_type_dispatch_covers_disjoint_sites() {
    assert!(!EncryptedType::UnEncrypted.address_encrypted());
    assert!(!EncryptedType::UnEncrypted.payload_encrypted());

    assert!(EncryptedType::AddressOnly.address_encrypted());
    assert!(!EncryptedType::AddressOnly.payload_encrypted());

    assert!(!EncryptedType::DataOnly.address_encrypted());
    assert!(EncryptedType::DataOnly.payload_encrypted());

    assert!(EncryptedType::All.address_encrypted());
    assert!(EncryptedType::All.payload_encrypted());
  }

  #[test]
  fn test_notification_round_trips_with_absent_fields() {
    let notification = Notification {
      id: "n1".to_string(),
      data: SharedData {
        id: "d1".to_string(),
        ciphertext: "c".to_string(),
        hash: "h".to_string(),
        description: "d".to_string(),
        owner: "o".to_string(),
        created_seconds: 1,
        updated_seconds: 1,
        signatures: Vec::new(),
      },
      requester: "r".to_string(),
      requested_seconds: 1,
      status: AuthStatus::UnAuthorized,
      authorized_seconds: 0,
      refused_reason: String::new(),
      data_info: None,
    };

    let encoded = serde_json::to_vec(&notification).unwrap();
    let decoded: Notification = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(decoded, notification);
  }

  #[test]
  fn test_unsigned_when_first_signature_empty() {
    let mut data = SharedData {
      id: String::new(),
      ciphertext: String::new(),
      hash: String::new(),
      description: String::new(),
      owner: String::new(),
      created_seconds: 0,
      updated_seconds: 0,
      signatures: vec![String::new()],
    };
    assert!(!data.is_signed());

    data.signatures = vec!["ab".to_string()];
    assert!(data.is_signed());
  }
}
