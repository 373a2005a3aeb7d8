use std::sync::Arc;

use conclave_crypto::{Proof, verify_args};
use conclave_ledger::{Ledger, OpContext, split_composite_key};
use tracing::info;

use crate::{EngineError, SharedData};

pub(crate) const OWNER_ID_INDEX: &str = "owner~id";
pub(crate) const REQUESTER_DID_ID_INDEX: &str = "requester~did~id";
pub(crate) const REQUESTER_STATUS_DID_ID_INDEX: &str = "requester~status~did~id";
pub(crate) const OWNER_DID_ID_INDEX: &str = "owner~did~id";
pub(crate) const OWNER_REQUESTER_DID_ID_INDEX: &str = "owner~requester~did~id";
pub(crate) const OWNER_STATUS_DID_ID_INDEX: &str = "owner~status~did~id";
pub(crate) const OWNER_REQUESTER_STATUS_DID_ID_INDEX: &str = "owner~requester~status~did~id";

/// Composite index entries carry a marker value; the key is the payload.
pub(crate) const INDEX_MARK: &[u8] = &[0x00];

/// Input to [`DataEngine::upload`].
#[derive(Debug, Clone)]
pub struct UploadRequest {
  pub ciphertext: String,
  pub hash: String,
  pub description: String,
  pub owner: String,
  /// Signature over `[ciphertext, hash, description, owner]`, keyed by
  /// `owner`. Optional; uploading signed marks the record as signed.
  pub proof: Option<Proof>,
}

/// Input to [`DataEngine::update`].
#[derive(Debug, Clone)]
pub struct UpdateRequest {
  pub id: String,
  pub ciphertext: String,
  pub hash: String,
  pub description: String,
  /// Signature over `[id, ciphertext, hash, description]`, keyed by the
  /// record owner. Required when the record was signed at upload, ignored
  /// otherwise.
  pub proof: Option<Proof>,
}

/// The shared-data registry and notification engine.
///
/// All state lives in the injected [`Ledger`]; the engine itself is a cheap
/// handle and every mutating operation takes the enclosing [`OpContext`] for
/// id and timestamp assignment.
pub struct DataEngine {
  ledger: Arc<dyn Ledger>,
}

impl DataEngine {
  pub fn new(ledger: Arc<dyn Ledger>) -> Self {
    Self { ledger }
  }

  pub(crate) fn ledger(&self) -> &dyn Ledger {
    self.ledger.as_ref()
  }

  /// Share a new encrypted data record.
  pub async fn upload(&self, op: &OpContext, req: UploadRequest) -> Result<SharedData, EngineError> {
    require_non_empty("ciphertext", &req.ciphertext)?;
    require_non_empty("hash", &req.hash)?;
    require_non_empty("description", &req.description)?;
    require_non_empty("owner", &req.owner)?;

    if let Some(proof) = &req.proof {
      let args = [
        req.ciphertext.as_str(),
        req.hash.as_str(),
        req.description.as_str(),
        req.owner.as_str(),
      ];
      verify_args(&args, proof, &req.owner)?;
    }

    let data = SharedData {
      id: op.id.clone(),
      ciphertext: req.ciphertext,
      hash: req.hash,
      description: req.description,
      owner: req.owner,
      created_seconds: op.seconds,
      updated_seconds: op.seconds,
      signatures: req.proof.map(|proof| proof.signatures).unwrap_or_default(),
    };

    self.put_record(&data.id, &data).await?;
    self
      .put_index(OWNER_ID_INDEX, &[&data.owner, &data.id])
      .await?;

    info!(id = %data.id, owner = %data.owner, signed = data.is_signed(), "shared data uploaded");
    Ok(data)
  }

  /// Replace the mutable fields of an existing record.
  pub async fn update(&self, op: &OpContext, req: UpdateRequest) -> Result<(), EngineError> {
    require_non_empty("id", &req.id)?;
    require_non_empty("ciphertext", &req.ciphertext)?;
    require_non_empty("hash", &req.hash)?;
    require_non_empty("description", &req.description)?;

    let mut data = self.data_by_id(&req.id).await?;

    // A record signed at upload can only ever be mutated with a signature,
    // and the stored signature set follows the latest version.
    if data.is_signed() {
      let proof = req.proof.as_ref().ok_or(EngineError::Signature(
        conclave_crypto::CryptoError::EmptySignatureSet,
      ))?;
      let args = [
        req.id.as_str(),
        req.ciphertext.as_str(),
        req.hash.as_str(),
        req.description.as_str(),
      ];
      verify_args(&args, proof, &data.owner)?;
      data.signatures = proof.signatures.clone();
    }

    data.ciphertext = req.ciphertext;
    data.hash = req.hash;
    data.description = req.description;
    data.updated_seconds = op.seconds;

    self.put_record(&data.id, &data).await?;
    info!(id = %data.id, "shared data updated");
    Ok(())
  }

  /// Fetch one record by id.
  pub async fn data_by_id(&self, id: &str) -> Result<SharedData, EngineError> {
    require_non_empty("id", id)?;
    let bytes = self
      .ledger
      .get(id)
      .await?
      .ok_or_else(|| EngineError::NotFound(format!("shared data does not exist, id: {id}")))?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  /// All records of one owner, via the owner index.
  pub async fn data_by_owner(&self, owner: &str) -> Result<Vec<SharedData>, EngineError> {
    require_non_empty("owner", owner)?;

    let keys = self.ledger.range_by_prefix(OWNER_ID_INDEX, &[owner]).await?;
    let mut records = Vec::with_capacity(keys.len());
    for key in &keys {
      let (_, fields) = split_composite_key(key)?;
      let id = fields
        .last()
        .ok_or_else(|| EngineError::Validation(format!("malformed index entry: {key:?}")))?;
      records.push(self.data_by_id(id).await?);
    }

    if records.is_empty() {
      return Err(EngineError::NotFound(format!(
        "shared data does not exist, owner: {owner}"
      )));
    }
    Ok(records)
  }

  /// All past versions of one record, oldest first.
  pub async fn history(&self, id: &str) -> Result<Vec<SharedData>, EngineError> {
    require_non_empty("id", id)?;

    let versions = self.ledger.history(id).await?;
    if versions.is_empty() {
      return Err(EngineError::NotFound(format!(
        "shared data has no history, id: {id}"
      )));
    }

    versions
      .iter()
      .map(|bytes| serde_json::from_slice(bytes).map_err(EngineError::from))
      .collect()
  }

  pub(crate) async fn put_record<T: serde::Serialize>(
    &self,
    id: &str,
    record: &T,
  ) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(record)?;
    self.ledger.put(id, bytes).await?;
    Ok(())
  }

  pub(crate) async fn put_index(&self, index: &str, parts: &[&str]) -> Result<(), EngineError> {
    let key = conclave_ledger::composite_key(index, parts)?;
    self.ledger.put(&key, INDEX_MARK.to_vec()).await?;
    Ok(())
  }

  pub(crate) async fn delete_index(&self, index: &str, parts: &[&str]) -> Result<(), EngineError> {
    let key = conclave_ledger::composite_key(index, parts)?;
    self.ledger.delete(&key).await?;
    Ok(())
  }
}

pub(crate) fn require_non_empty(name: &str, value: &str) -> Result<(), EngineError> {
  if value.is_empty() {
    return Err(EngineError::Validation(format!(
      "the {name} argument must be a non-empty string"
    )));
  }
  Ok(())
}
