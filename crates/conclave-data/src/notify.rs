//! Request and authorization half of the engine.
//!
//! State machine: UnAuthorized (set by request) → Authorized | Refused, both
//! terminal, reachable only through [`DataEngine::authorize`]. Every
//! notification is indexed under six composite families so either party can
//! enumerate by any leading subset of its key fields; the three
//! status-bearing families move with the notification when it is decided.

use conclave_crypto::{CryptoError, Proof, verify_args};
use conclave_ledger::{OpContext, split_composite_key};
use conclave_store::DataStoreType;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::engine::{
  DataEngine, OWNER_DID_ID_INDEX, OWNER_REQUESTER_DID_ID_INDEX,
  OWNER_REQUESTER_STATUS_DID_ID_INDEX, OWNER_STATUS_DID_ID_INDEX, REQUESTER_DID_ID_INDEX,
  REQUESTER_STATUS_DID_ID_INDEX, require_non_empty,
};
use crate::{AuthStatus, DataInfo, EncryptedType, EngineError, Notification};

/// Input to [`DataEngine::request`].
#[derive(Debug, Clone)]
pub struct RequestInput {
  pub data_id: String,
  pub requester: String,
  /// Signature over `[data_id, requester]`, keyed by `requester`. Required
  /// when the data was signed at upload.
  pub proof: Option<Proof>,
}

/// The owner's decision on a pending request.
#[derive(Debug, Clone)]
pub enum Decision {
  /// Grant access, declaring where the payload lives and how it is
  /// encrypted.
  Grant {
    address: String,
    store_type: DataStoreType,
    encrypted_key: String,
    encrypted_type: EncryptedType,
  },
  /// Refuse access with a reason for the requester.
  Refuse { reason: String },
}

/// Input to [`DataEngine::authorize`].
#[derive(Debug, Clone)]
pub struct AuthorizeInput {
  pub notification_id: String,
  pub decision: Decision,
  /// Signature over [`AuthorizeInput::signed_args`], keyed by the data
  /// owner. Required when the data was signed at upload.
  pub proof: Option<Proof>,
}

impl AuthorizeInput {
  /// The positional arguments a signing owner commits to. Both sides of the
  /// call derive the argument list from here so the digests agree.
  pub fn signed_args(&self) -> Vec<String> {
    match &self.decision {
      Decision::Grant {
        address,
        store_type,
        encrypted_key,
        encrypted_type,
      } => vec![
        self.notification_id.clone(),
        AuthStatus::Authorized.as_key().to_string(),
        address.clone(),
        store_type.as_key().to_string(),
        encrypted_key.clone(),
        encrypted_type.as_key().to_string(),
      ],
      Decision::Refuse { reason } => vec![
        self.notification_id.clone(),
        AuthStatus::Refused.as_key().to_string(),
        reason.clone(),
      ],
    }
  }
}

impl DataEngine {
  /// Ask the owner of a data item for access.
  ///
  /// The notification id is the hash of (operation id ∥ data id), not the
  /// operation id alone: one operation requesting several data items yields
  /// several distinct notifications.
  pub async fn request(
    &self,
    op: &OpContext,
    input: RequestInput,
  ) -> Result<Notification, EngineError> {
    require_non_empty("data_id", &input.data_id)?;
    require_non_empty("requester", &input.requester)?;

    let data = self.data_by_id(&input.data_id).await?;
    if data.is_signed() {
      let proof = input
        .proof
        .as_ref()
        .ok_or(EngineError::Signature(CryptoError::EmptySignatureSet))?;
      verify_args(
        &[input.data_id.as_str(), input.requester.as_str()],
        proof,
        &input.requester,
      )?;
    }

    let mut hasher = Sha256::new();
    hasher.update(op.id.as_bytes());
    hasher.update(data.id.as_bytes());
    let id = hex::encode(hasher.finalize());

    let notification = Notification {
      id,
      requester: input.requester,
      requested_seconds: op.seconds,
      status: AuthStatus::UnAuthorized,
      authorized_seconds: 0,
      refused_reason: String::new(),
      data_info: None,
      data,
    };

    self.put_record(&notification.id, &notification).await?;
    self.put_notification_indexes(&notification).await?;

    info!(
      id = %notification.id,
      data_id = %notification.data.id,
      requester = %notification.requester,
      "data access requested"
    );
    Ok(notification)
  }

  /// Decide a pending request. Exactly one transition out of UnAuthorized is
  /// allowed; deciding an already-terminal notification is rejected.
  pub async fn authorize(&self, op: &OpContext, input: AuthorizeInput) -> Result<(), EngineError> {
    require_non_empty("notification_id", &input.notification_id)?;

    let old = self.notification_by_id(&input.notification_id).await?;
    if old.status != AuthStatus::UnAuthorized {
      return Err(EngineError::Validation(format!(
        "notification already decided, id: {}, status: {}",
        old.id, old.status
      )));
    }

    if old.data.is_signed() {
      let proof = input
        .proof
        .as_ref()
        .ok_or(EngineError::Signature(CryptoError::EmptySignatureSet))?;
      let args = input.signed_args();
      let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
      verify_args(&arg_refs, proof, &old.data.owner)?;
    }

    let mut new = old.clone();
    match input.decision {
      Decision::Grant {
        address,
        store_type,
        encrypted_key,
        encrypted_type,
      } => {
        require_non_empty("address", &address)?;
        new.status = AuthStatus::Authorized;
        new.data_info = Some(DataInfo {
          data_store_address: address,
          data_store_type: store_type,
          encrypted_key,
          encrypted_type,
        });
      }
      Decision::Refuse { reason } => {
        new.status = AuthStatus::Refused;
        new.refused_reason = reason;
      }
    }
    new.authorized_seconds = op.seconds;

    self.put_record(&new.id, &new).await?;
    self.move_status_indexes(&old, &new).await?;

    info!(id = %new.id, status = %new.status, "notification decided");
    Ok(())
  }

  /// All requests made by a requester, optionally narrowed to one data item.
  pub async fn requests_by_requester(
    &self,
    requester: &str,
    data_id: Option<&str>,
  ) -> Result<Vec<Notification>, EngineError> {
    require_non_empty("requester", requester)?;
    self
      .scan_notifications(REQUESTER_DID_ID_INDEX, &with_filter(&[requester], data_id))
      .await
  }

  /// Requests made by a requester in a given state.
  pub async fn requests_by_requester_status(
    &self,
    requester: &str,
    status: AuthStatus,
    data_id: Option<&str>,
  ) -> Result<Vec<Notification>, EngineError> {
    require_non_empty("requester", requester)?;
    self
      .scan_notifications(
        REQUESTER_STATUS_DID_ID_INDEX,
        &with_filter(&[requester, status.as_key()], data_id),
      )
      .await
  }

  /// All notifications addressed to an owner.
  pub async fn notifications_by_owner(
    &self,
    owner: &str,
    data_id: Option<&str>,
  ) -> Result<Vec<Notification>, EngineError> {
    require_non_empty("owner", owner)?;
    self
      .scan_notifications(OWNER_DID_ID_INDEX, &with_filter(&[owner], data_id))
      .await
  }

  /// Notifications addressed to an owner by a specific requester.
  pub async fn notifications_by_owner_requester(
    &self,
    owner: &str,
    requester: &str,
    data_id: Option<&str>,
  ) -> Result<Vec<Notification>, EngineError> {
    require_non_empty("owner", owner)?;
    require_non_empty("requester", requester)?;
    self
      .scan_notifications(
        OWNER_REQUESTER_DID_ID_INDEX,
        &with_filter(&[owner, requester], data_id),
      )
      .await
  }

  /// Notifications addressed to an owner in a given state.
  pub async fn notifications_by_owner_status(
    &self,
    owner: &str,
    status: AuthStatus,
    data_id: Option<&str>,
  ) -> Result<Vec<Notification>, EngineError> {
    require_non_empty("owner", owner)?;
    self
      .scan_notifications(
        OWNER_STATUS_DID_ID_INDEX,
        &with_filter(&[owner, status.as_key()], data_id),
      )
      .await
  }

  /// Notifications addressed to an owner by a specific requester in a given
  /// state.
  pub async fn notifications_by_owner_requester_status(
    &self,
    owner: &str,
    requester: &str,
    status: AuthStatus,
    data_id: Option<&str>,
  ) -> Result<Vec<Notification>, EngineError> {
    require_non_empty("owner", owner)?;
    require_non_empty("requester", requester)?;
    self
      .scan_notifications(
        OWNER_REQUESTER_STATUS_DID_ID_INDEX,
        &with_filter(&[owner, requester, status.as_key()], data_id),
      )
      .await
  }

  /// Fetch one notification by id.
  pub async fn notification_by_id(&self, id: &str) -> Result<Notification, EngineError> {
    require_non_empty("id", id)?;
    let bytes = self
      .ledger()
      .get(id)
      .await?
      .ok_or_else(|| EngineError::NotFound(format!("notification does not exist, id: {id}")))?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  async fn scan_notifications(
    &self,
    index: &str,
    parts: &[&str],
  ) -> Result<Vec<Notification>, EngineError> {
    let keys = self.ledger().range_by_prefix(index, parts).await?;

    let mut notifications = Vec::with_capacity(keys.len());
    for key in &keys {
      let (_, fields) = split_composite_key(key)?;
      // Every family ends in (data id, notification id).
      let id = fields
        .last()
        .ok_or_else(|| EngineError::Validation(format!("malformed index entry: {key:?}")))?;
      notifications.push(self.notification_by_id(id).await?);
    }

    if notifications.is_empty() {
      return Err(EngineError::NotFound(format!(
        "notifications do not exist, index: {index}, keys: {parts:?}"
      )));
    }
    Ok(notifications)
  }

  async fn put_notification_indexes(&self, n: &Notification) -> Result<(), EngineError> {
    let (owner, requester, status, did, id) = (
      n.data.owner.as_str(),
      n.requester.as_str(),
      n.status.as_key(),
      n.data.id.as_str(),
      n.id.as_str(),
    );

    self
      .put_index(REQUESTER_DID_ID_INDEX, &[requester, did, id])
      .await?;
    self
      .put_index(REQUESTER_STATUS_DID_ID_INDEX, &[requester, status, did, id])
      .await?;
    self.put_index(OWNER_DID_ID_INDEX, &[owner, did, id]).await?;
    self
      .put_index(OWNER_REQUESTER_DID_ID_INDEX, &[owner, requester, did, id])
      .await?;
    self
      .put_index(OWNER_STATUS_DID_ID_INDEX, &[owner, status, did, id])
      .await?;
    self
      .put_index(
        OWNER_REQUESTER_STATUS_DID_ID_INDEX,
        &[owner, requester, status, did, id],
      )
      .await?;
    Ok(())
  }

  /// Re-home the three status-bearing index families from the old status to
  /// the new one. The status-independent families are untouched.
  async fn move_status_indexes(
    &self,
    old: &Notification,
    new: &Notification,
  ) -> Result<(), EngineError> {
    let (owner, requester, did) = (
      new.data.owner.as_str(),
      new.requester.as_str(),
      new.data.id.as_str(),
    );

    self
      .put_index(
        REQUESTER_STATUS_DID_ID_INDEX,
        &[requester, new.status.as_key(), did, &new.id],
      )
      .await?;
    self
      .put_index(
        OWNER_STATUS_DID_ID_INDEX,
        &[owner, new.status.as_key(), did, &new.id],
      )
      .await?;
    self
      .put_index(
        OWNER_REQUESTER_STATUS_DID_ID_INDEX,
        &[owner, requester, new.status.as_key(), did, &new.id],
      )
      .await?;

    self
      .delete_index(
        REQUESTER_STATUS_DID_ID_INDEX,
        &[requester, old.status.as_key(), did, &old.id],
      )
      .await?;
    self
      .delete_index(
        OWNER_STATUS_DID_ID_INDEX,
        &[owner, old.status.as_key(), did, &old.id],
      )
      .await?;
    self
      .delete_index(
        OWNER_REQUESTER_STATUS_DID_ID_INDEX,
        &[owner, requester, old.status.as_key(), did, &old.id],
      )
      .await?;
    Ok(())
  }
}

fn with_filter<'a>(leading: &[&'a str], data_id: Option<&'a str>) -> Vec<&'a str> {
  let mut parts = leading.to_vec();
  if let Some(did) = data_id.filter(|did| !did.is_empty()) {
    parts.push(did);
  }
  parts
}
