//! The concurrent download+decrypt stage of task execution.
//!
//! Each data item flows through its own stage instance: authorization info
//! is turned into an address, the per-owner key is agreed, the payload is
//! fetched from its store and decrypted per the item's encryption mode. The
//! stage emits a tagged outcome per item instead of failing synchronously,
//! so the driver can observe the first failure with full context while
//! cancelling the rest.

use std::path::PathBuf;
use std::sync::Arc;

use conclave_crypto::{CryptoError, Identity, decrypt, shared_secret};
use conclave_data::Notification;
use conclave_store::{DataStore, DataStoreType, HttpStore, LocalStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TaskError;

/// One data item awaiting download, tagged with its identity.
pub(crate) struct PendingItem {
  pub data_id: String,
  pub notification: Notification,
}

/// One data item after download and decryption.
///
/// Carries everything the result-distribution phase needs, so no ambient
/// state is shared between the phases.
pub(crate) struct DownloadedItem {
  pub data_id: String,
  pub owner: String,
  pub plaintext: Vec<u8>,
  /// Key agreed with the owner, absent when the grant carried no key
  /// material.
  pub key: Option<[u8; 32]>,
  pub store_type: DataStoreType,
  /// Where this owner's encrypted execution log gets uploaded.
  pub log_address: String,
}

/// Inputs shared by every stage instance of one execution.
pub(crate) struct DownloadContext {
  pub identity: Arc<Identity>,
  pub staging_root: PathBuf,
  pub result_address: String,
}

/// Turn a stream of pending items into a stream of download outcomes.
pub(crate) fn download_stage(
  cancel: CancellationToken,
  ctx: Arc<DownloadContext>,
  mut items: mpsc::Receiver<PendingItem>,
) -> mpsc::Receiver<Result<DownloadedItem, TaskError>> {
  let (tx, rx) = mpsc::channel(1);

  tokio::spawn(async move {
    loop {
      let item = tokio::select! {
        _ = cancel.cancelled() => return,
        item = items.recv() => match item {
          Some(item) => item,
          None => return,
        },
      };

      let failed = {
        let outcome = download_item(&cancel, &ctx, item).await;
        let failed = outcome.is_err();
        if tx.send(outcome).await.is_err() {
          return;
        }
        failed
      };

      // One failed item ends this stage; the driver cancels the rest.
      if failed {
        return;
      }
    }
  });

  rx
}

async fn download_item(
  cancel: &CancellationToken,
  ctx: &DownloadContext,
  item: PendingItem,
) -> Result<DownloadedItem, TaskError> {
  let notification = &item.notification;
  let owner = notification.data.owner.clone();
  let info = notification.data_info.as_ref().ok_or_else(|| {
    TaskError::Validation(format!(
      "authorized notification carries no data info, id: {}",
      notification.id
    ))
  })?;

  let key = match info.encrypted_key.as_str() {
    "" => None,
    owner_key => Some(shared_secret(&ctx.identity, owner_key)?),
  };

  let address = if info.encrypted_type.address_encrypted() {
    let key = require_key(&key, &notification.id)?;
    let ciphertext = hex::decode(&info.data_store_address).map_err(CryptoError::from)?;
    let plaintext = decrypt(&ciphertext, key)?;
    String::from_utf8(plaintext).map_err(|_| {
      TaskError::Validation(format!(
        "decrypted data address is not utf-8, notification: {}",
        notification.id
      ))
    })?
  } else {
    info.data_store_address.clone()
  };

  debug!(data_id = %item.data_id, store = ?info.data_store_type, "downloading data item");
  let store: Box<dyn DataStore> = match info.data_store_type {
    DataStoreType::Local => Box::new(LocalStore::new(&ctx.staging_root)),
    DataStoreType::Remote => Box::new(HttpStore::new()),
  };

  let raw = tokio::select! {
    _ = cancel.cancelled() => return Err(TaskError::Cancelled),
    fetched = store.fetch(&address) => fetched?,
  };

  let plaintext = if info.encrypted_type.payload_encrypted() {
    let key = require_key(&key, &notification.id)?;
    let text = String::from_utf8(raw).map_err(|_| {
      TaskError::Validation(format!(
        "encrypted payload is not hex text, notification: {}",
        notification.id
      ))
    })?;
    let ciphertext = hex::decode(text.trim()).map_err(CryptoError::from)?;
    decrypt(&ciphertext, key)?
  } else {
    raw
  };

  let store_type = info.data_store_type;
  let log_address = match store_type {
    DataStoreType::Local => format!("{}/{owner}.log", ctx.result_address),
    DataStoreType::Remote => sibling_log_address(&address, &owner),
  };

  Ok(DownloadedItem {
    data_id: item.data_id,
    owner,
    plaintext,
    key,
    store_type,
    log_address,
  })
}

fn require_key<'a>(
  key: &'a Option<[u8; 32]>,
  notification_id: &str,
) -> Result<&'a [u8; 32], TaskError> {
  key.as_ref().ok_or_else(|| {
    TaskError::Validation(format!(
      "encrypted grant carries no key material, notification: {notification_id}"
    ))
  })
}

/// The remote log lands next to the data it was computed from.
fn sibling_log_address(data_address: &str, owner: &str) -> String {
  match data_address.rsplit_once('/') {
    Some((base, _)) => format!("{base}/{owner}.log"),
    None => format!("{owner}.log"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sibling_log_address_replaces_last_segment() {
    assert_eq!(
      sibling_log_address("https://store.example/bucket/item.bin", "O"),
      "https://store.example/bucket/O.log"
    );
    assert_eq!(sibling_log_address("bare", "O"), "O.log");
  }
}
