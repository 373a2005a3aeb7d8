//! Data-store strategies.
//!
//! Shared data payloads and execution-result logs live outside the ledger,
//! at an address chosen by the data owner. The [`DataStore`] trait is the
//! fetch/store seam over those locations; which implementation serves an
//! item is selected per item by its [`DataStoreType`] at download time.

mod fs;
mod http;

pub use fs::LocalStore;
pub use http::HttpStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for data-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The address did not resolve to stored bytes.
  #[error("address not found: {0}")]
  NotFound(String),

  /// The address was outside the store's reachable space.
  #[error("invalid address: {0}")]
  InvalidAddress(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A remote transfer failed.
  #[error("transfer error: {0}")]
  Transfer(String),
}

/// Where a data item or result artifact is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStoreType {
  /// A path under the process-local staging root. Only meaningful when all
  /// parties resolve the same filesystem.
  Local,
  /// An absolute URL served over HTTP.
  Remote,
}

impl DataStoreType {
  /// Stable wire key, used in signed argument lists.
  pub fn as_key(&self) -> &'static str {
    match self {
      DataStoreType::Local => "0",
      DataStoreType::Remote => "1",
    }
  }
}

/// Fetch/store access to one class of data addresses.
#[async_trait]
pub trait DataStore: Send + Sync {
  /// Fetch the bytes stored at an address.
  async fn fetch(&self, address: &str) -> Result<Vec<u8>, StoreError>;

  /// Store bytes at an address, overwriting any previous content.
  async fn store(&self, address: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
}
