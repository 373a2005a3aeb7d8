//! Ledger store abstraction.
//!
//! Every engine in the workspace talks to an ordered key-value ledger through
//! the [`Ledger`] trait: plain put/get/delete, prefix-bounded range scans over
//! composite secondary-index keys, per-key history, and operation identity.
//! The trait keeps the engines portable to any ordered backend; [`MemLedger`]
//! is the in-memory implementation used by tests and the demo binary.

mod key;
mod mem;

pub use key::{composite_key, split_composite_key};
pub use mem::MemLedger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
  /// An index name was empty.
  #[error("empty index name")]
  EmptyIndex,

  /// A key field contained the reserved NUL delimiter.
  #[error("key field contains a reserved delimiter: {0:?}")]
  ReservedDelimiter(String),

  /// A composite key could not be split back into its fields.
  #[error("malformed composite key: {0:?}")]
  MalformedKey(String),

  /// The backing store failed.
  #[error("backend error: {0}")]
  Backend(String),
}

/// Identity of the enclosing operation.
///
/// Record ids and timestamps are assigned from the operation in which they
/// are written, so that everything persisted by one logical invocation shares
/// one identity. The boundary that receives a call (transport, test, CLI)
/// begins the operation and threads it through the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpContext {
  /// Unique operation id.
  pub id: String,
  /// Operation wall-clock timestamp, in seconds.
  pub seconds: i64,
}

/// Ordered key-value ledger with secondary-index scans and history.
#[async_trait]
pub trait Ledger: Send + Sync {
  /// Store a value under a key, appending to the key's history.
  async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), LedgerError>;

  /// Fetch the current value of a key.
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

  /// Remove the current value of a key. History is retained.
  async fn delete(&self, key: &str) -> Result<(), LedgerError>;

  /// Enumerate, in key order, all composite keys under `index` whose leading
  /// fields equal `parts`. An empty `parts` enumerates the whole index.
  async fn range_by_prefix(&self, index: &str, parts: &[&str])
  -> Result<Vec<String>, LedgerError>;

  /// All past values of a key, oldest first.
  async fn history(&self, key: &str) -> Result<Vec<Vec<u8>>, LedgerError>;

  /// Begin a new operation and return its identity.
  fn begin_operation(&self) -> OpContext;
}
