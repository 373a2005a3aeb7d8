//! Trusted execution task orchestrator.
//!
//! A task bundles one algorithm and one or more shared data items. Creation
//! commits the content hashes of every input as evidence and obtains an
//! authorization request per input; execution re-verifies those commitments
//! against the actually-downloaded artifacts inside a fresh container, runs
//! the algorithm, and redistributes the encrypted execution log to every
//! data owner.

mod download;
mod service;
mod types;

pub use service::{TaskConfig, TaskService};
pub use types::{CreateRequest, EvidenceHash, ExecuteRequest, Task};

use conclave_container::ContainerError;
use conclave_crypto::CryptoError;
use conclave_data::EngineError;
use conclave_ledger::LedgerError;
use conclave_store::StoreError;

/// Error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
  /// A required argument was missing, empty, or malformed.
  #[error("validation failure: {0}")]
  Validation(String),

  /// The referenced record does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The executor is not one of the task's partners.
  #[error("permission denied: executor {executor} is not a task partner")]
  PermissionDenied { executor: String },

  /// A required signature was missing or failed verification.
  #[error("signature verification failed: {0}")]
  Signature(#[from] CryptoError),

  /// A bundled input is not in the Authorized state.
  #[error("data access not authorized, notification: {notification_id}, reason: {reason}")]
  Unauthorized {
    notification_id: String,
    reason: String,
  },

  /// A hash recomputed at execution time differs from the evidence
  /// committed at creation time.
  #[error("integrity verification failed: {0}")]
  Integrity(String),

  /// A download or result upload failed.
  #[error("storage error: {0}")]
  Storage(#[from] StoreError),

  /// The execution container failed.
  #[error("container error: {0}")]
  Container(#[from] ContainerError),

  /// The data engine rejected a nested call.
  #[error(transparent)]
  Engine(#[from] EngineError),

  /// The ledger failed.
  #[error(transparent)]
  Ledger(#[from] LedgerError),

  /// A persisted record failed to encode or decode.
  #[error("codec error: {0}")]
  Codec(#[from] serde_json::Error),

  /// The pipeline was cancelled before the item completed.
  #[error("execution cancelled")]
  Cancelled,
}
