//! Shared-data registry and authorization engine.
//!
//! One canonical engine owns both halves of the data-sharing workflow: the
//! registry of uploaded [`SharedData`] records, and the
//! request→authorize/refuse state machine tracked by [`Notification`]
//! records. Requests and decisions are indexed six ways so that either side
//! of the exchange can enumerate them by any leading subset of
//! (owner, requester, status), with an optional data-id filter.

mod engine;
mod notify;
mod types;

pub use engine::{DataEngine, UpdateRequest, UploadRequest};
pub use notify::{AuthorizeInput, Decision, RequestInput};
pub use types::{AuthStatus, DataInfo, EncryptedType, Notification, SharedData};

use conclave_crypto::CryptoError;
use conclave_ledger::LedgerError;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// A required argument was missing, empty, or malformed.
  #[error("validation failure: {0}")]
  Validation(String),

  /// The referenced record does not exist, or a scan matched nothing.
  #[error("not found: {0}")]
  NotFound(String),

  /// A required signature was missing, stale, or failed verification.
  #[error("signature verification failed: {0}")]
  Signature(#[from] CryptoError),

  /// The ledger failed.
  #[error(transparent)]
  Ledger(#[from] LedgerError),

  /// A persisted record failed to encode or decode.
  #[error("codec error: {0}")]
  Codec(#[from] serde_json::Error),
}
