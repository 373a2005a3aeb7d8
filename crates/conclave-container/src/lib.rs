//! Execution containers.
//!
//! A container is the isolated environment a task's algorithm runs in. The
//! lifecycle contract is fixed: [`Container::upload`] stages the algorithm
//! and data and records their content hashes, [`Container::verify`] checks
//! those hashes against the committed evidence, [`Container::execute`] runs
//! the algorithm against the staged inputs, and [`Container::destroy`] tears
//! everything down. Destroy is owed exactly once per created container, no
//! matter how far the earlier steps got.

mod local;
mod sandbox;

pub use local::LocalContainer;
pub use sandbox::SandboxedContainer;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Error type for container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
  /// Upload was called with empty algorithm bytes.
  #[error("algorithm bytes are empty")]
  EmptyAlgorithm,

  /// Upload was called with an empty data list.
  #[error("data list is empty")]
  EmptyData,

  /// Verify or execute was called before a successful upload.
  #[error("nothing has been uploaded")]
  NotUploaded,

  /// The uploaded algorithm does not match the committed hash.
  #[error("algorithm hash mismatch: committed {committed}, uploaded {uploaded}")]
  AlgorithmHashMismatch { committed: String, uploaded: String },

  /// The uploaded data set does not match the committed hashes.
  #[error("data hash mismatch: committed {committed:?}, uploaded {uploaded:?}")]
  DataHashMismatch {
    committed: Vec<String>,
    uploaded: Vec<String>,
  },

  /// An I/O error occurred while staging or cleaning up artifacts.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The algorithm process failed.
  #[error("execution failed: {0}")]
  Execution(String),

  /// The sandbox runtime could not be driven.
  #[error("sandbox error: {0}")]
  Sandbox(String),
}

/// Capability set of an isolated execution environment.
#[async_trait]
pub trait Container: Send {
  /// Stage the algorithm and data inside the container, recording content
  /// hashes for later verification.
  async fn upload(&mut self, algorithm: Vec<u8>, data: Vec<Vec<u8>>) -> Result<(), ContainerError>;

  /// Check the staged artifacts against the hashes committed at task
  /// creation. Data hashes are compared as a multiset; download order is
  /// not significant.
  fn verify(&self, algorithm_hash: &str, data_hashes: &[String]) -> Result<(), ContainerError>;

  /// Run the algorithm against the staged inputs and return its raw output.
  async fn execute(&mut self) -> Result<Vec<u8>, ContainerError>;

  /// Tear the container down. Safe to call after any earlier failure,
  /// including before upload; later calls on the same container are no-ops.
  async fn destroy(&mut self) -> Result<(), ContainerError>;

  /// Public half of the container's own key pair, if the runtime has one.
  fn public_key(&self) -> Option<String>;
}

/// Which container variant a task executes in.
///
/// The variant is chosen once, at execute time, and persisted on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
  /// Scratch directory plus subprocess on the host. Development use.
  Local,
  /// An isolated runtime instance torn down after the run.
  Sandboxed,
}

impl ContainerKind {
  /// Stable wire key, used in signed argument lists.
  pub fn as_key(&self) -> &'static str {
    match self {
      ContainerKind::Local => "0",
      ContainerKind::Sandboxed => "1",
    }
  }

  /// Create a fresh container of this kind, staged under `scratch_root`.
  pub async fn create(&self, scratch_root: &Path) -> Result<Box<dyn Container>, ContainerError> {
    match self {
      ContainerKind::Local => Ok(Box::new(LocalContainer::create(scratch_root).await?)),
      ContainerKind::Sandboxed => Ok(Box::new(SandboxedContainer::create(scratch_root).await?)),
    }
  }
}

pub(crate) fn hash_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

pub(crate) fn verify_hashes(
  committed_algorithm: &str,
  committed_data: &[String],
  uploaded_algorithm: Option<&str>,
  uploaded_data: &[String],
) -> Result<(), ContainerError> {
  let uploaded_algorithm = uploaded_algorithm.ok_or(ContainerError::NotUploaded)?;
  if committed_algorithm != uploaded_algorithm {
    return Err(ContainerError::AlgorithmHashMismatch {
      committed: committed_algorithm.to_string(),
      uploaded: uploaded_algorithm.to_string(),
    });
  }

  let mut committed: Vec<String> = committed_data.to_vec();
  let mut uploaded: Vec<String> = uploaded_data.to_vec();
  committed.sort();
  uploaded.sort();
  if committed != uploaded {
    return Err(ContainerError::DataHashMismatch {
      committed,
      uploaded,
    });
  }

  Ok(())
}
