use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use crate::{Container, ContainerError, hash_hex, verify_hashes};

const ALGORITHM_FILE: &str = "main";

/// Development container: a throwaway scratch directory on the host.
///
/// Artifacts are written into a per-container directory, the algorithm runs
/// as a subprocess with the data file paths as its arguments, and destroy
/// removes the directory recursively. Isolation is the directory boundary
/// only, which is enough for development and tests.
pub struct LocalContainer {
  address: PathBuf,
  program: Option<PathBuf>,
  args: Vec<PathBuf>,
  algorithm_hash: Option<String>,
  data_hashes: Vec<String>,
  destroyed: bool,
}

impl LocalContainer {
  /// Create the scratch directory for a fresh container.
  pub async fn create(scratch_root: &Path) -> Result<Self, ContainerError> {
    let address = scratch_root.join(uuid::Uuid::new_v4().to_string());
    fs::create_dir_all(&address).await?;

    Ok(Self {
      address,
      program: None,
      args: Vec::new(),
      algorithm_hash: None,
      data_hashes: Vec::new(),
      destroyed: false,
    })
  }

  pub fn address(&self) -> &Path {
    &self.address
  }

  #[cfg(unix)]
  async fn mark_executable(path: &Path) -> Result<(), ContainerError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
  }

  #[cfg(not(unix))]
  async fn mark_executable(_path: &Path) -> Result<(), ContainerError> {
    Ok(())
  }
}

#[async_trait]
impl Container for LocalContainer {
  async fn upload(&mut self, algorithm: Vec<u8>, data: Vec<Vec<u8>>) -> Result<(), ContainerError> {
    if algorithm.is_empty() {
      return Err(ContainerError::EmptyAlgorithm);
    }
    if data.is_empty() {
      return Err(ContainerError::EmptyData);
    }

    self.algorithm_hash = Some(hash_hex(&algorithm));
    let program = self.address.join(ALGORITHM_FILE);
    fs::write(&program, &algorithm).await?;
    Self::mark_executable(&program).await?;
    self.program = Some(program);

    self.data_hashes = Vec::with_capacity(data.len());
    self.args = Vec::with_capacity(data.len());
    for (index, item) in data.iter().enumerate() {
      self.data_hashes.push(hash_hex(item));
      let arg = self.address.join(index.to_string());
      fs::write(&arg, item).await?;
      self.args.push(arg);
    }

    Ok(())
  }

  fn verify(&self, algorithm_hash: &str, data_hashes: &[String]) -> Result<(), ContainerError> {
    verify_hashes(
      algorithm_hash,
      data_hashes,
      self.algorithm_hash.as_deref(),
      &self.data_hashes,
    )
  }

  async fn execute(&mut self) -> Result<Vec<u8>, ContainerError> {
    let program = self.program.as_ref().ok_or(ContainerError::NotUploaded)?;

    let output = Command::new(program).args(&self.args).output().await?;
    if !output.status.success() {
      return Err(ContainerError::Execution(format!(
        "{}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    // Combined output, the way the algorithm would see its own terminal.
    let mut result = output.stdout;
    result.extend_from_slice(&output.stderr);
    Ok(result)
  }

  async fn destroy(&mut self) -> Result<(), ContainerError> {
    if self.destroyed {
      return Ok(());
    }
    self.destroyed = true;

    debug!(address = %self.address.display(), "removing container scratch directory");
    fs::remove_dir_all(&self.address).await?;
    Ok(())
  }

  fn public_key(&self) -> Option<String> {
    None
  }
}
