use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use crate::{Container, ContainerError, hash_hex, verify_hashes};

const ALGORITHM_FILE: &str = "main";
const GUEST_ROOT: &str = "/conclave";
const DEFAULT_IMAGE: &str = "alpine:3";

/// Sandboxed container: a throwaway runtime instance driven over the docker
/// CLI.
///
/// Artifacts are staged on the host, copied into a freshly provisioned
/// instance with networking disabled, and the algorithm is executed inside
/// it. Destroy force-removes the instance and the staging directory.
pub struct SandboxedContainer {
  image: String,
  stage: PathBuf,
  instance: Option<String>,
  guest_cmd: Vec<String>,
  algorithm_hash: Option<String>,
  data_hashes: Vec<String>,
  destroyed: bool,
}

impl SandboxedContainer {
  /// Create a sandboxed container staged under `scratch_root`, using the
  /// default runtime image.
  pub async fn create(scratch_root: &Path) -> Result<Self, ContainerError> {
    Self::with_image(scratch_root, DEFAULT_IMAGE).await
  }

  /// Create a sandboxed container backed by a specific runtime image.
  pub async fn with_image(scratch_root: &Path, image: &str) -> Result<Self, ContainerError> {
    let stage = scratch_root.join(uuid::Uuid::new_v4().to_string());
    fs::create_dir_all(&stage).await?;

    Ok(Self {
      image: image.to_string(),
      stage,
      instance: None,
      guest_cmd: Vec::new(),
      algorithm_hash: None,
      data_hashes: Vec::new(),
      destroyed: false,
    })
  }

  async fn docker(args: &[&str]) -> Result<String, ContainerError> {
    let output = Command::new("docker")
      .args(args)
      .output()
      .await
      .map_err(|e| ContainerError::Sandbox(format!("docker unavailable: {e}")))?;

    if !output.status.success() {
      return Err(ContainerError::Sandbox(format!(
        "docker {} failed: {}",
        args.first().unwrap_or(&""),
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
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
impl Container for SandboxedContainer {
  async fn upload(&mut self, algorithm: Vec<u8>, data: Vec<Vec<u8>>) -> Result<(), ContainerError> {
    if algorithm.is_empty() {
      return Err(ContainerError::EmptyAlgorithm);
    }
    if data.is_empty() {
      return Err(ContainerError::EmptyData);
    }

    self.algorithm_hash = Some(hash_hex(&algorithm));
    let program = self.stage.join(ALGORITHM_FILE);
    fs::write(&program, &algorithm).await?;
    Self::mark_executable(&program).await?;

    self.guest_cmd = vec![format!("{GUEST_ROOT}/{ALGORITHM_FILE}")];
    self.data_hashes = Vec::with_capacity(data.len());
    for (index, item) in data.iter().enumerate() {
      self.data_hashes.push(hash_hex(item));
      fs::write(self.stage.join(index.to_string()), item).await?;
      self.guest_cmd.push(format!("{GUEST_ROOT}/{index}"));
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
    if self.guest_cmd.is_empty() {
      return Err(ContainerError::NotUploaded);
    }

    // Provision the instance with networking disabled and keep it alive
    // while artifacts are copied in.
    let instance = Self::docker(&[
      "run",
      "-d",
      "--network",
      "none",
      &self.image,
      "tail",
      "-f",
      "/dev/null",
    ])
    .await?;
    self.instance = Some(instance.clone());
    debug!(instance = %instance, "provisioned sandbox instance");

    let source = format!("{}/.", self.stage.display());
    let target = format!("{instance}:{GUEST_ROOT}");
    Self::docker(&["cp", &source, &target]).await?;

    let mut exec_args = vec!["exec".to_string(), instance];
    exec_args.extend(self.guest_cmd.iter().cloned());
    let arg_refs: Vec<&str> = exec_args.iter().map(String::as_str).collect();

    let output = Command::new("docker")
      .args(&arg_refs)
      .output()
      .await
      .map_err(|e| ContainerError::Sandbox(format!("docker unavailable: {e}")))?;

    if !output.status.success() {
      return Err(ContainerError::Execution(format!(
        "{}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    let mut result = output.stdout;
    result.extend_from_slice(&output.stderr);
    Ok(result)
  }

  async fn destroy(&mut self) -> Result<(), ContainerError> {
    if self.destroyed {
      return Ok(());
    }
    self.destroyed = true;

    if let Some(instance) = self.instance.take() {
      Self::docker(&["rm", "-f", &instance]).await?;
    }
    fs::remove_dir_all(&self.stage).await?;
    Ok(())
  }

  fn public_key(&self) -> Option<String> {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn docker_available() -> bool {
    Command::new("docker")
      .arg("version")
      .output()
      .await
      .map(|output| output.status.success())
      .unwrap_or(false)
  }

  #[tokio::test]
  async fn test_sandbox_lifecycle() {
    if !docker_available().await {
      eprintln!("Skipping test: docker not available");
      return;
    }

    let root = std::env::temp_dir().join("conclave-sandbox-tests");
    let mut container = SandboxedContainer::create(&root).await.unwrap();

    let algorithm = b"#!/bin/sh\ncat \"$@\"\n".to_vec();
    container
      .upload(algorithm.clone(), vec![b"one\n".to_vec()])
      .await
      .unwrap();
    container
      .verify(&hash_hex(&algorithm), &[hash_hex(b"one\n")])
      .unwrap();

    let result = container.execute().await.unwrap();
    assert_eq!(result, b"one\n");

    container.destroy().await.unwrap();
  }

  #[tokio::test]
  async fn test_destroy_without_provisioned_instance() {
    let root = std::env::temp_dir().join("conclave-sandbox-tests");
    let mut container = SandboxedContainer::create(&root).await.unwrap();
    container.destroy().await.unwrap();
  }
}
