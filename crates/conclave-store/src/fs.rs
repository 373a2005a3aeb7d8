use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::{DataStore, StoreError};

/// Filesystem store rooted at a staging directory.
///
/// Addresses are relative paths under the root; parent traversal and
/// absolute addresses are rejected so an address cannot escape the root.
pub struct LocalStore {
  root: PathBuf,
}

impl LocalStore {
  /// Create a store rooted at the given directory.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn resolve(&self, address: &str) -> Result<PathBuf, StoreError> {
    let relative = Path::new(address);
    let escapes = relative.components().any(|component| {
      matches!(
        component,
        Component::ParentDir | Component::RootDir | Component::Prefix(_)
      )
    });
    if address.is_empty() || escapes {
      return Err(StoreError::InvalidAddress(address.to_string()));
    }

    Ok(self.root.join(relative))
  }
}

#[async_trait]
impl DataStore for LocalStore {
  async fn fetch(&self, address: &str) -> Result<Vec<u8>, StoreError> {
    let path = self.resolve(address)?;
    fs::read(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(address.to_string())
      } else {
        StoreError::Io(e)
      }
    })
  }

  async fn store(&self, address: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
    let path = self.resolve(address)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }
    fs::write(&path, bytes).await?;
    Ok(())
  }
}
