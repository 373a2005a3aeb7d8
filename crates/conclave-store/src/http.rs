use async_trait::async_trait;
use reqwest::StatusCode;

use crate::{DataStore, StoreError};

/// Remote store addressed by absolute URLs.
///
/// `fetch` issues a GET against the address, `store` a PUT. The remote end
/// is any object store that speaks plain HTTP; authentication, if required,
/// is carried in the address.
pub struct HttpStore {
  client: reqwest::Client,
}

impl HttpStore {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

impl Default for HttpStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl DataStore for HttpStore {
  async fn fetch(&self, address: &str) -> Result<Vec<u8>, StoreError> {
    let response = self
      .client
      .get(address)
      .send()
      .await
      .map_err(|e| StoreError::Transfer(e.to_string()))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Err(StoreError::NotFound(address.to_string()));
    }
    if !response.status().is_success() {
      return Err(StoreError::Transfer(format!(
        "GET {address} returned {}",
        response.status()
      )));
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| StoreError::Transfer(e.to_string()))?;
    Ok(bytes.to_vec())
  }

  async fn store(&self, address: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
    let response = self
      .client
      .put(address)
      .body(bytes)
      .send()
      .await
      .map_err(|e| StoreError::Transfer(e.to_string()))?;

    if !response.status().is_success() {
      return Err(StoreError::Transfer(format!(
        "PUT {address} returned {}",
        response.status()
      )));
    }

    Ok(())
  }
}
