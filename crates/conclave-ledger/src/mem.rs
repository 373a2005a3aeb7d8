use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::{Ledger, LedgerError, OpContext, composite_key};

/// In-memory ledger.
///
/// Keys are held in a `BTreeMap` so range scans come back in key order, the
/// same ordering contract a real ordered backend provides. Every put appends
/// to the key's history; delete removes the current value but keeps history.
#[derive(Debug, Default)]
pub struct MemLedger {
  state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
  entries: BTreeMap<String, Vec<u8>>,
  history: HashMap<String, Vec<Vec<u8>>>,
}

impl MemLedger {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    // A poisoned lock means a panic mid-write; the ledger state is no longer
    // trustworthy, so propagate the panic.
    self.state.lock().expect("ledger state poisoned")
  }
}

#[async_trait]
impl Ledger for MemLedger {
  async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), LedgerError> {
    let mut state = self.lock();
    state.entries.insert(key.to_string(), value.clone());
    state.history.entry(key.to_string()).or_default().push(value);
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
    Ok(self.lock().entries.get(key).cloned())
  }

  async fn delete(&self, key: &str) -> Result<(), LedgerError> {
    self.lock().entries.remove(key);
    Ok(())
  }

  async fn range_by_prefix(
    &self,
    index: &str,
    parts: &[&str],
  ) -> Result<Vec<String>, LedgerError> {
    let prefix = composite_key(index, parts)?;
    let state = self.lock();
    Ok(
      state
        .entries
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .map(|(key, _)| key.clone())
        .collect(),
    )
  }

  async fn history(&self, key: &str) -> Result<Vec<Vec<u8>>, LedgerError> {
    Ok(self.lock().history.get(key).cloned().unwrap_or_default())
  }

  fn begin_operation(&self) -> OpContext {
    let seconds = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs() as i64)
      .unwrap_or(0);

    OpContext {
      id: uuid::Uuid::new_v4().to_string(),
      seconds,
    }
  }
}
