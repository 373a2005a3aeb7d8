use std::collections::{BTreeMap, BTreeSet};

use conclave_container::ContainerKind;
use conclave_crypto::Proof;
use serde::{Deserialize, Serialize};

/// A trusted execution task.
///
/// Partners are every identity whose asset participates: the algorithm owner
/// and each data owner. The container, evidence result hashes, and executor
/// are filled in by execute; everything else is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub data_ids: Vec<String>,
  pub algorithm_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub container: Option<ContainerKind>,
  /// Task-scoped result address: the caller's root joined with the task id,
  /// so concurrent tasks never collide.
  pub result_address: String,
  /// data id → notification id, one authorization request per input.
  pub data_notifications: BTreeMap<String, String>,
  pub created_seconds: i64,
  pub submitted_seconds: i64,
  pub evidence: EvidenceHash,
  /// The orchestrator identity that issued the authorization requests.
  pub requester: String,
  pub partners: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub executor: Option<String>,
}

/// Hashes committed at creation and re-verified or filled at execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceHash {
  /// Data plaintext hashes, parallel to `Task::data_ids`.
  #[serde(default)]
  pub data: Vec<String>,
  pub algorithm: String,
  /// Hash of the raw execution result, set at execute time.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub result: String,
  /// Hash of the execution log, set at execute time.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub log: String,
}

/// Input to [`crate::TaskService::create`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
  pub data_ids: Vec<String>,
  pub algorithm_id: String,
  /// Root the task-scoped result address is derived from.
  pub result_address: String,
}

/// Input to [`crate::TaskService::execute`].
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
  pub task_id: String,
  /// Hex public key of the executing partner.
  pub executor: String,
  pub container: ContainerKind,
  /// Signature over `[task_id, executor, container key]`, keyed by
  /// `executor`. Required when any bundled input was signed.
  pub proof: Option<Proof>,
}

impl ExecuteRequest {
  /// The positional arguments a signing executor commits to.
  pub fn signed_args(&self) -> Vec<String> {
    vec![
      self.task_id.clone(),
      self.executor.clone(),
      self.container.as_key().to_string(),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_round_trips_losslessly() {
    let task = Task {
      id: "t1".to_string(),
      data_ids: vec!["d1".to_string(), "d2".to_string()],
      algorithm_id: "a1".to_string(),
      container: Some(ContainerKind::Local),
      result_address: "results/t1".to_string(),
      data_notifications: BTreeMap::from([
        ("d1".to_string(), "n1".to_string()),
        ("d2".to_string(), "n2".to_string()),
      ]),
      created_seconds: 10,
      submitted_seconds: 10,
      evidence: EvidenceHash {
        data: vec!["h1".to_string(), "h2".to_string()],
        algorithm: "ha".to_string(),
        result: String::new(),
        log: String::new(),
      },
      requester: "req".to_string(),
      partners: BTreeSet::from(["o1".to_string(), "o2".to_string()]),
      executor: None,
    };

    let encoded = serde_json::to_vec(&task).unwrap();
    let decoded: Task = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(decoded, task);
  }
}
