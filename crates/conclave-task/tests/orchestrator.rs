//! End-to-end orchestrator tests: share → request → authorize → create →
//! execute, over the in-memory ledger with the local container.

use std::path::PathBuf;
use std::sync::Arc;

use conclave_container::ContainerKind;
use conclave_crypto::{Identity, decrypt, encrypt, shared_secret, sign_args};
use conclave_data::{
  AuthStatus, AuthorizeInput, DataEngine, Decision, EncryptedType, SharedData, UploadRequest,
};
use conclave_ledger::{Ledger, MemLedger};
use conclave_store::{DataStore, DataStoreType, LocalStore};
use conclave_task::{CreateRequest, ExecuteRequest, TaskConfig, TaskError, TaskService};
use sha2::{Digest, Sha256};

const CAT_ALGORITHM: &[u8] = b"#!/bin/sh\ncat \"$@\"\n";

struct World {
  ledger: Arc<MemLedger>,
  engine: Arc<DataEngine>,
  service: TaskService,
  staging: LocalStore,
  root: PathBuf,
}

fn world() -> World {
  let ledger = Arc::new(MemLedger::new());
  let engine = Arc::new(DataEngine::new(ledger.clone()));
  let identity = Arc::new(Identity::generate());
  let root = std::env::temp_dir()
    .join("conclave-task-tests")
    .join(uuid::Uuid::new_v4().to_string());
  let config = TaskConfig::under(&root);
  let staging = LocalStore::new(config.staging_root.clone());
  let service = TaskService::new(ledger.clone(), engine.clone(), identity, config);

  World {
    ledger,
    engine,
    service,
    staging,
    root,
  }
}

impl World {
  async fn upload_unsigned(&self, owner: &str, hash: &str) -> SharedData {
    let op = self.ledger.begin_operation();
    self
      .engine
      .upload(
        &op,
        UploadRequest {
          ciphertext: "-".to_string(),
          hash: hash.to_string(),
          description: "input".to_string(),
          owner: owner.to_string(),
          proof: None,
        },
      )
      .await
      .expect("upload failed")
  }

  async fn grant_local(&self, notification_id: &str, address: &str) {
    let op = self.ledger.begin_operation();
    self
      .engine
      .authorize(
        &op,
        AuthorizeInput {
          notification_id: notification_id.to_string(),
          decision: Decision::Grant {
            address: address.to_string(),
            store_type: DataStoreType::Local,
            encrypted_key: String::new(),
            encrypted_type: EncryptedType::UnEncrypted,
          },
          proof: None,
        },
      )
      .await
      .expect("authorize failed")
  }

  async fn cleanup(self) {
    let _ = tokio::fs::remove_dir_all(&self.root).await;
  }
}

fn sha_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

#[tokio::test]
async fn test_end_to_end_local_unencrypted() {
  let w = world();

  // Owner stages plaintext data; both parties register their assets.
  w.staging
    .store("inputs/alpha.bin", b"alpha\n".to_vec())
    .await
    .unwrap();
  let data = w.upload_unsigned("O", &sha_hex(b"alpha\n")).await;
  let algorithm = w.upload_unsigned("A", &sha_hex(CAT_ALGORITHM)).await;

  // Bundle them into a task.
  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id.clone()],
        algorithm_id: algorithm.id.clone(),
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  assert_eq!(task.id, op.id);
  assert_eq!(task.result_address, format!("results/{}", task.id));
  assert_eq!(task.evidence.algorithm, algorithm.hash);
  assert_eq!(task.evidence.data, vec![data.hash.clone()]);
  assert!(task.partners.contains("O") && task.partners.contains("A"));
  assert_eq!(task.requester, w.service.requester());

  let notification_id = task.data_notifications.get(&data.id).unwrap().clone();
  let notification = w.engine.notification_by_id(&notification_id).await.unwrap();
  assert_eq!(notification.status, AuthStatus::UnAuthorized);
  assert_eq!(notification.requester, task.requester);

  // Owner grants access, transport stages the algorithm artifact.
  w.grant_local(&notification_id, "inputs/alpha.bin").await;
  w.staging
    .store(
      &format!("{}/main", task.result_address),
      CAT_ALGORITHM.to_vec(),
    )
    .await
    .unwrap();

  // A partner executes in a local container.
  let op = w.ledger.begin_operation();
  let executed = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id.clone(),
        executor: "O".to_string(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap();

  assert_eq!(executed.executor.as_deref(), Some("O"));
  assert_eq!(executed.container, Some(ContainerKind::Local));
  assert_eq!(executed.evidence.result, sha_hex(b"alpha\n"));
  assert!(!executed.evidence.log.is_empty());

  // The execution log was distributed to the data owner, and its hash is
  // the committed log evidence.
  let log = w
    .staging
    .fetch(&format!("{}/O.log", task.result_address))
    .await
    .unwrap();
  let text = String::from_utf8(log).unwrap();
  assert!(text.contains("execution complete"));
  assert_eq!(sha_hex(text.as_bytes()), executed.evidence.log);

  // The executed task is what the ledger now holds.
  assert_eq!(w.service.get(&task.id).await.unwrap(), executed);

  w.cleanup().await;
}

#[tokio::test]
async fn test_end_to_end_encrypted_payload() {
  let w = world();
  let owner = Identity::generate();
  let owner_hex = owner.public_hex();

  // The owner encrypts the payload with the key agreed against the
  // orchestrator and stages it hex-encoded.
  let key = shared_secret(&owner, &w.service.requester()).unwrap();
  let ciphertext = hex::encode(encrypt(b"sealed\n", &key).unwrap());
  w.staging
    .store("inputs/sealed.bin", ciphertext.into_bytes())
    .await
    .unwrap();

  let data = w.upload_unsigned(&owner_hex, &sha_hex(b"sealed\n")).await;
  let algorithm = w.upload_unsigned("A", &sha_hex(CAT_ALGORITHM)).await;

  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id.clone()],
        algorithm_id: algorithm.id.clone(),
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  let notification_id = task.data_notifications.get(&data.id).unwrap().clone();
  let op = w.ledger.begin_operation();
  w.engine
    .authorize(
      &op,
      AuthorizeInput {
        notification_id,
        decision: Decision::Grant {
          address: "inputs/sealed.bin".to_string(),
          store_type: DataStoreType::Local,
          encrypted_key: owner_hex.clone(),
          encrypted_type: EncryptedType::DataOnly,
        },
        proof: None,
      },
    )
    .await
    .unwrap();

  w.staging
    .store(
      &format!("{}/main", task.result_address),
      CAT_ALGORITHM.to_vec(),
    )
    .await
    .unwrap();

  let op = w.ledger.begin_operation();
  let executed = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id.clone(),
        executor: "A".to_string(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap();

  // The container saw the decrypted plaintext.
  assert_eq!(executed.evidence.result, sha_hex(b"sealed\n"));

  // The owner's log came back encrypted under the same agreed key.
  let log = w
    .staging
    .fetch(&format!("{}/{owner_hex}.log", task.result_address))
    .await
    .unwrap();
  let sealed = hex::decode(String::from_utf8(log).unwrap()).unwrap();
  let journal = decrypt(&sealed, &key).unwrap();
  let journal = String::from_utf8(journal).unwrap();
  assert!(journal.contains("input integrity verified"));
  assert_eq!(sha_hex(journal.as_bytes()), executed.evidence.log);

  w.cleanup().await;
}

#[tokio::test]
async fn test_two_items_are_both_fed_to_the_algorithm() {
  let w = world();

  // Identical plaintext under two owners keeps the concatenation
  // deterministic while download order stays unspecified.
  w.staging
    .store("inputs/one.bin", b"x\n".to_vec())
    .await
    .unwrap();
  w.staging
    .store("inputs/two.bin", b"x\n".to_vec())
    .await
    .unwrap();
  let first = w.upload_unsigned("O1", &sha_hex(b"x\n")).await;
  let second = w.upload_unsigned("O2", &sha_hex(b"x\n")).await;
  let algorithm = w.upload_unsigned("A", &sha_hex(CAT_ALGORITHM)).await;

  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![first.id.clone(), second.id.clone()],
        algorithm_id: algorithm.id.clone(),
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();
  assert_eq!(task.data_notifications.len(), 2);

  w.grant_local(
    &task.data_notifications.get(&first.id).unwrap().clone(),
    "inputs/one.bin",
  )
  .await;
  w.grant_local(
    &task.data_notifications.get(&second.id).unwrap().clone(),
    "inputs/two.bin",
  )
  .await;
  w.staging
    .store(
      &format!("{}/main", task.result_address),
      CAT_ALGORITHM.to_vec(),
    )
    .await
    .unwrap();

  let op = w.ledger.begin_operation();
  let executed = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id.clone(),
        executor: "O1".to_string(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap();

  assert_eq!(executed.evidence.result, sha_hex(b"x\nx\n"));

  // Both owners received a log.
  for owner in ["O1", "O2"] {
    w.staging
      .fetch(&format!("{}/{owner}.log", task.result_address))
      .await
      .unwrap();
  }

  w.cleanup().await;
}

#[tokio::test]
async fn test_create_rejects_empty_and_unknown_inputs() {
  let w = world();
  let algorithm = w.upload_unsigned("A", "h").await;

  let op = w.ledger.begin_operation();
  let err = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: Vec::new(),
        algorithm_id: algorithm.id.clone(),
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap_err();
  assert!(matches!(err, TaskError::Validation(_)));

  let op = w.ledger.begin_operation();
  let err = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec!["no-such-data".to_string()],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap_err();
  assert!(matches!(err, TaskError::NotFound(_)));
  assert!(err.to_string().contains("no-such-data"));

  w.cleanup().await;
}

#[tokio::test]
async fn test_execute_requires_partnership() {
  let w = world();
  let data = w.upload_unsigned("O", "h").await;
  let algorithm = w.upload_unsigned("A", "ha").await;

  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  let op = w.ledger.begin_operation();
  let err = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id,
        executor: "stranger".to_string(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap_err();
  assert!(matches!(err, TaskError::PermissionDenied { .. }));

  w.cleanup().await;
}

#[tokio::test]
async fn test_execute_fails_on_refused_input_with_reason() {
  let w = world();
  let granted = w.upload_unsigned("O1", "h1").await;
  let refused = w.upload_unsigned("O2", "h2").await;
  let algorithm = w.upload_unsigned("A", "ha").await;

  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![granted.id.clone(), refused.id.clone()],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  w.grant_local(
    &task.data_notifications.get(&granted.id).unwrap().clone(),
    "inputs/one.bin",
  )
  .await;

  let op = w.ledger.begin_operation();
  w.engine
    .authorize(
      &op,
      AuthorizeInput {
        notification_id: task.data_notifications.get(&refused.id).unwrap().clone(),
        decision: Decision::Refuse {
          reason: "not for joint computation".to_string(),
        },
        proof: None,
      },
    )
    .await
    .unwrap();

  let op = w.ledger.begin_operation();
  let err = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id,
        executor: "O1".to_string(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap_err();

  match err {
    TaskError::Unauthorized { reason, .. } => {
      assert_eq!(reason, "not for joint computation");
    }
    other => panic!("expected Unauthorized, got {other}"),
  }

  w.cleanup().await;
}

#[tokio::test]
async fn test_execute_fails_integrity_on_stale_commitment() {
  let w = world();

  // The committed hash does not match what the address actually serves.
  w.staging
    .store("inputs/drifted.bin", b"new contents\n".to_vec())
    .await
    .unwrap();
  let data = w.upload_unsigned("O", &sha_hex(b"old contents\n")).await;
  let algorithm = w.upload_unsigned("A", &sha_hex(CAT_ALGORITHM)).await;

  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id.clone()],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  w.grant_local(
    &task.data_notifications.get(&data.id).unwrap().clone(),
    "inputs/drifted.bin",
  )
  .await;
  w.staging
    .store(
      &format!("{}/main", task.result_address),
      CAT_ALGORITHM.to_vec(),
    )
    .await
    .unwrap();

  let op = w.ledger.begin_operation();
  let err = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id.clone(),
        executor: "O".to_string(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap_err();
  assert!(matches!(err, TaskError::Integrity(_)));

  // The task keeps its pre-execution state: no executor, no result hash.
  let task = w.service.get(&task.id).await.unwrap();
  assert!(task.executor.is_none());
  assert!(task.evidence.result.is_empty());

  w.cleanup().await;
}

#[tokio::test]
async fn test_signed_inputs_require_signed_execute() {
  let w = world();
  let owner = Identity::generate();
  let owner_hex = owner.public_hex();

  // Owner uploads signed data.
  let upload_args = ["-", "h", "input", owner_hex.as_str()];
  let op = w.ledger.begin_operation();
  let data = w
    .engine
    .upload(
      &op,
      UploadRequest {
        ciphertext: "-".to_string(),
        hash: "h".to_string(),
        description: "input".to_string(),
        owner: owner_hex.clone(),
        proof: Some(sign_args(&owner, &upload_args).unwrap()),
      },
    )
    .await
    .unwrap();
  let algorithm = w.upload_unsigned("A", "ha").await;

  // Create succeeds: the orchestrator signs its own requests.
  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  // Executing without a signature is rejected before anything runs.
  let op = w.ledger.begin_operation();
  let err = w
    .service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id.clone(),
        executor: owner_hex.clone(),
        container: ContainerKind::Local,
        proof: None,
      },
    )
    .await
    .unwrap_err();
  assert!(matches!(err, TaskError::Signature(_)));

  w.cleanup().await;
}

#[tokio::test]
async fn test_get_all_scans_the_task_index() {
  let w = world();

  let err = w.service.get_all().await.unwrap_err();
  assert!(matches!(err, TaskError::NotFound(_)));

  let data = w.upload_unsigned("O", "h").await;
  let algorithm = w.upload_unsigned("A", "ha").await;
  let op = w.ledger.begin_operation();
  let task = w
    .service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await
    .unwrap();

  let tasks = w.service.get_all().await.unwrap();
  assert_eq!(tasks.len(), 1);
  assert_eq!(tasks[0].id, task.id);

  w.cleanup().await;
}
