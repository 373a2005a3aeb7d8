use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use conclave_container::Container;
use conclave_crypto::{CryptoError, Identity, encrypt, sign_args, verify_args};
use conclave_data::{AuthStatus, DataEngine, RequestInput, SharedData};
use conclave_ledger::{Ledger, OpContext, composite_key, split_composite_key};
use conclave_pipeline::{fan_in, generator};
use conclave_store::{DataStore, DataStoreType, HttpStore, LocalStore};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::download::{DownloadContext, DownloadedItem, PendingItem, download_stage};
use crate::{CreateRequest, EvidenceHash, ExecuteRequest, Task, TaskError};

const TASK_ID_INDEX: &str = "task~id";
const TASK_SERVICE: &str = "conclave_task";
const ALGORITHM_FILE: &str = "main";
const INDEX_MARK: &[u8] = &[0x00];

/// Filesystem roots the orchestrator works under.
#[derive(Debug, Clone)]
pub struct TaskConfig {
  /// Root of the local data store: staged algorithm artifacts, local data
  /// addresses, and local result logs all resolve under it.
  pub staging_root: PathBuf,
  /// Root the containers stage their scratch directories under.
  pub scratch_root: PathBuf,
}

impl TaskConfig {
  /// Place both roots under one parent directory.
  pub fn under(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    Self {
      staging_root: root.join("staging"),
      scratch_root: root.join("container"),
    }
  }
}

impl Default for TaskConfig {
  fn default() -> Self {
    Self::under(std::env::temp_dir().join("conclave"))
  }
}

/// The trusted execution task orchestrator.
///
/// Holds the ledger it persists tasks in, the data engine it obtains
/// authorizations from, and the process-wide identity it requests and
/// unwraps keys with.
pub struct TaskService {
  ledger: Arc<dyn Ledger>,
  engine: Arc<DataEngine>,
  identity: Arc<Identity>,
  config: TaskConfig,
}

impl TaskService {
  pub fn new(
    ledger: Arc<dyn Ledger>,
    engine: Arc<DataEngine>,
    identity: Arc<Identity>,
    config: TaskConfig,
  ) -> Self {
    Self {
      ledger,
      engine,
      identity,
      config,
    }
  }

  /// The orchestrator's public identity, the requester of every bundled
  /// authorization.
  pub fn requester(&self) -> String {
    self.identity.public_hex()
  }

  /// Bundle data items and an algorithm into a task.
  ///
  /// Commits the content hash of every input as evidence, accumulates the
  /// owners as partners, and issues one authorization request per data item
  /// with the orchestrator identity as requester.
  pub async fn create(&self, op: &OpContext, req: CreateRequest) -> Result<Task, TaskError> {
    if req.data_ids.is_empty() {
      return Err(TaskError::Validation(
        "task data ids must be non-empty".to_string(),
      ));
    }
    require_non_empty("algorithm_id", &req.algorithm_id)?;
    require_non_empty("result_address", &req.result_address)?;

    let algorithm = self.resolve("algorithm", &req.algorithm_id).await?;
    let mut partners = BTreeSet::new();
    partners.insert(algorithm.owner.clone());

    let mut evidence = EvidenceHash {
      algorithm: algorithm.hash.clone(),
      ..EvidenceHash::default()
    };

    let mut datasets = Vec::with_capacity(req.data_ids.len());
    for data_id in &req.data_ids {
      let data = self.resolve("data", data_id).await?;
      evidence.data.push(data.hash.clone());
      partners.insert(data.owner.clone());
      datasets.push(data);
    }

    // Scope the result address by the task's own id so concurrent tasks
    // sharing one root never collide.
    let result_address = format!("{}/{}", req.result_address.trim_end_matches('/'), op.id);

    let requester = self.identity.public_hex();
    let mut data_notifications = BTreeMap::new();
    for data in &datasets {
      let proof = if data.is_signed() {
        Some(sign_args(
          &self.identity,
          &[data.id.as_str(), requester.as_str()],
        )?)
      } else {
        None
      };

      let notification = self
        .engine
        .request(
          op,
          RequestInput {
            data_id: data.id.clone(),
            requester: requester.clone(),
            proof,
          },
        )
        .await?;
      data_notifications.insert(data.id.clone(), notification.id);
    }

    let task = Task {
      id: op.id.clone(),
      data_ids: req.data_ids,
      algorithm_id: req.algorithm_id,
      container: None,
      result_address,
      data_notifications,
      created_seconds: op.seconds,
      submitted_seconds: op.seconds,
      evidence,
      requester,
      partners,
      executor: None,
    };

    self.save_task(&task, true).await?;
    info!(
      id = %task.id,
      data_count = task.data_ids.len(),
      partners = task.partners.len(),
      "task created"
    );
    Ok(task)
  }

  /// Fetch one task by id.
  pub async fn get(&self, id: &str) -> Result<Task, TaskError> {
    require_non_empty("id", id)?;
    let bytes = self
      .ledger
      .get(id)
      .await?
      .ok_or_else(|| TaskError::NotFound(format!("task does not exist, id: {id}")))?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  /// All tasks, via the task index.
  pub async fn get_all(&self) -> Result<Vec<Task>, TaskError> {
    let keys = self
      .ledger
      .range_by_prefix(TASK_ID_INDEX, &[TASK_SERVICE])
      .await?;

    let mut tasks = Vec::with_capacity(keys.len());
    for key in &keys {
      let (_, fields) = split_composite_key(key)?;
      let id = fields
        .last()
        .ok_or_else(|| TaskError::Validation(format!("malformed task index entry: {key:?}")))?;
      tasks.push(self.get(id).await?);
    }

    if tasks.is_empty() {
      return Err(TaskError::NotFound("no tasks exist".to_string()));
    }
    Ok(tasks)
  }

  /// Run a task inside a fresh container and distribute the results.
  #[instrument(
    name = "task_execute",
    skip(self, op, req),
    fields(task_id = %req.task_id, executor = %req.executor)
  )]
  pub async fn execute(&self, op: &OpContext, req: ExecuteRequest) -> Result<Task, TaskError> {
    require_non_empty("task_id", &req.task_id)?;
    require_non_empty("executor", &req.executor)?;

    let mut task = self.get(&req.task_id).await?;
    if !task.partners.contains(&req.executor) {
      return Err(TaskError::PermissionDenied {
        executor: req.executor,
      });
    }

    let algorithm_record = self.resolve("algorithm", &task.algorithm_id).await?;
    let pending = self.load_pending(&task).await?;

    // When any bundled input was signed, the execute call must be signed by
    // the executor; a proof supplied anyway is still verified.
    let inputs_signed = algorithm_record.is_signed()
      || pending.iter().any(|item| item.notification.data.is_signed());
    match &req.proof {
      Some(proof) => {
        let args = req.signed_args();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        verify_args(&arg_refs, proof, &req.executor)?;
      }
      None if inputs_signed => {
        return Err(TaskError::Signature(CryptoError::EmptySignatureSet));
      }
      None => {}
    }

    // Every input must be authorized before anything is downloaded; there
    // is no partial-success path.
    for item in &pending {
      if item.notification.status != AuthStatus::Authorized {
        let reason = if item.notification.refused_reason.is_empty() {
          format!("status is {}", item.notification.status)
        } else {
          item.notification.refused_reason.clone()
        };
        return Err(TaskError::Unauthorized {
          notification_id: item.notification.id.clone(),
          reason,
        });
      }
    }

    // The algorithm artifact is staged at the task's result address by the
    // transport layer before execute is called.
    let staging = LocalStore::new(&self.config.staging_root);
    let algorithm = staging
      .fetch(&format!("{}/{ALGORITHM_FILE}", task.result_address))
      .await?;

    let mut journal = String::new();
    journal.push_str("downloading data...\n");
    let items = self.download_all(&task, pending).await?;
    journal.push_str("data download complete\n");

    journal.push_str("creating trusted environment...\n");
    let mut container = req.container.create(&self.config.scratch_root).await?;
    let outcome =
      run_container_phases(container.as_mut(), algorithm, &items, &task.evidence, &mut journal)
        .await;

    // Cleanup is owed unconditionally; its own failure is logged and the
    // execution outcome stays authoritative.
    if let Err(destroy_err) = container.destroy().await {
      warn!(error = %destroy_err, "container destroy failed");
    }
    journal.push_str("trusted environment destroyed\n");

    let result = outcome?;

    task.evidence.result = hex::encode(Sha256::digest(&result));
    let log_bytes = journal.into_bytes();
    task.evidence.log = hex::encode(Sha256::digest(&log_bytes));

    self.distribute_logs(&items, &log_bytes).await?;

    task.container = Some(req.container);
    task.executor = Some(req.executor);
    task.submitted_seconds = op.seconds;
    self.save_task(&task, false).await?;

    info!(id = %task.id, result_hash = %task.evidence.result, "task executed");
    Ok(task)
  }

  async fn resolve(&self, role: &str, id: &str) -> Result<SharedData, TaskError> {
    self.engine.data_by_id(id).await.map_err(|err| match err {
      conclave_data::EngineError::NotFound(_) => {
        TaskError::NotFound(format!("failed to resolve {role}, id: {id}"))
      }
      other => TaskError::Engine(other),
    })
  }

  async fn load_pending(&self, task: &Task) -> Result<Vec<PendingItem>, TaskError> {
    let mut pending = Vec::with_capacity(task.data_ids.len());
    for data_id in &task.data_ids {
      let notification_id = task.data_notifications.get(data_id).ok_or_else(|| {
        TaskError::Validation(format!("task has no notification for data {data_id}"))
      })?;
      let notification = self.engine.notification_by_id(notification_id).await?;
      pending.push(PendingItem {
        data_id: data_id.clone(),
        notification,
      });
    }
    Ok(pending)
  }

  /// Pump every pending item through its own download stage and collect the
  /// outcomes. The first failure cancels the remaining in-flight items and
  /// is returned with its context intact.
  async fn download_all(
    &self,
    task: &Task,
    pending: Vec<PendingItem>,
  ) -> Result<Vec<DownloadedItem>, TaskError> {
    let cancel = CancellationToken::new();
    let ctx = Arc::new(DownloadContext {
      identity: self.identity.clone(),
      staging_root: self.config.staging_root.clone(),
      result_address: task.result_address.clone(),
    });

    let streams = pending
      .into_iter()
      .map(|item| {
        download_stage(
          cancel.clone(),
          ctx.clone(),
          generator(cancel.clone(), vec![item]),
        )
      })
      .collect();

    let mut merged = fan_in(cancel.clone(), streams);
    let mut items = Vec::new();
    while let Some(outcome) = merged.recv().await {
      match outcome {
        Ok(item) => items.push(item),
        Err(err) => {
          cancel.cancel();
          return Err(err);
        }
      }
    }

    // The outer operation is complete; release any idle forwarders.
    cancel.cancel();
    Ok(items)
  }

  /// Encrypt the execution log per owner and upload it via each item's
  /// store strategy.
  async fn distribute_logs(
    &self,
    items: &[DownloadedItem],
    log_bytes: &[u8],
  ) -> Result<(), TaskError> {
    for item in items {
      let payload = match &item.key {
        Some(key) => hex::encode(encrypt(log_bytes, key)?).into_bytes(),
        // The owner granted without key material; the log goes out the way
        // the data came in.
        None => log_bytes.to_vec(),
      };

      let store: Box<dyn DataStore> = match item.store_type {
        DataStoreType::Local => Box::new(LocalStore::new(&self.config.staging_root)),
        DataStoreType::Remote => Box::new(HttpStore::new()),
      };
      store.store(&item.log_address, payload).await?;
      info!(owner = %item.owner, address = %item.log_address, "execution log distributed");
    }
    Ok(())
  }

  async fn save_task(&self, task: &Task, save_index: bool) -> Result<(), TaskError> {
    let bytes = serde_json::to_vec(task)?;
    self.ledger.put(&task.id, bytes).await?;

    if save_index {
      let key = composite_key(TASK_ID_INDEX, &[TASK_SERVICE, &task.id])?;
      self.ledger.put(&key, INDEX_MARK.to_vec()).await?;
    }
    Ok(())
  }
}

async fn run_container_phases(
  container: &mut dyn Container,
  algorithm: Vec<u8>,
  items: &[DownloadedItem],
  evidence: &EvidenceHash,
  journal: &mut String,
) -> Result<Vec<u8>, TaskError> {
  journal.push_str("loading algorithm and data...\n");
  let data: Vec<Vec<u8>> = items.iter().map(|item| item.plaintext.clone()).collect();
  container.upload(algorithm, data).await?;

  journal.push_str("verifying input integrity...\n");
  container
    .verify(&evidence.algorithm, &evidence.data)
    .map_err(|err| TaskError::Integrity(err.to_string()))?;
  journal.push_str("input integrity verified\n");

  journal.push_str("executing...\n");
  let result = container.execute().await?;
  journal.push_str("execution complete, result:\n");
  journal.push_str(&String::from_utf8_lossy(&result));
  if !journal.ends_with('\n') {
    journal.push('\n');
  }
  journal.push_str("destroying trusted environment...\n");

  Ok(result)
}

fn require_non_empty(name: &str, value: &str) -> Result<(), TaskError> {
  if value.is_empty() {
    return Err(TaskError::Validation(format!(
      "the {name} argument must be a non-empty string"
    )));
  }
  Ok(())
}
