use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conclave_container::ContainerKind;
use conclave_crypto::Identity;
use conclave_data::{AuthorizeInput, DataEngine, Decision, EncryptedType, UploadRequest};
use conclave_ledger::{Ledger, MemLedger};
use conclave_store::{DataStore, DataStoreType, LocalStore};
use conclave_task::{CreateRequest, ExecuteRequest, TaskConfig, TaskService};

/// Conclave - multi-party trusted data sharing and execution
#[derive(Parser)]
#[command(name = "conclave")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Directory the demo stages data and containers under
  /// (default: a fresh directory under the system temp dir)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the full sharing and execution flow against an in-memory ledger
  Demo {
    /// Execute in a sandboxed runtime instance instead of a local scratch
    /// directory
    #[arg(long)]
    sandboxed: bool,
  },

  /// Generate a fresh party identity
  Keygen,
}

const DEMO_ALGORITHM: &[u8] = b"#!/bin/sh\ncat \"$@\"\n";

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  let data_dir = cli
    .data_dir
    .unwrap_or_else(|| std::env::temp_dir().join("conclave-demo"));

  match cli.command {
    Some(Commands::Demo { sandboxed }) => {
      let kind = if sandboxed {
        ContainerKind::Sandboxed
      } else {
        ContainerKind::Local
      };
      run_demo(data_dir, kind).await?;
    }
    Some(Commands::Keygen) => {
      let identity = Identity::generate();
      println!("secret: {}", identity.secret_hex());
      println!("public: {}", identity.public_hex());
    }
    None => {
      println!("conclave - use --help to see available commands");
    }
  }

  Ok(())
}

async fn run_demo(data_dir: PathBuf, kind: ContainerKind) -> Result<()> {
  let ledger = Arc::new(MemLedger::new());
  let engine = Arc::new(DataEngine::new(ledger.clone()));
  let identity = Arc::new(Identity::generate());
  let config = TaskConfig::under(&data_dir);
  let staging = LocalStore::new(config.staging_root.clone());
  let service = TaskService::new(ledger.clone(), engine.clone(), identity, config);

  // Two parties: a data owner and an algorithm owner.
  let owner = Identity::generate();
  let algorithm_owner = Identity::generate();

  let plaintext = b"records for joint computation\n";
  staging
    .store("inputs/records.bin", plaintext.to_vec())
    .await
    .context("failed to stage demo data")?;

  let op = ledger.begin_operation();
  let data = engine
    .upload(
      &op,
      UploadRequest {
        ciphertext: "-".to_string(),
        hash: sha_hex(plaintext),
        description: "demo records".to_string(),
        owner: owner.public_hex(),
        proof: None,
      },
    )
    .await?;
  println!("shared data uploaded: {}", data.id);

  let op = ledger.begin_operation();
  let algorithm = engine
    .upload(
      &op,
      UploadRequest {
        ciphertext: "-".to_string(),
        hash: sha_hex(DEMO_ALGORITHM),
        description: "demo algorithm".to_string(),
        owner: algorithm_owner.public_hex(),
        proof: None,
      },
    )
    .await?;
  println!("algorithm uploaded:   {}", algorithm.id);

  let op = ledger.begin_operation();
  let task = service
    .create(
      &op,
      CreateRequest {
        data_ids: vec![data.id.clone()],
        algorithm_id: algorithm.id,
        result_address: "results".to_string(),
      },
    )
    .await?;
  println!("task created:         {}", task.id);

  // The owner grants the orchestrator's request.
  let notification_id = task
    .data_notifications
    .get(&data.id)
    .expect("task tracks one notification per data id")
    .clone();
  let op = ledger.begin_operation();
  engine
    .authorize(
      &op,
      AuthorizeInput {
        notification_id,
        decision: Decision::Grant {
          address: "inputs/records.bin".to_string(),
          store_type: DataStoreType::Local,
          encrypted_key: String::new(),
          encrypted_type: EncryptedType::UnEncrypted,
        },
        proof: None,
      },
    )
    .await?;
  println!("access granted by the data owner");

  // Transport stages the algorithm artifact at the task's result address.
  staging
    .store(&format!("{}/main", task.result_address), DEMO_ALGORITHM.to_vec())
    .await
    .context("failed to stage algorithm artifact")?;

  let op = ledger.begin_operation();
  let executed = service
    .execute(
      &op,
      ExecuteRequest {
        task_id: task.id,
        executor: owner.public_hex(),
        container: kind,
        proof: None,
      },
    )
    .await?;

  println!("task executed");
  println!("  result hash: {}", executed.evidence.result);
  println!("  log hash:    {}", executed.evidence.log);
  println!(
    "  owner log:   {}",
    config_log_path(&data_dir, &executed.result_address, &owner.public_hex())
  );

  Ok(())
}

fn config_log_path(data_dir: &std::path::Path, result_address: &str, owner_hex: &str) -> String {
  data_dir
    .join("staging")
    .join(result_address)
    .join(format!("{owner_hex}.log"))
    .display()
    .to_string()
}

fn sha_hex(bytes: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  hex::encode(Sha256::digest(bytes))
}
