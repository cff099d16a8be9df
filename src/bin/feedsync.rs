//! feedsync CLI
//!
//! Runs the reconciliation engine as a foreground worker or one-shot, and
//! inspects the local queue and usage counters.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feedsync::config::{
    default_data_dir, expand_path, CredentialConfig, FeedSyncConfig, RemoteConfig, SyncConfig,
};
use feedsync::storage::{QueueStore, Storage, UsageStore};
use feedsync::sync::SyncEngine;
use feedsync::types::{ActionType, Credential};

#[derive(Parser)]
#[command(name = "feedsync")]
#[command(about = "Read/starred state reconciliation for a personal feed reader")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, env = "FEEDSYNC_DB_PATH")]
    db_path: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    sync: SyncArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SyncArgs {
    /// Delay between periodic cycles
    #[arg(long, env = "FEEDSYNC_SYNC_INTERVAL_MS", default_value = "300000")]
    sync_interval_ms: u64,
    /// Queued changes needed before a cycle runs
    #[arg(long, env = "FEEDSYNC_MIN_CHANGES", default_value = "10")]
    min_changes: usize,
    /// Oldest-entry age that forces a cycle
    #[arg(long, env = "FEEDSYNC_STALENESS_THRESHOLD_MS", default_value = "900000")]
    staleness_threshold_ms: u64,
    /// Item ids per remote call
    #[arg(long, env = "FEEDSYNC_BATCH_SIZE", default_value = "50")]
    batch_size: usize,
    /// Attempts before an entry is considered failed
    #[arg(long, env = "FEEDSYNC_MAX_RETRIES", default_value = "5")]
    max_retries: u32,
    #[arg(long, env = "FEEDSYNC_BASE_BACKOFF_MS", default_value = "60000")]
    base_backoff_ms: u64,
    #[arg(long, env = "FEEDSYNC_REQUEST_TIMEOUT_MS", default_value = "30000")]
    request_timeout_ms: u64,
}

impl SyncArgs {
    fn to_config(&self) -> SyncConfig {
        SyncConfig {
            sync_interval_ms: self.sync_interval_ms,
            min_changes: self.min_changes,
            staleness_threshold_ms: self.staleness_threshold_ms,
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            base_backoff_ms: self.base_backoff_ms,
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}

/// Remote service and credential settings, only needed by commands that talk to it
#[derive(Args)]
struct RemoteArgs {
    #[arg(long, env = "FEEDSYNC_SERVICE", default_value = "inoreader")]
    service: String,
    #[arg(
        long,
        env = "FEEDSYNC_API_BASE_URL",
        default_value = "https://www.inoreader.com/reader/api/0"
    )]
    api_base_url: String,
    #[arg(
        long,
        env = "FEEDSYNC_TOKEN_URL",
        default_value = "https://www.inoreader.com/oauth2/token"
    )]
    token_url: String,
    #[arg(long, env = "FEEDSYNC_CLIENT_ID", default_value = "")]
    client_id: String,
    #[arg(long, env = "FEEDSYNC_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    client_secret: String,
    /// Encrypted credential file
    #[arg(long, env = "FEEDSYNC_CREDENTIAL_PATH")]
    credential_path: Option<String>,
    /// 64 hex chars, base64 of 32 bytes, or a passphrase
    #[arg(long, env = "FEEDSYNC_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic sync timer until Ctrl-C
    Run {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Run one manual sync cycle
    Sync {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Show queue statistics
    Stats,
    /// Delete entries that exhausted their retries
    ClearFailed,
    /// Queue a read/starred mutation
    Enqueue {
        /// read, unread, star or unstar
        action: ActionType,
        /// Remote item id
        remote_item_id: String,
    },
    /// Show API usage for a day
    Usage {
        #[arg(long, env = "FEEDSYNC_SERVICE", default_value = "inoreader")]
        service: String,
        /// Day to show (UTC), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Encrypt and store a token set from the authorization flow
    ImportToken {
        #[command(flatten)]
        remote: RemoteArgs,
        /// JSON token response file, or - for stdin
        #[arg(default_value = "-")]
        file: String,
    },
}

/// Token endpoint response as saved by the authorization flow
#[derive(Deserialize)]
struct ImportedToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedsync=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

fn db_path(cli: &Cli) -> String {
    match &cli.db_path {
        Some(path) => expand_path(path).to_string_lossy().into_owned(),
        None => default_data_dir()
            .join("feedsync.db")
            .to_string_lossy()
            .into_owned(),
    }
}

fn build_config(cli: &Cli, remote: &RemoteArgs) -> anyhow::Result<FeedSyncConfig> {
    let Some(encryption_key) = remote.encryption_key.clone() else {
        bail!("an encryption key is required (--encryption-key or FEEDSYNC_ENCRYPTION_KEY)");
    };
    let credential_path: PathBuf = match &remote.credential_path {
        Some(path) => expand_path(path),
        None => default_data_dir().join("credentials.json"),
    };

    let config = FeedSyncConfig {
        db_path: db_path(cli),
        sync: cli.sync.to_config(),
        remote: RemoteConfig {
            service: remote.service.clone(),
            api_base_url: remote.api_base_url.clone(),
            token_url: remote.token_url.clone(),
            client_id: remote.client_id.clone(),
            client_secret: remote.client_secret.clone(),
        },
        credentials: CredentialConfig {
            credential_path,
            encryption_key,
        },
    };
    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_token_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read token from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(expand_path(file))
            .with_context(|| format!("failed to read token file {}", file))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match &cli.command {
        Commands::Run { remote } => {
            let engine = SyncEngine::builder(build_config(&cli, remote)?).build()?;
            engine
                .tokens()
                .load_credential()
                .context("cannot start without a stored credential")?;

            engine.start();
            tracing::info!("feedsync running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            engine.stop();
            tracing::info!("Shutting down");
        }
        Commands::Sync { remote } => {
            let engine = SyncEngine::builder(build_config(&cli, remote)?).build()?;
            let outcome = engine.orchestrator().trigger_manual_sync().await?;
            print_json(&outcome)?;
        }
        Commands::Stats => {
            let storage = Storage::open(&db_path(&cli))?;
            print_json(&storage.stats(cli.sync.max_retries)?)?;
        }
        Commands::ClearFailed => {
            let storage = Storage::open(&db_path(&cli))?;
            let removed = storage.delete_failed(cli.sync.max_retries)?;
            println!("Removed {} failed entries", removed.len());
        }
        Commands::Enqueue {
            action,
            remote_item_id,
        } => {
            let storage = Storage::open(&db_path(&cli))?;
            let entry = storage.enqueue(*action, remote_item_id, Utc::now())?;
            print_json(&entry)?;
        }
        Commands::Usage { service, date } => {
            let storage = Storage::open(&db_path(&cli))?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            match storage.find(service, date)? {
                Some(record) => print_json(&record)?,
                None => println!("No usage recorded for {} on {}", service, date),
            }
        }
        Commands::ImportToken { remote, file } => {
            let raw = read_token_input(file)?;
            let token: ImportedToken =
                serde_json::from_str(&raw).context("token input is not a valid token response")?;

            let engine = SyncEngine::builder(build_config(&cli, remote)?).build()?;
            let credential = Credential {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_in: token.expires_in,
                token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
                scope: token.scope,
                created_at: token.created_at.unwrap_or_else(Utc::now),
            };
            engine.tokens().store_initial(credential)?;
            println!(
                "Stored credential at {}",
                engine.tokens().store().path().display()
            );
        }
    }

    Ok(())
}
