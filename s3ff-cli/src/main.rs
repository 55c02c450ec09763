use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use s3ff_client::{
    CancellationToken, ClientConfig, FieldId, FileSource, ProgressEvent, UploadClient,
    UploadOutcome, UploadPhase, ENV_PREFIX,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "s3ff", version, about = "Upload files into S3 file fields")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print the value to store in the field
    Upload(UploadArgs),
}

#[derive(clap::Args, Debug)]
struct UploadArgs {
    /// File to upload
    path: PathBuf,

    /// Field the file is uploaded into, e.g. `core.Video.blob`
    #[arg(long)]
    field_id: String,

    /// Backend API root; overrides S3FF__BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Backend bearer token; overrides S3FF__AUTH_TOKEN
    #[arg(long)]
    token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl UploadArgs {
    fn config(&self) -> Result<ClientConfig> {
        self.config_from(std::env::vars())
    }

    /// Environment first, flags on top
    fn config_from<I>(&self, vars: I) -> Result<ClientConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: Vec<(String, String)> = vars.into_iter().collect();
        if let Some(url) = &self.base_url {
            vars.push((format!("{ENV_PREFIX}BASE_URL"), url.clone()));
        }
        let mut config = ClientConfig::from_vars(vars)
            .context("invalid configuration (set S3FF__BASE_URL or pass --base-url)")?;

        if let Some(token) = &self.token {
            config = config.with_auth_token(token.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

/// Log every tenth of the file once
fn log_progress(event: ProgressEvent, last_decile: &AtomicU64) {
    match (event.phase, event.loaded, event.total) {
        (UploadPhase::Sending, Some(loaded), Some(total)) if total > 0 => {
            let decile = loaded * 10 / total;
            if last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
                tracing::info!(loaded, total, "{}% sent", decile * 10);
            }
        }
        (phase, _, _) => tracing::info!(?phase, "upload progress"),
    }
}

async fn upload(args: UploadArgs) -> Result<UploadOutcome> {
    let config = args.config()?;
    let source = FileSource::open(&args.path)
        .await
        .with_context(|| format!("cannot open {}", args.path.display()))?;

    let last_decile = AtomicU64::new(0);
    let client = UploadClient::from_config(&config)?
        .with_progress(move |event: ProgressEvent| log_progress(event, &last_decile));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, abandoning upload");
            on_signal.cancel();
        }
    });

    let outcome = client
        .upload_file_with_cancel(&source, &FieldId::from(args.field_id.as_str()), &cancel)
        .await?;
    Ok(outcome)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Upload(args) => match upload(args).await {
            Ok(outcome) => {
                println!("{}", serde_json::to_string(&outcome)?);
                if outcome.is_successful() {
                    Ok(())
                } else {
                    anyhow::bail!("upload aborted")
                }
            }
            Err(err) => {
                println!("{}", serde_json::to_string(&UploadOutcome::errored())?);
                Err(err)
            }
        },
    }
}
