//! Command-line uploader for spool.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use spool_core::AppConfig;
use spool_storage::{
    BufferedUploadStream, ChecksumAlgorithm, CompleteResponse, EncryptionMethod, InitiateRequest,
    upload_reader,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Source argument that reads from standard input.
const STDIN_SOURCE: &str = "-";

#[derive(Parser)]
#[command(name = "spoolctl")]
#[command(about = "Stream files into S3 multipart uploads")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, or standard input when PATH is "-"
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// File to upload, or "-" for standard input
    path: String,

    /// Destination bucket (overrides s3.bucket from config)
    #[arg(long)]
    bucket: Option<String>,

    /// Object key (default: the file name)
    #[arg(long)]
    key: Option<String>,

    /// Server-side encryption: aes256, aws:kms or aws:kms:dsse
    #[arg(long, value_parser = parse_sse)]
    sse: Option<EncryptionMethod>,

    /// KMS key id used with --sse aws:kms
    #[arg(long)]
    kms_key_id: Option<String>,

    /// Content type stored with the object
    #[arg(long)]
    content_type: Option<String>,

    /// User metadata as key=value (repeatable)
    #[arg(long = "metadata", value_parser = parse_metadata)]
    metadata: Vec<(String, String)>,

    /// Per-part checksum: crc32, crc32c, crc64nvme, sha1 or sha256
    #[arg(long, value_parser = parse_checksum)]
    checksum: Option<ChecksumAlgorithm>,

    /// Write buffer capacity in bytes
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// Minimum buffered bytes before a part is sent
    #[arg(long)]
    min_send_threshold: Option<usize>,

    /// S3 endpoint URL (overrides s3.endpoint from config)
    #[arg(long)]
    endpoint: Option<String>,

    /// AWS region (overrides s3.region from config)
    #[arg(long)]
    region: Option<String>,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Upload(args) => handle_upload_command(args).await,
    }
}

async fn handle_upload_command(args: UploadArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let bucket = args
        .bucket
        .clone()
        .or_else(|| config.s3.bucket.clone())
        .ok_or_else(|| anyhow!("no bucket given; pass --bucket or set s3.bucket"))?;
    let key = resolve_key(&args.path, args.key.as_deref())?;
    let request = build_request(bucket, key, &args);

    let client =
        spool_storage::from_config(&config.s3).context("failed to create S3 storage client")?;
    let mut stream = BufferedUploadStream::with_request(client, request, config.upload)
        .context("invalid upload settings")?;
    stream.on_uploaded_part(|part| {
        tracing::info!(part_number = part.part_number, "uploaded part");
    });

    let handle = stream.cancel_handle();
    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, aborting upload");
            interrupt.cancel();
        }
    });

    let result = if args.path == STDIN_SOURCE {
        upload_reader(stream, tokio::io::stdin()).await
    } else {
        let file = tokio::fs::File::open(&args.path)
            .await
            .with_context(|| format!("failed to open {}", args.path))?;
        upload_reader(stream, file).await
    };

    if handle.is_cancelled() {
        bail!("upload cancelled; the multipart upload was aborted");
    }
    let response = result.context("upload failed")?;
    print_completion(&response)
}

fn print_completion(response: &CompleteResponse) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("failed to encode result")?;
    println!("{json}");
    Ok(())
}

/// Layer the config file (if any) under `SPOOL_` environment variables.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if let Some(path) = path {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SPOOL_").split("__"));

    figment
        .extract()
        .map_err(|err| anyhow!(err).context("failed to load configuration"))
}

fn apply_overrides(config: &mut AppConfig, args: &UploadArgs) {
    if let Some(endpoint) = &args.endpoint {
        config.s3.endpoint = Some(endpoint.clone());
    }
    if let Some(region) = &args.region {
        config.s3.region = Some(region.clone());
    }
    if let Some(capacity) = args.buffer_capacity {
        config.upload.buffer_capacity = capacity;
    }
    if let Some(threshold) = args.min_send_threshold {
        config.upload.min_send_threshold = threshold;
    }
}

fn resolve_key(path: &str, key: Option<&str>) -> Result<String> {
    if let Some(key) = key {
        return Ok(key.to_string());
    }
    if path == STDIN_SOURCE {
        bail!("--key is required when uploading from standard input");
    }
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cannot derive an object key from {path}; pass --key"))
}

fn build_request(bucket: String, key: String, args: &UploadArgs) -> InitiateRequest {
    let mut request = InitiateRequest::new(bucket, key);
    if let Some(content_type) = &args.content_type {
        request = request.with_content_type(content_type);
    }
    for (name, value) in &args.metadata {
        request = request.with_metadata(name, value);
    }
    if let Some(sse) = &args.sse {
        request = request.with_encryption(sse.clone());
    }
    if let Some(kms_key_id) = &args.kms_key_id {
        request = request.with_kms_key_id(kms_key_id);
    }
    if let Some(checksum) = args.checksum {
        request = request.with_checksum_algorithm(checksum);
    }
    request
}

fn parse_sse(value: &str) -> Result<EncryptionMethod, String> {
    match value.to_ascii_lowercase().as_str() {
        "aes256" => Ok(EncryptionMethod::Aes256),
        "aws:kms" => Ok(EncryptionMethod::AwsKms),
        "aws:kms:dsse" => Ok(EncryptionMethod::AwsKmsDsse),
        other => Err(format!(
            "unknown encryption method '{other}' (expected aes256, aws:kms or aws:kms:dsse)"
        )),
    }
}

fn parse_checksum(value: &str) -> Result<ChecksumAlgorithm, String> {
    ChecksumAlgorithm::parse(value).ok_or_else(|| format!("unknown checksum algorithm '{value}'"))
}

fn parse_metadata(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, val)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), val.to_string()))
        }
        _ => Err(format!("expected key=value, got '{value}'")),
    }
}
