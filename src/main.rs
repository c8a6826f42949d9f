//!
//! mediastore maintenance binary
//! -----------------------------
//! Runs the reconciliation sweep and the metadata refresh against a snapshot-backed
//! metadata store, and prints audit-trail queries as JSON. Configuration comes from an
//! optional JSON file, then environment variables, then CLI flags.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mediastore::assets::{
    reconcile_working_zone, refresh_metadata, FileOperationCoordinator, ImageCodec, MemoryMetadataStore, OpContext,
};
use mediastore::{EffectiveConfig, GlobalStorageConfig, StorageOverrides};

const USAGE: &str = "usage: mediastore [--metadata PATH] [--config PATH] [--user NAME] [--request-id ID] <command>

commands:
  reconcile [--dry-run]   adopt untracked files in the working zone
  refresh-metadata        re-probe live assets and repair size/dimensions
  deleted                 list restorable delete records
  history <asset-id>      print the audit trail of one asset";

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Positional arguments: everything that is neither a flag nor a flag's value.
fn positionals(args: &[String]) -> Vec<String> {
    const WITH_VALUE: [&str; 4] = ["--metadata", "--config", "--user", "--request-id"];
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if WITH_VALUE.contains(&a.as_str()) {
            i += 2;
            continue;
        }
        if !a.starts_with("--") {
            out.push(a.clone());
        }
        i += 1;
    }
    out
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let pos = positionals(&args);
    let Some(command) = pos.first().cloned() else {
        bail!("missing command\n{}", USAGE);
    };

    let mut overrides = StorageOverrides::default();
    if let Some(path) = parse_str_arg(&args, "--config") {
        overrides = StorageOverrides::from_json_file(PathBuf::from(&path).as_path())?;
    }
    overrides = overrides.merge(StorageOverrides::from_env()?);
    let config = EffectiveConfig::from_layers(&GlobalStorageConfig::default(), &overrides);

    let metadata_path = parse_str_arg(&args, "--metadata")
        .or_else(|| env::var("MEDIASTORE_METADATA").ok())
        .unwrap_or_else(|| "data/metadata.bin".to_string());
    let user = parse_str_arg(&args, "--user").unwrap_or_else(whoami::username);
    let ctx = OpContext::new(&user).with_correlation(parse_str_arg(&args, "--request-id").as_deref());

    info!(
        target: "mediastore",
        "mediastore {}: working='{}' history='{}' metadata='{}' user='{}' [corr={}]",
        command,
        config.working_root.display(),
        config.history_root.display(),
        metadata_path,
        user,
        ctx.correlation
    );

    let store = MemoryMetadataStore::open(&metadata_path).with_context(|| format!("opening metadata snapshot '{}'", metadata_path))?;
    let codec = ImageCodec::new(&config.allowed_exts);
    let coord = FileOperationCoordinator::new(config, Arc::new(store), Arc::new(codec))?;

    match command.as_str() {
        "reconcile" => {
            let dry_run = has_flag(&args, "--dry-run");
            // Without a call limit a writer in another process may wait on its row for any length of time.
            if !dry_run && coord.config().metadata_timeout_ms == 0 {
                bail!("reconcile needs a non-zero metadata timeout (MEDIASTORE_METADATA_TIMEOUT_MS); use --dry-run to inspect");
            }
            print_json(&reconcile_working_zone(&coord, dry_run, &ctx).await?)
        }
        "refresh-metadata" => print_json(&refresh_metadata(&coord, &ctx).await?),
        "deleted" => print_json(&coord.get_deleted_files(&ctx).await?),
        "history" => {
            let id = pos.get(1).context("history needs an asset id")?;
            let id: u64 = id.parse().with_context(|| format!("invalid asset id '{}'", id))?;
            print_json(&coord.history_of(id, &ctx).await?)
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}
