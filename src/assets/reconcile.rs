//! Reconciliation sweep: adopt working-zone files that no live asset row points at.
//!
//! Safe next to live traffic. Staged `.partial-*` files are never looked at. Names a lifecycle
//! operation of this coordinator still holds are skipped, and so are files changed more recently
//! than `reconcile_min_age_ms`, which covers writers in other processes: the config keeps that age
//! above the metadata timeout. A lost race on the unique name counts as tracked.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{StorageError, StorageResult};

use super::context::OpContext;
use super::coordinator::FileOperationCoordinator;
use super::fsops;
use super::paths::{is_staging_file_name, LogicalName, PathResolver};
use super::types::{FileAction, HistoryEntry, NewAsset};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub scanned: u64,
    pub tracked: u64,
    /// In dry-run mode: would have been adopted.
    pub adopted: u64,
    pub skipped_in_flight: u64,
    pub rejected: u64,
    pub failed: u64,
    pub adopted_names: Vec<String>,
}

struct Candidate {
    path: PathBuf,
    name: Option<LogicalName>,
    last_change: SystemTime,
}

/// Latest of mtime and (on unix) ctime. Hard-link publication and moves touch ctime only.
fn last_change(meta: &std::fs::Metadata) -> SystemTime {
    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let changed = UNIX_EPOCH + Duration::new(meta.ctime().max(0) as u64, meta.ctime_nsec().clamp(0, 999_999_999) as u32);
        modified.max(changed)
    }
    #[cfg(not(unix))]
    {
        modified
    }
}

fn scan(resolver: &PathResolver) -> Vec<Candidate> {
    let mut out = Vec::new();
    let walker = WalkDir::new(resolver.working_root()).follow_links(false).sort_by_file_name().into_iter().filter_entry(|e| {
        e.depth() == 0 || !e.file_name().to_str().map(is_staging_file_name).unwrap_or(false)
    });
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(target: "mediastore::reconcile", "walk error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let last_change = match entry.metadata() {
            Ok(m) => last_change(&m),
            Err(e) => {
                warn!(target: "mediastore::reconcile", "cannot stat '{}': {}", entry.path().display(), e);
                continue;
            }
        };
        out.push(Candidate { name: resolver.logical_name_for(entry.path()), path: entry.into_path(), last_change });
    }
    out
}

/// Walk the working zone once and adopt untracked files. With `dry_run` nothing is written.
pub async fn reconcile_working_zone(coord: &FileOperationCoordinator, dry_run: bool, ctx: &OpContext) -> StorageResult<ReconcileReport> {
    const OP: &str = "reconcile";
    let mut rep = ReconcileReport { dry_run, ..Default::default() };
    let root = coord.resolver().working_root().to_path_buf();
    if !tokio::fs::try_exists(&root).await.map_err(|e| StorageError::write_failed(&root, e))? {
        return Ok(rep);
    }

    let resolver = coord.resolver().clone();
    let candidates = tokio::task::spawn_blocking(move || scan(&resolver))
        .await
        .map_err(|e| StorageError::write_failed(&root, io::Error::new(io::ErrorKind::Other, e)))?;

    let min_age = Duration::from_millis(coord.config().reconcile_min_age_ms);
    let user = coord.config().reconcile_user.clone();
    let now = SystemTime::now();

    for c in candidates {
        rep.scanned += 1;
        let Some(name) = c.name else {
            warn!(target: "mediastore::reconcile", corr = %ctx.correlation, "'{}' has no valid logical name", c.path.display());
            rep.rejected += 1;
            continue;
        };
        if now.duration_since(c.last_change).unwrap_or(Duration::ZERO) < min_age || coord.in_flight().is_claimed(&name) {
            rep.skipped_in_flight += 1;
            continue;
        }
        match coord.guarded(OP, ctx, coord.store().get_asset_by_name(&name)).await {
            Ok(_) => {
                rep.tracked += 1;
                continue;
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e @ StorageError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                warn!(target: "mediastore::reconcile", corr = %ctx.correlation, "lookup of '{}' failed: {}", name, e);
                rep.failed += 1;
                continue;
            }
        }

        let path = coord.resolver().resolve_working_path(&name);
        let bytes = match fsops::read_all(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Moved away (rename/delete) since the walk.
                rep.tracked += 1;
                continue;
            }
            Err(e) => {
                warn!(target: "mediastore::reconcile", corr = %ctx.correlation, "cannot read '{}': {}", path, e);
                rep.failed += 1;
                continue;
            }
        };
        let probed = coord.codec().validate_format(&name, &bytes).and_then(|_| coord.codec().probe(&bytes));
        let dims = match probed {
            Ok(d) => d,
            Err(e) => {
                warn!(target: "mediastore::reconcile", corr = %ctx.correlation, "'{}' rejected by codec: {}", name, e);
                rep.rejected += 1;
                continue;
            }
        };

        if dry_run {
            rep.adopted += 1;
            rep.adopted_names.push(name.to_string());
            continue;
        }
        let new = NewAsset { fullname: name.clone(), dimensions: dims, disk_size: bytes.len() as u64, created_by: user.clone() };
        match coord.guarded(OP, ctx, coord.store().create_asset(new, HistoryEntry::new(FileAction::Create, &user))).await {
            Ok((asset, _)) => {
                info!(target: "mediastore::reconcile", corr = %ctx.correlation, "adopted '{}' as asset {}", name, asset.id);
                rep.adopted += 1;
                rep.adopted_names.push(name.to_string());
            }
            Err(StorageError::NameCollision(_)) => rep.tracked += 1,
            Err(e @ StorageError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                warn!(target: "mediastore::reconcile", corr = %ctx.correlation, "adopting '{}' failed: {}", name, e);
                rep.failed += 1;
            }
        }
    }
    crate::tprintln!(
        "MEDIASTORE reconcile ok dry_run={} scanned={} tracked={} adopted={} in_flight={} rejected={} failed={} [corr={}]",
        rep.dry_run, rep.scanned, rep.tracked, rep.adopted, rep.skipped_in_flight, rep.rejected, rep.failed, ctx.correlation
    );
    Ok(rep)
}
