//! Physical-layer primitives for the working and history zones.
//!
//! Every write goes through a staged `.partial-*` sibling that is closed and synced before it
//! is published under its final name with a hard link. Publishing never replaces an existing
//! file, so a lost race surfaces as `AlreadyExists` instead of silently overwriting bytes.
//! Moves between volumes fall back to copy, digest check, publish, then source removal.

use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use super::paths::PhysicalPath;

/// Stable ETag for a byte slice using xxh3_64; returned as fixed-width lowercase hex.
pub fn etag_for_bytes(bytes: &[u8]) -> String {
    let h = xxh3_64(bytes);
    format!("{h:016x}")
}

/// Streaming xxh3 digest of a file.
pub async fn digest_file(path: &Path) -> io::Result<u64> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

pub async fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    Ok(())
}

/// Write `bytes` to a fresh staging sibling of `target`. The handle is closed on return.
pub async fn stage_bytes(target: &PhysicalPath, bytes: &[u8]) -> io::Result<PhysicalPath> {
    ensure_parent(target.as_path()).await?;
    let staged = target.staging_sibling();
    let res = async {
        let mut f = fs::OpenOptions::new().write(true).create_new(true).open(staged.as_path()).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
        Ok::<(), io::Error>(())
    }
    .await;
    if let Err(e) = res {
        let _ = fs::remove_file(staged.as_path()).await;
        return Err(e);
    }
    Ok(staged)
}

/// Give a staged file its final name without replacing anything already there.
pub async fn publish_staged(staged: &PhysicalPath, target: &PhysicalPath) -> io::Result<()> {
    match fs::hard_link(staged.as_path(), target.as_path()).await {
        Ok(()) => {
            if let Err(e) = fs::remove_file(staged.as_path()).await {
                warn!(target: "mediastore::fsops", "staged file '{}' left behind after publish: {}", staged, e);
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            // Filesystems without hard links: check-then-rename.
            debug!(target: "mediastore::fsops", "hard link unavailable for '{}' ({}), falling back to rename", target, e);
            if fs::try_exists(target.as_path()).await? {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("'{}' already exists", target)));
            }
            fs::rename(staged.as_path(), target.as_path()).await
        }
    }
}

/// Create `target` with `bytes`; fails with `AlreadyExists` when the name is taken.
pub async fn write_new(target: &PhysicalPath, bytes: &[u8]) -> io::Result<()> {
    let staged = stage_bytes(target, bytes).await?;
    if let Err(e) = publish_staged(&staged, target).await {
        let _ = fs::remove_file(staged.as_path()).await;
        return Err(e);
    }
    debug!(target: "mediastore::fsops", "write_new ok path='{}' size={}", target, bytes.len());
    Ok(())
}

/// Move `src` to `dst` without replacing an existing `dst`.
pub async fn move_no_clobber(src: &PhysicalPath, dst: &PhysicalPath) -> io::Result<()> {
    ensure_parent(dst.as_path()).await?;
    match fs::hard_link(src.as_path(), dst.as_path()).await {
        Ok(()) => {
            if let Err(e) = fs::remove_file(src.as_path()).await {
                let _ = fs::remove_file(dst.as_path()).await;
                return Err(e);
            }
            debug!(target: "mediastore::fsops", "move ok '{}' -> '{}'", src, dst);
            Ok(())
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => Err(e),
        Err(e) => {
            debug!(target: "mediastore::fsops", "link '{}' -> '{}' failed ({}), copying across volumes", src, dst, e);
            copy_verified_then_remove(src, dst).await
        }
    }
}

async fn copy_verified_then_remove(src: &PhysicalPath, dst: &PhysicalPath) -> io::Result<()> {
    if fs::try_exists(dst.as_path()).await? {
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("'{}' already exists", dst)));
    }
    let staged = dst.staging_sibling();
    let copied = async {
        fs::copy(src.as_path(), staged.as_path()).await?;
        fs::OpenOptions::new().write(true).open(staged.as_path()).await?.sync_all().await?;
        let (a, b) = (digest_file(src.as_path()).await?, digest_file(staged.as_path()).await?);
        if a != b {
            return Err(io::Error::new(io::ErrorKind::Other, format!("digest mismatch copying '{}'", src)));
        }
        publish_staged(&staged, dst).await
    }
    .await;
    if let Err(e) = copied {
        let _ = fs::remove_file(staged.as_path()).await;
        return Err(e);
    }
    if let Err(e) = fs::remove_file(src.as_path()).await {
        let _ = fs::remove_file(dst.as_path()).await;
        return Err(e);
    }
    debug!(target: "mediastore::fsops", "cross-volume move ok '{}' -> '{}'", src, dst);
    Ok(())
}

/// Remove a file; a file that is already gone counts as removed.
pub async fn remove_if_exists(path: &PhysicalPath) -> io::Result<bool> {
    match fs::remove_file(path.as_path()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Drop a staged file that will not be published. Failures are logged since the sweep skips staged files.
pub async fn discard_staged(staged: &PhysicalPath) {
    if let Err(e) = remove_if_exists(staged).await {
        warn!(target: "mediastore::fsops", "staged file '{}' could not be removed: {}", staged, e);
    }
}

pub async fn exists(path: &PhysicalPath) -> io::Result<bool> {
    fs::try_exists(path.as_path()).await
}

pub async fn read_all(path: &PhysicalPath) -> io::Result<Vec<u8>> {
    fs::read(path.as_path()).await
}
