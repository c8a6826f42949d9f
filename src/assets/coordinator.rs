//! Lifecycle operations that keep the working/history zones and the metadata store in step.
//!
//! Every mutating operation is a physical step followed by one metadata transaction. When the
//! metadata step fails the physical step is compensated exactly once; if the compensation
//! fails too, the operation reports `Inconsistent` and logs every path involved so an operator
//! (or the reconciliation sweep) can repair it. Nothing is retried automatically.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::EffectiveConfig;
use crate::error::{StorageError, StorageResult};

use super::codec::Codec;
use super::context::OpContext;
use super::fsops;
use super::inflight::InFlightNames;
use super::metadata::{MetadataError, MetadataResult, MetadataStore};
use super::paths::{LogicalName, PathResolver, PhysicalPath};
use super::types::{
    Asset, AssetId, AssetPage, AssetPatch, AssetQuery, Dimensions, FileAction, HistoryEntry, HistoryId, HistoryRecord, NewAsset,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Pick `name_1.ext`, `name_2.ext`, ... instead of failing when the name is taken.
    pub auto_rename: bool,
}

impl AddOptions {
    pub fn auto_rename() -> Self { Self { auto_rename: true } }
}

pub struct FileOperationCoordinator {
    store: Arc<dyn MetadataStore>,
    codec: Arc<dyn Codec>,
    resolver: PathResolver,
    config: EffectiveConfig,
    in_flight: InFlightNames,
}

fn map_metadata_error(err: MetadataError) -> StorageError {
    match err {
        MetadataError::UniqueViolation(name) => StorageError::NameCollision(name),
        MetadataError::NotFound { entity, key } => StorageError::NotFound(format!("{} '{}'", entity, key)),
        other => StorageError::MetadataFailed(other),
    }
}

fn paths_of(paths: &[&PhysicalPath]) -> Vec<PathBuf> {
    paths.iter().map(|p| p.as_path().to_path_buf()).collect()
}

impl FileOperationCoordinator {
    pub fn new(config: EffectiveConfig, store: Arc<dyn MetadataStore>, codec: Arc<dyn Codec>) -> StorageResult<Self> {
        let resolver = PathResolver::new(&config.working_root, &config.history_root, config.max_duplicate_names)?;
        Ok(Self { store, codec, resolver, config, in_flight: InFlightNames::new() })
    }

    pub fn resolver(&self) -> &PathResolver { &self.resolver }

    pub fn config(&self) -> &EffectiveConfig { &self.config }

    pub fn store(&self) -> &Arc<dyn MetadataStore> { &self.store }

    pub fn codec(&self) -> &Arc<dyn Codec> { &self.codec }

    /// Names held by lifecycle operations that have not returned yet.
    pub fn in_flight(&self) -> &InFlightNames { &self.in_flight }

    /// Run one metadata call under the caller's cancellation token and the call timeout.
    /// A timeout of zero means no limit.
    pub(crate) async fn guarded<T, F>(&self, op: &'static str, ctx: &OpContext, call: F) -> StorageResult<T>
    where
        F: Future<Output = MetadataResult<T>>,
    {
        let limit = ctx.timeout.unwrap_or_else(|| Duration::from_millis(self.config.metadata_timeout_ms));
        let bounded = async {
            if limit.is_zero() {
                Ok(call.await)
            } else {
                tokio::time::timeout(limit, call).await
            }
        };
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(StorageError::Cancelled { op, reason: "cancelled by caller".to_string() }),
            res = bounded => match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(map_metadata_error(e)),
                Err(_) => Err(StorageError::Cancelled { op, reason: format!("metadata call exceeded {} ms", limit.as_millis()) }),
            },
        }
    }

    fn inconsistent(&self, op: &'static str, ctx: &OpContext, name: &str, paths: Vec<PathBuf>, detail: String) -> StorageError {
        error!(
            target: "mediastore::coordinator",
            op, logical_name = name, paths = ?paths, corr = %ctx.correlation,
            "compensation failed, stores disagree: {}", detail
        );
        StorageError::Inconsistent { op, name: name.to_string(), paths, detail }
    }

    /// A name is free when no live asset holds it and no file sits at its working path.
    async fn ensure_name_free(&self, op: &'static str, name: &LogicalName, ctx: &OpContext) -> StorageResult<()> {
        match self.guarded(op, ctx, self.store.get_asset_by_name(name)).await {
            Ok(_) => return Err(StorageError::NameCollision(name.to_string())),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let path = self.resolver.resolve_working_path(name);
        if fsops::exists(&path).await.map_err(|e| StorageError::write_failed(&path, e))? {
            return Err(StorageError::NameCollision(name.to_string()));
        }
        Ok(())
    }

    fn stored_name(asset_fullname: &str) -> StorageResult<LogicalName> {
        LogicalName::parse(asset_fullname)
            .map_err(|e| StorageError::ValidationFailed(format!("stored name '{}' is not a valid logical name: {}", asset_fullname, e)))
    }

    /// The store's unique index rejected a name whose file this operation already placed. The only
    /// writer that can win that race has registered the very file we placed, so it stays where it is.
    fn lost_name_race(&self, op: &'static str, ctx: &OpContext, name: &LogicalName, paths: &[&PhysicalPath], err: &StorageError) -> StorageError {
        self.inconsistent(
            op,
            ctx,
            name.as_str(),
            paths_of(paths),
            format!("metadata rejected the name ({}) after its file was placed; the file is left in place", err),
        )
    }

    /// Another operation holds `name` while its file is missing; it is mid-move.
    fn busy(&self, op: &'static str, ctx: &OpContext, name: &LogicalName) -> StorageError {
        warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "{} '{}': file missing while another operation holds the name", op, name);
        StorageError::NameCollision(name.to_string())
    }

    /// Store new bytes under `name`. Returns the created asset.
    pub async fn add_file(&self, bytes: &[u8], name: &LogicalName, opts: AddOptions, ctx: &OpContext) -> StorageResult<Asset> {
        const OP: &str = "add";
        self.codec.validate_format(name, bytes)?;
        let dims = self.codec.probe(bytes)?;

        let tries = if opts.auto_rename { self.resolver.max_duplicate_names() as usize } else { 1 };
        let mut placed = None;
        for candidate in self.resolver.candidate_names(name).take(tries) {
            let claim = self.in_flight.claim(&[&candidate]);
            match self.ensure_name_free(OP, &candidate, ctx).await {
                Ok(()) => {}
                Err(StorageError::NameCollision(_)) if opts.auto_rename => continue,
                Err(e) => return Err(e),
            }
            let path = self.resolver.resolve_working_path(&candidate);
            debug!(target: "mediastore::coordinator", corr = %ctx.correlation, "add '{}' size={} -> '{}'", candidate, bytes.len(), path);
            match fsops::write_new(&path, bytes).await {
                Ok(()) => {
                    placed = Some((candidate, path, claim));
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && opts.auto_rename => continue,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(StorageError::NameCollision(candidate.to_string())),
                Err(e) => return Err(StorageError::write_failed(&path, e)),
            }
        }
        let Some((name, path, _claim)) = placed else {
            return Err(StorageError::NameSpaceExhausted { name: name.to_string(), attempts: self.resolver.max_duplicate_names() });
        };

        let new = NewAsset { fullname: name.clone(), dimensions: dims, disk_size: bytes.len() as u64, created_by: ctx.user.clone() };
        let entry = HistoryEntry::new(FileAction::Create, &ctx.user);
        match self.guarded(OP, ctx, self.store.create_asset(new, entry)).await {
            Ok((asset, rec)) => {
                crate::tprintln!("MEDIASTORE add ok id={} name={} size={} etag={} history={} [corr={}]", asset.id, asset.fullname, asset.disk_size, fsops::etag_for_bytes(bytes), rec.id, ctx.correlation);
                Ok(asset)
            }
            Err(err @ StorageError::NameCollision(_)) => Err(self.lost_name_race(OP, ctx, &name, &[&path], &err)),
            Err(err) => {
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "add '{}' metadata failed, removing file: {}", name, err);
                match fsops::remove_if_exists(&path).await {
                    Ok(_) => Err(err),
                    Err(e) => Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&path]),
                        format!("metadata failed ({}) and the written file could not be removed: {}", err, e),
                    )),
                }
            }
        }
    }

    /// Give a live asset a new logical name. Renaming to the current name is a no-op.
    pub async fn rename_file(&self, id: AssetId, new_name: &LogicalName, ctx: &OpContext) -> StorageResult<Asset> {
        const OP: &str = "rename";
        let asset = self.guarded(OP, ctx, self.store.get_asset(id)).await?;
        let old_name = Self::stored_name(&asset.fullname)?;
        if old_name == *new_name {
            return Ok(asset);
        }
        self.codec.accepts_name(new_name)?;
        let _claim = self.in_flight.claim(&[&old_name, new_name]);
        self.ensure_name_free(OP, new_name, ctx).await?;

        let from = self.resolver.resolve_working_path(&old_name);
        let to = self.resolver.resolve_working_path(new_name);
        fsops::move_no_clobber(&from, &to).await.map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StorageError::NameCollision(new_name.to_string()),
            io::ErrorKind::NotFound if self.in_flight.claims(&old_name) > 1 => self.busy(OP, ctx, &old_name),
            io::ErrorKind::NotFound => StorageError::NotFound(format!("file '{}' of asset {}", from, id)),
            _ => StorageError::write_failed(&to, e),
        })?;

        let patch = AssetPatch { fullname: Some(new_name.clone()), ..Default::default() };
        let entry = HistoryEntry::new(FileAction::Rename, &ctx.user);
        match self.guarded(OP, ctx, self.store.update_asset(id, patch, entry)).await {
            Ok((asset, _)) => {
                crate::tprintln!("MEDIASTORE rename ok id={} {} -> {} [corr={}]", id, old_name, new_name, ctx.correlation);
                Ok(asset)
            }
            Err(err @ StorageError::NameCollision(_)) => Err(self.lost_name_race(OP, ctx, new_name, &[&from, &to], &err)),
            Err(err) => {
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "rename '{}' -> '{}' metadata failed, moving back: {}", old_name, new_name, err);
                match fsops::move_no_clobber(&to, &from).await {
                    Ok(()) => Err(err),
                    Err(e) => Err(self.inconsistent(
                        OP,
                        ctx,
                        old_name.as_str(),
                        paths_of(&[&from, &to]),
                        format!("metadata failed ({}) and the file could not be moved back: {}", err, e),
                    )),
                }
            }
        }
    }

    /// Swap in new content under the same name; the previous bytes are kept as a backup.
    ///
    /// The new bytes are staged first and the old file only moves to the history zone once
    /// staging succeeded. If the metadata update fails, the old bytes go back to the working
    /// path and the new ones are dropped, so no backup outlives a failed replace.
    pub async fn replace_file(&self, id: AssetId, bytes: &[u8], ctx: &OpContext) -> StorageResult<Asset> {
        const OP: &str = "replace";
        let asset = self.guarded(OP, ctx, self.store.get_asset(id)).await?;
        let name = Self::stored_name(&asset.fullname)?;
        self.codec.validate_format(&name, bytes)?;
        let dims = self.codec.probe(bytes)?;
        let _claim = self.in_flight.claim(&[&name]);

        let working = self.resolver.resolve_working_path(&name);
        let backup_name = self.resolver.generate_backup_name(&name);
        let backup = self.resolver.resolve_history_path(&backup_name)?;
        let staged = fsops::stage_bytes(&working, bytes).await.map_err(|e| StorageError::write_failed(&working, e))?;

        let backed_up = match fsops::move_no_clobber(&working, &backup).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.in_flight.claims(&name) > 1 {
                    fsops::discard_staged(&staged).await;
                    return Err(self.busy(OP, ctx, &name));
                }
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "replace '{}': working file missing, nothing to back up", name);
                false
            }
            Err(e) => {
                fsops::discard_staged(&staged).await;
                return Err(StorageError::write_failed(&backup, e));
            }
        };

        if let Err(e) = fsops::publish_staged(&staged, &working).await {
            fsops::discard_staged(&staged).await;
            if backed_up {
                if let Err(undo) = fsops::move_no_clobber(&backup, &working).await {
                    return Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&working, &backup]),
                        format!("publishing new content failed ({}) and the backup could not be moved back: {}", e, undo),
                    ));
                }
            }
            return Err(StorageError::write_failed(&working, e));
        }

        let patch = AssetPatch { fullname: None, dimensions: Some(dims), disk_size: Some(bytes.len() as u64) };
        let entry = HistoryEntry::new(FileAction::Replace, &ctx.user).with_backup(backed_up.then(|| backup_name.clone()));
        match self.guarded(OP, ctx, self.store.update_asset(id, patch, entry)).await {
            Ok((asset, rec)) => {
                crate::tprintln!("MEDIASTORE replace ok id={} name={} size={} backup={:?} [corr={}]", id, name, asset.disk_size, rec.backup_fullname, ctx.correlation);
                Ok(asset)
            }
            Err(err @ StorageError::NotFound(_)) => {
                // The row went away underneath us: no live asset owns this name any more.
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "replace '{}': asset {} vanished, dropping new content", name, id);
                if let Err(e) = fsops::remove_if_exists(&working).await {
                    return Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&working, &backup]),
                        format!("asset vanished ({}) and the new content could not be removed: {}", err, e),
                    ));
                }
                if backed_up {
                    return Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&backup]),
                        format!("asset vanished ({}); its previous content is kept in history without a record", err),
                    ));
                }
                Err(err)
            }
            Err(err) => {
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "replace '{}' metadata failed, swapping back: {}", name, err);
                let swap_back = async {
                    fsops::remove_if_exists(&working).await?;
                    if backed_up {
                        fsops::move_no_clobber(&backup, &working).await?;
                    }
                    Ok::<(), io::Error>(())
                };
                match swap_back.await {
                    Ok(()) => Err(err),
                    Err(e) => Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&working, &backup]),
                        format!("metadata failed ({}) and the previous content could not be swapped back: {}", err, e),
                    )),
                }
            }
        }
    }

    /// Move the asset's bytes to the history zone and drop the live row.
    /// A file that is already gone yields a Delete record without a backup.
    pub async fn delete_file(&self, id: AssetId, ctx: &OpContext) -> StorageResult<HistoryRecord> {
        const OP: &str = "delete";
        let asset = self.guarded(OP, ctx, self.store.get_asset(id)).await?;
        let name = Self::stored_name(&asset.fullname)?;
        let _claim = self.in_flight.claim(&[&name]);
        let working = self.resolver.resolve_working_path(&name);
        let backup_name = self.resolver.generate_backup_name(&name);
        let backup = self.resolver.resolve_history_path(&backup_name)?;

        let backed_up = match fsops::move_no_clobber(&working, &backup).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.in_flight.claims(&name) > 1 {
                    return Err(self.busy(OP, ctx, &name));
                }
                // A rename may have committed since the first read.
                let current = self.guarded(OP, ctx, self.store.get_asset(id)).await?;
                if current.fullname != asset.fullname {
                    return Err(self.busy(OP, ctx, &name));
                }
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "delete '{}': working file already missing", name);
                false
            }
            Err(e) => return Err(StorageError::write_failed(&backup, e)),
        };

        let entry = HistoryEntry::new(FileAction::Delete, &ctx.user).with_backup(backed_up.then(|| backup_name.clone()));
        match self.guarded(OP, ctx, self.store.delete_asset(id, entry)).await {
            Ok(rec) => {
                crate::tprintln!("MEDIASTORE delete ok id={} name={} backup={:?} history={} [corr={}]", id, name, rec.backup_fullname, rec.id, ctx.correlation);
                Ok(rec)
            }
            Err(err) if backed_up => {
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "delete '{}' metadata failed, moving back: {}", name, err);
                match fsops::move_no_clobber(&backup, &working).await {
                    Ok(()) => Err(err),
                    Err(e) => Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&working, &backup]),
                        format!("metadata failed ({}) and the file could not be moved back: {}", err, e),
                    )),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Bring a deleted file back under its last name as a new asset.
    pub async fn restore_deleted_file(&self, history_id: HistoryId, ctx: &OpContext) -> StorageResult<Asset> {
        const OP: &str = "restore";
        let rec = self.guarded(OP, ctx, self.store.get_history_record(history_id)).await?;
        if rec.action != FileAction::Delete {
            return Err(StorageError::ValidationFailed(format!("history record {} is a {} record, not a delete", history_id, rec.action)));
        }
        let backup_name = rec
            .backup_fullname
            .clone()
            .ok_or_else(|| StorageError::ValidationFailed(format!("history record {} has no backup to restore", history_id)))?;
        let name = Self::stored_name(&rec.fullname)?;
        let _claim = self.in_flight.claim(&[&name]);
        self.ensure_name_free(OP, &name, ctx).await?;

        let backup = self.resolver.resolve_history_path(&backup_name)?;
        let working = self.resolver.resolve_working_path(&name);
        fsops::move_no_clobber(&backup, &working).await.map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StorageError::NameCollision(name.to_string()),
            io::ErrorKind::NotFound => StorageError::NotFound(format!("backup '{}' of history record {}", backup_name, history_id)),
            _ => StorageError::write_failed(&working, e),
        })?;

        let res: StorageResult<(Asset, HistoryRecord)> = async {
            let bytes = fsops::read_all(&working).await.map_err(|e| StorageError::write_failed(&working, e))?;
            let dims: Dimensions = self.codec.probe(&bytes)?;
            let new = NewAsset { fullname: name.clone(), dimensions: dims, disk_size: bytes.len() as u64, created_by: ctx.user.clone() };
            let entry = HistoryEntry::new(FileAction::Restore, &ctx.user).consuming(history_id);
            self.guarded(OP, ctx, self.store.create_asset(new, entry)).await
        }
        .await;

        match res {
            Ok((asset, _)) => {
                crate::tprintln!("MEDIASTORE restore ok history={} id={} name={} [corr={}]", history_id, asset.id, asset.fullname, ctx.correlation);
                Ok(asset)
            }
            Err(err @ StorageError::NameCollision(_)) => Err(self.lost_name_race(OP, ctx, &name, &[&working, &backup], &err)),
            Err(err) => {
                warn!(target: "mediastore::coordinator", corr = %ctx.correlation, "restore '{}' failed, returning backup to history: {}", name, err);
                match fsops::move_no_clobber(&working, &backup).await {
                    Ok(()) => Err(err),
                    Err(e) => Err(self.inconsistent(
                        OP,
                        ctx,
                        name.as_str(),
                        paths_of(&[&working, &backup]),
                        format!("restore failed ({}) and the file could not be returned to history: {}", err, e),
                    )),
                }
            }
        }
    }

    pub async fn get_asset(&self, id: AssetId, ctx: &OpContext) -> StorageResult<Asset> {
        self.guarded("get", ctx, self.store.get_asset(id)).await
    }

    pub async fn get_asset_by_name(&self, name: &LogicalName, ctx: &OpContext) -> StorageResult<Asset> {
        self.guarded("get", ctx, self.store.get_asset_by_name(name)).await
    }

    /// A `page_size` of 0 falls back to the configured default.
    pub async fn list_assets(&self, query: &AssetQuery, ctx: &OpContext) -> StorageResult<AssetPage> {
        let mut query = query.clone();
        if query.page_size == 0 {
            query.page_size = self.config.default_page_size;
        }
        let items = self.guarded("list", ctx, self.store.list_assets(&query)).await?;
        let total = self.guarded("list", ctx, self.store.count_assets(&query.tags)).await?;
        Ok(AssetPage { items, total, page: query.page, page_size: query.page_size })
    }

    pub async fn history_of(&self, id: AssetId, ctx: &OpContext) -> StorageResult<Vec<HistoryRecord>> {
        self.guarded("history", ctx, self.store.get_history_by_asset_id(id)).await
    }

    /// Delete records that can still be restored.
    pub async fn get_deleted_files(&self, ctx: &OpContext) -> StorageResult<Vec<HistoryRecord>> {
        self.guarded("deleted", ctx, self.store.get_deleted_history()).await
    }

    pub async fn add_tag(&self, id: AssetId, tag: &str, ctx: &OpContext) -> StorageResult<()> {
        let tag = Self::clean_tag(tag)?;
        self.guarded("tag", ctx, self.store.add_tag(id, &tag)).await
    }

    pub async fn remove_tag(&self, id: AssetId, tag: &str, ctx: &OpContext) -> StorageResult<()> {
        let tag = Self::clean_tag(tag)?;
        self.guarded("untag", ctx, self.store.remove_tag(id, &tag)).await
    }

    fn clean_tag(tag: &str) -> StorageResult<String> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(StorageError::ValidationFailed("tag must not be empty".into()));
        }
        Ok(tag.to_string())
    }
}
