//! In-process `MetadataStore` with an optional bincode snapshot on disk.
//!
//! All tables sit behind one `RwLock`; a transactional call validates, then applies its whole
//! change under a single write guard. With persistence enabled the snapshot is rewritten
//! (temp file + rename) before the guard is released, and the in-memory change is rolled
//! back if that write fails.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::metadata::{MetadataError, MetadataResult, MetadataStore};
use super::paths::LogicalName;
use super::types::{
    Asset, AssetId, AssetPatch, AssetQuery, Dimensions, FileAction, HistoryEntry, HistoryId, HistoryRecord, NewAsset, OrderDir,
    OrderField,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    assets: BTreeMap<AssetId, Asset>,
    history: BTreeMap<HistoryId, HistoryRecord>,
    last_asset_id: AssetId,
    last_history_id: HistoryId,
    /// Unique index on live fullname; rebuilt on load.
    #[serde(skip)]
    by_name: HashMap<String, AssetId>,
}

impl Tables {
    fn rebuild_index(&mut self) {
        self.by_name = self.assets.values().map(|a| (a.fullname.clone(), a.id)).collect();
    }

    fn append_history(&mut self, file_id: AssetId, fullname: &str, entry: HistoryEntry, now: i64) -> HistoryRecord {
        self.last_history_id += 1;
        let rec = HistoryRecord {
            id: self.last_history_id,
            file_id,
            action: entry.action,
            fullname: fullname.to_string(),
            backup_fullname: entry.backup_fullname,
            created_by: entry.created_by,
            created_at: now,
        };
        self.history.insert(rec.id, rec.clone());
        rec
    }

    fn create(&mut self, new: NewAsset, entry: HistoryEntry, now: i64) -> MetadataResult<(Asset, HistoryRecord)> {
        if self.by_name.contains_key(new.fullname.as_str()) {
            return Err(MetadataError::UniqueViolation(new.fullname.to_string()));
        }
        if let Some(hid) = entry.consumes_backup_of {
            let rec = self.history.get(&hid).ok_or_else(|| MetadataError::history_not_found(hid))?;
            if !rec.is_restorable() {
                return Err(MetadataError::Backend(format!("history record {} has no backup to consume", hid)));
            }
        }

        self.last_asset_id += 1;
        let asset = Asset {
            id: self.last_asset_id,
            fullname: new.fullname.to_string(),
            name_part: new.fullname.name_part().to_string(),
            ext_part: new.fullname.ext_part().to_string(),
            width: new.dimensions.width,
            height: new.dimensions.height,
            disk_size: new.disk_size,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        };
        if let Some(hid) = entry.consumes_backup_of {
            if let Some(rec) = self.history.get_mut(&hid) {
                rec.backup_fullname = None;
            }
        }
        self.by_name.insert(asset.fullname.clone(), asset.id);
        self.assets.insert(asset.id, asset.clone());
        let rec = self.append_history(asset.id, &asset.fullname, entry, now);
        Ok((asset, rec))
    }

    fn update(&mut self, id: AssetId, patch: AssetPatch, entry: HistoryEntry, now: i64) -> MetadataResult<(Asset, HistoryRecord)> {
        let current = self.assets.get(&id).ok_or_else(|| MetadataError::asset_not_found(id))?;
        let old_name = current.fullname.clone();
        if let Some(new_name) = &patch.fullname {
            if let Some(&holder) = self.by_name.get(new_name.as_str()) {
                if holder != id {
                    return Err(MetadataError::UniqueViolation(new_name.to_string()));
                }
            }
        }

        let asset = self.assets.get_mut(&id).ok_or_else(|| MetadataError::asset_not_found(id))?;
        if let Some(new_name) = &patch.fullname {
            asset.fullname = new_name.to_string();
            asset.name_part = new_name.name_part().to_string();
            asset.ext_part = new_name.ext_part().to_string();
        }
        if let Some(d) = patch.dimensions {
            asset.width = d.width;
            asset.height = d.height;
        }
        if let Some(size) = patch.disk_size {
            asset.disk_size = size;
        }
        asset.updated_at = now;
        let asset = asset.clone();
        if asset.fullname != old_name {
            self.by_name.remove(&old_name);
            self.by_name.insert(asset.fullname.clone(), id);
        }
        let rec = self.append_history(id, &asset.fullname, entry, now);
        Ok((asset, rec))
    }

    fn delete(&mut self, id: AssetId, entry: HistoryEntry, now: i64) -> MetadataResult<HistoryRecord> {
        let asset = self.assets.remove(&id).ok_or_else(|| MetadataError::asset_not_found(id))?;
        self.by_name.remove(&asset.fullname);
        Ok(self.append_history(id, &asset.fullname, entry, now))
    }

    fn asset_mut(&mut self, id: AssetId) -> MetadataResult<&mut Asset> {
        self.assets.get_mut(&id).ok_or_else(|| MetadataError::asset_not_found(id))
    }
}

fn has_any_tag(asset: &Asset, tags: &[String]) -> bool {
    tags.is_empty() || asset.tags.iter().any(|t| tags.contains(t))
}

fn compare(a: &Asset, b: &Asset, query: &AssetQuery) -> Ordering {
    for o in &query.order {
        let ord = match o.field {
            OrderField::Id => a.id.cmp(&b.id),
            OrderField::Fullname => a.fullname.cmp(&b.fullname),
            OrderField::CreatedAt => a.created_at.cmp(&b.created_at),
            OrderField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            OrderField::DiskSize => a.disk_size.cmp(&b.disk_size),
        };
        let ord = if o.dir == OrderDir::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    tables: Arc<RwLock<Tables>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self { Self::default() }

    /// Load the snapshot at `path` if present; every later mutation rewrites it.
    pub fn open<P: AsRef<Path>>(path: P) -> MetadataResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tables = match std::fs::read(&path) {
            Ok(bytes) => bincode::deserialize::<Tables>(&bytes)
                .map_err(|e| MetadataError::Backend(format!("corrupt snapshot '{}': {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(MetadataError::Backend(format!("cannot read snapshot '{}': {}", path.display(), e))),
        };
        tables.rebuild_index();
        debug!(target: "mediastore::metadata", "opened snapshot '{}' assets={} history={}", path.display(), tables.assets.len(), tables.history.len());
        Ok(Self { tables: Arc::new(RwLock::new(tables)), snapshot_path: Some(path) })
    }

    fn transact<R>(&self, f: impl FnOnce(&mut Tables, i64) -> MetadataResult<R>) -> MetadataResult<R> {
        let mut guard = self.tables.write();
        let before = self.snapshot_path.as_ref().map(|_| Tables::clone(&guard));
        let out = f(&mut guard, Utc::now().timestamp_millis())?;
        if let (Some(path), Some(before)) = (&self.snapshot_path, before) {
            if let Err(e) = write_snapshot(path, &guard) {
                *guard = before;
                return Err(e);
            }
        }
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> MetadataResult<R>) -> MetadataResult<R> {
        f(&self.tables.read())
    }
}

fn write_snapshot(path: &Path, tables: &Tables) -> MetadataResult<()> {
    let bytes = bincode::serialize(tables).map_err(|e| MetadataError::Backend(format!("snapshot encode failed: {}", e)))?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| MetadataError::Backend(e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| MetadataError::Backend(format!("snapshot write '{}' failed: {}", path.display(), e)))
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_asset(&self, asset: NewAsset, history: HistoryEntry) -> MetadataResult<(Asset, HistoryRecord)> {
        self.transact(|t, now| t.create(asset, history, now))
    }

    async fn update_asset(&self, id: AssetId, patch: AssetPatch, history: HistoryEntry) -> MetadataResult<(Asset, HistoryRecord)> {
        self.transact(|t, now| t.update(id, patch, history, now))
    }

    async fn delete_asset(&self, id: AssetId, history: HistoryEntry) -> MetadataResult<HistoryRecord> {
        self.transact(|t, now| t.delete(id, history, now))
    }

    async fn get_asset(&self, id: AssetId) -> MetadataResult<Asset> {
        self.read(|t| t.assets.get(&id).cloned().ok_or_else(|| MetadataError::asset_not_found(id)))
    }

    async fn get_asset_by_name(&self, name: &LogicalName) -> MetadataResult<Asset> {
        self.read(|t| {
            t.by_name
                .get(name.as_str())
                .and_then(|id| t.assets.get(id))
                .cloned()
                .ok_or_else(|| MetadataError::NotFound { entity: "asset", key: name.to_string() })
        })
    }

    async fn list_assets(&self, query: &AssetQuery) -> MetadataResult<Vec<Asset>> {
        self.read(|t| {
            let mut rows: Vec<&Asset> = t.assets.values().filter(|a| has_any_tag(a, &query.tags)).collect();
            rows.sort_by(|a, b| compare(a, b, query));
            let rows = rows.into_iter().cloned();
            if query.page_size == 0 {
                return Ok(rows.collect());
            }
            let skip = query.page as usize * query.page_size as usize;
            Ok(rows.skip(skip).take(query.page_size as usize).collect())
        })
    }

    async fn count_assets(&self, tags: &[String]) -> MetadataResult<u64> {
        self.read(|t| Ok(t.assets.values().filter(|a| has_any_tag(a, tags)).count() as u64))
    }

    async fn get_history_by_asset_id(&self, id: AssetId) -> MetadataResult<Vec<HistoryRecord>> {
        self.read(|t| Ok(t.history.values().filter(|h| h.file_id == id).cloned().collect()))
    }

    async fn get_history_record(&self, id: HistoryId) -> MetadataResult<HistoryRecord> {
        self.read(|t| t.history.get(&id).cloned().ok_or_else(|| MetadataError::history_not_found(id)))
    }

    async fn get_deleted_history(&self) -> MetadataResult<Vec<HistoryRecord>> {
        self.read(|t| Ok(t.history.values().filter(|h| h.action == FileAction::Delete && h.backup_fullname.is_some()).cloned().collect()))
    }

    async fn clear_backup_reference(&self, id: HistoryId) -> MetadataResult<()> {
        self.transact(|t, _| {
            let rec = t.history.get_mut(&id).ok_or_else(|| MetadataError::history_not_found(id))?;
            rec.backup_fullname = None;
            Ok(())
        })
    }

    async fn add_tag(&self, id: AssetId, tag: &str) -> MetadataResult<()> {
        self.transact(|t, now| {
            let asset = t.asset_mut(id)?;
            if !asset.tags.iter().any(|x| x == tag) {
                asset.tags.push(tag.to_string());
                asset.tags.sort();
                asset.updated_at = now;
            }
            Ok(())
        })
    }

    async fn remove_tag(&self, id: AssetId, tag: &str) -> MetadataResult<()> {
        self.transact(|t, now| {
            let asset = t.asset_mut(id)?;
            let before = asset.tags.len();
            asset.tags.retain(|x| x != tag);
            if asset.tags.len() != before {
                asset.updated_at = now;
            }
            Ok(())
        })
    }

    async fn update_asset_stats(&self, id: AssetId, dimensions: Dimensions, disk_size: u64) -> MetadataResult<Asset> {
        self.transact(|t, now| {
            let asset = t.asset_mut(id)?;
            asset.width = dimensions.width;
            asset.height = dimensions.height;
            asset.disk_size = disk_size;
            asset.updated_at = now;
            Ok(asset.clone())
        })
    }
}

#[cfg(test)]
mod memory_tests;
