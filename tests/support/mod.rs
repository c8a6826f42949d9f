//! Shared harness for integration tests: temp roots, a fault-injecting metadata store and a
//! codec that accepts arbitrary bytes.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use mediastore::assets::{
    Asset, AssetId, AssetPatch, AssetQuery, Codec, CodecError, Dimensions, FileOperationCoordinator, HistoryEntry, HistoryId,
    HistoryRecord, LogicalName, MemoryMetadataStore, MetadataError, MetadataResult, MetadataStore, NewAsset, OpContext,
};
use mediastore::EffectiveConfig;

pub const FAKE_DIMS: Dimensions = Dimensions { width: 640, height: 480 };

/// Accepts a fixed extension list and any bytes not starting with `BAD`.
pub struct FakeCodec {
    exts: Vec<&'static str>,
}

impl Default for FakeCodec {
    fn default() -> Self { Self { exts: vec![".jpg", ".png", ".gif"] } }
}

impl Codec for FakeCodec {
    fn accepts_name(&self, name: &LogicalName) -> Result<(), CodecError> {
        let ext = name.ext_part().to_ascii_lowercase();
        if self.exts.iter().any(|e| *e == ext) {
            Ok(())
        } else {
            Err(CodecError::ExtensionNotAllowed(name.ext_part().to_string()))
        }
    }

    fn validate_format(&self, name: &LogicalName, bytes: &[u8]) -> Result<(), CodecError> {
        self.accepts_name(name)?;
        if bytes.starts_with(b"BAD") {
            return Err(CodecError::FormatMismatch { ext: name.ext_part().to_string(), detail: "fake rejection".into() });
        }
        Ok(())
    }

    fn probe(&self, bytes: &[u8]) -> Result<Dimensions, CodecError> {
        if bytes.starts_with(b"BAD") {
            return Err(CodecError::Probe("fake rejection".into()));
        }
        Ok(FAKE_DIMS)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Delegates to a `MemoryMetadataStore`; mutations can be made to fail or stall on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryMetadataStore,
    pub fail_create: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    delay: Mutex<Option<Duration>>,
    on_fail: Mutex<Option<Hook>>,
}

impl FlakyStore {
    pub fn set_delay(&self, d: Duration) { *self.delay.lock() = Some(d); }

    /// Runs once, right before the next injected failure is returned.
    pub fn on_failure<F: FnOnce() + Send + 'static>(&self, f: F) { *self.on_fail.lock() = Some(Box::new(f)); }

    fn check(&self, flag: &AtomicBool) -> MetadataResult<()> {
        if flag.load(Ordering::SeqCst) {
            if let Some(hook) = self.on_fail.lock().take() {
                hook();
            }
            return Err(MetadataError::Backend("injected failure".into()));
        }
        Ok(())
    }

    async fn stall(&self) {
        let d = *self.delay.lock();
        if let Some(d) = d {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl MetadataStore for FlakyStore {
    async fn create_asset(&self, asset: NewAsset, history: HistoryEntry) -> MetadataResult<(Asset, HistoryRecord)> {
        self.stall().await;
        self.check(&self.fail_create)?;
        self.inner.create_asset(asset, history).await
    }

    async fn update_asset(&self, id: AssetId, patch: AssetPatch, history: HistoryEntry) -> MetadataResult<(Asset, HistoryRecord)> {
        self.stall().await;
        self.check(&self.fail_update)?;
        self.inner.update_asset(id, patch, history).await
    }

    async fn delete_asset(&self, id: AssetId, history: HistoryEntry) -> MetadataResult<HistoryRecord> {
        self.stall().await;
        self.check(&self.fail_delete)?;
        self.inner.delete_asset(id, history).await
    }

    async fn get_asset(&self, id: AssetId) -> MetadataResult<Asset> { self.inner.get_asset(id).await }

    async fn get_asset_by_name(&self, name: &LogicalName) -> MetadataResult<Asset> { self.inner.get_asset_by_name(name).await }

    async fn list_assets(&self, query: &AssetQuery) -> MetadataResult<Vec<Asset>> { self.inner.list_assets(query).await }

    async fn count_assets(&self, tags: &[String]) -> MetadataResult<u64> { self.inner.count_assets(tags).await }

    async fn get_history_by_asset_id(&self, id: AssetId) -> MetadataResult<Vec<HistoryRecord>> {
        self.inner.get_history_by_asset_id(id).await
    }

    async fn get_history_record(&self, id: HistoryId) -> MetadataResult<HistoryRecord> { self.inner.get_history_record(id).await }

    async fn get_deleted_history(&self) -> MetadataResult<Vec<HistoryRecord>> { self.inner.get_deleted_history().await }

    async fn clear_backup_reference(&self, id: HistoryId) -> MetadataResult<()> { self.inner.clear_backup_reference(id).await }

    async fn add_tag(&self, id: AssetId, tag: &str) -> MetadataResult<()> { self.inner.add_tag(id, tag).await }

    async fn remove_tag(&self, id: AssetId, tag: &str) -> MetadataResult<()> { self.inner.remove_tag(id, tag).await }

    async fn update_asset_stats(&self, id: AssetId, dimensions: Dimensions, disk_size: u64) -> MetadataResult<Asset> {
        self.inner.update_asset_stats(id, dimensions, disk_size).await
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<FlakyStore>,
    pub coord: FileOperationCoordinator,
}

pub fn harness() -> Harness { harness_with(|_| {}) }

pub fn harness_with<F: FnOnce(&mut EffectiveConfig)>(tweak: F) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = EffectiveConfig::with_roots(tmp.path().join("images"), tmp.path().join("_history"));
    config.reconcile_min_age_ms = 0;
    tweak(&mut config);
    let store = Arc::new(FlakyStore::default());
    let coord = FileOperationCoordinator::new(config, store.clone(), Arc::new(FakeCodec::default())).unwrap();
    Harness { tmp, store, coord }
}

impl Harness {
    pub fn working_files(&self) -> Vec<String> { files_under(self.coord.resolver().working_root()) }

    pub fn history_files(&self) -> Vec<String> { files_under(self.coord.resolver().history_root()) }

    pub fn working_path(&self, logical: &str) -> std::path::PathBuf {
        self.coord.resolver().resolve_working_path(&name(logical)).into_path_buf()
    }

    pub fn history_path(&self, backup: &str) -> std::path::PathBuf { self.coord.resolver().history_root().join(backup) }

    /// Every live asset has exactly one file under its name and no file lacks an asset.
    pub async fn assert_zones_agree(&self) {
        let mut live: Vec<String> = self
            .store
            .inner
            .list_assets(&AssetQuery::page(0, 0))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.fullname)
            .collect();
        live.sort();
        assert_eq!(self.working_files(), live);
    }
}

/// Relative `/`-joined paths of every regular file under `root`, sorted.
pub fn files_under(root: &Path) -> Vec<String> {
    let mut out: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect::<Vec<_>>().join("/"))
        })
        .collect();
    out.sort();
    out
}

pub fn name(s: &str) -> LogicalName { LogicalName::parse(s).unwrap() }

pub fn ctx() -> OpContext { OpContext::new("alice") }

pub fn bytes_of(len: usize, seed: u8) -> Vec<u8> { (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect() }
