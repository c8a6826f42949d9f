//! Narrow contract the coordinator needs from the relational metadata collaborator.
//!
//! Each mutating call is one transaction boundary: the asset mutation and its history row
//! commit together or not at all. The store owns the unique index on live `fullname`; a
//! violation is reported as `UniqueViolation` and decides same-name races.

use async_trait::async_trait;
use thiserror::Error;

use super::paths::LogicalName;
use super::types::{Asset, AssetId, AssetPatch, AssetQuery, Dimensions, HistoryEntry, HistoryId, HistoryRecord, NewAsset};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },
    #[error("live asset named '{0}' already exists")]
    UniqueViolation(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl MetadataError {
    pub fn asset_not_found(id: AssetId) -> Self {
        MetadataError::NotFound { entity: "asset", key: id.to_string() }
    }

    pub fn history_not_found(id: HistoryId) -> Self {
        MetadataError::NotFound { entity: "history record", key: id.to_string() }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, MetadataError::NotFound { .. }) }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a live asset and its history row. When `history.consumes_backup_of` is set,
    /// that record's backup reference is cleared in the same transaction.
    async fn create_asset(&self, asset: NewAsset, history: HistoryEntry) -> MetadataResult<(Asset, HistoryRecord)>;

    async fn update_asset(&self, id: AssetId, patch: AssetPatch, history: HistoryEntry) -> MetadataResult<(Asset, HistoryRecord)>;

    /// Remove the live row; the history row keeps the asset id and its last name.
    async fn delete_asset(&self, id: AssetId, history: HistoryEntry) -> MetadataResult<HistoryRecord>;

    async fn get_asset(&self, id: AssetId) -> MetadataResult<Asset>;

    async fn get_asset_by_name(&self, name: &LogicalName) -> MetadataResult<Asset>;

    async fn list_assets(&self, query: &AssetQuery) -> MetadataResult<Vec<Asset>>;

    async fn count_assets(&self, tags: &[String]) -> MetadataResult<u64>;

    async fn get_history_by_asset_id(&self, id: AssetId) -> MetadataResult<Vec<HistoryRecord>>;

    async fn get_history_record(&self, id: HistoryId) -> MetadataResult<HistoryRecord>;

    /// Delete records whose backup is still available.
    async fn get_deleted_history(&self) -> MetadataResult<Vec<HistoryRecord>>;

    async fn clear_backup_reference(&self, id: HistoryId) -> MetadataResult<()>;

    async fn add_tag(&self, id: AssetId, tag: &str) -> MetadataResult<()>;

    async fn remove_tag(&self, id: AssetId, tag: &str) -> MetadataResult<()>;

    /// Repair size/dimension columns. Not a lifecycle action, so no history row.
    async fn update_asset_stats(&self, id: AssetId, dimensions: Dimensions, disk_size: u64) -> MetadataResult<Asset>;
}
