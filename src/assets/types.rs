//! Asset and audit-trail records as persisted by a metadata store.
//! Keep this module purely about types/serde and light helpers.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::paths::LogicalName;

pub type AssetId = u64;
pub type HistoryId = u64;

/// Lifecycle action recorded in the audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Rename,
    Replace,
    Delete,
    Restore,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "create",
            FileAction::Rename => "rename",
            FileAction::Replace => "replace",
            FileAction::Delete => "delete",
            FileAction::Restore => "restore",
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Live asset row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub fullname: String,
    pub name_part: String,
    pub ext_part: String,
    pub width: u32,
    pub height: u32,
    pub disk_size: u64,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Asset {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions { width: self.width, height: self.height }
    }
}

/// Append-only audit row. `backup_fullname` names a file under the history root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub file_id: AssetId,
    pub action: FileAction,
    pub fullname: String,
    #[serde(default)]
    pub backup_fullname: Option<String>,
    pub created_by: String,
    pub created_at: i64,
}

impl HistoryRecord {
    /// A Delete record whose backup has not been consumed yet.
    pub fn is_restorable(&self) -> bool {
        self.action == FileAction::Delete && self.backup_fullname.is_some()
    }
}

/// Values for a new asset row; derived name parts are computed from `fullname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub fullname: LogicalName,
    pub dimensions: Dimensions,
    pub disk_size: u64,
    pub created_by: String,
}

/// Partial update of an asset row. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetPatch {
    pub fullname: Option<LogicalName>,
    pub dimensions: Option<Dimensions>,
    pub disk_size: Option<u64>,
}

/// History row to append in the same transaction as an asset mutation.
/// `file_id` and `fullname` are filled in by the store from the mutated row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub action: FileAction,
    pub backup_fullname: Option<String>,
    pub created_by: String,
    /// Delete record whose backup reference is cleared in the same transaction (Restore).
    pub consumes_backup_of: Option<HistoryId>,
}

impl HistoryEntry {
    pub fn new(action: FileAction, created_by: &str) -> Self {
        Self { action, backup_fullname: None, created_by: created_by.to_string(), consumes_backup_of: None }
    }

    pub fn with_backup(mut self, backup: Option<String>) -> Self {
        self.backup_fullname = backup;
        self
    }

    pub fn consuming(mut self, delete_record: HistoryId) -> Self {
        self.consumes_backup_of = Some(delete_record);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    #[default]
    Id,
    Fullname,
    CreatedAt,
    UpdatedAt,
    DiskSize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AssetOrder {
    pub field: OrderField,
    pub dir: OrderDir,
}

/// Listing filter. An asset matches when it carries any of `tags` (all assets when empty).
/// Orders apply left to right, ties fall back to id. A `page_size` of 0 returns every match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetQuery {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub order: Vec<AssetOrder>,
}

impl AssetQuery {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self { tags: Vec::new(), page, page_size, order: Vec::new() }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, field: OrderField, dir: OrderDir) -> Self {
        self.order.push(AssetOrder { field, dir });
        self
    }
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetPage {
    pub items: Vec<Asset>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
