use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// Margin added to the metadata timeout when deriving the sweep's minimum file age.
pub const SWEEP_GRACE_MS: u64 = 1_000;

/// Process-wide defaults applied unless an override layer sets a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalStorageConfig {
    pub working_root: PathBuf,
    pub history_root: PathBuf,

    /// Upper bound on `name`, `name_1` .. `name_{n-1}` candidates when auto-renaming.
    pub max_duplicate_names: u32,
    /// Lowercase, without the dot.
    pub allowed_exts: Vec<String>,

    pub metadata_timeout_ms: u64,
    /// Files changed more recently than this are left alone by the sweep. Raised to
    /// `metadata_timeout_ms + SWEEP_GRACE_MS` when the timeout is set.
    pub reconcile_min_age_ms: u64,
    pub reconcile_user: String,

    pub default_page_size: u32,
}

impl Default for GlobalStorageConfig {
    fn default() -> Self {
        Self {
            working_root: PathBuf::from("data/images"),
            history_root: PathBuf::from("data/_history"),
            max_duplicate_names: 2020,
            allowed_exts: ["png", "jpg", "jpeg", "gif", "webp"].iter().map(|s| s.to_string()).collect(),
            metadata_timeout_ms: 30_000,
            reconcile_min_age_ms: 5_000,
            reconcile_user: "reconciler".to_string(),
            default_page_size: 50,
        }
    }
}

/// Deployment overrides. Unspecified values inherit from Global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageOverrides {
    pub working_root: Option<PathBuf>,
    pub history_root: Option<PathBuf>,
    pub max_duplicate_names: Option<u32>,
    pub allowed_exts: Option<Vec<String>>,
    pub metadata_timeout_ms: Option<u64>,
    pub reconcile_min_age_ms: Option<u64>,
    pub reconcile_user: Option<String>,
    pub default_page_size: Option<u32>,
}

impl StorageOverrides {
    pub fn from_json_file(path: &Path) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StorageError::ValidationFailed(format!("cannot read config '{}': {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| StorageError::ValidationFailed(format!("invalid config '{}': {}", path.display(), e)))
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env`, with an explicit lookup so callers and tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse_u64 = |k: &str| -> StorageResult<Option<u64>> {
            match get(k) {
                Some(v) => v.parse::<u64>().map(Some).map_err(|_| StorageError::ValidationFailed(format!("{} must be an integer, got '{}'", k, v))),
                None => Ok(None),
            }
        };
        Ok(Self {
            working_root: get("IMAGE_WORKING_DIR").map(PathBuf::from),
            history_root: get("IMAGE_HISTORY_DIR").map(PathBuf::from),
            metadata_timeout_ms: parse_u64("MEDIASTORE_METADATA_TIMEOUT_MS")?,
            reconcile_min_age_ms: parse_u64("MEDIASTORE_RECONCILE_MIN_AGE_MS")?,
            allowed_exts: get("MEDIASTORE_ALLOWED_EXTS").map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()),
            ..Default::default()
        })
    }

    /// Overlay `other` on top of `self`; values set in `other` win.
    pub fn merge(self, other: StorageOverrides) -> Self {
        Self {
            working_root: other.working_root.or(self.working_root),
            history_root: other.history_root.or(self.history_root),
            max_duplicate_names: other.max_duplicate_names.or(self.max_duplicate_names),
            allowed_exts: other.allowed_exts.or(self.allowed_exts),
            metadata_timeout_ms: other.metadata_timeout_ms.or(self.metadata_timeout_ms),
            reconcile_min_age_ms: other.reconcile_min_age_ms.or(self.reconcile_min_age_ms),
            reconcile_user: other.reconcile_user.or(self.reconcile_user),
            default_page_size: other.default_page_size.or(self.default_page_size),
        }
    }
}

/// Fully resolved config handed to the coordinator at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveConfig {
    pub working_root: PathBuf,
    pub history_root: PathBuf,
    pub max_duplicate_names: u32,
    pub allowed_exts: Vec<String>,
    pub metadata_timeout_ms: u64,
    pub reconcile_min_age_ms: u64,
    pub reconcile_user: String,
    pub default_page_size: u32,
}

impl EffectiveConfig {
    pub fn from_layers(global: &GlobalStorageConfig, ov: &StorageOverrides) -> Self {
        let allowed_exts = ov
            .allowed_exts
            .clone()
            .unwrap_or_else(|| global.allowed_exts.clone())
            .into_iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        let metadata_timeout_ms = ov.metadata_timeout_ms.unwrap_or(global.metadata_timeout_ms);
        // A file younger than the longest metadata call may still be waiting for its row.
        let mut reconcile_min_age_ms = ov.reconcile_min_age_ms.unwrap_or(global.reconcile_min_age_ms);
        if metadata_timeout_ms > 0 {
            reconcile_min_age_ms = reconcile_min_age_ms.max(metadata_timeout_ms.saturating_add(SWEEP_GRACE_MS));
        }
        Self {
            working_root: ov.working_root.clone().unwrap_or_else(|| global.working_root.clone()),
            history_root: ov.history_root.clone().unwrap_or_else(|| global.history_root.clone()),
            // A bound below 1 would reject even the requested name.
            max_duplicate_names: ov.max_duplicate_names.unwrap_or(global.max_duplicate_names).max(1),
            allowed_exts,
            metadata_timeout_ms,
            reconcile_min_age_ms,
            reconcile_user: ov.reconcile_user.clone().unwrap_or_else(|| global.reconcile_user.clone()),
            default_page_size: ov.default_page_size.unwrap_or(global.default_page_size),
        }
    }

    /// Defaults with the two roots replaced; handy for embedding and tests.
    pub fn with_roots<P: Into<PathBuf>, Q: Into<PathBuf>>(working_root: P, history_root: Q) -> Self {
        let ov = StorageOverrides { working_root: Some(working_root.into()), history_root: Some(history_root.into()), ..Default::default() };
        Self::from_layers(&GlobalStorageConfig::default(), &ov)
    }
}
