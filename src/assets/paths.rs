//! Logical names, physical paths and the two-zone path resolver.
//!
//! Logical names follow the FILESTORE path rules: NFC-normalized UTF-8, '/'-separated,
//! no empty/'.'/'..' segments and no NUL or backslash. Physical paths only ever come out
//! of a `PathResolver`, so the two cannot be mixed up by accident.

use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Prefix of staged files written next to their destination before publication.
pub const STAGING_PREFIX: &str = ".partial-";

/// Normalize a UTF-8 string to NFC.
pub fn normalize_nfc(input: &str) -> String {
    input.nfc().collect::<String>()
}

fn validate_logical_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("logical name cannot be empty".into());
    }
    if name.chars().any(|c| c == '\u{0000}') {
        return Err("logical name cannot contain NUL characters".into());
    }
    if name.contains('\\') {
        return Err("backslash is not allowed in logical names".into());
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err("leading or trailing '/' is not allowed in logical names".into());
    }
    for seg in name.split('/') {
        if seg.is_empty() {
            return Err("empty segment in logical name".into());
        }
        if seg == "." || seg == ".." {
            return Err("segments '.' and '..' are not allowed".into());
        }
        if seg.starts_with(STAGING_PREFIX) {
            return Err(format!("segments starting with '{}' are reserved", STAGING_PREFIX));
        }
    }
    Ok(())
}

/// Validated, NFC-normalized logical name of an asset (its `Fullname`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalName(String);

impl LogicalName {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let nfc = normalize_nfc(raw);
        validate_logical_name(&nfc).map_err(|reason| StorageError::ValidationFailed(format!("{}: {}", raw, reason)))?;
        Ok(Self(nfc))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn segments(&self) -> impl Iterator<Item = &str> { self.0.split('/') }

    /// Last segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Base file name up to the first '.'.
    pub fn name_part(&self) -> &str {
        let base = self.file_name();
        base.split('.').next().unwrap_or(base)
    }

    /// Final extension including the leading dot, or "" when absent.
    pub fn ext_part(&self) -> &str {
        let base = self.file_name();
        match base.rfind('.') {
            Some(0) | None => "",
            Some(i) => &base[i..],
        }
    }

    /// Name with `_<n>` inserted before the extension, keeping the parent folder.
    pub fn with_suffix(&self, n: u32) -> Self {
        let ext = self.ext_part();
        let stem = &self.0[..self.0.len() - ext.len()];
        Self(format!("{}_{}{}", stem, n, ext))
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl AsRef<str> for LogicalName {
    fn as_ref(&self) -> &str { &self.0 }
}

impl TryFrom<String> for LogicalName {
    type Error = StorageError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<LogicalName> for String {
    fn from(value: LogicalName) -> Self { value.0 }
}

/// Absolute location of bytes on disk, always under one of the resolver roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalPath(PathBuf);

impl PhysicalPath {
    pub fn as_path(&self) -> &Path { &self.0 }

    pub fn into_path_buf(self) -> PathBuf { self.0 }

    pub fn file_name(&self) -> Option<&str> { self.0.file_name().and_then(|s| s.to_str()) }

    pub fn parent(&self) -> Option<&Path> { self.0.parent() }

    /// Sibling staging path in the same directory, so publishing it is a same-volume link.
    pub fn staging_sibling(&self) -> PhysicalPath {
        let name = format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple());
        match self.0.parent() {
            Some(dir) => PhysicalPath(dir.join(name)),
            None => PhysicalPath(PathBuf::from(name)),
        }
    }
}

impl fmt::Display for PhysicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0.display()) }
}

impl AsRef<Path> for PhysicalPath {
    fn as_ref(&self) -> &Path { &self.0 }
}

pub fn is_staging_file_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Maps logical names to the working zone and backup names to the history zone.
#[derive(Debug, Clone)]
pub struct PathResolver {
    working_root: PathBuf,
    history_root: PathBuf,
    max_duplicate_names: u32,
}

impl PathResolver {
    /// Roots are absolutized without resolving symlinks. The two zones must not nest,
    /// otherwise the sweep would adopt backups as live files.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(working_root: P, history_root: Q, max_duplicate_names: u32) -> StorageResult<Self> {
        let working_root = absolutize(working_root.as_ref())?;
        let history_root = absolutize(history_root.as_ref())?;
        if working_root.starts_with(&history_root) || history_root.starts_with(&working_root) {
            return Err(StorageError::ValidationFailed(format!(
                "working root '{}' and history root '{}' must not contain each other",
                working_root.display(),
                history_root.display()
            )));
        }
        Ok(Self { working_root, history_root, max_duplicate_names })
    }

    pub fn working_root(&self) -> &Path { &self.working_root }

    pub fn history_root(&self) -> &Path { &self.history_root }

    pub fn max_duplicate_names(&self) -> u32 { self.max_duplicate_names }

    pub fn resolve_working_path(&self, name: &LogicalName) -> PhysicalPath {
        let mut path = self.working_root.clone();
        for seg in name.segments() {
            path.push(seg);
        }
        PhysicalPath(path)
    }

    /// Backup names are single opaque segments; anything else is rejected.
    pub fn resolve_history_path(&self, backup_name: &str) -> StorageResult<PhysicalPath> {
        let single = Path::new(backup_name).components().count() == 1
            && matches!(Path::new(backup_name).components().next(), Some(Component::Normal(_)));
        if backup_name.is_empty() || !single || backup_name.contains('/') || backup_name.contains('\\') || is_staging_file_name(backup_name) {
            return Err(StorageError::ValidationFailed(format!("invalid backup name '{}'", backup_name)));
        }
        Ok(PhysicalPath(self.history_root.join(backup_name)))
    }

    /// Opaque identifier plus the original extension. Never reused.
    pub fn generate_backup_name(&self, name: &LogicalName) -> String {
        format!("{}{}", Uuid::new_v4().simple(), name.ext_part())
    }

    /// `name`, `name_1`, `name_2`, ... up to the configured bound.
    pub fn candidate_names<'a>(&self, name: &'a LogicalName) -> impl Iterator<Item = LogicalName> + 'a {
        std::iter::once(name.clone()).chain((1..self.max_duplicate_names).map(move |n| name.with_suffix(n)))
    }

    /// First candidate with no file in the working zone.
    pub async fn generate_unique_working_name(&self, name: &LogicalName) -> StorageResult<LogicalName> {
        for candidate in self.candidate_names(name) {
            if !self.working_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StorageError::NameSpaceExhausted { name: name.to_string(), attempts: self.max_duplicate_names })
    }

    async fn working_exists(&self, name: &LogicalName) -> StorageResult<bool> {
        let path = self.resolve_working_path(name);
        tokio::fs::try_exists(path.as_path())
            .await
            .map_err(|e| StorageError::write_failed(&path, e))
    }

    /// Inverse of `resolve_working_path` for files found by a directory walk.
    pub fn logical_name_for(&self, path: &Path) -> Option<LogicalName> {
        let rel = path.strip_prefix(&self.working_root).ok()?;
        let mut segs = Vec::new();
        for c in rel.components() {
            match c {
                Component::Normal(s) => segs.push(s.to_str()?.to_string()),
                _ => return None,
            }
        }
        LogicalName::parse(&segs.join("/")).ok()
    }
}

fn absolutize(p: &Path) -> StorageResult<PathBuf> {
    p.absolutize()
        .map(|abs| abs.to_path_buf())
        .map_err(|e| StorageError::ValidationFailed(format!("cannot absolutize '{}': {}", p.display(), e)))
}
