//! Re-probe every live asset and repair size/dimension columns that drifted from the bytes on disk.

use serde::Serialize;
use std::io;
use tracing::warn;

use crate::error::StorageResult;

use super::context::OpContext;
use super::coordinator::FileOperationCoordinator;
use super::fsops;
use super::paths::LogicalName;
use super::types::{AssetQuery, OrderDir, OrderField};

const FALLBACK_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: u64,
    pub updated: u64,
    /// Live rows whose working file is gone; left for an operator.
    pub missing: u64,
    pub unreadable: u64,
}

pub async fn refresh_metadata(coord: &FileOperationCoordinator, ctx: &OpContext) -> StorageResult<RefreshReport> {
    const OP: &str = "refresh";
    let mut rep = RefreshReport::default();
    let page_size = match coord.config().default_page_size {
        0 => FALLBACK_PAGE_SIZE,
        n => n,
    };
    let mut page = 0u32;
    loop {
        let query = AssetQuery::page(page, page_size).order_by(OrderField::Id, OrderDir::Asc);
        let assets = coord.guarded(OP, ctx, coord.store().list_assets(&query)).await?;
        if assets.is_empty() {
            break;
        }
        for asset in &assets {
            rep.checked += 1;
            let Ok(name) = LogicalName::parse(&asset.fullname) else {
                rep.unreadable += 1;
                continue;
            };
            let path = coord.resolver().resolve_working_path(&name);
            let bytes = match fsops::read_all(&path).await {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(target: "mediastore::refresh", corr = %ctx.correlation, "asset {} has no file at '{}'", asset.id, path);
                    rep.missing += 1;
                    continue;
                }
                Err(e) => {
                    warn!(target: "mediastore::refresh", corr = %ctx.correlation, "cannot read '{}': {}", path, e);
                    rep.unreadable += 1;
                    continue;
                }
            };
            let dims = match coord.codec().probe(&bytes) {
                Ok(d) => d,
                Err(e) => {
                    warn!(target: "mediastore::refresh", corr = %ctx.correlation, "cannot probe asset {}: {}", asset.id, e);
                    rep.unreadable += 1;
                    continue;
                }
            };
            let size = bytes.len() as u64;
            if dims != asset.dimensions() || size != asset.disk_size {
                coord.guarded(OP, ctx, coord.store().update_asset_stats(asset.id, dims, size)).await?;
                rep.updated += 1;
            }
        }
        if (assets.len() as u32) < page_size {
            break;
        }
        page += 1;
    }
    crate::tprintln!(
        "MEDIASTORE refresh ok checked={} updated={} missing={} unreadable={} [corr={}]",
        rep.checked, rep.updated, rep.missing, rep.unreadable, ctx.correlation
    );
    Ok(rep)
}
