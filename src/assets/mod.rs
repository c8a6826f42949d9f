//! Asset storage engine: working/history zones on disk kept consistent with a metadata store.

pub mod types;
pub mod paths;
pub mod correlation;
pub mod context;
pub mod fsops;
pub mod inflight;
pub mod codec;
pub mod metadata;
pub mod memory;
pub mod coordinator;
pub mod reconcile;
pub mod refresh;

pub use types::{Asset, AssetId, AssetOrder, AssetPage, AssetPatch, AssetQuery, Dimensions, FileAction, HistoryEntry, HistoryId, HistoryRecord, NewAsset, OrderDir, OrderField};
pub use paths::{LogicalName, PathResolver, PhysicalPath};
pub use correlation::CorrelationId;
pub use context::OpContext;
pub use inflight::InFlightNames;
pub use codec::{Codec, CodecError, ImageCodec};
pub use metadata::{MetadataError, MetadataResult, MetadataStore};
pub use memory::MemoryMetadataStore;
pub use coordinator::{AddOptions, FileOperationCoordinator};
pub use reconcile::{reconcile_working_zone, ReconcileReport};
pub use refresh::{refresh_metadata, RefreshReport};
