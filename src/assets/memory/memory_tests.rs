use super::*;
use crate::assets::types::{AssetQuery, OrderDir, OrderField};
use tempfile::tempdir;

fn name(s: &str) -> LogicalName { LogicalName::parse(s).unwrap() }

fn new_asset(s: &str, size: u64) -> NewAsset {
    NewAsset { fullname: name(s), dimensions: Dimensions { width: 4, height: 3 }, disk_size: size, created_by: "alice".into() }
}

fn create(user: &str) -> HistoryEntry { HistoryEntry::new(FileAction::Create, user) }

#[tokio::test]
async fn create_fills_derived_parts_and_history() {
    let store = MemoryMetadataStore::new();
    let (asset, rec) = store.create_asset(new_asset("albums/IMG_1.JPG", 1024), create("alice")).await.unwrap();
    assert_eq!(asset.id, 1);
    assert_eq!(asset.name_part, "IMG_1");
    assert_eq!(asset.ext_part, ".JPG");
    assert_eq!(rec.file_id, asset.id);
    assert_eq!(rec.fullname, "albums/IMG_1.JPG");
    assert_eq!(rec.action, FileAction::Create);
    assert_eq!(store.get_asset_by_name(&name("albums/IMG_1.JPG")).await.unwrap().id, asset.id);
}

#[tokio::test]
async fn unique_index_rejects_live_duplicates_only() {
    let store = MemoryMetadataStore::new();
    let (a, _) = store.create_asset(new_asset("a.png", 1), create("u")).await.unwrap();
    let err = store.create_asset(new_asset("a.png", 2), create("u")).await.unwrap_err();
    assert_eq!(err, MetadataError::UniqueViolation("a.png".into()));
    assert_eq!(store.get_history_by_asset_id(a.id).await.unwrap().len(), 1);

    store.delete_asset(a.id, HistoryEntry::new(FileAction::Delete, "u")).await.unwrap();
    assert!(store.create_asset(new_asset("a.png", 3), create("u")).await.is_ok());
}

#[tokio::test]
async fn rename_moves_the_index_and_rejects_taken_names() {
    let store = MemoryMetadataStore::new();
    let (a, _) = store.create_asset(new_asset("a.png", 1), create("u")).await.unwrap();
    store.create_asset(new_asset("b.png", 1), create("u")).await.unwrap();

    let patch = AssetPatch { fullname: Some(name("b.png")), ..Default::default() };
    let err = store.update_asset(a.id, patch, HistoryEntry::new(FileAction::Rename, "u")).await.unwrap_err();
    assert!(matches!(err, MetadataError::UniqueViolation(_)));
    assert_eq!(store.get_history_by_asset_id(a.id).await.unwrap().len(), 1, "failed update appends nothing");

    let patch = AssetPatch { fullname: Some(name("dir/c.gif")), ..Default::default() };
    let (renamed, rec) = store.update_asset(a.id, patch, HistoryEntry::new(FileAction::Rename, "u")).await.unwrap();
    assert_eq!(renamed.ext_part, ".gif");
    assert_eq!(rec.fullname, "dir/c.gif");
    assert!(store.get_asset_by_name(&name("a.png")).await.unwrap_err().is_not_found());
    assert_eq!(store.get_asset_by_name(&name("dir/c.gif")).await.unwrap().id, a.id);
}

#[tokio::test]
async fn restore_consumes_the_backup_in_the_same_call() {
    let store = MemoryMetadataStore::new();
    let (a, _) = store.create_asset(new_asset("a.png", 1), create("u")).await.unwrap();
    let del = store
        .delete_asset(a.id, HistoryEntry::new(FileAction::Delete, "u").with_backup(Some("ff.png".into())))
        .await
        .unwrap();
    assert_eq!(store.get_deleted_history().await.unwrap(), vec![del.clone()]);

    let entry = HistoryEntry::new(FileAction::Restore, "u").consuming(del.id);
    let (restored, _) = store.create_asset(new_asset("a.png", 1), entry.clone()).await.unwrap();
    assert_ne!(restored.id, a.id);
    assert_eq!(store.get_history_record(del.id).await.unwrap().backup_fullname, None);
    assert!(store.get_deleted_history().await.unwrap().is_empty());

    // A consumed record cannot be consumed twice.
    store.delete_asset(restored.id, HistoryEntry::new(FileAction::Delete, "u")).await.unwrap();
    assert!(matches!(store.create_asset(new_asset("a.png", 1), entry).await, Err(MetadataError::Backend(_))));
}

#[tokio::test]
async fn listing_filters_by_any_tag_orders_and_pages() {
    let store = MemoryMetadataStore::new();
    for (n, size) in [("a.png", 30), ("b.png", 10), ("c.png", 20), ("d.png", 10)] {
        store.create_asset(new_asset(n, size), create("u")).await.unwrap();
    }
    store.add_tag(1, "cats").await.unwrap();
    store.add_tag(2, "dogs").await.unwrap();
    store.add_tag(2, "dogs").await.unwrap();
    store.add_tag(4, "cats").await.unwrap();
    assert_eq!(store.get_asset(2).await.unwrap().tags, vec!["dogs".to_string()]);

    let q = AssetQuery::page(0, 0).with_tags(["cats", "dogs"]).order_by(OrderField::DiskSize, OrderDir::Asc);
    let ids: Vec<_> = store.list_assets(&q).await.unwrap().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![2, 4, 1]);
    assert_eq!(store.count_assets(&["cats".to_string()]).await.unwrap(), 2);
    assert_eq!(store.count_assets(&[]).await.unwrap(), 4);

    let q = AssetQuery::page(1, 2).order_by(OrderField::Fullname, OrderDir::Desc);
    let names: Vec<_> = store.list_assets(&q).await.unwrap().into_iter().map(|a| a.fullname).collect();
    assert_eq!(names, vec!["b.png".to_string(), "a.png".to_string()]);

    store.remove_tag(1, "cats").await.unwrap();
    assert_eq!(store.count_assets(&["cats".to_string()]).await.unwrap(), 1);
}

#[tokio::test]
async fn stats_update_appends_no_history() {
    let store = MemoryMetadataStore::new();
    let (a, _) = store.create_asset(new_asset("a.png", 1), create("u")).await.unwrap();
    let fixed = store.update_asset_stats(a.id, Dimensions { width: 9, height: 8 }, 77).await.unwrap();
    assert_eq!((fixed.width, fixed.height, fixed.disk_size), (9, 8, 77));
    assert_eq!(store.get_history_by_asset_id(a.id).await.unwrap().len(), 1);
    assert!(store.update_asset_stats(99, Dimensions::default(), 0).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn snapshot_survives_reopen() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("meta/store.bin");
    {
        let store = MemoryMetadataStore::open(&path).unwrap();
        store.create_asset(new_asset("a.png", 5), create("u")).await.unwrap();
        store.add_tag(1, "keep").await.unwrap();
    }
    let store = MemoryMetadataStore::open(&path).unwrap();
    let a = store.get_asset_by_name(&name("a.png")).await.unwrap();
    assert_eq!(a.tags, vec!["keep".to_string()]);
    let (b, _) = store.create_asset(new_asset("b.png", 5), create("u")).await.unwrap();
    assert_eq!(b.id, 2);
    assert!(store.create_asset(new_asset("a.png", 5), create("u")).await.is_err());
}

#[tokio::test]
async fn failed_snapshot_write_rolls_back() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("store.bin");
    let store = MemoryMetadataStore::open(&path).unwrap();
    store.create_asset(new_asset("a.png", 5), create("u")).await.unwrap();

    // A directory where the temp file should go makes the next write fail.
    std::fs::create_dir_all(path.with_extension("tmp")).unwrap();
    let err = store.create_asset(new_asset("b.png", 5), create("u")).await.unwrap_err();
    assert!(matches!(err, MetadataError::Backend(_)));
    assert!(store.get_asset_by_name(&name("b.png")).await.unwrap_err().is_not_found());
    assert_eq!(store.count_assets(&[]).await.unwrap(), 1);
}

#[test]
fn corrupt_snapshot_is_a_backend_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("store.bin");
    std::fs::write(&path, b"\xff\xff\xff").unwrap();
    assert!(matches!(MemoryMetadataStore::open(&path), Err(MetadataError::Backend(_))));
}

#[tokio::test]
async fn clearing_a_backup_hides_the_delete_record() {
    let store = MemoryMetadataStore::new();
    let (a, _) = store.create_asset(new_asset("a.png", 1), create("u")).await.unwrap();
    let del = store
        .delete_asset(a.id, HistoryEntry::new(FileAction::Delete, "u").with_backup(Some("0a.png".into())))
        .await
        .unwrap();
    store.clear_backup_reference(del.id).await.unwrap();
    assert!(store.get_deleted_history().await.unwrap().is_empty());
    assert!(!store.get_history_record(del.id).await.unwrap().is_restorable());
    assert!(store.clear_backup_reference(404).await.unwrap_err().is_not_found());
}
