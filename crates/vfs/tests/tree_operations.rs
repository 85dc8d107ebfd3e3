//! End-to-end behaviour of the bucket filesystem against the in-memory store.

use futures::io::AsyncWriteExt;
use ossdav_storage::ObjectStore;
use ossdav_storage::backend::MockBackend;
use ossdav_vfs::error::ErrorKind;
use ossdav_vfs::tree::COPY_CONCURRENCY;
use ossdav_vfs::{
    BucketFileSystem, Credentials, FileSystem, LockDepth, LockScope, MountIdentity, Relocation, ResourceType,
    VirtualPath, classify,
};
use std::sync::Arc;

fn path(p: &str) -> VirtualPath {
    VirtualPath::parse(p).unwrap()
}

fn identity() -> MountIdentity {
    MountIdentity {
        region: "oss-cn-hangzhou".to_string(),
        bucket: "tree-ops".to_string(),
        credentials: Credentials { key_id: "id".to_string(), key_secret: "secret".to_string() },
    }
}

fn mount(mock: MockBackend) -> (Arc<MockBackend>, BucketFileSystem) {
    let mock = Arc::new(mock);
    (mock.clone(), BucketFileSystem::new(identity(), mock))
}

fn is_not_found(err: &ossdav_vfs::error::Error) -> bool {
    matches!(&**err, ErrorKind::ResourceNotFound(_))
}

fn is_invalid(err: &ossdav_vfs::error::Error) -> bool {
    matches!(&**err, ErrorKind::InvalidOperation(_))
}

#[tokio::test]
async fn rename_and_move_are_told_apart() {
    let (_, fs) = mount(MockBackend::with_objects([("a/b.txt", "b"), ("z/", "")]));

    assert_eq!(classify(&path("/a/b.txt"), &path("/a/c.txt")), Relocation::Rename("c.txt".to_string()));
    fs.move_to(&path("/a/b.txt"), &path("/a/c.txt")).await.unwrap();
    assert!(is_not_found(&fs.metadata(&path("/a/b.txt")).await.unwrap_err()));
    assert_eq!(fs.metadata(&path("/a/c.txt")).await.unwrap().size(), Some(1));

    assert_eq!(classify(&path("/a/c.txt"), &path("/z/c.txt")), Relocation::Move);
    fs.move_to(&path("/a/c.txt"), &path("/z/c.txt")).await.unwrap();
    assert!(is_not_found(&fs.metadata(&path("/a/c.txt")).await.unwrap_err()));
    assert_eq!(fs.resource_type(&path("/z/c.txt")).await.unwrap(), ResourceType::File);
}

#[tokio::test]
async fn directory_move_relocates_every_key() {
    let (mock, fs) = mount(MockBackend::with_objects([("dir/", ""), ("dir/x", "x"), ("dir/y/z", "z")]));
    fs.move_to(&path("/dir"), &path("/dir2")).await.unwrap();

    // The directory marker travels with its contents.
    assert_eq!(mock.keys().await, vec!["dir2/", "dir2/x", "dir2/y/z"]);
    assert_eq!(mock.copy_calls(), 3);
    assert!(mock.max_concurrent_copies() <= COPY_CONCURRENCY);
    assert!(is_not_found(&fs.metadata(&path("/dir")).await.unwrap_err()));
    assert_eq!(fs.read_dir(&path("/dir2")).await.unwrap(), vec![path("/dir2/x"), path("/dir2/y")]);
}

#[tokio::test]
async fn directory_move_without_marker() {
    let (mock, fs) = mount(MockBackend::with_objects([("dir/x", "x"), ("dir/y/z", "z")]));
    fs.rename(&path("/dir"), "dir2").await.unwrap();
    assert_eq!(mock.keys().await, vec!["dir2/x", "dir2/y/z"]);
}

#[tokio::test]
async fn large_tree_move_is_bounded_and_paginated() {
    let keys: Vec<String> = (0..60).map(|i| format!("photos/{:02}/{i:03}.jpg", i % 6)).collect();
    let mock = MockBackend::with_objects(keys.iter().map(|k| (k.clone(), "jpeg"))).with_page_size(7);
    let (mock, fs) = mount(mock);

    fs.move_to(&path("/photos"), &path("/archive/2024")).await.unwrap();

    let moved = mock.keys().await;
    assert_eq!(moved.len(), 60);
    assert!(moved.iter().all(|key| key.starts_with("archive/2024/")));
    assert_eq!(mock.copy_calls(), 60);
    assert!(mock.max_concurrent_copies() <= COPY_CONCURRENCY);
    assert!(mock.max_concurrent_copies() > 1);
    assert_eq!(mock.delete_multi_calls(), 1);
}

#[tokio::test]
async fn paginated_read_dir_is_complete() {
    let keys: Vec<String> = (0..23).map(|i| format!("inbox/{i:02}.eml")).collect();
    let mock = MockBackend::with_objects(keys.iter().map(|k| (k.clone(), "mail"))).with_page_size(5);
    let (mock, fs) = mount(mock);
    let children = fs.read_dir(&path("/inbox")).await.unwrap();
    assert_eq!(children.len(), 23);
    assert_eq!(children.first(), Some(&path("/inbox/00.eml")));
    assert_eq!(children.last(), Some(&path("/inbox/22.eml")));
    assert_eq!(mock.list_calls(), 5);
}

#[tokio::test]
async fn copy_keeps_sources() {
    let (mock, fs) = mount(MockBackend::with_objects([("dir/x", "x"), ("dir/y/z", "z"), ("a.txt", "a")]));
    fs.copy(&path("/dir"), &path("/backup")).await.unwrap();
    fs.copy(&path("/a.txt"), &path("/b.txt")).await.unwrap();
    assert_eq!(mock.keys().await, vec!["a.txt", "b.txt", "backup/x", "backup/y/z", "dir/x", "dir/y/z"]);
    assert_eq!(mock.delete_multi_calls(), 0);
    assert!(fs.exists(&path("/dir/x")).await);
}

#[tokio::test]
async fn failed_tree_copy_is_not_rolled_back() {
    let objects = [("src/a", "a"), ("src/b", "b"), ("src/c", "c"), ("src/d", "d")];
    let (mock, fs) = mount(MockBackend::with_objects(objects).with_failing_copy("src/c"));

    let err = fs.move_to(&path("/src"), &path("/dst")).await.unwrap_err();
    assert!(is_invalid(&err));

    let keys = mock.keys().await;
    // Every source survives, the failed copy never landed, and nothing was
    // bulk-deleted.
    for (source, _) in objects {
        assert!(keys.contains(&source.to_string()), "{source} missing");
    }
    assert!(!keys.contains(&"dst/c".to_string()));
    assert!(keys.iter().all(|key| key.starts_with("src/") || key.starts_with("dst/")));
    assert_eq!(mock.delete_multi_calls(), 0);
    assert!(fs.exists(&path("/src/a")).await);
}

#[tokio::test]
async fn root_cannot_be_mutated() {
    let (mock, fs) = mount(MockBackend::with_objects([("a.txt", "a")]));
    let root = VirtualPath::root();
    assert!(is_invalid(&fs.create(&root, ResourceType::Directory).await.unwrap_err()));
    assert!(is_invalid(&fs.delete(&root).await.unwrap_err()));
    assert!(is_invalid(&fs.rename(&root, "elsewhere").await.unwrap_err()));
    assert!(is_invalid(&fs.move_to(&root, &path("/elsewhere")).await.unwrap_err()));
    assert!(is_invalid(&fs.copy(&root, &path("/elsewhere")).await.unwrap_err()));
    assert!(is_invalid(&fs.copy(&path("/a.txt"), &root).await.unwrap_err()));
    assert_eq!(fs.size(&root).await.unwrap(), None);
    assert_eq!(fs.etag(&root).await.unwrap(), None);
    assert_eq!(fs.resource_type(&root).await.unwrap(), ResourceType::Directory);
    assert_eq!(mock.keys().await, vec!["a.txt"]);
}

#[tokio::test]
async fn delete_of_missing_leaf_is_not_found() {
    // The listing for "a" is not empty ("a.txt"), but nothing matches.
    let (mock, fs) = mount(MockBackend::with_objects([("a.txt", "a")]));
    assert!(is_not_found(&fs.delete(&path("/a")).await.unwrap_err()));
    assert_eq!(mock.delete_multi_calls(), 0);
}

#[tokio::test]
async fn repeated_directory_delete_follows_policy() {
    let objects = [("dir/", ""), ("dir/x", "x")];

    let (mock, lenient) = mount(MockBackend::with_objects(objects));
    assert!(lenient.exists(&path("/dir")).await);
    lenient.delete(&path("/dir")).await.unwrap();
    assert!(mock.keys().await.is_empty());
    // Nothing is left under the prefix: a second delete is a no-op.
    lenient.delete(&path("/dir")).await.unwrap();
    assert_eq!(mock.delete_multi_calls(), 1);

    let (_, strict) = mount(MockBackend::with_objects(objects));
    let strict = strict.with_strict_delete(true);
    strict.delete(&path("/dir")).await.unwrap();
    assert!(is_not_found(&strict.delete(&path("/dir")).await.unwrap_err()));
}

#[tokio::test]
async fn metadata_is_idempotent() {
    let (_, fs) = mount(MockBackend::with_objects([("docs/report.pdf", "%PDF-1.7"), ("docs/2024/q1.pdf", "%PDF")]));
    for target in ["/docs/report.pdf", "/docs/2024", "/docs"] {
        let first = fs.metadata(&path(target)).await.unwrap();
        let second = fs.metadata(&path(target)).await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.resource_type(), second.resource_type());
        assert_eq!(first.size(), second.size());
        assert_eq!(first.etag(), second.etag());
    }
    // Also across a cold cache.
    let (_, cold) = mount(MockBackend::with_objects([("docs/report.pdf", "%PDF-1.7")]));
    let warm = fs.metadata(&path("/docs/report.pdf")).await.unwrap();
    let fresh = cold.metadata(&path("/docs/report.pdf")).await.unwrap();
    assert_eq!(warm.etag(), fresh.etag());
    assert_eq!(warm.size(), fresh.size());
}

#[tokio::test]
async fn overwriting_a_locked_file_keeps_its_lock_and_properties() {
    let (mock, fs) = mount(MockBackend::with_objects([("a.txt", "old contents")]));
    let locks = fs.lock_manager(&path("/a.txt")).await.unwrap();
    let lock = locks.lock("alice", LockScope::Exclusive, LockDepth::Zero, None).await.unwrap();
    let props = fs.property_manager(&path("/a.txt")).await.unwrap();
    props.set("color", "red").await.unwrap();

    let mut writer = fs.write_stream(&path("/a.txt")).await.unwrap();
    writer.write_all(b"new").await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(mock.get("a.txt").await.unwrap(), b"new");
    assert_eq!(locks.locks().await.unwrap(), vec![lock]);
    assert_eq!(props.get("color").await.unwrap().as_deref(), Some("red"));
    assert_eq!(fs.metadata(&path("/a.txt")).await.unwrap().size(), Some(3));
}
