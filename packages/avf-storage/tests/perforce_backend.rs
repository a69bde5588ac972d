//! Perforce backend integration tests against the in-memory depot

mod common;

use avf_storage::{
    content_hash, DepotClient, ErrorKind, ReferenceType, StorageReference, StorageType,
    VersionEvent, VersionStore,
};
use common::*;
use pretty_assertions::assert_eq;
use std::fs;

#[test]
fn test_store_submits_changelist() {
    let (_dir, depot, store) = perforce_store();
    let hero = asset("chars/hero.fbx");

    let record = store
        .store_version(b"mesh", &hero, meta("jane").with_description("Initial block-out"))
        .unwrap();

    let changelist: u64 = record.revision.as_deref().unwrap().parse().unwrap();
    let described = depot.describe(changelist).unwrap().unwrap();
    assert_eq!(described.user, "jane");
    assert_eq!(described.description, "Initial block-out");
    assert_eq!(described.files[0].depot_path, "//depot/assets/chars/hero.fbx");
    assert_eq!(record.storage_pointer, content_hash(b"mesh"));
}

#[test]
fn test_unchanged_content_skips_submit() {
    let (_dir, depot, store) = perforce_store();
    let hero = asset("hero.fbx");

    let v1 = store.store_version(b"same", &hero, meta("jane")).unwrap();
    let v2 = store.store_version(b"same", &hero, meta("jane")).unwrap();

    assert_eq!(v1.revision, v2.revision);
    assert_eq!(depot.changes(DEPOT_ROOT).unwrap().len(), 1);
    assert_ne!(v1.version_id, v2.version_id);
}

#[test]
fn test_round_trip_by_changelist() {
    let (dir, _depot, store) = perforce_store();
    let hero = asset("hero.fbx");

    let v1 = store.store_version(b"first", &hero, meta("jane")).unwrap();
    store.store_version(b"second", &hero, meta("jane")).unwrap();

    let target = dir.path().join("hero_v1.fbx");
    store.retrieve_version(&v1.version_id, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"first");
}

#[test]
fn test_changelist_reference_resolution() {
    let (_dir, depot, store) = perforce_store();
    let changelist = depot
        .submit(
            "bob",
            "Import rocks",
            &[("//depot/assets/env/rock.fbx".to_string(), b"rock".to_vec())],
        )
        .unwrap();

    let reference = StorageReference::new(
        StorageType::Perforce,
        changelist.to_string(),
        "env/rock.fbx",
        ReferenceType::Changelist,
    );
    let r1 = store
        .create_version_from_reference(&reference, meta("jane"))
        .unwrap();
    let r2 = store
        .create_version_from_reference(&reference, meta("jane"))
        .unwrap();

    assert_eq!(r1.storage_pointer, content_hash(b"rock"));
    assert_eq!(r1.storage_pointer, r2.storage_pointer);
    assert_eq!(r1.event, VersionEvent::Referenced);
    // Resolving never submits
    assert_eq!(depot.changes(DEPOT_ROOT).unwrap().len(), 1);

    // Full depot paths are accepted too
    let by_depot_path = StorageReference::new(
        StorageType::Perforce,
        changelist.to_string(),
        "//depot/assets/env/rock.fbx",
        ReferenceType::Changelist,
    );
    let r3 = store
        .create_version_from_reference(&by_depot_path, meta("jane"))
        .unwrap();
    assert_eq!(r3.asset_path.as_str(), "env/rock.fbx");
}

#[test]
fn test_changelist_reference_errors() {
    let (_dir, depot, store) = perforce_store();
    let changelist = depot
        .submit("bob", "a", &[("//depot/assets/a.png".to_string(), b"a".to_vec())])
        .unwrap();

    let cases = [
        ("abc", "a.png", ReferenceType::Changelist, ErrorKind::InvalidReference),
        ("0", "a.png", ReferenceType::Changelist, ErrorKind::InvalidReference),
        ("999", "a.png", ReferenceType::Changelist, ErrorKind::NotFound),
        ("1", "b.png", ReferenceType::Changelist, ErrorKind::NotFound),
        ("1", "a.png", ReferenceType::Commit, ErrorKind::UnsupportedReference),
        ("1", "//other/a.png", ReferenceType::Changelist, ErrorKind::InvalidReference),
    ];
    assert_eq!(changelist, 1);

    for (storage_id, path, reference_type, expected) in cases {
        let reference = StorageReference::new(StorageType::Perforce, storage_id, path, reference_type);
        let err = store
            .create_version_from_reference(&reference, meta("jane"))
            .unwrap_err();
        assert_eq!(err.kind, expected, "{} {} {:?}", storage_id, path, reference_type);
    }
}

#[test]
fn test_list_references_per_file() {
    let (_dir, depot, store) = perforce_store();
    depot
        .submit(
            "bob",
            "batch",
            &[
                ("//depot/assets/a.png".to_string(), b"a".to_vec()),
                ("//depot/assets/b.png".to_string(), b"b".to_vec()),
            ],
        )
        .unwrap();
    depot
        .submit("bob", "outside", &[("//depot/other/c.png".to_string(), b"c".to_vec())])
        .unwrap();

    let refs: Vec<_> = store
        .list_references(None, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let paths: Vec<_> = refs.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["a.png", "b.png"]);
    assert_eq!(refs[0].metadata["user"], "bob");

    let filtered = store.list_references(Some(ReferenceType::Changelist), Some("b.")).unwrap().count();
    assert_eq!(filtered, 1);
}

#[test]
fn test_track_move_uses_depot_move() {
    let (dir, depot, store) = perforce_store();
    let old = asset("a.png");
    let new = asset("textures/a.png");

    let v1 = store.store_version(b"pixels", &old, meta("jane")).unwrap();
    let moved = store.track_move(&old, &new, &v1.version_id).unwrap();

    assert_eq!(moved.lineage.previous_path.as_deref(), Some("a.png"));
    assert_eq!(depot.head_revision("//depot/assets/a.png").unwrap(), None);
    assert!(depot.head_revision("//depot/assets/textures/a.png").unwrap().is_some());

    let target = dir.path().join("moved.png");
    store.retrieve_version(&moved.version_id, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"pixels");

    assert_eq!(store.history(&new).unwrap().len(), 2);
}

#[test]
fn test_track_move_of_non_head_version_keeps_its_content() {
    let (dir, depot, store) = perforce_store();
    let hero = asset("hero.fbx");
    let renamed = asset("renamed.fbx");

    let v1 = store.store_version(b"one", &hero, meta("jane")).unwrap();
    store.store_version(b"two", &hero, meta("jane")).unwrap();

    let reference = StorageReference::new(
        StorageType::Perforce,
        v1.revision.clone().unwrap(),
        "hero.fbx",
        ReferenceType::Changelist,
    );
    let adopted = store
        .create_version_from_reference(&reference, meta("bob"))
        .unwrap();
    let moved = store.track_move(&hero, &renamed, &adopted.version_id).unwrap();

    assert_eq!(moved.storage_pointer, content_hash(b"one"));
    let target = dir.path().join("renamed.fbx");
    store.retrieve_version(&moved.version_id, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"one");

    // Depot history carries the rename and the new path's head is the moved content
    assert_eq!(depot.head_revision("//depot/assets/hero.fbx").unwrap(), None);
    let head = depot
        .head_revision("//depot/assets/renamed.fbx")
        .unwrap()
        .unwrap();
    assert_eq!(depot.sync(head, "//depot/assets/renamed.fbx").unwrap(), b"one");
    assert_eq!(moved.revision, Some(head.to_string()));
}

#[test]
fn test_track_move_after_depot_path_is_gone() {
    let (dir, _depot, store) = perforce_store();
    let hero = asset("hero.fbx");

    let v1 = store.store_version(b"one", &hero, meta("jane")).unwrap();
    store.track_move(&hero, &asset("a.fbx"), &v1.version_id).unwrap();

    // The old path no longer exists in the depot; moving an older version
    // again resubmits its content
    let again = store.track_move(&hero, &asset("b.fbx"), &v1.version_id).unwrap();
    let target = dir.path().join("b.fbx");
    store.retrieve_version(&again.version_id, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"one");
}

#[test]
fn test_track_move_onto_same_path_rejected() {
    let (_dir, depot, store) = perforce_store();
    let hero = asset("hero.fbx");
    let v1 = store.store_version(b"one", &hero, meta("jane")).unwrap();

    let err = store.track_move(&hero, &hero, &v1.version_id).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert_eq!(depot.changes(DEPOT_ROOT).unwrap().len(), 1);
}

#[test]
fn test_concurrent_identical_stores_submit_once() {
    let (_dir, depot, store) = perforce_store();
    let store = std::sync::Arc::new(store);
    let hero = asset("hero.fbx");
    let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = std::sync::Arc::clone(&store);
            let barrier = std::sync::Arc::clone(&barrier);
            let hero = hero.clone();
            std::thread::spawn(move || {
                barrier.wait();
                store.store_version(b"same", &hero, meta("jane")).unwrap()
            })
        })
        .collect();
    let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(depot.changes(DEPOT_ROOT).unwrap().len(), 1);
    assert!(records.iter().all(|r| r.revision == records[0].revision));
    assert_eq!(store.history(&hero).unwrap().len(), 8);
}
