// Tests for duplicate accounting

use volcat::catalog::EntryKind;

use crate::common::{catalog, dir, file, file_in, key, set_hash};

#[test]
fn test_counts_direct_children_with_shared_hash() {
    // dir1 holds X and Y with the same hash and Z with a unique one
    let mut catalog = catalog();
    catalog
        .reconcile(&[
            file("dir1/x.txt", 5, 1),
            file("dir1/y.txt", 5, 1),
            file("dir1/z.txt", 7, 1),
        ])
        .unwrap();
    catalog.reconcile(&[dir("dir1")]).unwrap();
    set_hash(&mut catalog, &key("dir1/x.txt"), "hX");
    set_hash(&mut catalog, &key("dir1/y.txt"), "hX");
    set_hash(&mut catalog, &key("dir1/z.txt"), "hZ");

    assert_eq!(catalog.recompute_duplicate_counts().unwrap(), 1);
    let dir1 = catalog.get_dir(&key("dir1")).unwrap().unwrap();
    assert_eq!(dir1.duplicate_count, Some(2));
    assert_eq!(catalog.duplicate_file_count().unwrap(), 2);
}

#[test]
fn test_duplicates_across_directories_and_volumes() {
    let mut catalog = catalog();
    catalog
        .reconcile(&[file("a/one.jpg", 100, 1), file("b/two.jpg", 100, 1)])
        .unwrap();
    catalog.reconcile(&[file_in("v2", "c/three.jpg", 100, 1)]).unwrap();
    catalog.reconcile(&[dir("a"), dir("b"), dir("empty")]).unwrap();
    set_hash(&mut catalog, &key("a/one.jpg"), "same");
    set_hash(&mut catalog, &key("b/two.jpg"), "other");
    set_hash(
        &mut catalog,
        &volcat::catalog::EntryKey::new("v2", "c/three.jpg"),
        "same",
    );

    catalog.recompute_duplicate_counts().unwrap();
    assert_eq!(catalog.get_dir(&key("a")).unwrap().unwrap().duplicate_count, Some(1));
    assert_eq!(catalog.get_dir(&key("b")).unwrap().unwrap().duplicate_count, Some(0));
    // Directories without files are counted as zero
    assert_eq!(catalog.get_dir(&key("empty")).unwrap().unwrap().duplicate_count, Some(0));
}

#[test]
fn test_zero_size_files_are_not_duplicates() {
    let mut catalog = catalog();
    catalog
        .reconcile(&[file("d/empty1", 0, 1), file("d/empty2", 0, 1)])
        .unwrap();
    catalog.reconcile(&[dir("d")]).unwrap();
    let empty_digest = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    set_hash(&mut catalog, &key("d/empty1"), empty_digest);
    set_hash(&mut catalog, &key("d/empty2"), empty_digest);

    catalog.recompute_duplicate_counts().unwrap();
    assert_eq!(catalog.get_dir(&key("d")).unwrap().unwrap().duplicate_count, Some(0));
    assert_eq!(catalog.duplicate_file_count().unwrap(), 0);
}

#[test]
fn test_recount_writes_only_changes() {
    let mut catalog = catalog();
    catalog
        .reconcile(&[file("d/a", 3, 1), file("d/b", 3, 1)])
        .unwrap();
    catalog.reconcile(&[dir("d"), dir("other")]).unwrap();
    set_hash(&mut catalog, &key("d/a"), "h");
    set_hash(&mut catalog, &key("d/b"), "h");

    assert_eq!(catalog.recompute_duplicate_counts().unwrap(), 2);
    assert_eq!(catalog.recompute_duplicate_counts().unwrap(), 0);

    catalog.delete_entry(EntryKind::File, &key("d/b")).unwrap();
    assert_eq!(catalog.recompute_duplicate_counts().unwrap(), 1);
    assert_eq!(catalog.get_dir(&key("d")).unwrap().unwrap().duplicate_count, Some(0));
}
