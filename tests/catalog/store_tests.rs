// Tests for the catalog store

use tempfile::tempdir;
use volcat::catalog::{Catalog, Entry, EntryKind};

use crate::common::{catalog, dir, file, key};

#[test]
fn test_schema_is_created() {
    let catalog = catalog();
    let tables = catalog.table_names().unwrap();
    for table in ["dirs", "files", "hashes", "master_dirs"] {
        assert!(tables.iter().any(|t| t == table), "missing table {table}");
    }
}

#[test]
fn test_open_on_disk_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/catalog.db");
    {
        let mut catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.location(), Some(path.as_path()));
        catalog.reconcile(&[file("a.txt", 3, 1)]).unwrap();
    }

    let reopened = Catalog::open(&path).unwrap();
    let a = reopened.get_file(&key("a.txt")).unwrap().unwrap();
    assert_eq!(a.meta.size, 3);
}

#[test]
fn test_get_by_kind_uses_the_right_table() {
    let mut catalog = catalog();
    catalog.upsert_entry(&Entry::from(file("same", 1, 1))).unwrap();
    catalog.upsert_entry(&Entry::from(dir("same"))).unwrap();

    assert!(matches!(
        catalog.get(EntryKind::File, &key("same")).unwrap(),
        Some(Entry::File(_))
    ));
    assert!(matches!(
        catalog.get(EntryKind::Directory, &key("same")).unwrap(),
        Some(Entry::Directory(_))
    ));

    assert!(catalog.delete_entry(EntryKind::File, &key("same")).unwrap());
    assert!(catalog.get(EntryKind::File, &key("same")).unwrap().is_none());
    assert!(catalog.get(EntryKind::Directory, &key("same")).unwrap().is_some());
}

#[test]
fn test_timestamps_round_trip_at_second_resolution() {
    let mut catalog = catalog();
    catalog.reconcile(&[file("a.txt", 1, 1_700_000_123)]).unwrap();
    let a = catalog.get_file(&key("a.txt")).unwrap().unwrap();
    assert_eq!(a.meta.mtime.timestamp(), 1_700_000_123);
    assert_eq!(a.meta.ctime, a.meta.mtime);
}
