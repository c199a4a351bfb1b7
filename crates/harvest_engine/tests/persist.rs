use std::fs;

use harvest_engine::{ensure_dir, AtomicFileWriter, PersistError};
use tempfile::TempDir;

#[test]
fn creates_missing_directories() {
    let temp = TempDir::new().unwrap();
    let nested = temp.path().join("state").join("nested");
    assert!(!nested.exists());
    ensure_dir(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn rejects_a_file_in_place_of_the_directory() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let err = ensure_dir(&file_path).unwrap_err();
    assert!(matches!(err, PersistError::Dir { .. }));
}

#[test]
fn write_replaces_existing_content() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().join("out"));

    let first = writer.write("cursor.json", b"{\"nextPosition\": 1}").unwrap();
    assert_eq!(first.file_name().unwrap(), "cursor.json");

    let second = writer.write("cursor.json", b"{\"nextPosition\": 7}").unwrap();
    assert_eq!(first, second);
    assert_eq!(
        fs::read_to_string(&second).unwrap(),
        "{\"nextPosition\": 7}"
    );

    // Only the target remains; the temp file was renamed over it.
    let names: Vec<_> = fs::read_dir(writer.dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(names, vec!["cursor.json"]);
}

#[test]
fn failed_write_leaves_nothing_behind() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("shard.jsonl", b"data").is_err());
    assert!(!file_path.with_file_name("shard.jsonl").exists());
    assert_eq!(fs::read_to_string(&file_path).unwrap(), "x");
}
