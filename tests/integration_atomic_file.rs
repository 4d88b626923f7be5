//! Atomic file update scenarios spanning more than one call, as opposed to
//! the single-feature unit tests in `src/atomic_file.rs`.

use legato_ipc::atomic_file::{AtomicFile, CreateMode};

#[test]
fn a_crash_mid_write_is_invisible_to_the_next_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{\"version\":1}").unwrap();

    // Simulate a writer that built its replacement but never got to commit.
    let mut writer = AtomicFile::create(&path, CreateMode::OpenIfExists).unwrap();
    writer.write_all(b"{\"version\":2, unterminated").unwrap();
    drop(writer); // crash: no commit() call

    let mut reader = AtomicFile::open_read(&path).unwrap();
    let mut contents = Vec::new();
    {
        let mut file = reader.file_mut();
        use std::io::Read;
        file.read_to_end(&mut contents).unwrap();
    }
    assert_eq!(contents, b"{\"version\":1}");
}

#[test]
fn repeated_opens_after_crashes_do_not_accumulate_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"v0").unwrap();

    for _ in 0..5 {
        let mut writer = AtomicFile::create(&path, CreateMode::OpenIfExists).unwrap();
        writer.write_all(b"garbage").unwrap();
        drop(writer);
    }

    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().contains("bak~~"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn a_full_write_commit_read_cycle_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let mut writer = AtomicFile::create(&path, CreateMode::ReplaceIfExists).unwrap();
    writer.write_all(b"{\"version\":1}").unwrap();
    writer.commit().unwrap();

    let mut reader = AtomicFile::open_read(&path).unwrap();
    let mut contents = Vec::new();
    {
        let mut file = reader.file_mut();
        use std::io::Read;
        file.read_to_end(&mut contents).unwrap();
    }
    assert_eq!(contents, b"{\"version\":1}");
}
