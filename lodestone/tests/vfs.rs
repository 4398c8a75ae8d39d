//! Integration tests for the virtual file system: real mounts, read-only
//! packs and watchers.

use std::path::PathBuf;

use lodestone::stream::{SeekFrom, Stream, read_to_end};
use lodestone::vfs::{
    EntryType, ReadOnlyPackBuilder, Volume, WatcherEventType,
};
use lodestone::stream::{FileStream, MemoryStream};
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Build a two-file sample pack: `a.bin` (01 02 03) and `nested/b.rd`
/// (a small readable-data document).
fn build_sample_pack(path: &PathBuf) {
    let mut builder = ReadOnlyPackBuilder::new();
    let output = FileStream::open_for_write(path).expect("create pack file");
    builder.begin(Box::new(output)).unwrap();
    builder
        .add(&mut MemoryStream::from_vec(vec![0x01, 0x02, 0x03]), "a.bin")
        .unwrap();
    builder
        .add(
            &mut MemoryStream::from_vec(b"//! foo\nx = 1\n".to_vec()),
            "nested/b.rd",
        )
        .unwrap();
    builder.finalize().unwrap();
}

// ============================================================================
// REAL MOUNTS
// ============================================================================

#[test]
fn query_entry_reports_host_file_size() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("readme.txt"), b"hello lodestone").unwrap();

    let mut volume = Volume::new();
    volume.mount_real("/assets", temp.path()).unwrap();

    let status = volume.query_entry("/assets/readme.txt").unwrap();
    assert_eq!(status.entry_type, EntryType::File);
    assert_eq!(status.size, 15);
}

#[test]
fn unmount_removes_the_subtree_from_the_namespace() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("data.bin"), b"x").unwrap();

    let mut volume = Volume::new();
    volume.mount_real("/assets", temp.path()).unwrap();
    assert!(volume.check_existence("/assets/data.bin"));

    volume.unmount_real("/assets").unwrap();
    assert!(!volume.check_existence("/assets/data.bin"));
    assert!(!volume.check_existence("/assets"));
}

// ============================================================================
// READ-ONLY PACKS
// ============================================================================

#[test]
fn ropack_round_trip() {
    let temp = TempDir::new().unwrap();
    let pack_path = temp.path().join("content.pack");
    build_sample_pack(&pack_path);

    let mut volume = Volume::new();
    volume.mount_read_only_pack("/pack", &pack_path).unwrap();

    let nested: Vec<String> = volume.directory_iterator("/pack/nested").unwrap().collect();
    assert_eq!(nested, vec!["b.rd".to_string()]);

    let mut stream = volume.open_for_read("/pack/a.bin").unwrap();
    assert_eq!(read_to_end(stream.as_mut()).unwrap(), vec![0x01, 0x02, 0x03]);

    let status = volume.query_entry("/pack/nested/b.rd").unwrap();
    assert_eq!(status.entry_type, EntryType::File);
    assert!(status.read_only);
}

#[test]
fn ropack_stream_is_bounded_and_seekable() {
    let temp = TempDir::new().unwrap();
    let pack_path = temp.path().join("content.pack");
    build_sample_pack(&pack_path);

    let mut volume = Volume::new();
    volume.mount_read_only_pack("/pack", &pack_path).unwrap();

    // The stream's readable byte count equals the registry size, and
    // seek(End, -k) lands at size - k.
    let mut stream = volume.open_for_read("/pack/a.bin").unwrap();
    let size = volume.query_entry("/pack/a.bin").unwrap().size;
    assert_eq!(read_to_end(stream.as_mut()).unwrap().len() as u64, size);

    let position = stream.seek(SeekFrom::End(-1)).unwrap();
    assert_eq!(position, size - 1);
    let mut last = [0u8; 1];
    stream.read_exact(&mut last).unwrap();
    assert_eq!(last[0], 0x03);

    assert!(stream.seek(SeekFrom::Start(size + 1)).is_err());
    assert!(stream.seek(SeekFrom::Current(-10)).is_err());
}

#[test]
fn ropack_contents_reject_mutation() {
    let temp = TempDir::new().unwrap();
    let pack_path = temp.path().join("content.pack");
    build_sample_pack(&pack_path);

    let mut volume = Volume::new();
    volume.mount_read_only_pack("/pack", &pack_path).unwrap();

    assert!(volume.open_for_write("/pack/a.bin").is_err());
    assert!(volume.remove_file("/pack/a.bin").is_err());
    assert!(volume.remove_directory_with_content("/pack/nested").is_err());
    assert!(volume.make_directory("/pack/fresh").is_err());
}

// ============================================================================
// WATCHERS
// ============================================================================

#[test]
fn watcher_reports_added_modified_removed() {
    let temp = TempDir::new().unwrap();
    let mut volume = Volume::new();
    volume.mount_real("/assets", temp.path()).unwrap();

    let watcher = volume.watcher_create("/assets").unwrap();
    let mut iterator = volume.watcher_iterator(watcher).unwrap();

    std::fs::write(temp.path().join("fresh.rd"), b"//! t\n").unwrap();
    volume.poll_watchers();

    let events: Vec<_> = iterator.by_ref().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, WatcherEventType::Added);
    assert_eq!(events[0].path.as_str(), "assets/fresh.rd");

    std::fs::write(temp.path().join("fresh.rd"), b"//! t\nlonger = 1\n").unwrap();
    volume.poll_watchers();
    let events: Vec<_> = iterator.by_ref().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, WatcherEventType::Modified);

    std::fs::remove_file(temp.path().join("fresh.rd")).unwrap();
    volume.poll_watchers();
    let events: Vec<_> = iterator.by_ref().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, WatcherEventType::Removed);
}

#[test]
fn pinned_watcher_synthesizes_events_for_mounts() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("existing.bin"), b"abc").unwrap();

    let mut volume = Volume::new();
    volume.make_directory("/assets").unwrap();
    let watcher = volume.watcher_create("/assets").unwrap();
    let mut iterator = volume.watcher_iterator(watcher).unwrap();

    // Mounting below the pinned directory reports the mount and its
    // current content as added.
    volume.mount_real("/assets/data", temp.path()).unwrap();
    let events: Vec<_> = iterator.by_ref().collect();
    assert!(events.iter().any(|event| {
        event.event_type == WatcherEventType::Added && event.path.as_str() == "assets/data"
    }));
    assert!(events.iter().any(|event| {
        event.event_type == WatcherEventType::Added
            && event.path.as_str() == "assets/data/existing.bin"
    }));

    // Unmounting reports every descendant removed before the mount
    // directory itself.
    volume.unmount_real("/assets/data").unwrap();
    let events: Vec<_> = iterator.by_ref().collect();
    let removed: Vec<&str> = events
        .iter()
        .filter(|event| event.event_type == WatcherEventType::Removed)
        .map(|event| event.path.as_str())
        .collect();
    assert_eq!(removed, vec!["assets/data/existing.bin", "assets/data"]);
}

#[test]
fn pack_unmount_synthesizes_removed_events_children_first() {
    let temp = TempDir::new().unwrap();
    let pack_path = temp.path().join("content.pack");
    build_sample_pack(&pack_path);

    let mut volume = Volume::new();
    volume.make_directory("/assets").unwrap();
    let watcher = volume.watcher_create("/assets").unwrap();
    let mut iterator = volume.watcher_iterator(watcher).unwrap();

    volume
        .mount_read_only_pack("/assets/pack", &pack_path)
        .unwrap();
    let added: Vec<_> = iterator.by_ref().collect();
    assert!(added.iter().any(|event| event.path.as_str() == "assets/pack/nested/b.rd"));

    volume.unmount_read_only_pack("/assets/pack").unwrap();
    let removed: Vec<String> = iterator
        .by_ref()
        .filter(|event| event.event_type == WatcherEventType::Removed)
        .map(|event| event.path.as_str().to_string())
        .collect();

    let file_position = removed
        .iter()
        .position(|path| path == "assets/pack/nested/b.rd")
        .expect("file removal reported");
    let dir_position = removed
        .iter()
        .position(|path| path == "assets/pack/nested")
        .expect("directory removal reported");
    let mount_position = removed
        .iter()
        .position(|path| path == "assets/pack")
        .expect("mount removal reported");
    assert!(file_position < dir_position);
    assert!(dir_position < mount_position);
}
