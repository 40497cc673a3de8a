//! Open-mode table behavior: creation, truncation, locking, preallocation.

use std::io::{Seek, SeekFrom};
use std::time::Duration;

use scratchfs::{FsConfig, FsError, OpenMode, OpenOptions, ScratchFs};

fn fs() -> ScratchFs {
    ScratchFs::with_config(FsConfig::new().with_max_quota(1024 * 1024))
}

#[test]
fn read_mode_requires_existing_file() {
    let fs = fs();
    match fs.open("/missing.bin", OpenMode::Read) {
        Err(FsError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn write_mode_creates_and_truncates() {
    let fs = fs();
    let mut h = fs.open("/f.bin", OpenMode::Write).unwrap();
    h.write_bytes(b"first contents").unwrap();
    drop(h);
    assert_eq!(fs.get_size("/f.bin").unwrap(), 14);

    // Reopening in write mode truncates to zero before the first write.
    let mut h = fs.open("/f.bin", OpenMode::Write).unwrap();
    h.write_bytes(b"new").unwrap();
    drop(h);
    assert_eq!(fs.get_size("/f.bin").unwrap(), 3);
}

#[test]
fn write_mode_does_not_create_missing_parents() {
    let fs = fs();
    match fs.open("/no/such/dir/f.bin", OpenMode::Write) {
        Err(FsError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(!fs.exists("/no"));
}

#[test]
fn append_mode_creates_and_positions_at_end() {
    let fs = fs();
    let mut h = fs.open("/log.bin", OpenMode::Append).unwrap();
    h.write_bytes(b"one").unwrap();
    drop(h);

    let mut h = fs.open("/log.bin", OpenMode::Append).unwrap();
    assert_eq!(h.position().unwrap(), 3);
    h.write_bytes(b"two").unwrap();
    drop(h);

    let mut h = fs.open("/log.bin", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), b"onetwo");
}

#[test]
fn append_write_overrides_seek() {
    let fs = fs();
    let mut h = fs.open("/f.bin", OpenMode::Write).unwrap();
    h.write_bytes(b"hello").unwrap();
    drop(h);

    let mut h = fs.open("/f.bin", OpenMode::Append).unwrap();
    h.seek(SeekFrom::Start(0)).unwrap();
    h.write_bytes(b" world").unwrap();
    drop(h);

    let mut h = fs.open("/f.bin", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), b"hello world");
}

#[test]
fn read_write_mode_requires_existing_and_starts_at_zero() {
    let fs = fs();
    assert!(matches!(
        fs.open("/f.bin", OpenMode::ReadWrite),
        Err(FsError::NotFound(_))
    ));

    let mut h = fs.open("/f.bin", OpenMode::Write).unwrap();
    h.write_bytes(b"abcdef").unwrap();
    drop(h);

    let mut h = fs.open("/f.bin", OpenMode::ReadWrite).unwrap();
    assert_eq!(h.position().unwrap(), 0);
    h.write_bytes(b"XY").unwrap();
    assert_eq!(h.read_all().unwrap(), b"cdef");
    drop(h);

    let mut h = fs.open("/f.bin", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), b"XYcdef");
}

#[test]
fn exclusive_create_fails_on_existing() {
    let fs = fs();
    fs.open("/f.bin", OpenMode::CreateNew).unwrap();
    match fs.open("/f.bin", OpenMode::CreateNew) {
        Err(FsError::AlreadyExists(_)) => {}
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[test]
fn text_like_modes_are_rejected_at_parse() {
    for bad in ["r", "w", "a", "rt", "wt", "w+", "rb+t", ""] {
        assert!(
            matches!(bad.parse::<OpenMode>(), Err(FsError::InvalidArgument(_))),
            "mode {bad:?} should be invalid"
        );
    }
}

#[test]
fn open_on_directory_fails() {
    let fs = fs();
    fs.mkdir("/d", false).unwrap();
    for mode in [
        OpenMode::Read,
        OpenMode::Write,
        OpenMode::Append,
        OpenMode::ReadWrite,
        OpenMode::CreateNew,
    ] {
        assert!(
            matches!(fs.open("/d", mode), Err(FsError::IsADirectory(_))),
            "mode {mode} should hit is-a-directory"
        );
    }
}

#[test]
fn preallocate_zero_fills() {
    let fs = fs();
    let h = fs
        .open_with(
            "/pre.bin",
            OpenMode::Write,
            OpenOptions::new().with_preallocate(256),
        )
        .unwrap();
    drop(h);
    assert_eq!(fs.get_size("/pre.bin").unwrap(), 256);

    let mut h = fs.open("/pre.bin", OpenMode::Read).unwrap();
    let data = h.read_all().unwrap();
    assert_eq!(data.len(), 256);
    assert!(data.iter().all(|&b| b == 0));
}

#[test]
fn preallocate_over_quota_closes_handle_and_fails() {
    let fs = ScratchFs::with_config(
        FsConfig::new()
            .with_max_quota(64)
            .with_chunk_overhead(0),
    );
    let err = fs
        .open_with(
            "/big.bin",
            OpenMode::Write,
            OpenOptions::new().with_preallocate(1000),
        )
        .unwrap_err();
    assert!(err.is_quota());
    // The lock was released on failure, so the path can be reopened.
    let h = fs.open("/big.bin", OpenMode::Write).unwrap();
    drop(h);
    assert_eq!(fs.get_size("/big.bin").unwrap(), 0);
}

#[test]
fn lock_timeout_zero_fails_fast_on_contention() {
    let fs = fs();
    let _writer = fs.open("/f.bin", OpenMode::Write).unwrap();
    let res = fs.open_with(
        "/f.bin",
        OpenMode::Read,
        OpenOptions::new().with_lock_timeout(Duration::ZERO),
    );
    assert!(matches!(res, Err(FsError::WouldBlock(_))));
}

#[test]
fn readers_share_the_file_lock() {
    let fs = fs();
    fs.open("/f.bin", OpenMode::Write).unwrap();
    let _r1 = fs.open("/f.bin", OpenMode::Read).unwrap();
    let _r2 = fs.open("/f.bin", OpenMode::Read).unwrap();
}

#[test]
fn lock_released_on_drop_allows_reopen() {
    let fs = fs();
    {
        let _h = fs.open("/f.bin", OpenMode::Write).unwrap();
    }
    let _h = fs.open("/f.bin", OpenMode::Write).unwrap();
}
