//! Storage promotion and the default_storage configuration knob.

use std::io::{Seek, SeekFrom};

use scratchfs::{FsConfig, FsError, OpenMode, ScratchFs, StorageKind};

fn auto_fs() -> ScratchFs {
    ScratchFs::with_config(
        FsConfig::new()
            .with_max_quota(1024 * 1024)
            .with_chunk_overhead(8),
    )
}

#[test]
fn non_tail_write_promotes_and_preserves_content() {
    let fs = auto_fs();
    let mut h = fs.open("/big", OpenMode::Write).unwrap();
    h.write_bytes(&vec![0u8; 10_000]).unwrap();
    drop(h);
    assert!(fs.stats().chunk_count > 0);

    let mut h = fs.open("/big", OpenMode::ReadWrite).unwrap();
    h.seek(SeekFrom::Start(100)).unwrap();
    h.write_bytes(b"marker").unwrap();
    drop(h);

    let mut h = fs.open("/big", OpenMode::Read).unwrap();
    let data = h.read_all().unwrap();
    assert_eq!(data.len(), 10_000);
    assert_eq!(&data[100..106], b"marker");
    assert!(data[..100].iter().all(|&b| b == 0));
    assert!(data[106..].iter().all(|&b| b == 0));

    // The promoted file no longer contributes chunks.
    assert_eq!(fs.stats().chunk_count, 0);
}

#[test]
fn promotion_settles_quota_to_exact_bytes() {
    let fs = auto_fs();
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    h.write_bytes(&[1u8; 500]).unwrap();
    h.write_bytes(&[2u8; 500]).unwrap();
    drop(h);
    // Two chunks of 500 bytes each plus overhead.
    assert_eq!(fs.stats().used_bytes, 1000 + 2 * 8);

    let mut h = fs.open("/f", OpenMode::ReadWrite).unwrap();
    h.seek(SeekFrom::Start(0)).unwrap();
    h.write_bytes(b"!").unwrap();
    drop(h);
    // Contiguous now: exactly the content bytes are charged.
    assert_eq!(fs.stats().used_bytes, 1000);
}

#[test]
fn sequential_only_rejects_non_tail_writes() {
    let fs = ScratchFs::with_config(
        FsConfig::new()
            .with_max_quota(1024 * 1024)
            .with_default_storage(StorageKind::Sequential),
    );
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    h.write_bytes(b"abcdef").unwrap();
    drop(h);

    let mut h = fs.open("/f", OpenMode::ReadWrite).unwrap();
    h.seek(SeekFrom::Start(2)).unwrap();
    match h.write_bytes(b"XX") {
        Err(FsError::Unsupported(_)) => {}
        other => panic!("expected Unsupported, got {other:?}"),
    }
    drop(h);

    // Appends still work and the content is untouched.
    let mut h = fs.open("/f", OpenMode::Append).unwrap();
    h.write_bytes(b"gh").unwrap();
    drop(h);
    let mut h = fs.open("/f", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), b"abcdefgh");
}

#[test]
fn promotion_above_hard_limit_is_unsupported() {
    let fs = ScratchFs::with_config(
        FsConfig::new()
            .with_max_quota(1024 * 1024)
            .with_promotion_hard_limit(64),
    );
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    h.write_bytes(&[0u8; 100]).unwrap();
    drop(h);

    let mut h = fs.open("/f", OpenMode::ReadWrite).unwrap();
    h.seek(SeekFrom::Start(10)).unwrap();
    assert!(matches!(
        h.write_bytes(b"x"),
        Err(FsError::Unsupported(_))
    ));
}

#[test]
fn random_access_files_never_have_chunks() {
    let fs = ScratchFs::with_config(
        FsConfig::new()
            .with_max_quota(1024 * 1024)
            .with_default_storage(StorageKind::RandomAccess),
    );
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    h.write_bytes(b"one").unwrap();
    h.write_bytes(b"two").unwrap();
    h.seek(SeekFrom::Start(1)).unwrap();
    h.write_bytes(b"X").unwrap();
    drop(h);

    assert_eq!(fs.stats().chunk_count, 0);
    let mut h = fs.open("/f", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), b"oXetwo");
}

#[test]
fn gap_write_through_promotion_zero_fills() {
    let fs = auto_fs();
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    h.write_bytes(b"ab").unwrap();
    h.seek(SeekFrom::Start(6)).unwrap();
    h.write_bytes(b"yz").unwrap();
    drop(h);

    let mut h = fs.open("/f", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), b"ab\0\0\0\0yz");
}

#[test]
fn promotion_failure_leaves_sequential_file_readable() {
    let fs = ScratchFs::with_config(
        FsConfig::new().with_max_quota(150).with_chunk_overhead(4),
    );
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    h.write_bytes(&[7u8; 100]).unwrap();
    drop(h);
    let used = fs.stats().used_bytes;

    // Promotion needs another 100 bytes for the copy; only 46 remain.
    let mut h = fs.open("/f", OpenMode::ReadWrite).unwrap();
    h.seek(SeekFrom::Start(0)).unwrap();
    let err = h.write_bytes(b"!").unwrap_err();
    assert!(err.is_quota());
    drop(h);

    assert_eq!(fs.stats().used_bytes, used);
    let mut h = fs.open("/f", OpenMode::Read).unwrap();
    assert_eq!(h.read_all().unwrap(), vec![7u8; 100]);
}

#[test]
fn truncate_on_sequential_collapses_chunks() {
    let fs = auto_fs();
    let mut h = fs.open("/f", OpenMode::Write).unwrap();
    for _ in 0..5 {
        h.write_bytes(&[3u8; 20]).unwrap();
    }
    drop(h);
    assert_eq!(fs.stats().chunk_count, 5);
    assert_eq!(fs.stats().used_bytes, 100 + 5 * 8);

    let mut h = fs.open("/f", OpenMode::ReadWrite).unwrap();
    h.truncate(30).unwrap();
    drop(h);
    assert_eq!(fs.stats().chunk_count, 1);
    assert_eq!(fs.stats().used_bytes, 30 + 8);
}
