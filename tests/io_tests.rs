//! File-backed readers and the multi-device entry point.

mod common;

use blkprobe::{BlockSource, DiskReader, ProbeError, Prober, Reader, Verdict};
use common::*;
use rstest::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[fixture]
fn image_dir() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let xfs = dir.path().join("xfs.img");
    let blank = dir.path().join("blank.img");
    fs::write(&xfs, xfs_image(b"label1\0\0\0\0\0\0")).unwrap();
    fs::write(&blank, vec![0u8; 64 * KIB]).unwrap();
    (dir, xfs, blank)
}

#[rstest]
fn test_probe_path(image_dir: (TempDir, PathBuf, PathBuf)) {
    let (_dir, xfs, blank) = image_dir;
    let prober = Prober::default();
    assert_eq!(prober.probe_path(&xfs).unwrap().name(), Some("xfs"));
    assert_eq!(prober.probe_path(&blank).unwrap(), Verdict::NotRecognized);
}

#[rstest]
fn test_probe_paths_keeps_input_order(image_dir: (TempDir, PathBuf, PathBuf)) {
    let (dir, xfs, blank) = image_dir;
    let missing = dir.path().join("missing.img");
    let paths = vec![blank.clone(), missing.clone(), xfs.clone(), blank.clone()];

    let results = Prober::default().probe_paths(&paths);
    let returned: Vec<_> = results.iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(returned, paths);

    assert!(matches!(results[0].1, Ok(Verdict::NotRecognized)));
    assert!(matches!(results[1].1, Err(ProbeError::NotFound(_))));
    assert_eq!(results[2].1.as_ref().unwrap().name(), Some("xfs"));
    assert!(matches!(results[3].1, Ok(Verdict::NotRecognized)));
}

#[rstest]
fn test_disk_reader_matches_mmap(image_dir: (TempDir, PathBuf, PathBuf)) {
    let (_dir, xfs, _) = image_dir;
    let mut disk = DiskReader::new(&xfs).unwrap();
    let mut mapped = Reader::new(&xfs).unwrap();
    assert!(mapped.is_mmap());
    assert_eq!(disk.size().unwrap(), mapped.size().unwrap());

    let mut a = [0u8; 16];
    let mut b = [0u8; 16];
    assert_eq!(disk.read_chunk(0, &mut a).unwrap(), 16);
    assert_eq!(mapped.read_chunk(0, &mut b).unwrap(), 16);
    assert_eq!(a, b);
    assert_eq!(&a[..4], b"XFSB");

    let prober = Prober::default();
    assert_eq!(prober.probe(&mut disk).unwrap().name(), Some("xfs"));
}
