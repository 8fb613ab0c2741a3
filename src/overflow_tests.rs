//! Unit tests for the memory-to-disk overflow buffer.

use std::io::{Read, Write};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::{OverflowBuffer, OverflowConfig};
use crate::error::StateError;

#[fixture]
fn spill_dir() -> TempDir { TempDir::new().expect("temp dir") }

fn buffer_in(dir: &TempDir, threshold: usize) -> OverflowBuffer {
    OverflowConfig::default()
        .threshold(threshold)
        .directory(dir.path())
        .new_buffer()
}

fn files_in(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path())
        .expect("read spill dir")
        .count()
}

#[rstest]
fn small_payload_stays_in_memory(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 16);
    buffer.write_all(b"0123456789abcdef").expect("write");

    assert!(!buffer.is_spilled());
    assert_eq!(buffer.len(), 16);
    assert_eq!(files_in(&spill_dir), 0);

    let source = buffer.to_stream_source().expect("source");
    assert_eq!(source.read_all().expect("read"), b"0123456789abcdef");
}

#[rstest]
fn exceeding_threshold_moves_everything_to_disk(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 8);
    buffer.write_all(b"first").expect("write");
    assert!(!buffer.is_spilled());

    buffer.write_all(b"-second").expect("write");
    assert!(buffer.is_spilled());
    assert_eq!(files_in(&spill_dir), 1);

    buffer.write_all(b"-third").expect("write");
    let source = buffer.to_stream_source().expect("source");
    assert_eq!(source.len(), 18);
    assert_eq!(source.read_all().expect("read"), b"first-second-third");
}

#[rstest]
fn source_can_be_reopened_from_the_start(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 4);
    buffer.write_all(&[1, 2, 3, 4, 5, 6]).expect("write");
    let source = buffer.to_stream_source().expect("source");

    let mut first = source.open().expect("open first");
    let mut partial = [0_u8; 4];
    first.read_exact(&mut partial).expect("read first");
    assert_eq!(partial, [1, 2, 3, 4]);

    let mut second = source.open().expect("open second");
    let mut all = Vec::new();
    second.read_to_end(&mut all).expect("read second");
    assert_eq!(all, [1, 2, 3, 4, 5, 6]);
}

#[rstest]
fn to_stream_source_is_idempotent(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 1024);
    buffer.write_all(b"abc").expect("write");
    let first = buffer.to_stream_source().expect("first");
    let second = buffer.to_stream_source().expect("second");
    assert_eq!(first.read_all().expect("read"), second.read_all().expect("read"));
}

#[rstest]
fn writes_after_closing_are_rejected(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 1024);
    buffer.write_all(b"abc").expect("write");
    buffer.to_stream_source().expect("source");

    let err = buffer.write_all(b"more").expect_err("write after close");
    let inner = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<StateError>());
    assert_eq!(inner, Some(&StateError::WriteAfterClose));
}

#[rstest]
fn cleanup_deletes_the_backing_file(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 2);
    buffer.write_all(b"spilled").expect("write");
    let path = buffer.spill_path().expect("spilled").to_path_buf();
    let source = buffer.to_stream_source().expect("source");
    assert!(path.exists());

    buffer.cleanup();

    assert!(!path.exists());
    assert!(source.open().is_err());
    assert!(buffer.to_stream_source().is_err());
}

#[rstest]
fn dropping_the_buffer_deletes_the_backing_file(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 2);
    buffer.write_all(b"spilled").expect("write");
    assert_eq!(files_in(&spill_dir), 1);

    drop(buffer);

    assert_eq!(files_in(&spill_dir), 0);
}

#[rstest]
fn empty_buffer_yields_empty_source(spill_dir: TempDir) {
    let mut buffer = buffer_in(&spill_dir, 0);
    let source = buffer.to_stream_source().expect("source");
    assert!(source.is_empty());
    assert!(source.read_all().expect("read").is_empty());
}
