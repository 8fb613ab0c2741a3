//! Unit tests for `AssembledMessageState`.

use std::{fs, sync::Arc};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::{
    identifier::{ClientIdentifier, SlicerId},
    overflow::OverflowConfig,
};

fn identifier() -> SliceIdentifier {
    SliceIdentifier::new(ClientIdentifier::from("assembly"), SlicerId::new(4), 2)
}

fn state_with(total_slices: u32, config: &OverflowConfig) -> AssembledMessageState {
    AssembledMessageState::new(
        identifier(),
        total_slices,
        config.new_buffer(),
        Arc::from("test"),
    )
}

/// A three-slice state backed by memory.
#[fixture]
fn three_slices() -> AssembledMessageState { state_with(3, &OverflowConfig::default()) }

#[rstest]
fn in_order_slices_seal_on_the_last(mut three_slices: AssembledMessageState) {
    let first = [0_u8, 1, 2, 3];
    let second = [4_u8, 5, 6, 7];

    assert!(!three_slices.add_slice(1, &first, SliceHash::INITIAL).expect("slice 1"));
    assert!(!three_slices.add_slice(2, &second, SliceHash::of(&first)).expect("slice 2"));
    assert!(three_slices.add_slice(3, &[8, 9], SliceHash::of(&second)).expect("slice 3"));

    assert!(three_slices.is_sealed());
    let bytes = three_slices
        .assembled_source()
        .expect("source")
        .read_all()
        .expect("read");
    assert_eq!(bytes, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[rstest]
fn skipped_slice_is_rejected_without_corrupting_the_buffer(
    mut three_slices: AssembledMessageState,
) {
    let first = [1_u8, 1];
    three_slices.add_slice(1, &first, SliceHash::INITIAL).expect("slice 1");

    let error = three_slices
        .add_slice(3, &[3, 3], SliceHash::of(&[2, 2]))
        .expect_err("slice 3 before 2");
    assert!(matches!(
        error,
        SlicingError::Sequencing {
            source: SequenceError::UnexpectedIndex { expected: 2, found: 3 },
            ..
        }
    ));

    assert!(!three_slices.add_slice(2, &[2, 2], SliceHash::of(&first)).expect("slice 2"));
    assert!(three_slices.add_slice(3, &[3, 3], SliceHash::of(&[2, 2])).expect("slice 3"));
    let bytes = three_slices
        .assembled_source()
        .expect("source")
        .read_all()
        .expect("read");
    assert_eq!(bytes, [1, 1, 2, 2, 3, 3]);
}

#[rstest]
fn duplicate_slice_is_rejected(mut three_slices: AssembledMessageState) {
    three_slices.add_slice(1, b"ab", SliceHash::INITIAL).expect("slice 1");
    let error = three_slices
        .add_slice(1, b"ab", SliceHash::INITIAL)
        .expect_err("duplicate");
    assert!(matches!(
        error,
        SlicingError::Sequencing {
            source: SequenceError::UnexpectedIndex { expected: 2, found: 1 },
            ..
        }
    ));
}

#[rstest]
fn first_slice_must_carry_initial_hash(mut three_slices: AssembledMessageState) {
    let error = three_slices
        .add_slice(1, b"ab", SliceHash::of(b"zz"))
        .expect_err("bad sentinel");
    assert!(matches!(
        error,
        SlicingError::Sequencing {
            source: SequenceError::HashMismatch { .. },
            ..
        }
    ));
}

#[rstest]
fn corrupted_previous_slice_breaks_the_chain(mut three_slices: AssembledMessageState) {
    // The receiver saw corrupted bytes; the sender hashed the originals.
    three_slices.add_slice(1, b"abXd", SliceHash::INITIAL).expect("slice 1");
    let error = three_slices
        .add_slice(2, b"efgh", SliceHash::of(b"abcd"))
        .expect_err("chain broken");
    assert!(matches!(
        error,
        SlicingError::Sequencing {
            source: SequenceError::HashMismatch { expected, found },
            ..
        } if expected == SliceHash::of(b"abXd") && found == SliceHash::of(b"abcd")
    ));
}

#[rstest]
fn index_beyond_total_is_out_of_range(mut three_slices: AssembledMessageState) {
    let error = three_slices
        .add_slice(4, b"", SliceHash::INITIAL)
        .expect_err("out of range");
    assert!(matches!(
        error,
        SlicingError::Sequencing {
            source: SequenceError::IndexOutOfRange { index: 4, total: 3 },
            ..
        }
    ));
}

#[rstest]
fn sealed_state_accepts_nothing_more() {
    let mut state = state_with(1, &OverflowConfig::default());
    assert!(state.add_slice(1, b"all", SliceHash::INITIAL).expect("only slice"));

    let error = state
        .add_slice(2, b"more", SliceHash::of(b"all"))
        .expect_err("sealed");
    assert!(matches!(
        error,
        SlicingError::IllegalState {
            source: StateError::Sealed,
            ..
        }
    ));
}

#[rstest]
fn closed_state_accepts_nothing_and_deletes_spill_file() {
    let dir = TempDir::new().expect("tempdir");
    let config = OverflowConfig::default().threshold(2).directory(dir.path());
    let mut state = state_with(2, &config);
    state.add_slice(1, b"spilled", SliceHash::INITIAL).expect("slice 1");
    assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 1);

    assert!(state.on_removal(RemovalCause::Expired).is_none());
    assert!(state.is_closed());
    assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);

    let error = state
        .add_slice(2, b"late", SliceHash::of(b"spilled"))
        .expect_err("closed");
    assert!(matches!(
        error,
        SlicingError::IllegalState {
            source: StateError::Closed,
            ..
        }
    ));
    assert!(state.assembled_source().is_err());
}
