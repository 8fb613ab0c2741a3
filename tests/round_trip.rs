//! End-to-end transfers between a slicer and an assembler.
//!
//! These tests drive both ends through [`Loopback`] and check that what the
//! assembler hands over is exactly what the slicer was given, however the
//! payload is split.

use std::{
    num::NonZeroUsize,
    thread,
    time::{Duration, Instant},
};

use bincode::{Decode, Encode};
use message_slicing::{AssemblerConfig, OverflowConfig, RawMessage, SlicePayload, SlicerConfig};
use proptest::prelude::*;
use rstest::rstest;
use slicing_testing::{Loopback, SENDER, Traffic, payload, staged, staged_with};
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
struct Document {
    title: String,
    body: Vec<u8>,
    revision: u32,
}

fn slicer_config(slice_size: usize) -> SlicerConfig {
    SlicerConfig::new(NonZeroUsize::new(slice_size).expect("slice size must be non-zero"))
}

fn raw_pair(slice_size: usize) -> Loopback<RawMessage> {
    Loopback::new(slicer_config(slice_size), AssemblerConfig::default())
}

fn assert_idle<M>(pair: &Loopback<M>)
where
    M: message_slicing::Message + Send + std::fmt::Debug + 'static,
{
    assert_eq!(pair.slicer.in_flight(), 0, "slicer kept state");
    assert_eq!(pair.assembler.in_flight(), 0, "assembler kept state");
    assert!(pair.transport.is_empty(), "undelivered traffic");
}

#[rstest]
fn ten_bytes_in_slices_of_four() {
    let pair = raw_pair(4);
    let bytes: Vec<u8> = (0..10).collect();

    assert!(pair.slice("ten", staged(&bytes)));
    pair.pump();

    assert_eq!(
        pair.traffic(),
        Traffic {
            whole: 0,
            slices: 3,
            replies: 3,
            aborts: 0,
        }
    );
    let received = pair.received.take();
    assert_eq!(received, vec![(RawMessage::from(bytes), SENDER)]);
    assert_eq!(pair.failures.count(), 0);
    assert_idle(&pair);
}

#[rstest]
fn small_message_travels_unsliced() {
    let pair: Loopback<String> = Loopback::new(slicer_config(64), AssemblerConfig::default());

    let sliced = pair.slicer.slice(pair.options("greeting", SlicePayload::Message("hello".to_owned())));
    pair.pump();

    assert!(!sliced);
    assert_eq!(pair.traffic().slices, 0);
    assert_eq!(pair.traffic().whole, 1);
    assert_eq!(pair.received.take(), vec![("hello".to_owned(), SENDER)]);
    assert_idle(&pair);
}

#[rstest]
#[case::exact_multiple(64, 16, 4)]
#[case::remainder(65, 16, 5)]
#[case::single_byte_slices(7, 1, 7)]
#[case::one_slice(5, 16, 1)]
#[case::empty(0, 16, 1)]
fn slice_count_matches_payload(#[case] len: usize, #[case] slice_size: usize, #[case] slices: usize) {
    let pair = raw_pair(slice_size);
    let bytes = payload(len);

    assert!(pair.slice("counted", staged(&bytes)));
    pair.pump();

    assert_eq!(pair.traffic().slices, slices);
    assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
}

#[rstest]
fn structured_message_round_trips() {
    let pair: Loopback<Document> = Loopback::new(slicer_config(32), AssemblerConfig::default());
    let document = Document {
        title: "quarterly report".to_owned(),
        body: payload(1000),
        revision: 7,
    };

    assert!(pair.slicer.slice(pair.options("report", SlicePayload::Message(document.clone()))));
    pair.pump();

    assert_eq!(pair.received.take(), vec![(document, SENDER)]);
    assert_idle(&pair);
}

#[rstest]
fn spilled_payload_round_trips_and_leaves_no_files() {
    let dir = TempDir::new().expect("create temp dir");
    let overflow = OverflowConfig::default().threshold(100).directory(dir.path());
    let pair: Loopback<RawMessage> = Loopback::new(
        slicer_config(64).overflow(overflow.clone()),
        AssemblerConfig::default().overflow(overflow.clone()),
    );
    let bytes = payload(5000);

    assert!(pair.slice("large", staged_with(&bytes, &overflow)));
    pair.pump();

    assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
    let leftovers = std::fs::read_dir(dir.path()).expect("read temp dir").count();
    assert_eq!(leftovers, 0, "temporary files were not deleted");
}

#[rstest]
fn concurrent_transfers_stay_separate() {
    let pair = raw_pair(8);
    let first = payload(50);
    let second: Vec<u8> = payload(70).into_iter().rev().collect();

    assert!(pair.slice("first", staged(&first)));
    assert!(pair.slice("second", staged(&second)));
    assert_eq!(pair.slicer.in_flight(), 2);
    pair.pump();

    let mut received: Vec<Vec<u8>> = pair
        .received
        .take()
        .into_iter()
        .map(|(message, _)| message.into())
        .collect();
    received.sort_by_key(Vec::len);
    assert_eq!(received, vec![first, second]);
    assert_idle(&pair);
}

#[rstest]
fn transfers_started_and_pumped_from_many_threads_all_arrive() {
    const SENDERS: usize = 8;
    const PER_SENDER: usize = 20;
    const PUMPS: usize = 4;
    let total = SENDERS * PER_SENDER;
    let pair = raw_pair(16);
    let deadline = Instant::now() + Duration::from_secs(30);

    thread::scope(|scope| {
        for sender in 0..SENDERS {
            let pair = &pair;
            scope.spawn(move || {
                for n in 0..PER_SENDER {
                    let index = sender * PER_SENDER + n;
                    let client = format!("thread-{sender}-{n}");
                    assert!(pair.slice(&client, staged(&payload(40 + index))));
                }
            });
        }
        for _ in 0..PUMPS {
            let pair = &pair;
            scope.spawn(move || {
                while pair.received.len() < total {
                    assert!(Instant::now() < deadline, "transfers stalled");
                    if pair.pump() == 0 {
                        thread::yield_now();
                    }
                }
            });
        }
    });

    let mut received: Vec<Vec<u8>> = pair
        .received
        .take()
        .into_iter()
        .map(|(message, _)| message.into())
        .collect();
    received.sort_by_key(Vec::len);
    let expected: Vec<Vec<u8>> = (0..total).map(|index| payload(40 + index)).collect();
    assert_eq!(received, expected);
    assert_eq!(pair.failures.count(), 0);
    assert_idle(&pair);
}

proptest! {
    #[test]
    fn any_payload_survives_any_slice_size(
        bytes in proptest::collection::vec(any::<u8>(), 0..2048),
        slice_size in 1_usize..300,
    ) {
        let pair = raw_pair(slice_size);

        prop_assert!(pair.slice("prop", staged(&bytes)));
        pair.pump();

        let expected = bytes.len().div_ceil(slice_size).max(1);
        prop_assert_eq!(pair.traffic().slices, expected);
        prop_assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
        prop_assert_eq!(pair.failures.count(), 0);
    }
}
