//! Transfers that survive, or cleanly fail on, misbehaving traffic.
//!
//! Traffic between the two ends is tampered with through
//! [`Loopback::pump_with`] or delivered by hand to reproduce duplicates,
//! corruption, receiver restarts and cancellation.

use std::num::{NonZeroU32, NonZeroUsize};

use message_slicing::{
    AssemblerConfig,
    MessageSlice,
    RawMessage,
    SlicingError,
    SlicerConfig,
    WireMessage,
};
use rstest::rstest;
use slicing_testing::{Addr, Loopback, RECEIVER, SENDER, payload, staged};

fn pair(slice_size: usize) -> Loopback<RawMessage> {
    Loopback::new(
        SlicerConfig::new(NonZeroUsize::new(slice_size).expect("slice size must be non-zero")),
        AssemblerConfig::default(),
    )
}

fn corrupt(slice: &MessageSlice<Addr>) -> MessageSlice<Addr> {
    let mut data = slice.data().to_vec();
    data[0] ^= 0xff;
    MessageSlice::new(
        slice.identifier().clone(),
        data,
        slice.slice_index(),
        slice.total_slices(),
        slice.last_slice_hash(),
        *slice.reply_to(),
    )
}

/// Deliver the oldest queued message to whichever end it is addressed to.
fn step(pair: &Loopback<RawMessage>) {
    let (to, message) = pair.transport.pop().expect("a queued message");
    match to {
        RECEIVER => assert!(pair.assembler.handle_message(&message, &RECEIVER)),
        SENDER => assert!(pair.slicer.handle_message(&message)),
        other => panic!("unexpected address {other}"),
    }
}

#[rstest]
fn duplicated_slice_restarts_the_transfer() {
    let pair = pair(10);
    let bytes = payload(30);
    let mut first = None;
    let mut replaced = false;

    assert!(pair.slice("dup", staged(&bytes)));
    pair.pump_with(|_, message| match message {
        WireMessage::Slice(slice) if slice.slice_index() == 1 => {
            first.get_or_insert_with(|| slice.clone());
            Some(WireMessage::Slice(slice))
        }
        WireMessage::Slice(slice) if slice.slice_index() == 2 && !replaced => {
            replaced = true;
            first.clone().map(WireMessage::Slice)
        }
        other => Some(other),
    });

    assert!(replaced);
    assert_eq!(pair.traffic().slices, 2 + 3);
    assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
    assert_eq!(pair.failures.count(), 0);
    assert_eq!(pair.slicer.in_flight(), 0);
}

#[rstest]
fn corruption_is_caught_by_the_next_slice() {
    let pair = pair(10);
    let bytes = payload(30);
    let mut corrupted = false;

    assert!(pair.slice("corrupt", staged(&bytes)));
    pair.pump_with(|_, message| match message {
        WireMessage::Slice(slice) if slice.slice_index() == 1 && !corrupted => {
            corrupted = true;
            Some(WireMessage::Slice(corrupt(&slice)))
        }
        other => Some(other),
    });

    assert!(corrupted);
    assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
    assert_eq!(pair.failures.count(), 0);
}

#[rstest]
#[case::default_limit(3)]
#[case::single_try(1)]
fn persistent_corruption_exhausts_retries(#[case] max_tries: u32) {
    let pair: Loopback<RawMessage> = Loopback::new(
        SlicerConfig::new(NonZeroUsize::new(10).expect("non-zero"))
            .max_tries(NonZeroU32::new(max_tries).expect("non-zero")),
        AssemblerConfig::default(),
    );

    assert!(pair.slice("doomed", staged(&payload(30))));
    pair.pump_with(|_, message| match message {
        WireMessage::Slice(slice) if slice.slice_index() == 1 => Some(WireMessage::Slice(corrupt(&slice))),
        other => Some(other),
    });

    let failures = pair.failures.take();
    assert_eq!(failures.len(), 1);
    assert!(
        matches!(failures[0], SlicingError::RetriesExhausted { tries, .. } if tries == max_tries),
        "unexpected failure: {:?}",
        failures[0]
    );
    assert!(pair.received.is_empty());
    assert_eq!(pair.slicer.in_flight(), 0);
    assert_eq!(pair.assembler.in_flight(), 0);
}

#[rstest]
fn duplicate_final_reply_is_answered_with_an_abort() {
    let pair = pair(16);
    let bytes = payload(5);

    assert!(pair.slice("once", staged(&bytes)));
    step(&pair);
    let (to, reply) = pair.transport.pop().expect("reply to the only slice");
    assert_eq!(to, SENDER);

    assert!(pair.slicer.handle_message(&reply));
    assert_eq!(pair.slicer.in_flight(), 0);
    assert!(pair.slicer.handle_message(&reply));
    pair.pump();

    assert_eq!(pair.traffic().aborts, 1);
    assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
    assert_eq!(pair.failures.count(), 0);
}

#[rstest]
fn receiver_restart_mid_transfer_is_retried() {
    let pair = pair(10);
    let bytes = payload(30);

    assert!(pair.slice("restart", staged(&bytes)));
    step(&pair);
    step(&pair);
    assert_eq!(pair.assembler.in_flight(), 1);
    pair.assembler.close();
    pair.pump();

    assert_eq!(pair.received.take(), vec![(RawMessage::from(bytes), SENDER)]);
    assert_eq!(pair.failures.count(), 0);
    assert_eq!(pair.assembler.in_flight(), 0);
}

#[rstest]
fn undecodable_payload_fails_without_retry() {
    let pair: Loopback<String> = Loopback::new(
        SlicerConfig::new(NonZeroUsize::new(16).expect("non-zero")),
        AssemblerConfig::default(),
    );

    assert!(pair.slice("garbage", staged(&[0xff; 40])));
    pair.pump();

    assert_eq!(pair.traffic().slices, 3);
    let failures = pair.failures.take();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        SlicingError::Remote { failure, .. } => assert!(!failure.is_retriable()),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert!(pair.received.is_empty());
    assert_eq!(pair.slicer.in_flight(), 0);
    assert_eq!(pair.assembler.in_flight(), 0);
}

#[rstest]
fn cancelled_transfer_is_aborted_at_the_receiver() {
    let pair = pair(10);

    assert!(pair.slice("keep", staged(&payload(30))));
    assert!(pair.slice("drop", staged(&payload(30))));
    step(&pair);
    step(&pair);

    let cancelled = pair.slicer.cancel_slicing(|client| client.as_bytes() == b"drop");
    assert_eq!(cancelled, 1);
    pair.pump();

    let received = pair.received.take();
    assert_eq!(received.len(), 1);
    assert_eq!(pair.traffic().aborts, 1);
    assert_eq!(pair.failures.count(), 0);
    assert_eq!(pair.slicer.in_flight(), 0);
    assert_eq!(pair.assembler.in_flight(), 0);
}
