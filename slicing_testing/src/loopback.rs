//! A slicer and an assembler wired back to back over a recording transport.
//!
//! Nothing is delivered until [`Loopback::pump`] runs, which lets tests drop,
//! reorder or corrupt traffic between the two ends.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use message_slicing::{
    AssemblerConfig,
    Message,
    MessageAssembler,
    MessageSlicer,
    SliceOptions,
    SlicePayload,
    SlicerConfig,
    WireMessage,
    test_helpers::RecordingTransport,
};

use crate::sinks::{Collector, FailureLog};

/// Address of the slicing side.
pub const SENDER: &str = "sender";
/// Address of the assembling side.
pub const RECEIVER: &str = "receiver";

/// Address type used by [`Loopback`].
pub type Addr = &'static str;

/// Counts of messages delivered by [`Loopback::pump`], by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Unsliced messages.
    pub whole: usize,
    /// Slices.
    pub slices: usize,
    /// Replies to slices.
    pub replies: usize,
    /// Abort instructions.
    pub aborts: usize,
}

#[derive(Default)]
struct Counters {
    whole: AtomicUsize,
    slices: AtomicUsize,
    replies: AtomicUsize,
    aborts: AtomicUsize,
}

/// Sender and receiver sharing one [`RecordingTransport`].
pub struct Loopback<M> {
    /// Sending side.
    pub slicer: MessageSlicer<M, Addr, RecordingTransport<M, Addr>>,
    /// Receiving side.
    pub assembler: MessageAssembler<M, Addr, RecordingTransport<M, Addr>>,
    /// Traffic not yet delivered.
    pub transport: RecordingTransport<M, Addr>,
    /// Failures reported to the slicing callers.
    pub failures: FailureLog,
    /// Messages re-assembled or received whole.
    pub received: Collector<M, Addr>,
    counters: Counters,
}

impl<M> Loopback<M>
where
    M: Message + Send + fmt::Debug + 'static,
{
    /// Create both ends with the given settings.
    #[must_use]
    pub fn new(slicer: SlicerConfig, assembler: AssemblerConfig) -> Self {
        let transport = RecordingTransport::new();
        let received = Collector::new();
        Self {
            slicer: MessageSlicer::new(slicer, transport.clone()),
            assembler: MessageAssembler::new(assembler, transport.clone(), received.sink()),
            transport,
            failures: FailureLog::new(),
            received,
            counters: Counters::default(),
        }
    }

    /// Options addressing the receiver with replies to the sender.
    ///
    /// # Panics
    ///
    /// Never in practice: the two addresses differ.
    #[must_use]
    pub fn options(&self, client: &str, payload: SlicePayload<M>) -> SliceOptions<M, Addr> {
        SliceOptions::new(client, payload, RECEIVER, SENDER, self.failures.callback())
            .expect("sender and receiver addresses differ")
    }

    /// Start a transfer. See [`MessageSlicer::slice`].
    pub fn slice(&self, client: &str, payload: SlicePayload<M>) -> bool {
        self.slicer.slice(self.options(client, payload))
    }

    /// Deliver traffic until none is left. Returns the number of deliveries.
    pub fn pump(&self) -> usize { self.pump_with(|_, message| Some(message)) }

    /// Deliver traffic until none is left, passing each message through
    /// `intercept` first. Returning `None` drops the message.
    ///
    /// # Panics
    ///
    /// Panics if a message is addressed to neither end.
    pub fn pump_with(
        &self,
        mut intercept: impl FnMut(Addr, WireMessage<M, Addr>) -> Option<WireMessage<M, Addr>>,
    ) -> usize {
        let mut delivered = 0;
        while let Some((to, message)) = self.transport.pop() {
            let Some(message) = intercept(to, message) else {
                continue;
            };
            delivered += 1;
            self.count(&message);
            match to {
                RECEIVER => {
                    if let WireMessage::Whole(whole) = message {
                        self.received.sink()(whole, SENDER);
                    } else {
                        self.assembler.handle_message(&message, &RECEIVER);
                    }
                }
                SENDER => {
                    self.slicer.handle_message(&message);
                }
                other => panic!("message for unknown address {other}: {message:?}"),
            }
        }
        delivered
    }

    /// Deliveries so far, by kind.
    #[must_use]
    pub fn traffic(&self) -> Traffic {
        Traffic {
            whole: self.counters.whole.load(Ordering::SeqCst),
            slices: self.counters.slices.load(Ordering::SeqCst),
            replies: self.counters.replies.load(Ordering::SeqCst),
            aborts: self.counters.aborts.load(Ordering::SeqCst),
        }
    }

    fn count(&self, message: &WireMessage<M, Addr>) {
        let counter = match message {
            WireMessage::Whole(_) => &self.counters.whole,
            WireMessage::Slice(_) => &self.counters.slices,
            WireMessage::SliceReply(_) => &self.counters.replies,
            WireMessage::Abort(_) => &self.counters.aborts,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}
