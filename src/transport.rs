//! Transport seam used by the slicer and the assembler.
//!
//! The protocol only needs a fire-and-forget `send`. Addresses are opaque:
//! they are compared, hashed, cloned and passed back to the transport, never
//! inspected. [`ChannelTransport`] is a ready-made in-process implementation
//! routing messages into tokio mailboxes.

use std::{fmt, hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::wire::WireMessage;

/// Opaque destination understood by a [`Transport`].
///
/// Any type that is cheap to clone, comparable and thread-safe qualifies via
/// the blanket implementation.
pub trait Address: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> Address for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Send primitive provided by the messaging substrate.
///
/// Delivery is best effort. Implementations must not block on the receiver
/// and must not assume ordering between different destinations.
pub trait Transport<M, A>: Send + Sync {
    /// Send `message` to `to`.
    fn send(&self, to: &A, message: WireMessage<M, A>);
}

impl<M, A, T> Transport<M, A> for Arc<T>
where
    T: Transport<M, A> + ?Sized,
{
    fn send(&self, to: &A, message: WireMessage<M, A>) { (**self).send(to, message); }
}

/// In-process transport delivering into per-address tokio mailboxes.
///
/// Clones share the same routing table.
///
/// # Examples
///
/// ```
/// use message_slicing::{
///     transport::{ChannelTransport, Transport},
///     wire::WireMessage,
/// };
///
/// let transport = ChannelTransport::<String, &'static str>::new();
/// let mut inbox = transport.register("receiver");
/// transport.send(&"receiver", WireMessage::Whole("hi".to_owned()));
/// assert_eq!(inbox.try_recv().ok(), Some(WireMessage::Whole("hi".to_owned())));
/// ```
pub struct ChannelTransport<M, A: Address> {
    mailboxes: Arc<DashMap<A, mpsc::UnboundedSender<WireMessage<M, A>>>>,
}

impl<M, A: Address> ChannelTransport<M, A> {
    /// Create a transport with no registered addresses.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mailboxes: Arc::new(DashMap::new()),
        }
    }

    /// Register `address`, replacing any previous mailbox, and return the
    /// receiving end.
    pub fn register(&self, address: A) -> mpsc::UnboundedReceiver<WireMessage<M, A>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(address, tx);
        rx
    }

    /// Stop routing messages to `address`.
    pub fn unregister(&self, address: &A) { self.mailboxes.remove(address); }
}

impl<M, A: Address> Default for ChannelTransport<M, A> {
    fn default() -> Self { Self::new() }
}

impl<M, A: Address> Clone for ChannelTransport<M, A> {
    fn clone(&self) -> Self {
        Self {
            mailboxes: Arc::clone(&self.mailboxes),
        }
    }
}

impl<M: Send + 'static, A: Address> Transport<M, A> for ChannelTransport<M, A> {
    fn send(&self, to: &A, message: WireMessage<M, A>) {
        let sender = self.mailboxes.get(to).map(|entry| entry.value().clone());
        let Some(sender) = sender else {
            warn!(?to, "dropping message for unknown address");
            return;
        };
        if sender.send(message).is_err() {
            warn!(?to, "dropping message for closed mailbox");
            self.mailboxes
                .remove_if(to, |_, current| current.same_channel(&sender));
        }
    }
}
