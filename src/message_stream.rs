use async_trait::async_trait;

use crate::message::{Message, MessageView};

/// The transport contract that the RPC engine above is written against: read
///  and write whole messages, regardless of what kind of channel lies
///  underneath. Implementations must not leak channel-specific behavior
///  through this trait - the engine never special-cases datagram vs. stream.
///
/// A given instance is driven by one logical reader flow and one logical
///  writer flow; those two may run concurrently, but concurrent unsynchronized
///  *reads* (or concurrent unsynchronized *writes*) from independent tasks are
///  unsupported and their interleaving is undefined.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Wait for and return the next complete message, or `None` once the
    ///  channel signals orderly end-of-stream. Never returns a partially
    ///  decoded message: the result is a full view, `None`, or an error.
    ///
    /// A malformed inbound message is an error for *this* read only - it does
    ///  not terminate the transport, and subsequent reads may succeed.
    ///  Cancelling (dropping) an in-flight read leaves no partially consumed
    ///  buffer state behind.
    async fn try_read_message(&self) -> anyhow::Result<Option<MessageView>>;

    /// Transmit one message. Completion means the bytes have been handed
    ///  irrevocably to the underlying channel, *not* that the peer received
    ///  them - there are no acknowledgement semantics at this layer.
    async fn write_message(&self, message: &Message) -> anyhow::Result<()>;

    /// Transmit a batch of messages, preserving input order. The underlying
    ///  channels have no atomic multi-message primitive, so ordering is
    ///  constructed by completing each send before issuing the next. An empty
    ///  batch completes immediately without touching the channel.
    async fn write_messages(&self, messages: &[Message]) -> anyhow::Result<()>;

    /// The outbound capacity bound enforced by the underlying channel (e.g. a
    ///  maximum datagram payload), or `None` if no such bound applies. Callers
    ///  that need to move more data than this per message must arrange
    ///  fragmentation at a higher layer - this layer never fragments.
    fn send_buffer_size_hint(&self) -> Option<usize>;

    /// Whether this transport kind can carry file descriptors alongside a
    ///  message. Queried, never assumed: received views carry no descriptor
    ///  data unless this returns `true`.
    fn supports_fd_passing(&self) -> bool {
        false
    }

    /// Signal the intent to stop sending. Completes once any in-flight send
    ///  is observably finished; reading may still be possible afterwards.
    async fn end(&self) -> anyhow::Result<()>;
}
