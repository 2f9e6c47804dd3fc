use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::config::TransportConfig;
use crate::encryption::{Aes256GcmEncryption, DatagramEncryption, NoEncryption};
use crate::error::MalformedMessage;
use crate::message::{encode, Backing, Message, MessageView};
use crate::message_stream::MessageStream;

/// This is an abstraction for the send / receive primitives of a datagram
///  socket, introduced to facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_datagram(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<()>;

    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_datagram(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<()> {
        UdpSocket::send_to(self, buf, to).await?;
        Ok(())
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }
}

/// [MessageStream] over an unreliable datagram socket, bound to one fixed
///  peer address for its entire lifetime: one message is one datagram, and
///  none of UDP's properties are papered over - messages may be dropped,
///  duplicated or reordered by the network, and this layer performs no
///  retransmission, reordering or fragmentation.
pub struct UdpMessageStream {
    socket: Arc<dyn DatagramSocket>,
    destination: SocketAddr,
    config: Arc<TransportConfig>,
    encryption: Arc<dyn DatagramEncryption>,
}

impl UdpMessageStream {
    /// Bind a local datagram socket and attach it to the given peer address.
    pub async fn bind(
        local_addr: SocketAddr,
        destination: SocketAddr,
        config: Arc<TransportConfig>,
    ) -> anyhow::Result<UdpMessageStream> {
        let socket = UdpSocket::bind(local_addr).await?;
        info!("bound datagram socket to {:?}", socket.local_addr()?);
        UdpMessageStream::new(Arc::new(socket), destination, config)
    }

    /// Attach an already bound socket to the given peer address.
    pub fn new(
        socket: Arc<dyn DatagramSocket>,
        destination: SocketAddr,
        config: Arc<TransportConfig>,
    ) -> anyhow::Result<UdpMessageStream> {
        config.validate()?;

        let encryption: Arc<dyn DatagramEncryption> = match &config.encryption_key {
            None => Arc::new(NoEncryption),
            Some(key) => Arc::new(Aes256GcmEncryption::new(key.as_slice())),
        };

        Ok(UdpMessageStream {
            socket,
            destination,
            config,
            encryption,
        })
    }
}

#[async_trait]
impl MessageStream for UdpMessageStream {
    /// NB: a datagram channel has no orderly end-of-stream signal, so this
    ///  never returns `Ok(None)`
    async fn try_read_message(&self) -> anyhow::Result<Option<MessageView>> {
        // a fresh buffer per receive: nothing is shared across reads, so a
        //  cancelled read cannot corrupt the next one. One byte bigger than
        //  the configured maximum, so a maximum-size datagram is readable but
        //  anything beyond it fills the buffer and is detectable.
        let mut buf = BytesMut::zeroed(self.config.max_datagram_size + 1);

        let (num_read, from) = self.socket.recv_datagram(buf.as_mut()).await?;
        trace!("received datagram of {} bytes from {:?}", num_read, from);

        if num_read == buf.len() {
            // the sender exceeded the configured datagram size, or the channel
            //  truncated the datagram to fit the buffer - either way the
            //  content is not trustworthy enough to decode
            debug!(
                "datagram from {:?} filled the receive buffer - rejecting as possibly truncated",
                from
            );
            return Err(MalformedMessage::TruncatedDatagram.into());
        }
        buf.truncate(num_read);

        self.encryption.decrypt_buffer(&mut buf)?;

        let view = MessageView::decode(Backing::from_received(buf), &self.config.read_limits)?;
        Ok(Some(view))
    }

    async fn write_message(&self, message: &Message) -> anyhow::Result<()> {
        let mut buf = encode(message);
        self.encryption.encrypt_buffer(&mut buf);

        if buf.len() > self.config.max_datagram_size {
            bail!(
                "message of {} bytes exceeds the datagram size limit of {} - messages this big must be split by the layer above",
                buf.len(),
                self.config.max_datagram_size
            );
        }

        self.socket.send_datagram(buf.as_ref(), self.destination).await
    }

    async fn write_messages(&self, messages: &[Message]) -> anyhow::Result<()> {
        // the socket only sends one datagram at a time, so batch ordering is
        //  constructed by awaiting each send before issuing the next
        for message in messages {
            self.write_message(message).await?;
        }
        Ok(())
    }

    fn send_buffer_size_hint(&self) -> Option<usize> {
        Some(self.config.max_datagram_size - self.encryption.overhead_len())
    }

    async fn end(&self) -> anyhow::Result<()> {
        // fire-and-forget datagrams: once a send call returned there is
        //  nothing left in flight at this layer
        Ok(())
    }
}
