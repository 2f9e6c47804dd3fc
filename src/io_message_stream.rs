use anyhow::bail;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::config::ReadLimits;
use crate::error::MalformedMessage;
use crate::message::{Backing, Message, MessageView, Word, BYTES_PER_WORD};
use crate::message_stream::MessageStream;
use crate::safe_converter::SafeCast;
use crate::segment_table::SegmentTable;

/// [MessageStream] over an ordered byte stream: reads accumulate bytes until
///  a whole message frame is available, writes serialize directly onto the
///  stream. The stream type is generic, so a plaintext TCP connection and an
///  encrypted tunnel are handled identically - encryption is a
///  transport-setup concern, invisible at this layer.
///
/// Since the stream is ordered and reads accumulate until a full frame
///  exists, none of the datagram transport's truncation or alignment concerns
///  apply here: frame storage is allocated word aligned up front.
///
/// NB: unlike on a datagram channel, cancelling a read that already consumed
///  part of a frame leaves the stream positioned mid-frame - the caller must
///  treat the transport as broken after abandoning a read, the same as after
///  a channel failure.
pub struct IoMessageStream<S> {
    // one lock per direction: the reader flow and the writer flow proceed
    //  concurrently without contending with each other
    read_half: Mutex<ReadHalf<S>>,
    write_half: Mutex<WriteHalf<S>>,
    read_limits: ReadLimits,
}

impl<S: AsyncRead + AsyncWrite> IoMessageStream<S> {
    pub fn new(stream: S, read_limits: ReadLimits) -> IoMessageStream<S> {
        let (read_half, write_half) = tokio::io::split(stream);
        IoMessageStream {
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
            read_limits,
        }
    }

    async fn write_frame(
        &self,
        write_half: &mut WriteHalf<S>,
        message: &Message,
    ) -> anyhow::Result<()> {
        let table = SegmentTable::for_segments(message.segments());
        let mut table_buf = BytesMut::with_capacity(table.num_words() * BYTES_PER_WORD);
        table.ser(&mut table_buf);

        write_half.write_all(&table_buf).await?;
        for segment in message.segments() {
            write_half.write_all(segment).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send> MessageStream for IoMessageStream<S> {
    async fn try_read_message(&self) -> anyhow::Result<Option<MessageView>> {
        let mut read_half = self.read_half.lock().await;

        // the first word holds the segment count (and the first segment's
        //  length); end-of-stream is only clean if it happens right here, at a
        //  frame boundary
        let mut first_word = [0u8; BYTES_PER_WORD];
        if !read_exact_or_clean_eof(&mut *read_half, &mut first_word).await? {
            return Ok(None);
        }

        let segment_count: usize = {
            let mut buf = &first_word[..];
            let count_minus_one: usize = buf.get_u32_le().safe_cast();
            count_minus_one + 1
        };
        if segment_count > self.read_limits.max_segment_count {
            return Err(MalformedMessage::TooManySegments {
                declared: segment_count,
                limit: self.read_limits.max_segment_count,
            }
            .into());
        }

        let table_words = segment_count / 2 + 1;
        let mut table_bytes = vec![0u8; table_words * BYTES_PER_WORD];
        table_bytes[..BYTES_PER_WORD].copy_from_slice(&first_word);
        read_half.read_exact(&mut table_bytes[BYTES_PER_WORD..]).await?;

        let table = SegmentTable::deser(&mut &table_bytes[..], &self.read_limits)?;
        let total_words = table.total_words();
        if total_words > self.read_limits.max_message_words {
            // checked before allocating frame storage of attacker-declared size
            return Err(MalformedMessage::MessageTooBig {
                declared_words: total_words,
                limit_words: self.read_limits.max_message_words,
            }
            .into());
        }

        // frame storage is word storage, so the decoded view is aligned by
        //  construction
        let mut words = vec![0 as Word; total_words as usize];
        let frame = bytemuck::cast_slice_mut::<Word, u8>(&mut words);
        frame[..table_bytes.len()].copy_from_slice(&table_bytes);
        read_half.read_exact(&mut frame[table_bytes.len()..]).await?;
        drop(read_half);

        let view = MessageView::decode(Backing::from_words(words), &self.read_limits)?;
        Ok(Some(view))
    }

    async fn write_message(&self, message: &Message) -> anyhow::Result<()> {
        let mut write_half = self.write_half.lock().await;
        self.write_frame(&mut write_half, message).await?;
        write_half.flush().await?;
        Ok(())
    }

    async fn write_messages(&self, messages: &[Message]) -> anyhow::Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut write_half = self.write_half.lock().await;
        for message in messages {
            self.write_frame(&mut write_half, message).await?;
        }
        write_half.flush().await?;
        Ok(())
    }

    fn send_buffer_size_hint(&self) -> Option<usize> {
        // a byte stream does not bound the size of a single message
        None
    }

    async fn end(&self) -> anyhow::Result<()> {
        let mut write_half = self.write_half.lock().await;
        write_half.shutdown().await?;
        Ok(())
    }
}

/// Read exactly `buf.len()` bytes, distinguishing a clean end-of-stream
///  before the first byte (`Ok(false)`) from one in the middle of the data
///  (an error).
async fn read_exact_or_clean_eof<R: AsyncRead + Unpin>(
    read: &mut R,
    buf: &mut [u8],
) -> anyhow::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let num_read = read.read(&mut buf[filled..]).await?;
        if num_read == 0 {
            if filled == 0 {
                return Ok(false);
            }
            bail!("channel closed in the middle of a message frame");
        }
        filled += num_read;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, Bytes};
    use rstest::rstest;

    fn streams() -> (IoMessageStream<tokio::io::DuplexStream>, IoMessageStream<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            IoMessageStream::new(a, ReadLimits::default()),
            IoMessageStream::new(b, ReadLimits::default()),
        )
    }

    fn msg(segments: Vec<&'static [u8]>) -> Message {
        Message::from_segments(segments.into_iter().map(Bytes::from_static).collect()).unwrap()
    }

    #[rstest]
    #[case::one_segment(msg(vec![b"\x01\x02\x03\x04\x05\x06\x07\x08"]))]
    #[case::two_segments(msg(vec![&[17u8; 8], &[42u8; 16]]))]
    #[case::empty_segment(msg(vec![b""]))]
    #[tokio::test]
    async fn test_round_trip(#[case] message: Message) {
        let (a, b) = streams();

        a.write_message(&message).await.unwrap();

        let received = b.try_read_message().await.unwrap().unwrap();
        assert_eq!(received.segment_count(), message.segments().len());
        for (idx, segment) in message.segments().iter().enumerate() {
            assert_eq!(received.segment(idx), segment.as_ref());
        }
    }

    #[rstest]
    #[case::empty_batch(0)]
    #[case::single_message(1)]
    #[case::several_messages(4)]
    #[tokio::test]
    async fn test_batch_preserves_order(#[case] num_messages: usize) {
        let (a, b) = streams();

        let messages: Vec<Message> = (0..num_messages)
            .map(|i| {
                Message::single_segment(Bytes::from(vec![i as u8; (i + 1) * BYTES_PER_WORD]))
                    .unwrap()
            })
            .collect();

        a.write_messages(&messages).await.unwrap();

        for message in &messages {
            let received = b.try_read_message().await.unwrap().unwrap();
            assert_eq!(received.segment(0), message.segments()[0].as_ref());
        }
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        let (a, b) = streams();

        a.write_message(&msg(vec![&[5u8; 8]])).await.unwrap();
        a.end().await.unwrap();

        assert!(b.try_read_message().await.unwrap().is_some());
        assert!(b.try_read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_an_error() {
        let (mut a, b) = {
            let (a, b) = tokio::io::duplex(64 * 1024);
            (a, IoMessageStream::new(b, ReadLimits::default()))
        };

        // half a table word, then the stream ends
        a.write_all(&[0u8; 4]).await.unwrap();
        drop(a);

        assert!(b.try_read_message().await.is_err());
    }

    #[tokio::test]
    async fn test_over_limit_frame_is_rejected_before_allocation() {
        let (mut a, b) = {
            let (a, b) = tokio::io::duplex(64 * 1024);
            (a, IoMessageStream::new(b, ReadLimits::default()))
        };

        let mut frame = BytesMut::new();
        frame.put_u32_le(0); // one segment
        frame.put_u32_le(u32::MAX); // of absurd declared length

        a.write_all(&frame).await.unwrap();

        let result = b.try_read_message().await;
        assert!(matches!(
            result.unwrap_err().downcast::<MalformedMessage>().unwrap(),
            MalformedMessage::MessageTooBig { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_segment_count_is_rejected() {
        let (mut a, b) = {
            let (a, b) = tokio::io::duplex(64 * 1024);
            (a, IoMessageStream::new(b, ReadLimits::default()))
        };

        let mut frame = BytesMut::new();
        frame.put_u32_le(100_000);
        frame.put_u32_le(0);

        a.write_all(&frame).await.unwrap();

        let result = b.try_read_message().await;
        assert!(matches!(
            result.unwrap_err().downcast::<MalformedMessage>().unwrap(),
            MalformedMessage::TooManySegments { .. }
        ));
    }

    #[tokio::test]
    async fn test_no_size_hint_and_no_fd_passing() {
        let (a, _b) = streams();
        assert_eq!(a.send_buffer_size_hint(), None);
        assert!(!a.supports_fd_passing());
    }
}
