use std::fmt::{Debug, Formatter};
use std::ops::Range;

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};

use crate::config::ReadLimits;
use crate::error::MalformedMessage;
use crate::segment_table::SegmentTable;

/// The fixed-width unit that the serialization layer above counts in: all
///  segment lengths and size limits are expressed in words, and decoded
///  segment memory is guaranteed to be word aligned.
pub type Word = u64;

pub const BYTES_PER_WORD: usize = size_of::<Word>();

/// An outbound message: one or more segments, immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    segments: Vec<Bytes>,
}
impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message({} segments)", self.segments.len())
    }
}

impl Message {
    pub fn from_segments(segments: Vec<Bytes>) -> anyhow::Result<Message> {
        if segments.is_empty() {
            bail!("a message has at least one segment");
        }
        for (idx, segment) in segments.iter().enumerate() {
            if segment.len() % BYTES_PER_WORD != 0 {
                bail!(
                    "segment {} is {} bytes long, which is not a whole number of words",
                    idx,
                    segment.len()
                );
            }
        }
        Ok(Message { segments })
    }

    pub fn single_segment(segment: Bytes) -> anyhow::Result<Message> {
        Message::from_segments(vec![segment])
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }
}

/// exact size of the serialized message, in words - output buffers are sized
///  from this, so [encode] never reallocates
pub fn serialized_size_in_words(segments: &[Bytes]) -> usize {
    let table = SegmentTable::for_segments(segments);
    table.num_words() + table.body_words() as usize
}

/// serialize a message into a freshly allocated, exactly sized buffer
pub fn encode(message: &Message) -> BytesMut {
    let size_bytes = serialized_size_in_words(message.segments()) * BYTES_PER_WORD;
    let mut buf = BytesMut::with_capacity(size_bytes);

    SegmentTable::for_segments(message.segments()).ser(&mut buf);
    for segment in message.segments() {
        buf.put_slice(segment);
    }

    debug_assert_eq!(buf.len(), size_bytes);
    buf
}

/// The buffer behind a decoded message. Decoded views are never aliased
///  against misaligned memory: a received buffer is only used in place if its
///  start address passes the word alignment check, otherwise its whole-word
///  prefix is copied into fresh word storage first.
#[derive(Debug)]
pub enum Backing {
    /// the received buffer itself, start address verified to be word aligned
    Aligned(BytesMut),
    /// freshly allocated word storage that misaligned (or stream-assembled)
    ///  data was copied into
    Normalized(Vec<Word>),
}

impl Backing {
    /// Take ownership of a received buffer, truncating it to whole words
    ///  (a trailing partial word is never read) and choosing the zero-copy or
    ///  the copy-normalize representation based on the alignment check.
    pub fn from_received(mut bytes: BytesMut) -> Backing {
        let whole_words = bytes.len() / BYTES_PER_WORD;
        bytes.truncate(whole_words * BYTES_PER_WORD);

        let word_aligned = bytemuck::try_cast_slice::<u8, Word>(bytes.as_ref()).is_ok();
        if word_aligned {
            Backing::Aligned(bytes)
        } else {
            let mut words = vec![0 as Word; whole_words];
            bytemuck::cast_slice_mut::<Word, u8>(&mut words).copy_from_slice(bytes.as_ref());
            Backing::Normalized(words)
        }
    }

    pub fn from_words(words: Vec<Word>) -> Backing {
        Backing::Normalized(words)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Aligned(bytes) => bytes.as_ref(),
            Backing::Normalized(words) => bytemuck::cast_slice(words),
        }
    }

    pub fn is_zero_copy(&self) -> bool {
        matches!(self, Backing::Aligned(_))
    }
}

/// A decoded inbound message: read-only, random-access views into segment
///  bodies over an owned backing buffer. Carries no file descriptors or other
///  capability-transfer side-channel data - whether a transport can provide
///  those at all is a property of the transport, see
///  [crate::message_stream::MessageStream::supports_fd_passing].
#[derive(Debug)]
pub struct MessageView {
    backing: Backing,
    segments: Vec<Range<usize>>,
}

impl MessageView {
    /// Parse and validate the segment table, returning lazy segment views on
    ///  success. Fails with [MalformedMessage] if the table is truncated,
    ///  declares more than the buffer holds, or exceeds the configured limits;
    ///  nothing caller-visible is mutated on failure.
    pub fn decode(backing: Backing, limits: &ReadLimits) -> anyhow::Result<MessageView> {
        let segments = {
            let bytes = backing.as_bytes();
            let available_words = (bytes.len() / BYTES_PER_WORD) as u64;

            let mut parse_buf = bytes;
            let table = SegmentTable::deser(&mut parse_buf, limits)?;

            let declared_words = table.total_words();
            if declared_words > limits.max_message_words {
                return Err(MalformedMessage::MessageTooBig {
                    declared_words,
                    limit_words: limits.max_message_words,
                }
                .into());
            }
            if declared_words > available_words {
                return Err(MalformedMessage::DeclaredLengthExceedsBuffer {
                    declared_words,
                    available_words,
                }
                .into());
            }

            let mut offset = table.num_words() * BYTES_PER_WORD;
            let mut segments = Vec::with_capacity(table.segment_words.len());
            for &segment_words in &table.segment_words {
                let segment_len = segment_words as usize * BYTES_PER_WORD;
                segments.push(offset..offset + segment_len);
                offset += segment_len;
            }
            segments
        };

        Ok(MessageView { backing, segments })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, idx: usize) -> &[u8] {
        &self.backing.as_bytes()[self.segments[idx].clone()]
    }

    pub fn segment_as_words(&self, idx: usize) -> &[Word] {
        bytemuck::try_cast_slice(self.segment(idx))
            .expect("backing buffers are word aligned by construction")
    }

    /// whether this view was decoded in place over the received buffer
    pub fn is_zero_copy(&self) -> bool {
        self.backing.is_zero_copy()
    }
}
