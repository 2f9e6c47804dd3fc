use bytes::{Buf, BufMut, Bytes};

use crate::config::ReadLimits;
use crate::error::MalformedMessage;
use crate::message::BYTES_PER_WORD;
use crate::safe_converter::{PrecheckedCast, SafeCast};

/// The segment table at the start of every serialized message: it declares
///  the segment count and each segment's length in words, and it must be
///  internally consistent with the buffer it arrived in before any segment
///  body is interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentTable {
    /// length of each segment, in words
    pub segment_words: Vec<u32>,
}

impl SegmentTable {
    pub fn for_segments(segments: &[Bytes]) -> SegmentTable {
        SegmentTable {
            segment_words: segments
                .iter()
                .map(|s| (s.len() / BYTES_PER_WORD).prechecked_cast())
                .collect(),
        }
    }

    /// number of words the serialized table occupies, padding included
    pub fn num_words(&self) -> usize {
        self.segment_words.len() / 2 + 1
    }

    /// sum of all declared segment lengths, in words
    pub fn body_words(&self) -> u64 {
        self.segment_words.iter().map(|&w| w as u64).sum()
    }

    /// table plus bodies, i.e. the size of the whole serialized message in words
    pub fn total_words(&self) -> u64 {
        let table_words: u64 = self.num_words().safe_cast();
        table_words + self.body_words()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let count: u32 = self.segment_words.len().prechecked_cast();
        buf.put_u32_le(count - 1);
        for &segment_words in &self.segment_words {
            buf.put_u32_le(segment_words);
        }
        if self.segment_words.len() % 2 == 0 {
            // the table is padded to a whole number of words
            buf.put_u32_le(0);
        }
    }

    pub fn deser(buf: &mut impl Buf, limits: &ReadLimits) -> anyhow::Result<SegmentTable> {
        let segment_count: usize = buf
            .try_get_u32_le()
            .map_err(|_| MalformedMessage::TruncatedTable)?
            .safe_cast();
        let segment_count = segment_count + 1;
        if segment_count > limits.max_segment_count {
            return Err(MalformedMessage::TooManySegments {
                declared: segment_count,
                limit: limits.max_segment_count,
            }
            .into());
        }

        let mut segment_words = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            segment_words.push(
                buf.try_get_u32_le()
                    .map_err(|_| MalformedMessage::TruncatedTable)?,
            );
        }
        if segment_count % 2 == 0 {
            // skip the padding; its content is not interpreted
            buf.try_get_u32_le()
                .map_err(|_| MalformedMessage::TruncatedTable)?;
        }

        Ok(SegmentTable { segment_words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn limits() -> ReadLimits {
        ReadLimits::default()
    }

    #[rstest]
    #[case::one_segment(vec![1])]
    #[case::one_empty_segment(vec![0])]
    #[case::two_segments(vec![1, 2])]
    #[case::three_segments(vec![4, 0, 9999])]
    #[case::many_segments((0..100).collect())]
    fn test_ser_deser(#[case] segment_words: Vec<u32>) {
        let original = SegmentTable { segment_words };

        let mut buf = bytes::BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), original.num_words() * BYTES_PER_WORD);

        let mut b: &[u8] = &buf;
        let deser = SegmentTable::deser(&mut b, &limits()).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[rstest]
    #[case::one_segment(vec![7], 1)]
    #[case::two_segments(vec![7, 1], 2)]
    #[case::three_segments(vec![7, 1, 2], 2)]
    #[case::four_segments(vec![7, 1, 2, 3], 3)]
    fn test_num_words(#[case] segment_words: Vec<u32>, #[case] expected: usize) {
        assert_eq!(SegmentTable { segment_words }.num_words(), expected);
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::count_only(&1u32.to_le_bytes())]
    #[case::missing_length(&[2, 0, 0, 0, 1, 0, 0, 0])]
    #[case::missing_padding(&[1, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0])]
    fn test_deser_truncated(#[case] mut buf: &[u8]) {
        let result = SegmentTable::deser(&mut buf, &limits());
        assert_eq!(
            result.unwrap_err().downcast::<MalformedMessage>().unwrap(),
            MalformedMessage::TruncatedTable
        );
    }

    #[test]
    fn test_deser_too_many_segments() {
        let mut buf = bytes::BytesMut::new();
        buf.put_u32_le(512); // i.e. 513 segments
        for _ in 0..513 {
            buf.put_u32_le(0);
        }

        let mut b: &[u8] = &buf;
        let result = SegmentTable::deser(&mut b, &limits());
        assert_eq!(
            result.unwrap_err().downcast::<MalformedMessage>().unwrap(),
            MalformedMessage::TooManySegments {
                declared: 513,
                limit: 512
            }
        );
    }

    #[test]
    fn test_for_segments() {
        let segments = vec![
            Bytes::from_static(&[0u8; 8]),
            Bytes::from_static(&[0u8; 0]),
            Bytes::from_static(&[0u8; 24]),
        ];
        assert_eq!(
            SegmentTable::for_segments(&segments).segment_words,
            vec![1, 0, 3]
        );
    }
}
