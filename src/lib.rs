//! Message transport layer beneath a capability-based RPC engine: serialized,
//!  word-segmented messages are moved between peers over interchangeable
//!  underlying channels (unreliable datagram sockets, plain byte streams,
//!  encrypted byte streams), all behind a single asynchronous [MessageStream]
//!  contract so that the engine above never special-cases the channel kind.
//!
//! ## Design goals
//!
//! * The abstraction is reading / writing *messages* (ordered sequences of
//!   word-aligned segments as produced by the serialization layer), not
//!   streams of bytes
//! * Decoding is zero-copy whenever the received buffer permits it: if the
//!   buffer's start address is word aligned, segment views are taken directly
//!   over the received memory; only misaligned buffers are copied into fresh
//!   word storage. A decoded view is never backed by misaligned memory.
//! * The datagram transport does not paper over what UDP does not provide:
//!   no retransmission, no fragmentation or reassembly, no reordering, no
//!   congestion control. Messages that do not fit one datagram are the
//!   caller's responsibility to avoid, guided by the transport's send buffer
//!   size hint.
//! * Batch writes are delivered strictly in input order by chaining sends,
//!   since the underlying channels have no atomic multi-message primitive.
//!
//! ## Wire format
//!
//! A message on the wire is the segment table followed by the segment bodies,
//!  with no gap in between - all numbers little endian:
//!
//! ```ascii
//! 0: number of segments minus one (u32)
//! 4: length of segment 0 in words (u32)
//! *: (repeated) length of segment k in words (u32)
//! *: zero padding to the next word boundary (present iff the number of
//!     segments is even)
//! *: segment bodies in segment order, each a whole number of words
//! ```
//!
//! A word is 8 bytes. The table occupies `segment_count / 2 + 1` words.
//!
//! On a datagram channel, one message is exactly one datagram. On a byte
//!  stream, messages are framed solely by their table-declared lengths.

pub mod config;
pub mod encryption;
pub mod error;
pub mod io_message_stream;
pub mod message;
pub mod message_stream;
pub mod safe_converter;
pub mod segment_table;
pub mod udp_message_stream;
