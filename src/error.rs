/// Reasons for rejecting inbound data as malformed. A malformed message fails
///  the read that produced it but does not poison the transport - subsequent
///  reads may well succeed.
///
/// Transports report errors as [anyhow::Error] throughout; this enum is
///  carried inside so that callers who need to tell malformed input from a
///  broken channel can downcast for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    #[error("segment table is truncated")]
    TruncatedTable,

    #[error("message declares {declared} segments, configured limit is {limit}")]
    TooManySegments { declared: usize, limit: usize },

    #[error("message declares {declared_words} words but the buffer holds only {available_words}")]
    DeclaredLengthExceedsBuffer {
        declared_words: u64,
        available_words: u64,
    },

    #[error("message of {declared_words} words exceeds the configured read limit of {limit_words} words")]
    MessageTooBig {
        declared_words: u64,
        limit_words: u64,
    },

    #[error("datagram filled the receive buffer and may have been truncated by the channel")]
    TruncatedDatagram,
}
