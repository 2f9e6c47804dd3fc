use anyhow::bail;

use crate::encryption::AES_256_GCM_OVERHEAD;

/// Limits applied while decoding an inbound message, guarding the amount of
///  memory a peer can make us allocate before any of its data is trusted.
#[derive(Clone, Debug)]
pub struct ReadLimits {
    /// upper bound for the number of segments a single message may declare
    pub max_segment_count: usize,

    /// upper bound for a message's total size (segment table plus all segment
    ///  bodies) in words
    pub max_message_words: u64,
}

impl Default for ReadLimits {
    fn default() -> ReadLimits {
        ReadLimits {
            max_segment_count: 512,
            max_message_words: 8 * 1024 * 1024,
        }
    }
}

pub struct TransportConfig {
    /// This is the payload size inside UDP packets that the datagram transport
    ///  assumes. Since this layer enforces non-fragmentation, this payload size
    ///  (and the implied packet size) must be supported by all network
    ///  connections between peers.
    ///
    /// In an ideal world, we would configure the MTU (or even discover it) and
    ///  derive payload size from that, but there is some uncertainty involved
    ///  (e.g. optional IP headers that may be introduced by some network
    ///  hardware). Therefore the responsibility of determining UDP payload
    ///  size lies with the application rather than this layer making
    ///  assumptions on its own.
    ///
    /// With full Ethernet frames and no optional IP headers, this payload is
    ///  `1500 - 20 - 8 = 1472` for IPV4 and `1500 - 40 - 8 = 1452` for IPV6.
    pub max_datagram_size: usize,

    pub read_limits: ReadLimits,

    /// This is the shared secret of both peers, and it must be set to the same
    ///  value on both sides. If a key is present, AES-256-GCM encryption is
    ///  applied to every datagram, and the key must be exactly 32 bytes long
    ///  (per AES spec). If no key is present, datagrams are sent unencrypted.
    ///
    /// NB: There can be no mixed operation, i.e. either both peers share the
    ///      same key, or neither has one.
    pub encryption_key: Option<Vec<u8>>,
}

impl TransportConfig {
    pub fn default_for(max_datagram_size: usize) -> TransportConfig {
        TransportConfig {
            max_datagram_size,
            read_limits: ReadLimits::default(),
            encryption_key: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_datagram_size < 100 {
            bail!("datagram payload size is too small");
        }
        if let Some(key) = &self.encryption_key {
            if key.len() != 32 {
                bail!(
                    "encryption key must be exactly 32 bytes, was {}",
                    key.len()
                );
            }
            if self.max_datagram_size <= AES_256_GCM_OVERHEAD {
                bail!("datagram payload size does not leave room for the encryption envelope");
            }
        }
        if self.read_limits.max_segment_count == 0 {
            bail!("a message has at least one segment, the segment count limit cannot be 0");
        }

        Ok(())
    }
}
