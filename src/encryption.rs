use aead::{AeadInPlace, Generate, Key, KeyInit, Nonce};
use aes_gcm::Aes256Gcm;
use anyhow::bail;
use bytes::{Buf, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace};

/// nonce (12 bytes, appended) plus the AES-GCM tag (16 bytes)
pub const AES_256_GCM_OVERHEAD: usize = 12 + 16;

/// Optional payload encryption for the datagram transport. Encryption is a
///  transport-construction concern: the layer above sees the same message
///  contract whether or not a key is configured.
pub trait DatagramEncryption: Send + Sync {
    /// number of bytes the encryption envelope adds to a payload
    fn overhead_len(&self) -> usize;

    fn encrypt_buffer(&self, buf: &mut BytesMut);

    fn decrypt_buffer(&self, buf: &mut BytesMut) -> anyhow::Result<()>;
}

pub struct NoEncryption;
impl DatagramEncryption for NoEncryption {
    fn overhead_len(&self) -> usize {
        0
    }

    fn encrypt_buffer(&self, _buf: &mut BytesMut) {
        // nothing to be done
    }

    fn decrypt_buffer(&self, _buf: &mut BytesMut) -> anyhow::Result<()> {
        // nothing to be done
        Ok(())
    }
}

pub struct Aes256GcmEncryption {
    cipher: Aes256Gcm,
    nonce_fixed: u32,
    nonce_incremented: AtomicU64,
}

impl Aes256GcmEncryption {
    /// key must be exactly 32 bytes
    pub fn new(key: &[u8]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        let cipher = Aes256Gcm::new(key);

        let nonce = Nonce::<Aes256Gcm>::generate();
        let mut nonce_slice = nonce.as_slice();
        let nonce_buf = &mut nonce_slice;
        let nonce_fixed = nonce_buf.get_u32();
        let nonce_incremented = AtomicU64::new(nonce_buf.get_u64());

        Aes256GcmEncryption {
            cipher,
            nonce_fixed,
            nonce_incremented,
        }
    }

    fn unique_nonce(&self) -> Nonce<Aes256Gcm> {
        let mut buf: Vec<u8> = Vec::with_capacity(12);
        buf.extend_from_slice(self.nonce_fixed.to_le_bytes().as_ref());
        buf.extend_from_slice(
            self.nonce_incremented
                .fetch_add(37, Ordering::AcqRel)
                .to_le_bytes()
                .as_ref(),
        );
        Nonce::<Aes256Gcm>::clone_from_slice(&buf)
    }
}

impl DatagramEncryption for Aes256GcmEncryption {
    fn overhead_len(&self) -> usize {
        AES_256_GCM_OVERHEAD
    }

    fn encrypt_buffer(&self, buf: &mut BytesMut) {
        let nonce = self.unique_nonce();
        trace!("encrypting {} bytes with nonce {:?}", buf.len(), nonce);

        if self.cipher.encrypt_in_place(&nonce, b"", buf).is_err() {
            error!("error encrypting buffer");
            panic!("error encrypting buffer");
        }

        buf.extend_from_slice(nonce.as_slice());
    }

    fn decrypt_buffer(&self, full_buf: &mut BytesMut) -> anyhow::Result<()> {
        if full_buf.len() < 12 {
            bail!("received buffer too short");
        }

        let nonce = Nonce::<Aes256Gcm>::clone_from_slice(&full_buf.as_ref()[full_buf.len() - 12..]);
        full_buf.truncate(full_buf.len() - 12);
        trace!("decrypting {} bytes, nonce: {:?}", full_buf.len(), nonce);
        if self.cipher.decrypt_in_place(&nonce, b"", full_buf).is_err() {
            bail!("decryption error");
        }
        Ok(())
    }
}
