//! Wire envelope for gossiped entries.
//!
//! An entry travels between peers wrapped in a small fixed-layout message:
//!
//! ```text
//! ┌──────────────────────┬───────────┬──────────────────┬─────────────────┐
//! │ Type prefix (4 bytes)│ Tag (1 B) │ Length (uvarint) │ Payload         │
//! └──────────────────────┴───────────┴──────────────────┴─────────────────┘
//! ```
//!
//! The eventpool only needs this layout for size accounting: the largest
//! admissible entry is the largest payload whose envelope still fits in the
//! maximum wire message size. The codec is an explicit value constructed once
//! at startup and passed to whoever needs it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Entry, Error, Result};

/// Default maximum wire message size (1 MiB)
pub const DEFAULT_MAX_MSG_SIZE: usize = 1_048_576;

/// Type prefix identifying an entry message
const ENTRY_MESSAGE_PREFIX: [u8; 4] = [0x5C, 0x3E, 0x81, 0x0D];

/// Field tag of the payload (field 1, length delimited)
const PAYLOAD_FIELD_TAG: u8 = 0x0A;

/// Fixed part of the envelope: prefix + field tag
const FIXED_OVERHEAD: usize = ENTRY_MESSAGE_PREFIX.len() + 1;

/// Maximum length of a u64 uvarint
const MAX_UVARINT_LEN: usize = 10;

/// Encoder/decoder for the entry envelope, bound to a maximum message size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCodec {
    max_msg_size: usize,
}

impl Default for EntryCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MSG_SIZE)
    }
}

impl EntryCodec {
    /// Create a codec enforcing `max_msg_size` on encoded messages
    pub fn new(max_msg_size: usize) -> Self {
        Self { max_msg_size }
    }

    /// Maximum encoded message size
    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    /// Encoded size of an envelope carrying `payload_len` bytes
    pub fn encoded_len(&self, payload_len: usize) -> usize {
        FIXED_OVERHEAD + uvarint_len(payload_len as u64) + payload_len
    }

    /// Largest payload whose envelope fits in the maximum message size.
    ///
    /// Returns 0 when not even a one-byte payload fits.
    pub fn max_entry_size(&self) -> usize {
        let mut size = self.max_msg_size.saturating_sub(FIXED_OVERHEAD + 1);
        while size > 0 && self.encoded_len(size) > self.max_msg_size {
            size -= 1;
        }
        size
    }

    /// Wrap an entry in its wire envelope
    pub fn encode(&self, entry: &Entry) -> Result<Bytes> {
        let payload = entry.as_bytes();
        let encoded_len = self.encoded_len(payload.len());
        if encoded_len > self.max_msg_size {
            return Err(Error::MessageTooLarge {
                max: self.max_msg_size,
                actual: encoded_len,
            });
        }

        let mut buf = BytesMut::with_capacity(encoded_len);
        buf.put_slice(&ENTRY_MESSAGE_PREFIX);
        buf.put_u8(PAYLOAD_FIELD_TAG);
        put_uvarint(&mut buf, payload.len() as u64);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Unwrap an entry from its wire envelope
    pub fn decode(&self, data: &[u8]) -> Result<Entry> {
        if data.len() > self.max_msg_size {
            return Err(Error::MessageTooLarge {
                max: self.max_msg_size,
                actual: data.len(),
            });
        }
        if data.len() < FIXED_OVERHEAD + 1 {
            return Err(Error::MalformedEnvelope(format!(
                "envelope too short: {} bytes",
                data.len()
            )));
        }
        if data[..ENTRY_MESSAGE_PREFIX.len()] != ENTRY_MESSAGE_PREFIX {
            return Err(Error::MalformedEnvelope("unknown message prefix".to_string()));
        }
        if data[ENTRY_MESSAGE_PREFIX.len()] != PAYLOAD_FIELD_TAG {
            return Err(Error::MalformedEnvelope(format!(
                "unexpected field tag {:#04x}",
                data[ENTRY_MESSAGE_PREFIX.len()]
            )));
        }

        let rest = &data[FIXED_OVERHEAD..];
        let (len, varint_len) = read_uvarint(rest)?;
        let payload = &rest[varint_len..];
        if payload.len() as u64 != len {
            return Err(Error::MalformedEnvelope(format!(
                "length prefix {} does not match payload of {} bytes",
                len,
                payload.len()
            )));
        }
        Ok(Entry::from(payload))
    }
}

/// Number of bytes `value` occupies as a uvarint
fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read a uvarint, returning the value and the number of bytes consumed
fn read_uvarint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in data.iter().take(MAX_UVARINT_LEN).enumerate() {
        let low = (byte & 0x7f) as u64;
        if i == MAX_UVARINT_LEN - 1 && low > 1 {
            return Err(Error::MalformedEnvelope("uvarint overflows u64".to_string()));
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::MalformedEnvelope("truncated uvarint".to_string()))
}
