//! The wire envelope and its serialization helpers.
//!
//! Every frame on the wire carries exactly one [`Envelope`]: the sender's
//! node id plus one protocol [`Message`], bincode-encoded behind a 4-byte
//! little-endian length prefix.

use {
    crate::error::{NetError, Result},
    serde::{Deserialize, Serialize},
    stakesim_consensus::message::Message,
};

/// One protocol message attributed to its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Node id of the original sender ("server" for relay-issued messages).
    pub sender_id: String,
    /// The protocol message itself.
    pub message: Message,
}

impl Envelope {
    /// Wrap a message with its sender id.
    pub fn new(sender_id: &str, message: Message) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            message,
        }
    }

    /// Serialize this envelope to bytes using bincode.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(NetError::Serialization)
    }

    /// Deserialize an envelope from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(NetError::Serialization)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    ///
    /// Wire format: `[len: u32-le][payload: len bytes]`
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        if payload.len() > max_size {
            return Err(NetError::MessageTooLarge {
                size: payload.len(),
                max: max_size,
            });
        }
        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4usize.saturating_add(payload.len()));
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; 4]) -> usize {
        u32::from_le_bytes(*header) as usize
    }

    /// Human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}
