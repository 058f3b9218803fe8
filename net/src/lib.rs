//! Networking for the stakesim framework: the framed wire format, the
//! transport helpers nodes use to talk to the relay, and the relay server
//! itself with its fault-injection knobs.
//!
//! ## Wire format
//!
//! Every message on the wire is length-prefixed:
//!
//! ```text
//! [4 bytes: payload length (u32-le)] [N bytes: bincode payload]
//! ```
//!
//! The payload is a bincode-encoded [`message::Envelope`] — the sender id
//! plus one protocol message. The transport reads the 4-byte header,
//! validates the length against `max_message_size`, then reads exactly that
//! many bytes.

pub mod config;
pub mod error;
pub mod message;
pub mod relay;
pub mod transport;
