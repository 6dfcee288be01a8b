//! # Filter
//!
//! The injected strategy that turns messages into frame bytes and back. The
//! runtime calls `decode` on every inbound frame before dispatch and
//! `encode` on every outbound message, and never looks at the bytes itself.

use crate::error::Result;
use crate::frame::decode_message;
use crate::frame::encode_message;
use crate::message::Message;

/// Encode/decode strategy for whole messages.
///
/// # Invariants
/// - `decode` returns exactly one message per frame.
/// - A frame is self-contained: no state may be carried between frames.
pub trait Filter: Send + Sync + 'static {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>>;
    fn decode(&self, frame: &[u8]) -> Result<Message>;
}

/// The default filter: the pack frame format, unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackFilter;

impl Filter for PackFilter {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        encode_message(msg)
    }

    fn decode(&self, frame: &[u8]) -> Result<Message> {
        decode_message(frame)
    }
}
