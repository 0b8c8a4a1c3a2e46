//! Payload transform applied to every inbound frame.

use bytes::Bytes;

/// Produces the outbound payload for one inbound frame.
///
/// Implementations must not emit the `0xFF` frame terminator.
pub trait Relay: Send + Sync {
    fn relay(&self, payload: &[u8]) -> Bytes;
}

/// Echoes each payload back with ASCII letters uppercased.
#[derive(Debug, Default, Clone, Copy)]
pub struct UppercaseEcho;

impl Relay for UppercaseEcho {
    fn relay(&self, payload: &[u8]) -> Bytes {
        Bytes::from(payload.to_ascii_uppercase())
    }
}
