//! Legacy WebSocket protocol (the key1/key2 challenge-response draft).
//!
//! A browser script connects, performs the handshake once, then exchanges
//! text frames:
//!
//! ```text
//! Request:  GET <path> HTTP/1.1\r\n ... Sec-WebSocket-Key1/Key2 ... \r\n\r\n<8 byte nonce>
//! Response: HTTP/1.1 101 Web Socket Protocol Handshake\r\n ... \r\n\r\n<16 byte digest>
//!
//! Frames:   0x00 <payload> 0xFF
//! ```
//!
//! Each inbound frame is passed through a [`Relay`] and the result is sent
//! back as one frame, in arrival order.

pub mod frame;
pub mod handler;
pub mod handshake;
pub mod relay;

pub use handler::handle_connection;
pub use relay::{Relay, UppercaseEcho};
