//! Protocol implementations.
//!
//! - `websocket`: legacy WebSocket handshake and text framing

pub mod websocket;
