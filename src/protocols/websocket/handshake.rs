//! Legacy challenge-response handshake.
//!
//! The client sends an HTTP `GET` with two obfuscated keys in
//! `Sec-WebSocket-Key1`/`Sec-WebSocket-Key2`, followed by an 8 byte nonce.
//! Each key decodes to its digits divided by its space count; the server
//! answers with the MD5 of both decoded keys and the nonce.

use bytes::{BufMut, BytesMut};
use md5::{Digest, Md5};
use std::collections::HashMap;

use crate::config::Endpoints;
use crate::error::HandshakeError;

/// Terminates the request header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Length of the raw nonce following the header block.
pub const NONCE_LEN: usize = 8;

pub const KEY1_HEADER: &str = "Sec-WebSocket-Key1";
pub const KEY2_HEADER: &str = "Sec-WebSocket-Key2";

const REQUEST_VERB: &str = "GET";
const SUBPROTOCOL: &str = "proxy";

/// A parsed client handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub verb: String,
    pub path: String,
    pub protocol: String,
    /// Header names are kept as received; later duplicates win.
    pub headers: HashMap<String, String>,
    pub nonce: [u8; NONCE_LEN],
}

impl HandshakeRequest {
    /// Look up a header by its exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Decode both keys and compute the challenge digest.
    pub fn digest(&self) -> Result<[u8; 16], HandshakeError> {
        let key1 = self.key(KEY1_HEADER)?;
        let key2 = self.key(KEY2_HEADER)?;
        Ok(compute_digest(key1, key2, &self.nonce))
    }

    fn key(&self, name: &'static str) -> Result<i32, HandshakeError> {
        let value = self.header(name).ok_or(HandshakeError::MissingKey(name))?;
        derive_key(value)
    }
}

/// Result of scanning the receive buffer for a complete handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum ScanResult {
    /// Header terminator is missing, or the bytes after it are not exactly
    /// one nonce.
    Incomplete,
    /// Header block followed by exactly one nonce.
    Complete {
        /// Length of the header block, excluding the terminator.
        header_len: usize,
        /// Total bytes consumed, terminator and nonce included.
        consumed: usize,
    },
}

/// Check whether `buffer` holds a full header block plus nonce and nothing
/// more. Any other length means keep reading.
pub fn scan(buffer: &[u8]) -> ScanResult {
    let header_len = match find_terminator(buffer) {
        Some(pos) => pos,
        None => return ScanResult::Incomplete,
    };

    let consumed = header_len + HEADER_TERMINATOR.len() + NONCE_LEN;
    if buffer.len() != consumed {
        return ScanResult::Incomplete;
    }

    ScanResult::Complete {
        header_len,
        consumed,
    }
}

/// Parse a header block (terminator excluded) and its nonce.
pub fn parse_request(
    header_block: &[u8],
    nonce: [u8; NONCE_LEN],
) -> Result<HandshakeRequest, HandshakeError> {
    let text = std::str::from_utf8(header_block).map_err(|_| HandshakeError::InvalidUtf8)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let tokens: Vec<&str> = request_line.split_whitespace().collect();
    let [verb, path, protocol] = tokens[..] else {
        return Err(HandshakeError::RequestLine(request_line.to_string()));
    };
    if verb != REQUEST_VERB {
        return Err(HandshakeError::Verb(verb.to_string()));
    }

    let mut headers = HashMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(": ")
            .ok_or_else(|| HandshakeError::HeaderLine(line.to_string()))?;
        headers.insert(name.to_string(), value.to_string());
    }

    Ok(HandshakeRequest {
        verb: verb.to_string(),
        path: path.to_string(),
        protocol: protocol.to_string(),
        headers,
        nonce,
    })
}

/// Decode one obfuscated key: all digits as a number, floor-divided by the
/// number of spaces. The result must fit a signed 32-bit integer.
pub fn derive_key(value: &str) -> Result<i32, HandshakeError> {
    let mut number: u64 = 0;
    let mut digits = 0usize;
    let mut spaces: u64 = 0;

    for c in value.chars() {
        if let Some(d) = c.to_digit(10) {
            number = number
                .checked_mul(10)
                .and_then(|n| n.checked_add(u64::from(d)))
                .ok_or(HandshakeError::KeyOverflow)?;
            digits += 1;
        } else if c == ' ' {
            spaces += 1;
        }
    }

    if spaces == 0 {
        return Err(HandshakeError::NoSpaces);
    }
    if digits == 0 {
        return Err(HandshakeError::NoDigits);
    }

    i32::try_from(number / spaces).map_err(|_| HandshakeError::KeyOverflow)
}

/// MD5 over both keys packed as big-endian signed 32-bit integers, then the
/// nonce.
pub fn compute_digest(key1: i32, key2: i32, nonce: &[u8; NONCE_LEN]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(key1.to_be_bytes());
    hasher.update(key2.to_be_bytes());
    hasher.update(nonce);

    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// The server's reply to a successful handshake.
#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    pub digest: [u8; 16],
    pub endpoints: &'a Endpoints,
}

impl HandshakeResponse<'_> {
    /// Render the status line, headers, blank line and raw digest.
    pub fn render(&self) -> BytesMut {
        let e = self.endpoints;
        let head = format!(
            "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Origin: http://{}:{}\r\n\
             Sec-WebSocket-Location: ws://{}:{}{}\r\n\
             Sec-WebSocket-Protocol: {}\r\n\
             \r\n",
            e.http_host, e.http_port, e.ws_host, e.ws_port, e.ws_path, SUBPROTOCOL,
        );

        let mut out = BytesMut::with_capacity(head.len() + self.digest.len());
        out.put_slice(head.as_bytes());
        out.put_slice(&self.digest);
        out
    }
}

/// Render the handshake reply for `digest`.
pub fn render_response(digest: [u8; 16], endpoints: &Endpoints) -> BytesMut {
    HandshakeResponse { digest, endpoints }.render()
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}
