//! Text frame codec.
//!
//! A frame on the wire is `0x00 <payload> 0xFF`. Several frames may arrive
//! in a single read, and the last one may be cut short.

use bytes::{BufMut, Bytes, BytesMut};

/// Marker opening a text frame.
pub const FRAME_START: u8 = 0x00;

/// Marker closing a frame.
pub const FRAME_END: u8 = 0xFF;

/// Split `buffer` into complete text frame payloads and the unterminated tail.
///
/// Every span ending in [`FRAME_END`] is a candidate. Candidates that do not
/// open with [`FRAME_START`] are dropped without error. The returned
/// remainder is whatever follows the last end marker and should replace the
/// caller's buffer.
pub fn extract_frames(buffer: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let tail_start = match buffer.iter().rposition(|&b| b == FRAME_END) {
        Some(pos) => pos + 1,
        None => return (Vec::new(), buffer),
    };

    let frames = buffer[..tail_start - 1]
        .split(|&b| b == FRAME_END)
        .filter_map(|candidate| match candidate.split_first() {
            Some((&FRAME_START, payload)) => Some(payload),
            _ => None,
        })
        .collect();

    (frames, &buffer[tail_start..])
}

/// Wrap `payload` in frame markers.
///
/// No escaping is done; `payload` must not contain [`FRAME_END`].
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    out.put_u8(FRAME_START);
    out.put_slice(payload);
    out.put_u8(FRAME_END);
    out.freeze()
}
