//! Escape transcoding for the wire protocol.
//!
//! STX, ETX and DLE are reserved on the wire. Any literal occurrence inside a
//! frame is sent as DLE followed by a printable substitute:
//!
//! ```text
//! STX (0x02) -> DLE 'b'
//! ETX (0x03) -> DLE 'c'
//! DLE (0x10) -> DLE 'p'
//! ```
//!
//! Both directions run as a single left-to-right scan. Chained whole-buffer
//! replacements are not equivalent: `DLE 'p' 'b'` must decode to `DLE 'b'`,
//! never to `STX`.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame start delimiter
pub const STX: u8 = 0x02;
/// Frame end delimiter
pub const ETX: u8 = 0x03;
/// Escape introducer
pub const DLE: u8 = 0x10;
/// Escaped form of STX
pub const E_STX: u8 = b'b';
/// Escaped form of ETX
pub const E_ETX: u8 = b'c';
/// Escaped form of DLE
pub const E_DLE: u8 = b'p';

/// Map a reserved byte to the substitute sent after DLE
#[inline]
fn escaped_form(byte: u8) -> Option<u8> {
    match byte {
        STX => Some(E_STX),
        ETX => Some(E_ETX),
        DLE => Some(E_DLE),
        _ => None,
    }
}

/// Map a substitute back to the reserved byte it stands for
#[inline]
fn original_form(byte: u8) -> Option<u8> {
    match byte {
        E_STX => Some(STX),
        E_ETX => Some(ETX),
        E_DLE => Some(DLE),
        _ => None,
    }
}

/// Remove byte stuffing from frame content.
///
/// Total: a DLE that is not followed by a recognised substitute (including a
/// trailing DLE) is copied through unchanged.
pub fn decode(input: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        if byte == DLE {
            if let Some(original) = input.get(i + 1).copied().and_then(original_form) {
                out.put_u8(original);
                i += 2;
                continue;
            }
        }
        out.put_u8(byte);
        i += 1;
    }

    out.freeze()
}

/// Apply byte stuffing to frame content
pub fn encode(input: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(input.len() + input.len() / 8);
    encode_into(input, &mut out);
    out.freeze()
}

fn encode_into(input: &[u8], out: &mut BytesMut) {
    for &byte in input {
        match escaped_form(byte) {
            Some(substitute) => {
                out.put_u8(DLE);
                out.put_u8(substitute);
            }
            None => out.put_u8(byte),
        }
    }
}

/// Build a complete wire frame: `STX escape(tag || payload) ETX`
pub fn encode_frame(tag: u8, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 4);
    out.put_u8(STX);
    encode_into(&[tag], &mut out);
    encode_into(payload, &mut out);
    out.put_u8(ETX);
    out.freeze()
}
