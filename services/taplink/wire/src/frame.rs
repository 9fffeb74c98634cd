//! Message framing for the wire protocol.
//!
//! Frames on the pipe look like `STX <escaped: type_tag || payload> ETX`.
//! [`StreamFramer`] accumulates arbitrary chunks and cuts them into
//! [`RawFrame`]s; [`DecodedFrame`] is the unescaped view split into tag and
//! payload.

use crate::codec::{self, ETX, STX};
use crate::error::WireError;
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

/// Frame type: interface descriptor (device detail)
pub const SOH: u8 = 0x01;
/// Frame type: end of session, sent to the agent to make it exit
pub const EOT: u8 = 0x04;
/// Acknowledgement of the last frame
pub const ACK: u8 = 0x06;
/// Rejection of the last frame
pub const NAK: u8 = 0x15;
/// Frame type: keepalive
pub const SYN: u8 = 0x16;
/// Frame type: captured Ethernet frame
pub const FS: u8 = 0x1c;

/// Smallest complete frame on the wire: `STX tag ETX`
pub const MIN_FRAME_SIZE: usize = 3;

/// Default ceiling for the receive buffer (64 KiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Frame kinds understood by the host side of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Interface descriptor (SOH)
    InterfaceDescriptor,
    /// Captured Ethernet frame (FS)
    EthernetCapture,
    /// Keepalive poll (SYN)
    Keepalive,
    /// Anything else
    Unknown(u8),
}

impl From<u8> for FrameKind {
    fn from(value: u8) -> Self {
        match value {
            SOH => FrameKind::InterfaceDescriptor,
            FS => FrameKind::EthernetCapture,
            SYN => FrameKind::Keepalive,
            other => FrameKind::Unknown(other),
        }
    }
}

impl FrameKind {
    /// Wire tag for this kind
    pub fn tag(self) -> u8 {
        match self {
            FrameKind::InterfaceDescriptor => SOH,
            FrameKind::EthernetCapture => FS,
            FrameKind::Keepalive => SYN,
            FrameKind::Unknown(tag) => tag,
        }
    }
}

/// Frame content found between STX and ETX, still escaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Bytes);

impl RawFrame {
    /// Wrap escaped frame content
    pub fn new(escaped: Bytes) -> Self {
        Self(escaped)
    }

    /// Escaped content
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the escaped content
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty `STX ETX` pair
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unescape and split into tag and payload.
    ///
    /// Returns `None` for an empty frame, which carries no type tag.
    pub fn decode(&self) -> Option<DecodedFrame> {
        let mut content = codec::decode(&self.0);
        if content.is_empty() {
            return None;
        }
        let type_tag = content.get_u8();
        Some(DecodedFrame {
            type_tag,
            payload: content,
        })
    }
}

/// Unescaped frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Leading type byte
    pub type_tag: u8,
    /// Remaining content
    pub payload: Bytes,
}

impl DecodedFrame {
    /// Create a frame from a tag and payload
    pub fn new(type_tag: u8, payload: Bytes) -> Self {
        Self { type_tag, payload }
    }

    /// Classify the type tag
    pub fn kind(&self) -> FrameKind {
        FrameKind::from(self.type_tag)
    }

    /// Encode to wire bytes including delimiters
    pub fn encode(&self) -> Bytes {
        codec::encode_frame(self.type_tag, &self.payload)
    }
}

/// Incremental frame extractor over a byte stream
#[derive(Debug)]
pub struct StreamFramer {
    buffer: BytesMut,
    max_buffer: usize,
    noise_dropped: u64,
}

impl StreamFramer {
    /// Create a framer with the default buffer ceiling
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a framer with a custom buffer ceiling
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_buffer.min(DEFAULT_MAX_BUFFER_SIZE)),
            max_buffer,
            noise_dropped: 0,
        }
    }

    /// Append a chunk and iterate over the frames it completes.
    ///
    /// The iterator is lazy: frames not pulled stay buffered and are returned
    /// by the next call. A [`WireError::ResourceExceeded`] is yielded only
    /// after every complete frame ahead of the oversized one.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        trace!(
            "Buffered {} bytes, {} bytes pending",
            chunk.len(),
            self.buffer.len()
        );
        Frames {
            framer: self,
            done: false,
        }
    }

    /// Extract the next complete frame from the buffer
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, WireError> {
        let start = match self.buffer.iter().position(|&b| b == STX) {
            Some(start) => start,
            None => {
                // nothing here can belong to a frame
                self.drop_noise(self.buffer.len());
                return Ok(None);
            }
        };
        self.drop_noise(start);

        match self.buffer[1..].iter().position(|&b| b == ETX) {
            Some(offset) => {
                let end = offset + 1;
                if end + 1 > self.max_buffer {
                    return Err(self.limit_error(end + 1));
                }
                let frame = self.buffer.split_to(end + 1).freeze();
                Ok(Some(RawFrame(frame.slice(1..end))))
            }
            None if self.buffer.len() > self.max_buffer => {
                Err(self.limit_error(self.buffer.len()))
            }
            None => Ok(None),
        }
    }

    /// Discard the unterminated remainder, e.g. when the stream closes
    pub fn drain(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped as synchronisation noise
    pub fn noise_dropped(&self) -> u64 {
        self.noise_dropped
    }

    /// Configured buffer ceiling
    pub fn max_buffer(&self) -> usize {
        self.max_buffer
    }

    fn drop_noise(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        trace!("Dropping {} bytes of framing noise", len);
        self.buffer.advance(len);
        self.noise_dropped += len as u64;
    }

    fn limit_error(&self, buffered: usize) -> WireError {
        WireError::ResourceExceeded {
            buffered,
            limit: self.max_buffer,
        }
    }
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames completed by a [`StreamFramer::feed`] call
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut StreamFramer,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<RawFrame, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.framer.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
