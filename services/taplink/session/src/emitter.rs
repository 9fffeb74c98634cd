//! Outgoing frames toward the agent.
//!
//! Every write is a complete `STX .. ETX` frame followed by a flush. The
//! emitter does not queue or throttle; wrap the writer if flow control is
//! needed.

use crate::dispatch::Response;
use bytes::BytesMut;
use std::io::{self, Write};
use taplink_wire::{encode_frame, EthernetFrame, EOT, FS, SYN};
use tracing::trace;

/// Frame writer for the agent's input pipe
#[derive(Debug)]
pub struct ResponseEmitter<W> {
    writer: W,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<W: Write> ResponseEmitter<W> {
    /// Wrap an output stream
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Send an ACK or NAK
    pub fn emit(&mut self, response: Response) -> io::Result<()> {
        self.send_frame(response.byte(), &[])
    }

    /// Send an arbitrary frame
    pub fn send_frame(&mut self, tag: u8, payload: &[u8]) -> io::Result<()> {
        let frame = encode_frame(tag, payload);
        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        self.frames_sent += 1;
        self.bytes_sent += frame.len() as u64;
        trace!("Sent frame type 0x{:02x} ({} bytes on the wire)", tag, frame.len());
        Ok(())
    }

    /// Send an Ethernet frame for the agent to inject into its tap device
    pub fn send_ethernet(&mut self, frame: &EthernetFrame) -> io::Result<()> {
        let mut payload = BytesMut::new();
        frame.encode(&mut payload);
        self.send_frame(FS, &payload)
    }

    /// Poll the agent; it answers with an ACK
    pub fn send_keepalive(&mut self) -> io::Result<()> {
        self.send_frame(SYN, &[])
    }

    /// Ask the agent to close its tap device and exit
    pub fn send_shutdown(&mut self) -> io::Result<()> {
        self.send_frame(EOT, &[])
    }

    /// Frames written so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Wire bytes written so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Borrow the output stream
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Mutably borrow the output stream
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Recover the output stream
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use taplink_wire::{MacAddr, DLE, E_STX, ETX, STX};

    #[test]
    fn test_emit_ack_and_nak() {
        let mut emitter = ResponseEmitter::new(Vec::new());
        emitter.emit(Response::Ack).unwrap();
        emitter.emit(Response::Nak).unwrap();

        assert_eq!(emitter.get_ref().as_slice(), &[STX, 0x06, ETX, STX, 0x15, ETX]);
        assert_eq!(emitter.frames_sent(), 2);
        assert_eq!(emitter.bytes_sent(), 6);
    }

    #[test]
    fn test_control_frames() {
        let mut emitter = ResponseEmitter::new(Vec::new());
        emitter.send_keepalive().unwrap();
        emitter.send_shutdown().unwrap();
        assert_eq!(emitter.into_inner(), vec![STX, 0x16, ETX, STX, 0x04, ETX]);
    }

    #[test]
    fn test_send_ethernet_escapes_payload() {
        let frame = EthernetFrame {
            dst_mac: MacAddr([0x02, 0, 0, 0, 0, 0]),
            src_mac: MacAddr([0xaa; 6]),
            ethertype: 0x86dd,
            l3_payload: Bytes::new(),
        };
        let mut emitter = ResponseEmitter::new(Vec::new());
        emitter.send_ethernet(&frame).unwrap();

        let out = emitter.into_inner();
        assert_eq!(&out[..4], &[STX, FS, DLE, E_STX]);
        assert_eq!(out.last(), Some(&ETX));
        assert_eq!(out.len(), 1 + 1 + 15 + 1);
    }

    #[test]
    fn test_write_failure_is_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut emitter = ResponseEmitter::new(Broken);
        let err = emitter.emit(Response::Ack).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(emitter.frames_sent(), 0);
    }
}
