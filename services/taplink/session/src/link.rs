//! Host side of the agent link.
//!
//! [`Link`] glues the framer, dispatcher and emitter together and processes
//! one input chunk at a time. [`run_link`] drives it from an async reader and
//! writer, flushing responses before the next read.

use crate::dispatch::{EventSink, FrameDispatcher, LinkEvent, Response};
use crate::emitter::ResponseEmitter;
use bytes::BytesMut;
use std::io::Write;
use taplink_wire::{InterfaceInfo, StreamFramer, WireError, DEFAULT_MAX_BUFFER_SIZE};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Default read size for the async driver
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Configuration for a link
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Receive buffer ceiling in bytes
    pub max_buffer: usize,
    /// Bytes requested per read
    pub read_chunk: usize,
    /// Send EOT to the agent when a shutdown is requested
    pub send_eot_on_shutdown: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER_SIZE,
            read_chunk: DEFAULT_READ_CHUNK_SIZE,
            send_eot_on_shutdown: true,
        }
    }
}

/// Fatal link errors
#[derive(Error, Debug)]
pub enum LinkError {
    /// Framing failure; the stream cannot continue
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Input or output stream failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters for a link
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Bytes read from the agent
    pub bytes_in: u64,
    /// Bytes written to the agent
    pub bytes_out: u64,
    /// Complete frames, including empty ones
    pub frames_received: u64,
    /// `STX ETX` pairs with no content
    pub empty_frames: u64,
    /// ACKs written
    pub acks_sent: u64,
    /// NAKs written
    pub naks_sent: u64,
    /// Recognised frames whose payload failed to decode
    pub decode_errors: u64,
    /// Frames with an unrecognised type tag
    pub unknown_frames: u64,
    /// Bytes dropped before a frame start
    pub noise_dropped: u64,
}

/// Synchronous link core
#[derive(Debug)]
pub struct Link<W> {
    framer: StreamFramer,
    dispatcher: FrameDispatcher,
    emitter: ResponseEmitter<W>,
    stats: LinkStats,
}

impl<W: Write> Link<W> {
    /// Create a link writing responses to `writer`
    pub fn new(writer: W, config: &LinkConfig) -> Self {
        Self {
            framer: StreamFramer::with_max_buffer(config.max_buffer),
            dispatcher: FrameDispatcher::new(),
            emitter: ResponseEmitter::new(writer),
            stats: LinkStats::default(),
        }
    }

    /// Process one chunk of input.
    ///
    /// Every frame completed by the chunk is dispatched and answered in
    /// order. Decode problems become events and NAKs; only a buffer overflow
    /// or a failed write returns an error.
    pub fn on_chunk<S: EventSink + ?Sized>(
        &mut self,
        chunk: &[u8],
        sink: &mut S,
    ) -> Result<(), LinkError> {
        self.stats.bytes_in += chunk.len() as u64;

        let result = self.process(chunk, sink);
        self.stats.noise_dropped = self.framer.noise_dropped();
        self.stats.bytes_out = self.emitter.bytes_sent();
        result
    }

    fn process<S: EventSink + ?Sized>(
        &mut self,
        chunk: &[u8],
        sink: &mut S,
    ) -> Result<(), LinkError> {
        for raw in self.framer.feed(chunk) {
            let raw = raw.inspect_err(|e| error!("Closing link: {}", e))?;

            self.stats.frames_received += 1;
            let outcome = match raw.decode() {
                Some(frame) => self.dispatcher.dispatch(frame),
                None => {
                    self.stats.empty_frames += 1;
                    self.dispatcher.dispatch_empty()
                }
            };
            match &outcome.event {
                Some(LinkEvent::DecodeError { .. }) => self.stats.decode_errors += 1,
                Some(LinkEvent::UnknownFrame { .. }) => self.stats.unknown_frames += 1,
                _ => {}
            }
            if let Some(event) = outcome.event {
                sink.on_event(event);
            }

            self.emitter.emit(outcome.response)?;
            match outcome.response {
                Response::Ack => self.stats.acks_sent += 1,
                Response::Nak => self.stats.naks_sent += 1,
            }
        }
        Ok(())
    }

    /// Discard any partial frame at end of stream, returning its length
    pub fn finish(&mut self) -> usize {
        let rest = self.framer.drain();
        if !rest.is_empty() {
            debug!("Discarding {} bytes of unterminated frame", rest.len());
        }
        rest.len()
    }

    /// Current counters
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Most recent interface descriptor from the agent
    pub fn interface(&self) -> Option<&InterfaceInfo> {
        self.dispatcher.interface()
    }

    /// Bytes waiting for a closing ETX
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }

    /// Access the emitter for host-initiated frames
    pub fn emitter_mut(&mut self) -> &mut ResponseEmitter<W> {
        &mut self.emitter
    }

    /// Recover the output stream
    pub fn into_writer(self) -> W {
        self.emitter.into_inner()
    }
}

/// Run a link until the reader reaches EOF or a shutdown is requested.
///
/// Responses produced by a chunk are written with `write_all` before the next
/// read. On shutdown an EOT frame is sent if the config asks for it.
pub async fn run_link<R, W, S>(
    mut reader: R,
    mut writer: W,
    config: LinkConfig,
    sink: &mut S,
    mut shutdown: Option<watch::Receiver<bool>>,
) -> Result<LinkStats, LinkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: EventSink + ?Sized,
{
    let mut link = Link::new(Vec::new(), &config);
    let mut read_buffer = BytesMut::with_capacity(config.read_chunk);

    loop {
        read_buffer.clear();
        read_buffer.reserve(config.read_chunk);

        tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => {
                info!("Shutdown requested, closing link");
                if config.send_eot_on_shutdown {
                    link.emitter_mut().send_shutdown()?;
                    link.stats.bytes_out = link.emitter.bytes_sent();
                }
                flush_responses(&mut link, &mut writer).await?;
                break;
            }

            read = reader.read_buf(&mut read_buffer) => {
                let bytes_read = read?;
                if bytes_read == 0 {
                    debug!("Agent closed its output");
                    break;
                }
                trace!("Read {} bytes from agent", bytes_read);

                let result = link.on_chunk(&read_buffer, &mut *sink);
                // answers for frames ahead of a fatal error still go out
                flush_responses(&mut link, &mut writer).await?;
                result?;
            }
        }
    }

    link.finish();
    writer.flush().await?;
    Ok(link.stats.clone())
}

async fn flush_responses<W: AsyncWrite + Unpin>(
    link: &mut Link<Vec<u8>>,
    writer: &mut W,
) -> Result<(), LinkError> {
    let pending = std::mem::take(link.emitter_mut().get_mut());
    if !pending.is_empty() {
        writer.write_all(&pending).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // sender gone without a request
                break;
            }
        }
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;
    use taplink_wire::{encode_frame, DecodeError, MacAddr, ETX, FS, SOH, STX, SYN};

    fn soh_frame() -> Vec<u8> {
        let mut raw = vec![STX, SOH, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        raw.extend_from_slice(&1500u16.to_be_bytes());
        raw.extend_from_slice(&7u32.to_be_bytes());
        raw.push(0x04);
        raw.extend_from_slice(b"eth0");
        raw.push(ETX);
        raw
    }

    #[test]
    fn test_interface_frame_is_acked() {
        let mut link = Link::new(Vec::new(), &LinkConfig::default());
        let mut events: Vec<LinkEvent> = Vec::new();

        link.on_chunk(&soh_frame(), &mut events).unwrap();

        assert_eq!(
            events,
            vec![LinkEvent::InterfaceInfo(InterfaceInfo {
                mac: MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
                mtu: 1500,
                ifindex: 7,
                name: "eth0".to_string(),
            })]
        );
        assert_eq!(link.interface().map(|i| i.name.as_str()), Some("eth0"));
        assert_eq!(link.into_writer(), vec![STX, 0x06, ETX]);
    }

    #[test]
    fn test_unknown_frame_is_naked() {
        let mut link = Link::new(Vec::new(), &LinkConfig::default());
        let mut events: Vec<LinkEvent> = Vec::new();

        link.on_chunk(&encode_frame(0x42, b"?"), &mut events).unwrap();

        assert_eq!(
            events,
            vec![LinkEvent::UnknownFrame {
                tag: 0x42,
                payload: Bytes::from_static(b"?")
            }]
        );
        assert_eq!(link.stats().unknown_frames, 1);
        assert_eq!(link.into_writer(), vec![STX, 0x15, ETX]);
    }

    #[test]
    fn test_short_ethernet_is_naked() {
        let mut link = Link::new(Vec::new(), &LinkConfig::default());
        let mut events: Vec<LinkEvent> = Vec::new();

        link.on_chunk(&encode_frame(FS, &[0u8; 10]), &mut events).unwrap();

        assert!(matches!(
            events.as_slice(),
            [LinkEvent::DecodeError {
                error: DecodeError::TooShort { .. },
                ..
            }]
        ));
        assert_eq!(link.stats().decode_errors, 1);
        assert_eq!(link.into_writer(), vec![STX, 0x15, ETX]);
    }

    #[test]
    fn test_responses_follow_frame_order() {
        let mut stream = encode_frame(SYN, &[]).to_vec();
        stream.extend_from_slice(&encode_frame(0x7f, &[]));
        stream.extend_from_slice(&[STX, ETX]);
        stream.extend_from_slice(&encode_frame(SYN, &[]));

        let mut link = Link::new(Vec::new(), &LinkConfig::default());
        let mut events: Vec<LinkEvent> = Vec::new();
        for byte in &stream {
            link.on_chunk(std::slice::from_ref(byte), &mut events).unwrap();
        }

        let stats = link.stats().clone();
        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.empty_frames, 1);
        assert_eq!(stats.acks_sent, 2);
        assert_eq!(stats.naks_sent, 2);
        assert_eq!(stats.bytes_in, stream.len() as u64);
        assert_eq!(stats.bytes_out, 12);
        assert_eq!(
            events,
            vec![
                LinkEvent::UnknownFrame {
                    tag: 0x7f,
                    payload: Bytes::new()
                },
                LinkEvent::EmptyFrame,
            ]
        );
        assert_eq!(
            link.into_writer(),
            vec![STX, 0x06, ETX, STX, 0x15, ETX, STX, 0x15, ETX, STX, 0x06, ETX]
        );
    }

    #[test]
    fn test_empty_frame_is_naked_before_next_frame() {
        let mut link = Link::new(Vec::new(), &LinkConfig::default());
        let mut events: Vec<LinkEvent> = Vec::new();

        link.on_chunk(&[STX, ETX, STX, SYN, ETX], &mut events).unwrap();

        assert_eq!(events, vec![LinkEvent::EmptyFrame]);
        assert_eq!(link.stats().empty_frames, 1);
        assert_eq!(link.into_writer(), vec![STX, 0x15, ETX, STX, 0x06, ETX]);
    }

    #[test]
    fn test_overflow_is_fatal_after_answering() {
        let config = LinkConfig {
            max_buffer: 16,
            ..LinkConfig::default()
        };
        let mut link = Link::new(Vec::new(), &config);
        let mut stream = encode_frame(SYN, &[]).to_vec();
        stream.push(STX);
        stream.extend_from_slice(&[0x41; 32]);

        let err = link.on_chunk(&stream, &mut Vec::<LinkEvent>::new()).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Wire(WireError::ResourceExceeded { limit: 16, .. })
        ));
        assert_eq!(link.into_writer(), vec![STX, 0x06, ETX]);
    }

    #[test]
    fn test_finish_discards_partial_frame() {
        let mut link = Link::new(Vec::new(), &LinkConfig::default());
        link.on_chunk(&[STX, FS, 0x01, 0x02], &mut Vec::<LinkEvent>::new()).unwrap();
        assert_eq!(link.buffered(), 4);
        assert_eq!(link.finish(), 4);
        assert_eq!(link.buffered(), 0);
    }

    #[tokio::test]
    async fn test_run_link_until_eof() {
        let mut input = soh_frame();
        input.extend_from_slice(&encode_frame(SYN, &[]));
        input.extend_from_slice(&[STX, FS]);

        let mut output = Vec::new();
        let mut events: Vec<LinkEvent> = Vec::new();
        let config = LinkConfig {
            read_chunk: 3,
            ..LinkConfig::default()
        };

        let stats = run_link(Cursor::new(input), &mut output, config, &mut events, None)
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(stats.acks_sent, 2);
        assert_eq!(output, vec![STX, 0x06, ETX, STX, 0x06, ETX]);
    }

    #[tokio::test]
    async fn test_run_link_shutdown_sends_eot() {
        let (agent_side, host_side) = tokio::io::duplex(64);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (mut agent_read, mut agent_write) = tokio::io::split(agent_side);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let host = tokio::spawn(async move {
            let mut events: Vec<LinkEvent> = Vec::new();
            let stats = run_link(
                host_read,
                host_write,
                LinkConfig::default(),
                &mut events,
                Some(shutdown_rx),
            )
            .await;
            (stats, events)
        });

        agent_write.write_all(&encode_frame(SYN, &[])).await.unwrap();
        let mut ack = [0u8; 3];
        agent_read.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [STX, 0x06, ETX]);

        shutdown_tx.send(true).unwrap();
        let mut eot = [0u8; 3];
        agent_read.read_exact(&mut eot).await.unwrap();
        assert_eq!(eot, [STX, 0x04, ETX]);

        let (stats, events) = host.await.unwrap();
        let stats = stats.unwrap();
        assert!(events.is_empty());
        assert_eq!(stats.acks_sent, 1);
        assert_eq!(stats.bytes_out, 6);
    }

    #[tokio::test]
    async fn test_run_link_overflow_returns_error() {
        let mut input = vec![STX];
        input.extend_from_slice(&[0x20; 64]);
        let config = LinkConfig {
            max_buffer: 32,
            ..LinkConfig::default()
        };

        let result = run_link(
            Cursor::new(input),
            Vec::new(),
            config,
            &mut Vec::<LinkEvent>::new(),
            None,
        )
        .await;
        assert!(matches!(result, Err(LinkError::Wire(_))));
    }
}
