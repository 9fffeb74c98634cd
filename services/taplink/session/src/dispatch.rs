//! Frame dispatch for the host side of the link.
//!
//! This module turns one decoded frame into an optional [`LinkEvent`] and the
//! [`Response`] that must go back to the agent.

use bytes::Bytes;
use taplink_wire::{
    DecodeError, DecodedFrame, EthernetFrame, FrameKind, InterfaceInfo, Ipv6Header, ACK, NAK,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reply owed to the agent for a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Frame understood
    Ack,
    /// Frame rejected
    Nak,
}

impl Response {
    /// Frame content byte for this response
    pub fn byte(self) -> u8 {
        match self {
            Response::Ack => ACK,
            Response::Nak => NAK,
        }
    }
}

/// Events produced by decoding frames from the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Agent reported its tap device
    InterfaceInfo(InterfaceInfo),
    /// Agent captured an Ethernet frame
    EthernetFrame {
        /// Decoded Ethernet header and raw layer 3 payload
        frame: EthernetFrame,
        /// IPv6 header when the ethertype is IPv6
        ipv6: Option<Ipv6Header>,
    },
    /// Frame with a type tag this side does not handle
    UnknownFrame {
        /// Type tag
        tag: u8,
        /// Unescaped payload
        payload: Bytes,
    },
    /// `STX ETX` with no type tag
    EmptyFrame,
    /// A recognised frame whose payload failed to decode
    DecodeError {
        /// Kind of the frame that failed
        kind: FrameKind,
        /// Reason
        error: DecodeError,
    },
}

/// Consumer of decoded link events
pub trait EventSink {
    /// Receive one event
    fn on_event(&mut self, event: LinkEvent);
}

impl EventSink for Vec<LinkEvent> {
    fn on_event(&mut self, event: LinkEvent) {
        self.push(event);
    }
}

impl EventSink for mpsc::UnboundedSender<LinkEvent> {
    fn on_event(&mut self, event: LinkEvent) {
        if self.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn on_event(&mut self, event: LinkEvent) {
        (**self).on_event(event);
    }
}

/// Result of dispatching one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Event for the sink, if any
    pub event: Option<LinkEvent>,
    /// Reply for the agent
    pub response: Response,
}

impl Outcome {
    fn ack(event: Option<LinkEvent>) -> Self {
        Self {
            event,
            response: Response::Ack,
        }
    }

    fn nak(event: LinkEvent) -> Self {
        Self {
            event: Some(event),
            response: Response::Nak,
        }
    }
}

/// Interprets decoded frames and remembers the last interface descriptor
#[derive(Debug, Default)]
pub struct FrameDispatcher {
    interface: Option<InterfaceInfo>,
}

impl FrameDispatcher {
    /// Create a dispatcher with an empty interface cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent interface descriptor, if one has been received
    pub fn interface(&self) -> Option<&InterfaceInfo> {
        self.interface.as_ref()
    }

    /// Dispatch one frame
    pub fn dispatch(&mut self, frame: DecodedFrame) -> Outcome {
        let kind = frame.kind();
        debug!(
            "Dispatching {:?} frame ({} payload bytes)",
            kind,
            frame.payload.len()
        );

        match kind {
            FrameKind::InterfaceDescriptor => match InterfaceInfo::decode(&frame.payload) {
                Ok(info) => {
                    self.interface = Some(info.clone());
                    Outcome::ack(Some(LinkEvent::InterfaceInfo(info)))
                }
                Err(error) => Self::decode_failure(kind, error),
            },

            FrameKind::EthernetCapture => match Self::decode_ethernet(frame.payload) {
                Ok((frame, ipv6)) => Outcome::ack(Some(LinkEvent::EthernetFrame { frame, ipv6 })),
                Err(error) => Self::decode_failure(kind, error),
            },

            FrameKind::Keepalive => Outcome::ack(None),

            FrameKind::Unknown(tag) => {
                warn!("Unknown frame type 0x{:02x}, {} payload bytes", tag, frame.payload.len());
                Outcome::nak(LinkEvent::UnknownFrame {
                    tag,
                    payload: frame.payload,
                })
            }
        }
    }

    /// Answer an empty `STX ETX` pair, which carries no type tag
    pub fn dispatch_empty(&self) -> Outcome {
        warn!("Empty frame from agent");
        Outcome::nak(LinkEvent::EmptyFrame)
    }

    fn decode_ethernet(
        payload: Bytes,
    ) -> Result<(EthernetFrame, Option<Ipv6Header>), DecodeError> {
        let frame = EthernetFrame::decode(payload)?;
        let ipv6 = if frame.is_ipv6() {
            Some(Ipv6Header::decode(&frame.l3_payload)?)
        } else {
            None
        };
        Ok((frame, ipv6))
    }

    fn decode_failure(kind: FrameKind, error: DecodeError) -> Outcome {
        warn!("Failed to decode {:?} frame: {}", kind, error);
        Outcome::nak(LinkEvent::DecodeError { kind, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use taplink_wire::{MacAddr, ETHERTYPE_IPV6, FS, SOH, SYN};

    fn ethernet_payload(ethertype: u16, l3: &[u8]) -> Bytes {
        let frame = EthernetFrame {
            dst_mac: MacAddr([0x33, 0x33, 0, 0, 0, 1]),
            src_mac: MacAddr([0x02, 0, 0, 0, 0, 1]),
            ethertype,
            l3_payload: Bytes::copy_from_slice(l3),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf.freeze()
    }

    fn ipv6_header() -> Ipv6Header {
        Ipv6Header {
            version: 6,
            priority: 0,
            flow_hi: 0,
            flow_lo: 0x1234,
            payload_length: 0,
            next_header: 59,
            hop_limit: 255,
            src: [0xfe80, 0, 0, 0, 0, 0, 0, 1],
            dst: [0xff02, 0, 0, 0, 0, 0, 0, 2],
        }
    }

    #[test]
    fn test_interface_descriptor_is_cached() {
        let info = InterfaceInfo {
            mac: MacAddr([0, 0x11, 0x22, 0x33, 0x44, 0x55]),
            mtu: 1500,
            ifindex: 7,
            name: "eth0".to_string(),
        };
        let mut payload = BytesMut::new();
        info.encode(&mut payload);

        let mut dispatcher = FrameDispatcher::new();
        assert!(dispatcher.interface().is_none());

        let outcome = dispatcher.dispatch(DecodedFrame::new(SOH, payload.freeze()));
        assert_eq!(outcome.response, Response::Ack);
        assert_eq!(outcome.event, Some(LinkEvent::InterfaceInfo(info.clone())));
        assert_eq!(dispatcher.interface(), Some(&info));
    }

    #[test]
    fn test_ethernet_with_ipv6() {
        let mut l3 = BytesMut::new();
        ipv6_header().encode(&mut l3);

        let mut dispatcher = FrameDispatcher::new();
        let payload = ethernet_payload(ETHERTYPE_IPV6, &l3);
        let outcome = dispatcher.dispatch(DecodedFrame::new(FS, payload));

        assert_eq!(outcome.response, Response::Ack);
        match outcome.event {
            Some(LinkEvent::EthernetFrame { frame, ipv6 }) => {
                assert_eq!(frame.ethertype, ETHERTYPE_IPV6);
                assert_eq!(ipv6, Some(ipv6_header()));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_ethernet_other_ethertype_leaves_payload_raw() {
        let mut dispatcher = FrameDispatcher::new();
        let payload = ethernet_payload(0x0806, b"arp");
        let outcome = dispatcher.dispatch(DecodedFrame::new(FS, payload));

        assert_eq!(outcome.response, Response::Ack);
        match outcome.event {
            Some(LinkEvent::EthernetFrame { frame, ipv6 }) => {
                assert_eq!(frame.l3_payload.as_ref(), b"arp");
                assert!(ipv6.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_short_ethernet_is_nak() {
        let mut dispatcher = FrameDispatcher::new();
        let outcome = dispatcher.dispatch(DecodedFrame::new(FS, Bytes::from_static(&[1, 2, 3])));

        assert_eq!(outcome.response, Response::Nak);
        assert!(matches!(
            outcome.event,
            Some(LinkEvent::DecodeError {
                kind: FrameKind::EthernetCapture,
                error: DecodeError::TooShort { needed: 14, actual: 3, .. }
            })
        ));
    }

    #[test]
    fn test_truncated_ipv6_is_nak() {
        let mut dispatcher = FrameDispatcher::new();
        let payload = ethernet_payload(ETHERTYPE_IPV6, &[0x60; 20]);
        let outcome = dispatcher.dispatch(DecodedFrame::new(FS, payload));

        assert_eq!(outcome.response, Response::Nak);
        assert!(matches!(
            outcome.event,
            Some(LinkEvent::DecodeError {
                error: DecodeError::TooShort { needed: 40, .. },
                ..
            })
        ));
    }

    #[test]
    fn test_keepalive_has_no_event() {
        let mut dispatcher = FrameDispatcher::new();
        let outcome = dispatcher.dispatch(DecodedFrame::new(SYN, Bytes::new()));
        assert_eq!(outcome, Outcome::ack(None));
    }

    #[test]
    fn test_empty_frame_is_nak() {
        let dispatcher = FrameDispatcher::new();
        let outcome = dispatcher.dispatch_empty();
        assert_eq!(outcome.response, Response::Nak);
        assert_eq!(outcome.event, Some(LinkEvent::EmptyFrame));
    }

    #[test]
    fn test_interface_name_not_utf8_is_nak() {
        let mut payload = vec![0x02, 0, 0, 0, 0, 1];
        payload.extend_from_slice(&1500u16.to_be_bytes());
        payload.extend_from_slice(&3u32.to_be_bytes());
        payload.push(2);
        payload.extend_from_slice(&[0xff, 0xfe]);

        let mut dispatcher = FrameDispatcher::new();
        let outcome = dispatcher.dispatch(DecodedFrame::new(SOH, Bytes::from(payload)));

        assert_eq!(outcome.response, Response::Nak);
        assert!(matches!(
            outcome.event,
            Some(LinkEvent::DecodeError {
                kind: FrameKind::InterfaceDescriptor,
                error: DecodeError::InvalidText(_)
            })
        ));
        assert!(dispatcher.interface().is_none());
    }

    #[test]
    fn test_unknown_tag_is_nak() {
        let mut dispatcher = FrameDispatcher::new();
        let outcome = dispatcher.dispatch(DecodedFrame::new(0x42, Bytes::from_static(b"xyz")));

        assert_eq!(outcome.response, Response::Nak);
        assert_eq!(
            outcome.event,
            Some(LinkEvent::UnknownFrame {
                tag: 0x42,
                payload: Bytes::from_static(b"xyz")
            })
        );
    }

    #[test]
    fn test_bad_interface_keeps_previous_cache() {
        let info = InterfaceInfo {
            mac: MacAddr::default(),
            mtu: 1280,
            ifindex: 1,
            name: "tap0".to_string(),
        };
        let mut payload = BytesMut::new();
        info.encode(&mut payload);

        let mut dispatcher = FrameDispatcher::new();
        dispatcher.dispatch(DecodedFrame::new(SOH, payload.freeze()));
        let outcome = dispatcher.dispatch(DecodedFrame::new(SOH, Bytes::from_static(&[0; 4])));

        assert_eq!(outcome.response, Response::Nak);
        assert_eq!(dispatcher.interface(), Some(&info));
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.on_event(LinkEvent::UnknownFrame {
            tag: 1,
            payload: Bytes::new(),
        });
        drop(tx);

        assert!(matches!(rx.recv().await, Some(LinkEvent::UnknownFrame { tag: 1, .. })));
        assert!(rx.recv().await.is_none());
    }
}
