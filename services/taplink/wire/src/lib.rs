//! Byte-stuffed framing, escape transcoding, and fixed header codecs for the tap agent link.
//!
//! This crate provides the low-level wire protocol spoken between a host process
//! and the link-layer capture agent over a pair of pipes: splitting the byte
//! stream into frames, removing and applying byte stuffing, and decoding the
//! fixed-width headers carried inside frames.
//!
//! ## Wire Format
//!
//! ```text
//! +-----+-----------------------------------------+-----+
//! | STX | escaped( type_tag u8 || payload .. )    | ETX |
//! +-----+-----------------------------------------+-----+
//! ```
//!
//! | Byte | Value | Meaning                           |
//! |------|-------|-----------------------------------|
//! | SOH  | 0x01  | interface descriptor              |
//! | STX  | 0x02  | frame start                       |
//! | ETX  | 0x03  | frame end                         |
//! | EOT  | 0x04  | end of session                    |
//! | ACK  | 0x06  | acknowledgement                   |
//! | DLE  | 0x10  | escape introducer                 |
//! | NAK  | 0x15  | negative acknowledgement          |
//! | SYN  | 0x16  | keepalive                         |
//! | FS   | 0x1c  | captured Ethernet frame           |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use codec::{decode, encode, encode_frame, DLE, ETX, E_DLE, E_ETX, E_STX, STX};
pub use error::{DecodeError, WireError};
pub use frame::{
    DecodedFrame, FrameKind, Frames, RawFrame, StreamFramer, ACK, DEFAULT_MAX_BUFFER_SIZE, EOT,
    FS, MIN_FRAME_SIZE, NAK, SOH, SYN,
};
pub use header::{
    EthernetFrame, InterfaceInfo, Ipv6Header, MacAddr, ETHERNET_HEADER_SIZE, ETHERTYPE_IPV6,
    INTERFACE_HEADER_SIZE, IPV6_HEADER_SIZE, MAC_ADDR_SIZE,
};
