//! Fixed-width header codecs.
//!
//! Three layouts travel over the link, all big-endian:
//!
//! ```text
//! Interface descriptor (SOH payload)
//! +--------+---------+-------------+----------+------------+-------------+
//! | mac 6B | mtu u16 | ifindex u32 | n u8     | reserved.. | name (n B)  |
//! +--------+---------+-------------+----------+------------+-------------+
//!
//! Ethernet header (FS payload)
//! +------------+------------+---------------+------------+
//! | dst mac 6B | src mac 6B | ethertype u16 | L3 payload |
//! +------------+------------+---------------+------------+
//!
//! IPv6 header (L3 payload when ethertype is 0x86DD), 40 bytes
//! ```
//!
//! The interface name is the *last* `n` bytes of the payload, so anything
//! between the fixed part and the name is skipped.

use crate::error::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::Ipv6Addr;

/// Size of a MAC address
pub const MAC_ADDR_SIZE: usize = 6;

/// Fixed part of the interface descriptor
pub const INTERFACE_HEADER_SIZE: usize = 13;

/// Ethernet header size
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// IPv6 header size
pub const IPV6_HEADER_SIZE: usize = 40;

/// Ethertype carrying IPv6
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; MAC_ADDR_SIZE]);

impl MacAddr {
    /// Octets of the address
    pub fn octets(&self) -> [u8; MAC_ADDR_SIZE] {
        self.0
    }

    fn read(buf: &mut impl Buf) -> Self {
        let mut octets = [0u8; MAC_ADDR_SIZE];
        buf.copy_to_slice(&mut octets);
        Self(octets)
    }
}

impl From<[u8; MAC_ADDR_SIZE]> for MacAddr {
    fn from(octets: [u8; MAC_ADDR_SIZE]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Details of the tap device reported by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Hardware address
    pub mac: MacAddr,
    /// Interface MTU
    pub mtu: u16,
    /// Kernel interface index
    pub ifindex: u32,
    /// Interface name
    pub name: String,
}

impl InterfaceInfo {
    /// Decode an SOH payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < INTERFACE_HEADER_SIZE {
            return Err(DecodeError::too_short(
                "interface descriptor",
                INTERFACE_HEADER_SIZE,
                payload.len(),
            ));
        }

        let mut buf = payload;
        let mac = MacAddr::read(&mut buf);
        let mtu = buf.get_u16();
        let ifindex = buf.get_u32();
        let name_len = buf.get_u8() as usize;

        let needed = INTERFACE_HEADER_SIZE + name_len;
        if payload.len() < needed {
            return Err(DecodeError::too_short(
                "interface descriptor",
                needed,
                payload.len(),
            ));
        }

        let name = std::str::from_utf8(&payload[payload.len() - name_len..])?.to_string();

        Ok(Self {
            mac,
            mtu,
            ifindex,
            name,
        })
    }

    /// Encode as an SOH payload, no reserved gap.
    ///
    /// Names longer than 255 bytes are cut to fit the length field.
    pub fn encode(&self, buf: &mut BytesMut) {
        let name = self.name.as_bytes();
        let name = &name[..name.len().min(u8::MAX as usize)];

        buf.put_slice(&self.mac.0);
        buf.put_u16(self.mtu);
        buf.put_u32(self.ifindex);
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
    }
}

/// Ethernet header plus the undecoded layer 3 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    /// First address on the wire
    pub dst_mac: MacAddr,
    /// Second address on the wire
    pub src_mac: MacAddr,
    /// Ethertype
    pub ethertype: u16,
    /// Everything after the 14-byte header
    pub l3_payload: Bytes,
}

impl EthernetFrame {
    /// Decode an FS payload without copying the layer 3 bytes
    pub fn decode(mut payload: Bytes) -> Result<Self, DecodeError> {
        if payload.len() < ETHERNET_HEADER_SIZE {
            return Err(DecodeError::too_short(
                "ethernet header",
                ETHERNET_HEADER_SIZE,
                payload.len(),
            ));
        }

        let dst_mac = MacAddr::read(&mut payload);
        let src_mac = MacAddr::read(&mut payload);
        let ethertype = payload.get_u16();

        Ok(Self {
            dst_mac,
            src_mac,
            ethertype,
            l3_payload: payload,
        })
    }

    /// True when the payload is IPv6
    pub fn is_ipv6(&self) -> bool {
        self.ethertype == ETHERTYPE_IPV6
    }

    /// Encode header and payload
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(ETHERNET_HEADER_SIZE + self.l3_payload.len());
        buf.put_slice(&self.dst_mac.0);
        buf.put_slice(&self.src_mac.0);
        buf.put_u16(self.ethertype);
        buf.put_slice(&self.l3_payload);
    }
}

/// IPv6 fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    /// IP version (high nibble of byte 0)
    pub version: u8,
    /// Low nibble of byte 0, upper half of the traffic class
    pub priority: u8,
    /// Byte 1: lower traffic class bits and top of the flow label
    pub flow_hi: u8,
    /// Low 16 bits of the flow label
    pub flow_lo: u16,
    /// Payload length
    pub payload_length: u16,
    /// Next header protocol number
    pub next_header: u8,
    /// Hop limit
    pub hop_limit: u8,
    /// Source address as 16-bit groups
    pub src: [u16; 8],
    /// Destination address as 16-bit groups
    pub dst: [u16; 8],
}

impl Ipv6Header {
    /// Decode the first 40 bytes of a layer 3 payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < IPV6_HEADER_SIZE {
            return Err(DecodeError::too_short(
                "ipv6 header",
                IPV6_HEADER_SIZE,
                payload.len(),
            ));
        }

        let mut buf = &payload[..IPV6_HEADER_SIZE];
        let version_priority = buf.get_u8();
        let flow_hi = buf.get_u8();
        let flow_lo = buf.get_u16();
        let payload_length = buf.get_u16();
        let next_header = buf.get_u8();
        let hop_limit = buf.get_u8();

        let mut src = [0u16; 8];
        for group in src.iter_mut() {
            *group = buf.get_u16();
        }
        let mut dst = [0u16; 8];
        for group in dst.iter_mut() {
            *group = buf.get_u16();
        }

        Ok(Self {
            version: version_priority >> 4,
            priority: version_priority & 0x0f,
            flow_hi,
            flow_lo,
            payload_length,
            next_header,
            hop_limit,
            src,
            dst,
        })
    }

    /// Encode the 40-byte header
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.version << 4) | (self.priority & 0x0f));
        buf.put_u8(self.flow_hi);
        buf.put_u16(self.flow_lo);
        buf.put_u16(self.payload_length);
        buf.put_u8(self.next_header);
        buf.put_u8(self.hop_limit);
        for group in self.src.iter().chain(self.dst.iter()) {
            buf.put_u16(*group);
        }
    }

    /// Full 8-bit traffic class
    pub fn traffic_class(&self) -> u8 {
        (self.priority << 4) | (self.flow_hi >> 4)
    }

    /// 20-bit flow label
    pub fn flow_label(&self) -> u32 {
        (((self.flow_hi & 0x0f) as u32) << 16) | self.flow_lo as u32
    }

    /// Source address
    pub fn src_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src)
    }

    /// Destination address
    pub fn dst_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst)
    }
}
