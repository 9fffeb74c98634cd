//! Basic usage example for the tap link wire protocol.

use bytes::BytesMut;
use taplink_wire::{
    encode_frame, EthernetFrame, FrameKind, InterfaceInfo, Ipv6Header, MacAddr, StreamFramer,
    ETHERTYPE_IPV6, FS, SOH,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Tap Link Wire Protocol Example ===\n");

    // 1. Build the device detail frame an agent sends first
    println!("1. Encoding an SOH frame...");
    let info = InterfaceInfo {
        mac: MacAddr([0x02, 0x00, 0x5e, 0x10, 0x02, 0x03]),
        mtu: 1280,
        ifindex: 7,
        name: "tap0".to_string(),
    };
    let mut payload = BytesMut::new();
    info.encode(&mut payload);
    let soh = encode_frame(SOH, &payload);
    println!("   Encoded frame size: {} bytes (MAC needs escaping)", soh.len());

    // 2. Build an Ethernet capture carrying an IPv6 header
    println!("\n2. Encoding an FS frame...");
    let ipv6 = Ipv6Header {
        version: 6,
        priority: 0,
        flow_hi: 0,
        flow_lo: 0,
        payload_length: 0,
        next_header: 59,
        hop_limit: 64,
        src: [0xfe80, 0, 0, 0, 0, 0, 0, 1],
        dst: [0xff02, 0, 0, 0, 0, 0, 0, 1],
    };
    let mut l3 = BytesMut::new();
    ipv6.encode(&mut l3);
    let ethernet = EthernetFrame {
        dst_mac: MacAddr([0x33, 0x33, 0, 0, 0, 1]),
        src_mac: info.mac,
        ethertype: ETHERTYPE_IPV6,
        l3_payload: l3.freeze(),
    };
    let mut eth_bytes = BytesMut::new();
    ethernet.encode(&mut eth_bytes);
    let fs = encode_frame(FS, &eth_bytes);

    // 3. Feed both frames in awkward chunks
    println!("\n3. Feeding the stream in 5-byte chunks...");
    let mut stream = soh.to_vec();
    stream.extend_from_slice(&fs);

    let mut framer = StreamFramer::new();
    for chunk in stream.chunks(5) {
        for raw in framer.feed(chunk) {
            let Some(frame) = raw?.decode() else {
                continue;
            };
            match frame.kind() {
                FrameKind::InterfaceDescriptor => {
                    let info = InterfaceInfo::decode(&frame.payload)?;
                    println!(
                        "   Interface: MAC={} MTU={} IDX={} NAME={}",
                        info.mac, info.mtu, info.ifindex, info.name
                    );
                }
                FrameKind::EthernetCapture => {
                    let eth = EthernetFrame::decode(frame.payload)?;
                    println!(
                        "   Ethernet dst {} src {} type {:04x}",
                        eth.dst_mac, eth.src_mac, eth.ethertype
                    );
                    if eth.is_ipv6() {
                        let ip = Ipv6Header::decode(&eth.l3_payload)?;
                        println!(
                            "   IPv6 {} -> {} hop limit {}",
                            ip.src_addr(),
                            ip.dst_addr(),
                            ip.hop_limit
                        );
                    }
                }
                other => println!("   Other frame: {:?}", other),
            }
        }
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
