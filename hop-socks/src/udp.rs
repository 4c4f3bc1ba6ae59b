//! SOCKS5 UDP datagram framing
//!
//! Format: `RSV(2) FRAG(1) ATYP(1) DST.ADDR DST.PORT DATA`

use crate::addr::TargetAddr;
use crate::error::Result;

/// Smallest possible header: RSV, FRAG, ATYP and a zero-length domain with port
pub const MIN_HEADER_LEN: usize = 6;

/// Wrap `payload` for delivery to `host:port` through a UDP relay
pub fn pack(payload: &[u8], host: &str, port: u16) -> Result<Vec<u8>> {
    let target = TargetAddr::new(host, port);
    let mut pkt = Vec::with_capacity(3 + target.encoded_len() + payload.len());
    pkt.extend_from_slice(&[0x00, 0x00, 0x00]);
    target.encode_into(&mut pkt)?;
    pkt.extend_from_slice(payload);
    Ok(pkt)
}

/// Split a relay datagram into its source address and payload
///
/// Returns `None` for packets shorter than the minimum header or with an
/// unrecognized address type. Fragmented datagrams are not supported.
pub fn unpack(packet: &[u8]) -> Option<(TargetAddr, &[u8])> {
    if packet.len() < MIN_HEADER_LEN || packet[2] != 0 {
        return None;
    }
    let (addr, consumed) = TargetAddr::decode(&packet[3..])?;
    Some((addr, &packet[3 + consumed..]))
}
