//! Raw packet view consumed by the aggregator
//!
//! The capture layer hands the aggregator one [`RawPacket`] per captured
//! frame: the bytes from the start of the IPv4 header, the offsets of the
//! transport header and payload inside those bytes, and the capture
//! timestamp. Timestamp byte images in network order are precomputed once
//! here so key hashing, equality and field copies all work on plain byte
//! slices.

use std::fmt;

/// Transport protocol as carried in the IPv4 protocol field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl From<u8> for TransportProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => TransportProtocol::Icmp,
            6 => TransportProtocol::Tcp,
            17 => TransportProtocol::Udp,
            other => TransportProtocol::Other(other),
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Icmp => write!(f, "ICMP"),
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Udp => write!(f, "UDP"),
            TransportProtocol::Other(n) => write!(f, "Proto({})", n),
        }
    }
}

/// Link-layer addresses, when the capture provides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLayer {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
}

/// Zero-filled fallback for fields the packet does not carry, e.g. ports on
/// a non-TCP/UDP packet or bytes past a truncated capture.
pub(crate) static ZERO_BYTES: [u8; 8] = [0; 8];

/// One captured packet, viewed from the IPv4 header.
#[derive(Debug, Clone)]
pub struct RawPacket {
    /// Packet bytes starting at the IPv4 header.
    pub data: Vec<u8>,
    /// Transport protocol from the IPv4 header.
    pub protocol: TransportProtocol,
    /// Offset of the transport header inside `data`; 0 if not present.
    pub transport_offset: usize,
    /// Offset of the transport payload inside `data`; 0 if not present.
    pub payload_offset: usize,
    /// Capture time, whole seconds since the Unix epoch.
    pub sec: u32,
    /// Nanosecond remainder of the capture time.
    pub nsec: u32,
    /// Observation domain the packet was captured in.
    pub observation_domain: u32,
    /// Link-layer addresses if the capture kept them.
    pub link: Option<LinkLayer>,
    time_sec_nbo: [u8; 4],
    time_msec_nbo: [u8; 8],
}

impl RawPacket {
    pub fn new(
        data: Vec<u8>,
        protocol: TransportProtocol,
        transport_offset: usize,
        payload_offset: usize,
        sec: u32,
        nsec: u32,
        observation_domain: u32,
    ) -> Self {
        let msec = sec as u64 * 1000 + nsec as u64 / 1_000_000;
        RawPacket {
            data,
            protocol,
            transport_offset,
            payload_offset,
            sec,
            nsec,
            observation_domain,
            link: None,
            time_sec_nbo: sec.to_be_bytes(),
            time_msec_nbo: msec.to_be_bytes(),
        }
    }

    /// Capture time in whole seconds, network byte order.
    pub fn time_sec_nbo(&self) -> &[u8; 4] {
        &self.time_sec_nbo
    }

    /// Capture time in milliseconds since the epoch, network byte order.
    pub fn time_msec_nbo(&self) -> &[u8; 8] {
        &self.time_msec_nbo
    }

    /// Capture time in milliseconds since the epoch.
    pub fn millis(&self) -> u64 {
        self.sec as u64 * 1000 + self.nsec as u64 / 1_000_000
    }

    /// Transport payload length. Zero when the packet carries no payload or
    /// the payload offset was never resolved past the transport header.
    pub fn payload_len(&self) -> u16 {
        if self.payload_offset == 0 || self.payload_offset == self.transport_offset {
            return 0;
        }
        self.data.len().saturating_sub(self.payload_offset) as u16
    }

    /// Transport payload bytes.
    pub fn payload(&self) -> &[u8] {
        if self.payload_len() == 0 {
            return &[];
        }
        &self.data[self.payload_offset..]
    }

    /// TCP sequence number; 0 for non-TCP packets or truncated headers.
    pub fn tcp_seq(&self) -> u32 {
        if self.protocol != TransportProtocol::Tcp {
            return 0;
        }
        match self.bytes_at(self.transport_offset + 4, 4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    /// TCP flags byte; 0 for non-TCP packets or truncated headers.
    pub fn tcp_flags(&self) -> u8 {
        if self.protocol != TransportProtocol::Tcp {
            return 0;
        }
        self.bytes_at(self.transport_offset + 13, 1)
            .map(|b| b[0])
            .unwrap_or(0)
    }

    /// True when the TCP SYN flag is set.
    pub fn is_syn(&self) -> bool {
        self.tcp_flags() & 0x02 != 0
    }

    /// In-range slice of the packet, or `None` when the capture is too short.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_packet(payload: &[u8]) -> RawPacket {
        // minimal IPv4 + TCP headers
        let mut data = vec![0u8; 40];
        data[9] = 6;
        data[24..28].copy_from_slice(&1000u32.to_be_bytes()); // seq
        data[33] = 0x02; // SYN
        let payload_offset = if payload.is_empty() { 20 } else { 40 };
        data.extend_from_slice(payload);
        RawPacket::new(data, TransportProtocol::Tcp, 20, payload_offset, 100, 500_000_000, 1)
    }

    #[test]
    fn test_protocol_from_u8() {
        assert_eq!(TransportProtocol::from(6), TransportProtocol::Tcp);
        assert_eq!(TransportProtocol::from(17), TransportProtocol::Udp);
        assert_eq!(TransportProtocol::from(47), TransportProtocol::Other(47));
    }

    #[test]
    fn test_time_images() {
        let p = tcp_packet(b"hi");
        assert_eq!(u32::from_be_bytes(*p.time_sec_nbo()), 100);
        assert_eq!(u64::from_be_bytes(*p.time_msec_nbo()), 100_500);
        assert_eq!(p.millis(), 100_500);
    }

    #[test]
    fn test_payload_len() {
        let p = tcp_packet(b"hello");
        assert_eq!(p.payload_len(), 5);
        assert_eq!(p.payload(), b"hello");

        // payload offset equal to transport offset means no payload resolved
        let p = tcp_packet(b"");
        assert_eq!(p.payload_len(), 0);
        assert!(p.payload().is_empty());
    }

    #[test]
    fn test_tcp_accessors() {
        let p = tcp_packet(b"x");
        assert_eq!(p.tcp_seq(), 1000);
        assert!(p.is_syn());

        let udp = RawPacket::new(vec![0; 28], TransportProtocol::Udp, 20, 0, 1, 0, 1);
        assert_eq!(udp.tcp_seq(), 0);
        assert!(!udp.is_syn());
    }

    #[test]
    fn test_bytes_at_bounds() {
        let p = tcp_packet(b"");
        assert!(p.bytes_at(0, 4).is_some());
        assert!(p.bytes_at(39, 2).is_none());
    }
}
