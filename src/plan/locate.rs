//! Packet field locator
//!
//! Maps information elements to the place their source bytes live in a raw
//! packet. Fixed elements sit at a constant offset from the IPv4 header;
//! variable elements depend on the packet's transport protocol and header
//! lengths and are re-resolved for every packet.

use crate::error::UnsupportedFieldError;
use crate::ie::{ext, iana, IeInfo, PEN_METER};
use crate::packet::TransportProtocol;

/// Where a field's source bytes live for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Fixed offset from the start of the IPv4 header.
    Net(usize),
    /// Offset from the transport header.
    Transport(usize),
    /// Capture time in whole seconds, network byte order.
    TimeSec,
    /// Capture time in milliseconds, network byte order.
    TimeMsec,
    /// Capture time as NTP fixed point; converted at copy time.
    TimeNano,
    /// Source MAC address from the link layer.
    MacSrc,
    /// Destination MAC address from the link layer.
    MacDst,
    /// Whole packet; payload ops position themselves.
    Packet,
    /// No source bytes; the copy op synthesizes the value.
    Synthesized,
    /// The packet does not carry this field; reads as zeroes.
    Missing,
    /// Masked address scratch slot inside the field plan.
    Scratch(usize),
}

/// True when the element's source position changes from packet to packet.
pub fn is_variable(ie: IeInfo) -> Result<bool, UnsupportedFieldError> {
    let fwd = ie.forward();
    if fwd.pen == PEN_METER {
        return match fwd.id {
            ext::FRONT_PAYLOAD
            | ext::FRONT_PAYLOAD_LEN
            | ext::TRANSPORT_OCTET_DELTA_COUNT => Ok(true),
            ext::MAX_PACKET_GAP
            | ext::FRONT_PAYLOAD_PKT_COUNT
            | ext::DPA_FLOW_COUNT
            | ext::DPA_FORCED_EXPORT
            | ext::DPA_REVERSE_START => Ok(false),
            _ => Err(UnsupportedFieldError(ie)),
        };
    }
    if fwd.pen != 0 {
        return Err(UnsupportedFieldError(ie));
    }
    match fwd.id {
        iana::SOURCE_TRANSPORT_PORT
        | iana::DESTINATION_TRANSPORT_PORT
        | iana::TCP_CONTROL_BITS
        | iana::ICMP_TYPE_CODE_IPV4
        | iana::SOURCE_MAC_ADDRESS
        | iana::DESTINATION_MAC_ADDRESS => Ok(true),
        iana::OCTET_DELTA_COUNT
        | iana::PACKET_DELTA_COUNT
        | iana::OCTET_TOTAL_COUNT
        | iana::PACKET_TOTAL_COUNT
        | iana::PROTOCOL_IDENTIFIER
        | iana::IP_CLASS_OF_SERVICE
        | iana::SOURCE_IPV4_ADDRESS
        | iana::DESTINATION_IPV4_ADDRESS
        | iana::FLOW_START_SECONDS
        | iana::FLOW_END_SECONDS
        | iana::FLOW_START_MILLISECONDS
        | iana::FLOW_END_MILLISECONDS
        | iana::FLOW_START_NANOSECONDS
        | iana::FLOW_END_NANOSECONDS => Ok(false),
        _ => Err(UnsupportedFieldError(ie)),
    }
}

/// Source byte count for an element; `dst_len` matters only for fields that
/// fill their whole destination.
pub fn source_len(ie: IeInfo, dst_len: u16) -> Result<u16, UnsupportedFieldError> {
    let fwd = ie.forward();
    if fwd.pen == PEN_METER {
        return match fwd.id {
            ext::FRONT_PAYLOAD => Ok(dst_len),
            ext::FRONT_PAYLOAD_LEN
            | ext::MAX_PACKET_GAP
            | ext::FRONT_PAYLOAD_PKT_COUNT
            | ext::DPA_FLOW_COUNT => Ok(4),
            ext::DPA_FORCED_EXPORT | ext::DPA_REVERSE_START => Ok(1),
            ext::TRANSPORT_OCTET_DELTA_COUNT => Ok(8),
            _ => Err(UnsupportedFieldError(ie)),
        };
    }
    if fwd.pen != 0 {
        return Err(UnsupportedFieldError(ie));
    }
    match fwd.id {
        // IP total length field feeds the octet counters
        iana::OCTET_DELTA_COUNT | iana::OCTET_TOTAL_COUNT => Ok(2),
        iana::PACKET_DELTA_COUNT
        | iana::PACKET_TOTAL_COUNT
        | iana::PROTOCOL_IDENTIFIER
        | iana::IP_CLASS_OF_SERVICE
        | iana::TCP_CONTROL_BITS => Ok(1),
        iana::SOURCE_TRANSPORT_PORT
        | iana::DESTINATION_TRANSPORT_PORT
        | iana::ICMP_TYPE_CODE_IPV4 => Ok(2),
        iana::SOURCE_IPV4_ADDRESS
        | iana::DESTINATION_IPV4_ADDRESS
        | iana::FLOW_START_SECONDS
        | iana::FLOW_END_SECONDS => Ok(4),
        iana::SOURCE_MAC_ADDRESS | iana::DESTINATION_MAC_ADDRESS => Ok(6),
        iana::FLOW_START_MILLISECONDS
        | iana::FLOW_END_MILLISECONDS
        | iana::FLOW_START_NANOSECONDS
        | iana::FLOW_END_NANOSECONDS => Ok(8),
        _ => Err(UnsupportedFieldError(ie)),
    }
}

/// Resolve an element's source. Only the transport-dependent elements look
/// at the protocol; fixed elements resolve the same way for every packet.
pub fn locate(ie: IeInfo, protocol: TransportProtocol) -> Result<FieldSource, UnsupportedFieldError> {
    let fwd = ie.forward();
    if fwd.pen == PEN_METER {
        return match fwd.id {
            ext::FRONT_PAYLOAD
            | ext::FRONT_PAYLOAD_LEN
            | ext::TRANSPORT_OCTET_DELTA_COUNT => Ok(FieldSource::Packet),
            ext::MAX_PACKET_GAP => Ok(FieldSource::TimeMsec),
            ext::FRONT_PAYLOAD_PKT_COUNT
            | ext::DPA_FLOW_COUNT
            | ext::DPA_FORCED_EXPORT
            | ext::DPA_REVERSE_START => Ok(FieldSource::Synthesized),
            _ => Err(UnsupportedFieldError(ie)),
        };
    }
    if fwd.pen != 0 {
        return Err(UnsupportedFieldError(ie));
    }
    match fwd.id {
        iana::PACKET_DELTA_COUNT | iana::PACKET_TOTAL_COUNT => Ok(FieldSource::Synthesized),
        iana::FLOW_START_SECONDS | iana::FLOW_END_SECONDS => Ok(FieldSource::TimeSec),
        iana::FLOW_START_MILLISECONDS | iana::FLOW_END_MILLISECONDS => Ok(FieldSource::TimeMsec),
        iana::FLOW_START_NANOSECONDS | iana::FLOW_END_NANOSECONDS => Ok(FieldSource::TimeNano),
        iana::OCTET_DELTA_COUNT | iana::OCTET_TOTAL_COUNT => Ok(FieldSource::Net(2)),
        iana::IP_CLASS_OF_SERVICE => Ok(FieldSource::Net(1)),
        iana::PROTOCOL_IDENTIFIER => Ok(FieldSource::Net(9)),
        iana::SOURCE_IPV4_ADDRESS => Ok(FieldSource::Net(12)),
        iana::DESTINATION_IPV4_ADDRESS => Ok(FieldSource::Net(16)),
        iana::SOURCE_MAC_ADDRESS => Ok(FieldSource::MacSrc),
        iana::DESTINATION_MAC_ADDRESS => Ok(FieldSource::MacDst),
        iana::SOURCE_TRANSPORT_PORT => match protocol {
            TransportProtocol::Tcp | TransportProtocol::Udp => {
                Ok(FieldSource::Transport(0))
            }
            _ => Ok(FieldSource::Missing),
        },
        iana::DESTINATION_TRANSPORT_PORT => match protocol {
            TransportProtocol::Tcp | TransportProtocol::Udp => {
                Ok(FieldSource::Transport(2))
            }
            _ => Ok(FieldSource::Missing),
        },
        iana::TCP_CONTROL_BITS => match protocol {
            TransportProtocol::Tcp => Ok(FieldSource::Transport(13)),
            _ => Ok(FieldSource::Missing),
        },
        iana::ICMP_TYPE_CODE_IPV4 => match protocol {
            TransportProtocol::Icmp => Ok(FieldSource::Transport(0)),
            _ => Ok(FieldSource::Missing),
        },
        _ => Err(UnsupportedFieldError(ie)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_offsets() {
        assert_eq!(
            locate(IeInfo::iana(iana::SOURCE_IPV4_ADDRESS), TransportProtocol::Tcp).unwrap(),
            FieldSource::Net(12)
        );
        assert_eq!(
            locate(IeInfo::iana(iana::PROTOCOL_IDENTIFIER), TransportProtocol::Udp).unwrap(),
            FieldSource::Net(9)
        );
        assert_eq!(
            locate(IeInfo::iana(iana::FLOW_START_SECONDS), TransportProtocol::Icmp).unwrap(),
            FieldSource::TimeSec
        );
    }

    #[test]
    fn test_transport_fields_depend_on_protocol() {
        let port = IeInfo::iana(iana::SOURCE_TRANSPORT_PORT);
        assert_eq!(locate(port, TransportProtocol::Tcp).unwrap(), FieldSource::Transport(0));
        assert_eq!(locate(port, TransportProtocol::Icmp).unwrap(), FieldSource::Missing);
        let flags = IeInfo::iana(iana::TCP_CONTROL_BITS);
        assert_eq!(locate(flags, TransportProtocol::Tcp).unwrap(), FieldSource::Transport(13));
        assert_eq!(locate(flags, TransportProtocol::Udp).unwrap(), FieldSource::Missing);
        let icmp_tc = IeInfo::iana(iana::ICMP_TYPE_CODE_IPV4);
        assert_eq!(locate(icmp_tc, TransportProtocol::Icmp).unwrap(), FieldSource::Transport(0));
        assert_eq!(locate(icmp_tc, TransportProtocol::Tcp).unwrap(), FieldSource::Missing);
    }

    #[test]
    fn test_unknown_element_rejected() {
        let bogus = IeInfo::iana(9999);
        assert!(locate(bogus, TransportProtocol::Tcp).is_err());
        assert!(is_variable(bogus).is_err());
        assert!(source_len(bogus, 4).is_err());
    }

    #[test]
    fn test_variable_partition() {
        assert!(is_variable(IeInfo::iana(iana::SOURCE_TRANSPORT_PORT)).unwrap());
        assert!(is_variable(IeInfo::meter(ext::FRONT_PAYLOAD)).unwrap());
        assert!(!is_variable(IeInfo::iana(iana::SOURCE_IPV4_ADDRESS)).unwrap());
        assert!(!is_variable(IeInfo::meter(ext::MAX_PACKET_GAP)).unwrap());
    }

    #[test]
    fn test_source_lengths() {
        assert_eq!(source_len(IeInfo::iana(iana::OCTET_DELTA_COUNT), 8).unwrap(), 2);
        assert_eq!(source_len(IeInfo::iana(iana::SOURCE_IPV4_ADDRESS), 5).unwrap(), 4);
        assert_eq!(source_len(IeInfo::meter(ext::FRONT_PAYLOAD), 128).unwrap(), 128);
        assert_eq!(source_len(IeInfo::iana(iana::SOURCE_MAC_ADDRESS), 6).unwrap(), 6);
    }
}
