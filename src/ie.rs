//! Information element catalogue
//!
//! IPFIX information element identifiers as they appear in record schemas:
//! the IANA-assigned subset that can be derived from raw IPv4 packets, the
//! reverse-direction enterprise bit used for biflow records, and the meter's
//! own extension elements (front payload, dialog-based payload aggregation,
//! packet gap, transport octet counting).

use std::fmt;

use serde::{Deserialize, Serialize};

/// IANA-assigned element ids.
pub mod iana {
    pub const OCTET_DELTA_COUNT: u16 = 1;
    pub const PACKET_DELTA_COUNT: u16 = 2;
    pub const PROTOCOL_IDENTIFIER: u16 = 4;
    pub const IP_CLASS_OF_SERVICE: u16 = 5;
    pub const TCP_CONTROL_BITS: u16 = 6;
    pub const SOURCE_TRANSPORT_PORT: u16 = 7;
    pub const SOURCE_IPV4_ADDRESS: u16 = 8;
    pub const DESTINATION_TRANSPORT_PORT: u16 = 11;
    pub const DESTINATION_IPV4_ADDRESS: u16 = 12;
    pub const ICMP_TYPE_CODE_IPV4: u16 = 32;
    pub const SOURCE_MAC_ADDRESS: u16 = 56;
    pub const DESTINATION_MAC_ADDRESS: u16 = 80;
    pub const OCTET_TOTAL_COUNT: u16 = 85;
    pub const PACKET_TOTAL_COUNT: u16 = 86;
    pub const FLOW_START_SECONDS: u16 = 150;
    pub const FLOW_END_SECONDS: u16 = 151;
    pub const FLOW_START_MILLISECONDS: u16 = 152;
    pub const FLOW_END_MILLISECONDS: u16 = 153;
    pub const FLOW_START_NANOSECONDS: u16 = 156;
    pub const FLOW_END_NANOSECONDS: u16 = 157;
}

/// Extension element ids, valid under [`PEN_METER`].
pub mod ext {
    pub const FRONT_PAYLOAD: u16 = 1;
    pub const FRONT_PAYLOAD_LEN: u16 = 2;
    pub const MAX_PACKET_GAP: u16 = 3;
    pub const FRONT_PAYLOAD_PKT_COUNT: u16 = 4;
    pub const DPA_FLOW_COUNT: u16 = 5;
    pub const DPA_FORCED_EXPORT: u16 = 6;
    pub const DPA_REVERSE_START: u16 = 7;
    pub const TRANSPORT_OCTET_DELTA_COUNT: u16 = 8;
}

/// Enterprise bit marking the reverse direction of an element (RFC 5103).
pub const PEN_REVERSE: u32 = 29305;

/// Private enterprise number carrying the extension elements. The low bits
/// are clear so [`PEN_REVERSE`] can be or-ed in for reverse variants.
pub const PEN_METER: u32 = 0x7770_0000;

/// An information element reference: id plus enterprise number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IeInfo {
    pub id: u16,
    pub pen: u32,
}

impl IeInfo {
    pub const fn new(id: u16, pen: u32) -> Self {
        IeInfo { id, pen }
    }

    /// An IANA-assigned element (enterprise number 0).
    pub const fn iana(id: u16) -> Self {
        IeInfo { id, pen: 0 }
    }

    /// A meter extension element.
    pub const fn meter(id: u16) -> Self {
        IeInfo { id, pen: PEN_METER }
    }

    /// True if the reverse-direction bit is set.
    pub fn is_reverse(&self) -> bool {
        self.pen & PEN_REVERSE != 0
    }

    /// The reverse-direction variant of this element.
    pub fn reversed(&self) -> IeInfo {
        IeInfo { id: self.id, pen: self.pen | PEN_REVERSE }
    }

    /// This element with the reverse bit cleared.
    pub fn forward(&self) -> IeInfo {
        IeInfo { id: self.id, pen: self.pen & !PEN_REVERSE }
    }

    /// True if this is a meter extension element, in either direction.
    pub fn is_meter(&self) -> bool {
        self.pen & PEN_METER == PEN_METER
    }
}

impl fmt::Display for IeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pen == 0 {
            write!(f, "ie({})", self.id)
        } else {
            write!(f, "ie({}, pen={:#x})", self.id, self.pen)
        }
    }
}

/// True for elements that accumulate across packets; false for the flow key
/// elements (addresses, ports, protocol, ToS, ICMP type/code, MACs).
pub fn is_aggregatable(ie: IeInfo) -> bool {
    let fwd = ie.forward();
    if fwd.pen == PEN_METER {
        return true;
    }
    if fwd.pen != 0 {
        return false;
    }
    matches!(
        fwd.id,
        iana::OCTET_DELTA_COUNT
            | iana::PACKET_DELTA_COUNT
            | iana::TCP_CONTROL_BITS
            | iana::OCTET_TOTAL_COUNT
            | iana::PACKET_TOTAL_COUNT
            | iana::FLOW_START_SECONDS
            | iana::FLOW_END_SECONDS
            | iana::FLOW_START_MILLISECONDS
            | iana::FLOW_END_MILLISECONDS
            | iana::FLOW_START_NANOSECONDS
            | iana::FLOW_END_NANOSECONDS
    )
}
