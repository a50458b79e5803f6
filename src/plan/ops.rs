//! Creation-copy and combine operations
//!
//! Every compiled field carries one [`CopyOp`] (how the field is filled when
//! a bucket is created) and, for aggregate fields, one [`AggOp`] (how a
//! further packet is folded in). Both are chosen and validated at schema
//! compile time; at packet time they dispatch over a closed variant set.
//! All multi-byte record values are kept in network byte order.

use crate::error::{Result, SchemaError};
use crate::ie::{ext, iana, IeInfo, PEN_METER};
use crate::packet::RawPacket;
use crate::schema::FieldModifier;

use super::payload;
use super::PlanField;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// How a field is filled when its bucket is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOp {
    /// Source and destination have the same length.
    Exact,
    /// Zero the destination, copy the source into its tail.
    PadLeft,
    /// IPv4 address into a 5-byte destination: address first, zero prefix.
    PadRightIp,
    /// Zero the destination, set the last byte to 1 (packet counters).
    SetOne,
    /// Zero the destination (all reverse-direction elements start empty).
    SetZero,
    /// 64-bit NTP fixed-point timestamp.
    NanoStamp,
    /// Zero the destination, stamp the packet time into the gap scratch.
    MaxPacketGap,
    /// Capture the first payload bytes and initialize the payload scratch.
    FrontPayload,
    /// Reverse payload field: leave empty, scratch uninitialized.
    FrontPayloadRev,
    /// Store the first payload length and seed the sequence scratch.
    TransportOctets,
    /// Destination is filled by a companion field's logic, or stays zero.
    Ignore,
}

/// How a further packet is folded into an existing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    MinU32,
    MaxU32,
    MinU64,
    MaxU64,
    /// Minimum over NTP fixed-point timestamps.
    MinNano,
    /// Maximum over NTP fixed-point timestamps.
    MaxNano,
    /// 64-bit sum of the packet's IP total length.
    SumOctets,
    /// 64-bit packet counter.
    CountPackets,
    /// Bitwise OR of TCP control bits.
    OrFlags,
    /// Largest observed inter-packet gap in milliseconds.
    MaxPacketGap,
    /// Payload capture with sequence positioning and dialog tracking.
    FrontPayload,
    /// Payload octet counting with sequence tracking.
    TransportOctets,
    /// Companion fields are maintained elsewhere.
    Ignore,
}

/// Destination lengths accepted per element.
fn validate_length(ie: IeInfo, dst_len: u16) -> Result<()> {
    let fwd = ie.forward();
    let ok = if fwd.pen == PEN_METER {
        match fwd.id {
            ext::FRONT_PAYLOAD => dst_len >= 5,
            ext::FRONT_PAYLOAD_LEN
            | ext::MAX_PACKET_GAP
            | ext::FRONT_PAYLOAD_PKT_COUNT
            | ext::DPA_FLOW_COUNT => dst_len == 4,
            ext::DPA_FORCED_EXPORT | ext::DPA_REVERSE_START => dst_len == 1,
            ext::TRANSPORT_OCTET_DELTA_COUNT => dst_len == 8,
            _ => false,
        }
    } else {
        match fwd.id {
            iana::PROTOCOL_IDENTIFIER | iana::IP_CLASS_OF_SERVICE | iana::TCP_CONTROL_BITS => {
                dst_len == 1
            }
            iana::SOURCE_TRANSPORT_PORT
            | iana::DESTINATION_TRANSPORT_PORT
            | iana::ICMP_TYPE_CODE_IPV4 => dst_len == 2,
            iana::FLOW_START_SECONDS | iana::FLOW_END_SECONDS => dst_len == 4,
            iana::SOURCE_IPV4_ADDRESS | iana::DESTINATION_IPV4_ADDRESS => dst_len == 5,
            iana::SOURCE_MAC_ADDRESS | iana::DESTINATION_MAC_ADDRESS => dst_len == 6,
            iana::OCTET_DELTA_COUNT
            | iana::OCTET_TOTAL_COUNT
            | iana::PACKET_DELTA_COUNT
            | iana::PACKET_TOTAL_COUNT
            | iana::FLOW_START_MILLISECONDS
            | iana::FLOW_END_MILLISECONDS
            | iana::FLOW_START_NANOSECONDS
            | iana::FLOW_END_NANOSECONDS => dst_len == 8,
            _ => false,
        }
    };
    if ok {
        Ok(())
    } else {
        Err(SchemaError::BadFieldLength { ie, length: dst_len })
    }
}

/// Pick the creation copy for a field; rejects length/modifier combinations
/// the engine cannot honor.
pub fn select_copy(
    ie: IeInfo,
    dst_len: u16,
    src_len: u16,
    modifier: FieldModifier,
) -> Result<CopyOp> {
    validate_length(ie, dst_len)?;
    let fwd = ie.forward();

    if fwd == IeInfo::meter(ext::FRONT_PAYLOAD) {
        return if ie.is_reverse() {
            Ok(CopyOp::FrontPayloadRev)
        } else {
            Ok(CopyOp::FrontPayload)
        };
    }
    if ie == IeInfo::meter(ext::FRONT_PAYLOAD_LEN) {
        return Ok(CopyOp::Ignore);
    }
    if ie == IeInfo::meter(ext::TRANSPORT_OCTET_DELTA_COUNT) {
        return Ok(CopyOp::TransportOctets);
    }
    if ie == IeInfo::meter(ext::MAX_PACKET_GAP) {
        return Ok(CopyOp::MaxPacketGap);
    }
    if ie.pen == PEN_METER
        && matches!(
            ie.id,
            ext::FRONT_PAYLOAD_PKT_COUNT
                | ext::DPA_FLOW_COUNT
                | ext::DPA_REVERSE_START
                | ext::DPA_FORCED_EXPORT
        )
    {
        return Ok(CopyOp::Ignore);
    }
    if ie == IeInfo::iana(iana::FLOW_START_NANOSECONDS)
        || ie == IeInfo::iana(iana::FLOW_END_NANOSECONDS)
    {
        return Ok(CopyOp::NanoStamp);
    }
    // all remaining reverse elements start empty
    if ie.is_reverse() {
        return Ok(CopyOp::SetZero);
    }
    if dst_len == src_len {
        return Ok(CopyOp::Exact);
    }
    if dst_len > src_len {
        if fwd.id == iana::SOURCE_IPV4_ADDRESS || fwd.id == iana::DESTINATION_IPV4_ADDRESS {
            return match modifier {
                // masked addresses come pre-widened from the plan scratch
                FieldModifier::Mask(_) => Err(SchemaError::BadMaskLength { ie, length: dst_len }),
                _ => Ok(CopyOp::PadRightIp),
            };
        }
        if fwd.id == iana::PACKET_DELTA_COUNT || fwd.id == iana::PACKET_TOTAL_COUNT {
            return Ok(CopyOp::SetOne);
        }
        return Ok(CopyOp::PadLeft);
    }
    Err(SchemaError::BadFieldLength { ie, length: dst_len })
}

/// Pick the combine op for an aggregate field.
pub fn select_agg(ie: IeInfo) -> Result<AggOp> {
    let fwd = ie.forward();
    if fwd.pen == PEN_METER {
        return match fwd.id {
            ext::FRONT_PAYLOAD => Ok(AggOp::FrontPayload),
            ext::TRANSPORT_OCTET_DELTA_COUNT => Ok(AggOp::TransportOctets),
            ext::MAX_PACKET_GAP => Ok(AggOp::MaxPacketGap),
            ext::FRONT_PAYLOAD_LEN
            | ext::FRONT_PAYLOAD_PKT_COUNT
            | ext::DPA_FLOW_COUNT
            | ext::DPA_FORCED_EXPORT
            | ext::DPA_REVERSE_START => Ok(AggOp::Ignore),
            _ => Err(SchemaError::UnsupportedField(
                crate::error::UnsupportedFieldError(ie),
            )),
        };
    }
    match fwd.id {
        iana::FLOW_START_SECONDS => Ok(AggOp::MinU32),
        iana::FLOW_END_SECONDS => Ok(AggOp::MaxU32),
        iana::FLOW_START_MILLISECONDS => Ok(AggOp::MinU64),
        iana::FLOW_END_MILLISECONDS => Ok(AggOp::MaxU64),
        iana::FLOW_START_NANOSECONDS => Ok(AggOp::MinNano),
        iana::FLOW_END_NANOSECONDS => Ok(AggOp::MaxNano),
        iana::OCTET_DELTA_COUNT | iana::OCTET_TOTAL_COUNT => Ok(AggOp::SumOctets),
        iana::PACKET_DELTA_COUNT | iana::PACKET_TOTAL_COUNT => Ok(AggOp::CountPackets),
        iana::TCP_CONTROL_BITS => Ok(AggOp::OrFlags),
        _ => Err(SchemaError::UnsupportedField(
            crate::error::UnsupportedFieldError(ie),
        )),
    }
}

// network-order scalar access into the bucket buffer

pub(crate) fn get_u16(data: &[u8], off: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&data[off..off + 2]);
    u16::from_be_bytes(b)
}

pub(crate) fn get_u32(data: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[off..off + 4]);
    u32::from_be_bytes(b)
}

pub(crate) fn get_u64(data: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[off..off + 8]);
    u64::from_be_bytes(b)
}

pub(crate) fn put_u32(data: &mut [u8], off: usize, value: u32) {
    data[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u64(data: &mut [u8], off: usize, value: u64) {
    data[off..off + 8].copy_from_slice(&value.to_be_bytes());
}

/// Capture time as a 64-bit NTP fixed-point value.
pub(crate) fn ntp_stamp(p: &RawPacket) -> u64 {
    let secs = p.sec as u64 + NTP_EPOCH_OFFSET;
    let frac = (p.nsec as u64) * (1u64 << 32) / 1_000_000_000;
    (secs << 32) | frac
}

/// Run a field's creation copy into a freshly zeroed bucket buffer.
pub(crate) fn execute_copy(f: &PlanField, data: &mut [u8], src: &[u8], p: &RawPacket) {
    let dst = f.dst_offset;
    let len = f.dst_len;
    match f.copy {
        CopyOp::Exact => data[dst..dst + len].copy_from_slice(&src[..len]),
        CopyOp::PadLeft => {
            data[dst..dst + len].fill(0);
            data[dst + len - f.src_len..dst + len].copy_from_slice(&src[..f.src_len]);
        }
        CopyOp::PadRightIp => {
            data[dst..dst + len].fill(0);
            data[dst..dst + f.src_len].copy_from_slice(&src[..f.src_len]);
        }
        CopyOp::SetOne => {
            data[dst..dst + len].fill(0);
            data[dst + len - 1] = 1;
        }
        CopyOp::SetZero => data[dst..dst + len].fill(0),
        // the bucket buffer starts zeroed; companion values written by a
        // payload field's copy must survive
        CopyOp::Ignore => {}
        CopyOp::NanoStamp => put_u64(data, dst, ntp_stamp(p)),
        CopyOp::MaxPacketGap => {
            data[dst..dst + len].fill(0);
            if let Some(priv_off) = f.priv_offset {
                put_u64(data, priv_off, p.millis());
            }
        }
        CopyOp::FrontPayload => payload::init_front_payload(f, data, p),
        CopyOp::FrontPayloadRev => payload::clear_payload_state(f, data),
        CopyOp::TransportOctets => payload::copy_transport_octets(f, data, p),
    }
}

/// Fold a packet into an existing field. Returns `true` when the bucket must
/// be forced out (dialog turnaround detected by the payload aggregator).
pub(crate) fn execute_agg(f: &PlanField, data: &mut [u8], src: &[u8], p: &RawPacket) -> bool {
    let dst = f.dst_offset;
    match f.agg {
        Some(AggOp::MinU32) => {
            let cur = get_u32(data, dst);
            let new = get_u32(src, 0);
            // zero means the field was never set (reverse elements start empty)
            if cur == 0 || new < cur {
                put_u32(data, dst, new);
            }
        }
        Some(AggOp::MaxU32) => {
            let cur = get_u32(data, dst);
            let new = get_u32(src, 0);
            if new > cur {
                put_u32(data, dst, new);
            }
        }
        Some(AggOp::MinU64) => {
            let cur = get_u64(data, dst);
            let new = get_u64(src, 0);
            if cur == 0 || new < cur {
                put_u64(data, dst, new);
            }
        }
        Some(AggOp::MaxU64) => {
            let cur = get_u64(data, dst);
            let new = get_u64(src, 0);
            if new > cur {
                put_u64(data, dst, new);
            }
        }
        Some(AggOp::MinNano) => {
            let cur = get_u64(data, dst);
            let new = ntp_stamp(p);
            if cur == 0 || new < cur {
                put_u64(data, dst, new);
            }
        }
        Some(AggOp::MaxNano) => {
            let cur = get_u64(data, dst);
            let new = ntp_stamp(p);
            if new > cur {
                put_u64(data, dst, new);
            }
        }
        Some(AggOp::SumOctets) => {
            let add = get_u16(src, 0) as u64;
            put_u64(data, dst, get_u64(data, dst).wrapping_add(add));
        }
        Some(AggOp::CountPackets) => {
            put_u64(data, dst, get_u64(data, dst).wrapping_add(1));
        }
        Some(AggOp::OrFlags) => {
            data[dst] |= src[0];
        }
        Some(AggOp::MaxPacketGap) => {
            if let Some(priv_off) = f.priv_offset {
                let last = get_u64(data, priv_off);
                let now = p.millis();
                if last != 0 {
                    let gap = now.abs_diff(last).min(u32::MAX as u64) as u32;
                    if gap > get_u32(data, dst) {
                        put_u32(data, dst, gap);
                    }
                }
                put_u64(data, priv_off, now);
            }
        }
        Some(AggOp::FrontPayload) => {
            return payload::aggregate_front_payload(f, data, p, false);
        }
        Some(AggOp::TransportOctets) => payload::aggregate_transport_octets(f, data, p),
        Some(AggOp::Ignore) | None => {}
    }
    false
}
