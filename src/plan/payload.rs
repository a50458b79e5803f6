//! Front payload capture and payload-derived counters
//!
//! Stateful aggregation over packet payloads: capture of the first payload
//! bytes of a flow (sequence-positioned for TCP, arrival order for UDP),
//! dialog-based payload aggregation (DPA) which forces a flow out when a
//! request/response dialog turns around a second time, and transport octet
//! counting driven by TCP sequence numbers. All state lives in the bucket's
//! private scratch area, never in the emitted record.

use crate::ie::IeInfo;
use crate::packet::{RawPacket, TransportProtocol};

use super::ops::{get_u32, put_u32, put_u64};
use super::PlanField;

/// Widest plausible TCP window: 64KB scaled by the maximum window shift.
/// Sequence jumps beyond this are treated as garbage, not as new data.
const MAX_TCP_WINDOW: u64 = 65_535 << 14;

// Payload scratch layout: sequence (4), captured byte count (4), init flag (1).
struct PayloadState {
    off: usize,
}

impl PayloadState {
    fn of(f: &PlanField) -> Self {
        let off = f
            .priv_offset
            .expect("payload fields are compiled with a scratch area");
        PayloadState { off }
    }

    fn seq(&self, data: &[u8]) -> u32 {
        get_u32(data, self.off)
    }

    fn set_seq(&self, data: &mut [u8], seq: u32) {
        put_u32(data, self.off, seq);
    }

    fn byte_count(&self, data: &[u8]) -> u32 {
        get_u32(data, self.off + 4)
    }

    fn set_byte_count(&self, data: &mut [u8], count: u32) {
        put_u32(data, self.off + 4, count);
    }

    fn initialized(&self, data: &[u8]) -> bool {
        data[self.off + 8] != 0
    }

    fn set_initialized(&self, data: &mut [u8], value: bool) {
        data[self.off + 8] = value as u8;
    }
}

/// Mark a reverse payload field's scratch as untouched; the first packet in
/// that direction initializes it.
pub(crate) fn clear_payload_state(f: &PlanField, data: &mut [u8]) {
    PayloadState::of(f).set_initialized(data, false);
}

/// Creation copy for a forward payload field: the creating packet is also
/// the first aggregated one.
pub(crate) fn init_front_payload(f: &PlanField, data: &mut [u8], p: &RawPacket) {
    aggregate_front_payload(f, data, p, true);
}

// Dialog tracking: remembers which direction delivered payload first, whether
// the other direction answered, and flags the second turnaround. Returns true
// when the flow must be forced out.
fn track_dialog(f: &PlanField, data: &mut [u8], revdir: bool) -> bool {
    let dpa_off = match f.payload.dpa_state_offset {
        Some(off) => off,
        None => return false,
    };
    let data_seen = data[dpa_off] != 0;
    let rev_start = data[dpa_off + 1] != 0;
    let rev_data = data[dpa_off + 2] != 0;

    if !data_seen {
        data[dpa_off + 1] = revdir as u8;
        if let Some(off) = f.payload.reverse_start_offset {
            data[off] = revdir as u8;
        }
        data[dpa_off] = 1;
    } else if revdir != rev_start {
        data[dpa_off + 2] = 1;
    } else if rev_data {
        // dialog turned around a second time
        if let Some(off) = f.payload.forced_export_offset {
            data[off] = 1;
        }
        return true;
    }
    false
}

// Mirror the captured byte count into the companion length element and bump
// the companion packet counter.
fn update_companions(f: &PlanField, data: &mut [u8], byte_count: u32) {
    if let Some(off) = f.payload.pkt_count_offset {
        put_u32(data, off, get_u32(data, off) + 1);
    }
    if let Some(off) = f.payload.len_offset {
        put_u32(data, off, byte_count);
    }
}

/// Fold a packet's payload into a front payload field. No stream reassembly
/// is performed: TCP segments are placed by sequence number relative to the
/// flow start, a repeated sequence number overwrites. Returns `true` when
/// dialog tracking demands a forced export; the packet is then not
/// aggregated.
pub(crate) fn aggregate_front_payload(
    f: &PlanField,
    data: &mut [u8],
    p: &RawPacket,
    first: bool,
) -> bool {
    let state = PayloadState::of(f);
    let plen = p.payload_len() as usize;

    if f.payload.dpa && plen > 0 && track_dialog(f, data, f.ie.is_reverse()) {
        return true;
    }

    let mut seq = if p.protocol == TransportProtocol::Tcp {
        p.tcp_seq()
    } else {
        0
    };

    if first || !state.initialized(data) {
        // a SYN consumes one sequence number without carrying payload
        if p.protocol == TransportProtocol::Tcp && p.is_syn() {
            seq = seq.wrapping_add(1);
        }
        state.set_seq(data, seq);
        state.set_byte_count(data, 0);
        state.set_initialized(data, true);
    }

    if plen == 0 {
        return false;
    }

    let dst = f.dst_offset;
    let dst_len = f.dst_len;
    match p.protocol {
        TransportProtocol::Tcp => {
            let fseq = state.seq(data);
            let rel = seq.wrapping_sub(fseq) as usize;
            if rel < dst_len {
                let pos = if seq != 0 {
                    rel
                } else {
                    state.byte_count(data) as usize
                };
                let len = (dst_len - pos).min(plen);
                data[dst + pos..dst + pos + len].copy_from_slice(&p.payload()[..len]);
                let end = (pos + len) as u32;
                if state.byte_count(data) < end {
                    state.set_byte_count(data, end);
                }
                let count = state.byte_count(data);
                update_companions(f, data, count);
            }
        }
        TransportProtocol::Udp => {
            let pos = state.byte_count(data) as usize;
            if pos < dst_len {
                let len = (dst_len - pos).min(plen);
                data[dst + pos..dst + pos + len].copy_from_slice(&p.payload()[..len]);
                let count = (pos + len) as u32;
                state.set_byte_count(data, count);
                update_companions(f, data, count);
            }
        }
        _ => {}
    }
    false
}

/// Creation copy for a transport octet counter: first payload length, plus
/// the expected next sequence number for TCP.
pub(crate) fn copy_transport_octets(f: &PlanField, data: &mut [u8], p: &RawPacket) {
    let plen = p.payload_len() as u32;
    put_u64(data, f.dst_offset, plen as u64);
    if p.protocol == TransportProtocol::Tcp {
        let state = PayloadState::of(f);
        let next = p
            .tcp_seq()
            .wrapping_add(plen)
            .wrapping_add(p.is_syn() as u32);
        state.set_seq(data, next);
        state.set_initialized(data, true);
    }
}

/// Fold a packet into a transport octet counter. For TCP only sequence
/// progress is counted, so retransmits do not inflate the sum; a sequence
/// wraparound within the window is followed.
pub(crate) fn aggregate_transport_octets(f: &PlanField, data: &mut [u8], p: &RawPacket) {
    let plen = p.payload_len() as u64;
    if plen == 0 {
        return;
    }
    let dst = f.dst_offset;
    match p.protocol {
        TransportProtocol::Tcp => {
            let state = PayloadState::of(f);
            let seq = p.tcp_seq() as u64;
            if !state.initialized(data) {
                let next = p
                    .tcp_seq()
                    .wrapping_add(plen as u32)
                    .wrapping_add(p.is_syn() as u32);
                state.set_seq(data, next);
                state.set_initialized(data, true);
                put_u64(data, dst, plen);
                return;
            }
            let fseq = state.seq(data) as u64;
            let end = seq + plen;
            let wrapped = end + (1u64 << 32);
            if end > fseq && end < fseq + MAX_TCP_WINDOW {
                let total = super::ops::get_u64(data, dst) + (end - fseq);
                put_u64(data, dst, total);
                state.set_seq(data, end as u32);
            } else if wrapped > fseq && wrapped < fseq + MAX_TCP_WINDOW {
                let total = super::ops::get_u64(data, dst) + (wrapped - fseq);
                put_u64(data, dst, total);
                state.set_seq(data, wrapped as u32);
            }
        }
        TransportProtocol::Udp => {
            let total = super::ops::get_u64(data, dst) + plen;
            put_u64(data, dst, total);
        }
        _ => {}
    }
}
