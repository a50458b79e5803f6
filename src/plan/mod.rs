//! Schema-compiled field plan
//!
//! Compiles a [`RecordSchema`] into the execution tables the packet path
//! runs on: key fields (hashed and compared), aggregate fields (folded into
//! the bucket), reverse aggregate fields (biflow), per-field copy and
//! combine ops, masked-address scratch and the reverse key mapper. All
//! validation happens here; after `compile` succeeds the per-packet code
//! never sees an unexpected element.

pub mod locate;
pub mod ops;
pub mod payload;

pub use locate::FieldSource;
pub use ops::{AggOp, CopyOp};

use crate::error::{Result, SchemaError, UnsupportedFieldError};
use crate::ie::{self, ext, iana, IeInfo};
use crate::packet::{RawPacket, ZERO_BYTES};
use crate::schema::{FieldModifier, LayoutField, RecordLayout, RecordSchema};

/// Companion-field links for a payload field, resolved at compile time.
/// An absent companion simply goes unmaintained.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadLinks {
    /// Dialog-based payload aggregation is active for this field.
    pub dpa: bool,
    pub len_offset: Option<usize>,
    pub pkt_count_offset: Option<usize>,
    pub forced_export_offset: Option<usize>,
    pub reverse_start_offset: Option<usize>,
    pub dpa_state_offset: Option<usize>,
}

/// One compiled field.
#[derive(Debug, Clone)]
pub struct PlanField {
    pub ie: IeInfo,
    pub dst_offset: usize,
    pub dst_len: usize,
    pub src_len: usize,
    /// Source must be re-resolved for every packet.
    pub variable: bool,
    pub source: FieldSource,
    pub priv_offset: Option<usize>,
    pub modifier: FieldModifier,
    pub copy: CopyOp,
    pub agg: Option<AggOp>,
    pub payload: PayloadLinks,
}

// Per-packet scratch for one masked address key: the masked address bytes
// plus the prefix length, rebuilt for every packet.
#[derive(Debug, Clone)]
struct MaskScratch {
    bytes: [u8; 5],
    net_offset: usize,
    prefix: u8,
}

/// The compiled plan for one record template.
#[derive(Debug, Clone)]
pub struct FieldPlan {
    layout: RecordLayout,
    key_fields: Vec<PlanField>,
    agg_fields: Vec<PlanField>,
    rev_agg_fields: Vec<PlanField>,
    /// For key index `i`, the key index holding its biflow counterpart.
    rev_key_map: Vec<usize>,
    mask_scratch: Vec<MaskScratch>,
    pub biflow: bool,
    pub use_dpa: bool,
    /// Offset of the dialog flow counter, inherited across forced expiries.
    pub dpa_flow_count_offset: Option<usize>,
}

impl FieldPlan {
    pub fn compile(schema: &RecordSchema, biflow: bool) -> Result<Self> {
        let layout = RecordLayout::build(schema)?;
        let mut key_fields = Vec::new();
        let mut agg_fields = Vec::new();
        let mut rev_agg_fields = Vec::new();
        let mut mask_scratch = Vec::new();

        for lf in layout.fields() {
            if lf.ie.is_reverse() && !biflow {
                return Err(SchemaError::ReverseWithoutBiflow(lf.ie));
            }
            let field = compile_field(lf, &layout, &mut mask_scratch)?;
            if ie::is_aggregatable(lf.ie) {
                // payload fields run first so a forced export stops the
                // rest of the packet's aggregation
                let first = lf.ie.forward() == IeInfo::meter(ext::FRONT_PAYLOAD);
                let list = if lf.ie.is_reverse() { &mut rev_agg_fields } else { &mut agg_fields };
                if first {
                    list.insert(0, field);
                } else {
                    list.push(field);
                }
            } else {
                if lf.ie.is_reverse() {
                    return Err(SchemaError::UnsupportedField(UnsupportedFieldError(lf.ie)));
                }
                key_fields.push(field);
            }
        }
        if key_fields.is_empty() {
            return Err(SchemaError::NoKeyFields);
        }

        let rev_key_map = if biflow {
            build_reverse_key_map(&key_fields)?
        } else {
            Vec::new()
        };

        let use_dpa = layout.field(IeInfo::meter(ext::DPA_FORCED_EXPORT)).is_some();
        let dpa_flow_count_offset =
            layout.field(IeInfo::meter(ext::DPA_FLOW_COUNT)).map(|f| f.offset);

        Ok(FieldPlan {
            layout,
            key_fields,
            agg_fields,
            rev_agg_fields,
            rev_key_map,
            mask_scratch,
            biflow,
            use_dpa,
            dpa_flow_count_offset,
        })
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn record_len(&self) -> usize {
        self.layout.record_len()
    }

    pub fn total_len(&self) -> usize {
        self.layout.total_len()
    }

    pub fn key_fields(&self) -> &[PlanField] {
        &self.key_fields
    }

    /// Re-resolve the variable field sources for this packet.
    pub(crate) fn update_sources(&mut self, p: &RawPacket) {
        let protocol = p.protocol;
        for f in self
            .key_fields
            .iter_mut()
            .chain(self.agg_fields.iter_mut())
            .chain(self.rev_agg_fields.iter_mut())
        {
            if !f.variable || matches!(f.source, FieldSource::Scratch(_)) {
                continue;
            }
            match locate::locate(f.ie, protocol) {
                Ok(source) => f.source = source,
                // every plan field was validated at compile time
                Err(e) => unreachable!("field source vanished: {e}"),
            }
        }
    }

    /// Rebuild the masked address scratch for this packet.
    pub(crate) fn apply_masks(&mut self, p: &RawPacket) {
        for ms in self.mask_scratch.iter_mut() {
            let addr = p.bytes_at(ms.net_offset, 4).unwrap_or(&ZERO_BYTES[..4]);
            let value = u32::from_be_bytes([addr[0], addr[1], addr[2], addr[3]]);
            let masked = if ms.prefix == 0 {
                0
            } else {
                value & (!0u32 << (32 - ms.prefix as u32))
            };
            ms.bytes[..4].copy_from_slice(&masked.to_be_bytes());
            ms.bytes[4] = ms.prefix;
        }
    }

    // Source bytes of a field for this packet; fields the packet does not
    // carry read as zeroes.
    fn src_bytes<'a>(&'a self, f: &'a PlanField, p: &'a RawPacket) -> &'a [u8] {
        let len = f.src_len;
        let slice: Option<&[u8]> = match f.source {
            FieldSource::Net(off) => p.bytes_at(off, len),
            FieldSource::Transport(off) => p.bytes_at(p.transport_offset + off, len),
            FieldSource::TimeSec => Some(&p.time_sec_nbo()[..]),
            FieldSource::TimeMsec => Some(&p.time_msec_nbo()[..]),
            FieldSource::MacSrc => p.link.as_ref().map(|l| &l.src_mac[..]),
            FieldSource::MacDst => p.link.as_ref().map(|l| &l.dst_mac[..]),
            FieldSource::Scratch(i) => Some(&self.mask_scratch[i].bytes[..]),
            FieldSource::TimeNano
            | FieldSource::Packet
            | FieldSource::Synthesized
            | FieldSource::Missing => None,
        };
        match slice {
            Some(s) if s.len() >= len => &s[..len],
            _ => &ZERO_BYTES[..len.min(ZERO_BYTES.len())],
        }
    }

    /// CRC-32 fold over the packet's key field bytes in schema order.
    pub fn hash(&self, p: &RawPacket) -> u32 {
        let mut hasher = crc32fast::Hasher::new_with_initial(0xAAAA_AAAA);
        for f in &self.key_fields {
            hasher.update(self.src_bytes(f, p));
        }
        hasher.finalize()
    }

    /// Key hash of the packet's reverse direction.
    pub fn hash_rev(&self, p: &RawPacket) -> u32 {
        let mut hasher = crc32fast::Hasher::new_with_initial(0xAAAA_AAAA);
        for &mapped in &self.rev_key_map {
            let f = &self.key_fields[mapped];
            hasher.update(self.src_bytes(f, p));
        }
        hasher.finalize()
    }

    /// Compare a bucket's key bytes against the packet.
    pub fn equal_flow(&self, bucket: &[u8], p: &RawPacket) -> bool {
        self.key_fields.iter().all(|f| {
            &bucket[f.dst_offset..f.dst_offset + f.src_len] == self.src_bytes(f, p)
        })
    }

    /// Compare a bucket's key bytes against the packet's reverse direction.
    pub fn equal_flow_rev(&self, bucket: &[u8], p: &RawPacket) -> bool {
        self.key_fields.iter().enumerate().all(|(i, f)| {
            let mapped = &self.key_fields[self.rev_key_map[i]];
            &bucket[mapped.dst_offset..mapped.dst_offset + f.src_len] == self.src_bytes(f, p)
        })
    }

    /// Build the bucket buffer for a packet that starts a new flow.
    pub fn build_record(&self, p: &RawPacket) -> Vec<u8> {
        let mut data = vec![0u8; self.layout.total_len()];
        for f in self
            .key_fields
            .iter()
            .chain(self.agg_fields.iter())
            .chain(self.rev_agg_fields.iter())
        {
            let src = self.src_bytes(f, p);
            ops::execute_copy(f, &mut data, src, p);
        }
        data
    }

    /// Fold a packet into an existing bucket buffer. Returns `true` when
    /// the bucket must be forced out; the remaining fields are then left
    /// untouched.
    pub fn aggregate_into(&self, data: &mut [u8], p: &RawPacket, reverse: bool) -> bool {
        let fields = if reverse { &self.rev_agg_fields } else { &self.agg_fields };
        for f in fields {
            let src = self.src_bytes(f, p);
            if ops::execute_agg(f, data, src, p) {
                return true;
            }
        }
        false
    }
}

fn compile_field(
    lf: &LayoutField,
    layout: &RecordLayout,
    mask_scratch: &mut Vec<MaskScratch>,
) -> Result<PlanField> {
    let ie = lf.ie;
    let dst_len = lf.length;
    let mut src_len = locate::source_len(ie, dst_len as u16)? as usize;
    let variable;
    let source;

    if let FieldModifier::Mask(prefix) = lf.modifier {
        let net_offset = match ie.forward() {
            f if f == IeInfo::iana(iana::SOURCE_IPV4_ADDRESS) => 12,
            f if f == IeInfo::iana(iana::DESTINATION_IPV4_ADDRESS) => 16,
            _ => return Err(SchemaError::BadModifier { ie, modifier: lf.modifier }),
        };
        if prefix > 32 {
            return Err(SchemaError::BadModifier { ie, modifier: lf.modifier });
        }
        if dst_len != 5 {
            return Err(SchemaError::BadMaskLength { ie, length: dst_len as u16 });
        }
        let idx = mask_scratch.len();
        mask_scratch.push(MaskScratch { bytes: [0; 5], net_offset, prefix });
        src_len = 5;
        variable = true;
        source = FieldSource::Scratch(idx);
    } else {
        variable = locate::is_variable(ie)?;
        // variable sources are resolved per packet; the protocol passed
        // here only matters for the transport-dependent elements
        source = locate::locate(ie, crate::packet::TransportProtocol::Other(255))?;
    }

    let copy = ops::select_copy(ie, dst_len as u16, src_len as u16, lf.modifier)?;
    let agg = if ie::is_aggregatable(ie) { Some(ops::select_agg(ie)?) } else { None };

    let mut payload = PayloadLinks::default();
    if ie.forward() == IeInfo::meter(ext::FRONT_PAYLOAD) {
        let same_dir = |id| IeInfo { id, pen: ie.pen };
        payload.len_offset = layout.field(same_dir(ext::FRONT_PAYLOAD_LEN)).map(|f| f.offset);
        payload.pkt_count_offset =
            layout.field(same_dir(ext::FRONT_PAYLOAD_PKT_COUNT)).map(|f| f.offset);
        // dialog state and its exported flags live on the forward elements
        // and are shared by both directions
        let forced = layout.field(IeInfo::meter(ext::DPA_FORCED_EXPORT));
        payload.forced_export_offset = forced.map(|f| f.offset);
        payload.dpa_state_offset = forced.and_then(|f| f.priv_offset);
        payload.reverse_start_offset =
            layout.field(IeInfo::meter(ext::DPA_REVERSE_START)).map(|f| f.offset);
        payload.dpa = payload.dpa_state_offset.is_some();
    }

    Ok(PlanField {
        ie,
        dst_offset: lf.offset,
        dst_len,
        src_len,
        variable,
        source,
        priv_offset: lf.priv_offset,
        modifier: lf.modifier,
        copy,
        agg,
        payload,
    })
}

// Biflow needs both addresses and both ports in the key; addresses map to
// each other, ports map to each other, everything else maps to itself.
fn build_reverse_key_map(key_fields: &[PlanField]) -> Result<Vec<usize>> {
    let index_of = |ie: IeInfo| key_fields.iter().position(|f| f.ie == ie);
    let src_ip = index_of(IeInfo::iana(iana::SOURCE_IPV4_ADDRESS))
        .ok_or(SchemaError::NotReversible("a source address key field"))?;
    let dst_ip = index_of(IeInfo::iana(iana::DESTINATION_IPV4_ADDRESS))
        .ok_or(SchemaError::NotReversible("a destination address key field"))?;
    let src_port = index_of(IeInfo::iana(iana::SOURCE_TRANSPORT_PORT))
        .ok_or(SchemaError::NotReversible("a source port key field"))?;
    let dst_port = index_of(IeInfo::iana(iana::DESTINATION_TRANSPORT_PORT))
        .ok_or(SchemaError::NotReversible("a destination port key field"))?;

    if key_fields[src_ip].dst_len != key_fields[dst_ip].dst_len
        || key_fields[src_ip].src_len != key_fields[dst_ip].src_len
    {
        return Err(SchemaError::NotReversible("address key fields of equal length"));
    }
    // a one-sided mask would compare masked packet bytes against unmasked
    // bucket bytes, so reverse matching could never succeed
    if key_fields[src_ip].modifier != key_fields[dst_ip].modifier
        || key_fields[src_port].modifier != key_fields[dst_port].modifier
    {
        return Err(SchemaError::NotReversible(
            "identical modifiers on the address and port pair",
        ));
    }

    Ok((0..key_fields.len())
        .map(|i| match i {
            _ if i == src_ip => dst_ip,
            _ if i == dst_ip => src_ip,
            _ if i == src_port => dst_port,
            _ if i == dst_port => src_port,
            _ => i,
        })
        .collect())
}
