//! Record schemas and their compiled byte layout
//!
//! A [`RecordSchema`] names the information elements a flow record carries.
//! [`RecordLayout`] assigns each kept field its byte range inside the bucket
//! buffer, plus a private scratch area past the record proper for the
//! stateful aggregators (payload sequence tracking, dialog state, packet
//! gap timestamps). Scratch bytes never leave the engine; emitted records
//! are truncated to the record length.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::ie::{ext, IeInfo, PEN_METER};

/// Payload scratch: 4 bytes sequence + 4 bytes byte count + 1 byte init flag.
pub(crate) const PAYLOAD_STATE_LEN: usize = 9;
/// Dialog scratch: data-seen, reverse-started and reverse-data flags.
pub(crate) const DPA_STATE_LEN: usize = 3;
/// Packet gap scratch: millisecond timestamp of the previous packet.
pub(crate) const GAP_STATE_LEN: usize = 8;

/// Per-field treatment requested by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldModifier {
    /// Carry the field in the record.
    Keep,
    /// Drop the field from the compiled layout.
    Discard,
    /// Zero the low `32 - N` bits of an IPv4 address key.
    Mask(u8),
}

/// One field of a record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub ie: IeInfo,
    pub length: u16,
    pub modifier: FieldModifier,
}

impl SchemaField {
    pub fn new(ie: IeInfo, length: u16, modifier: FieldModifier) -> Self {
        SchemaField { ie, length, modifier }
    }

    pub fn keep(ie: IeInfo, length: u16) -> Self {
        Self::new(ie, length, FieldModifier::Keep)
    }
}

/// A flow record template: ordered fields plus the template id reported in
/// emitted records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSchema {
    pub template_id: u16,
    pub fields: Vec<SchemaField>,
}

impl RecordSchema {
    pub fn new(template_id: u16) -> Self {
        RecordSchema { template_id, fields: Vec::new() }
    }

    pub fn with_field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }
}

/// A schema field with its resolved position in the bucket buffer.
#[derive(Debug, Clone, Copy)]
pub struct LayoutField {
    pub ie: IeInfo,
    pub length: usize,
    pub offset: usize,
    /// Offset of this field's private scratch, when it has one.
    pub priv_offset: Option<usize>,
    pub modifier: FieldModifier,
}

/// Byte layout of one record template inside a bucket buffer.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub template_id: u16,
    fields: Vec<LayoutField>,
    record_len: usize,
    priv_len: usize,
}

impl RecordLayout {
    /// Compute the layout: discarded fields dropped, remaining fields packed
    /// in schema order, scratch areas appended past the record.
    pub fn build(schema: &RecordSchema) -> Result<Self> {
        let mut fields: Vec<LayoutField> = Vec::new();
        let mut offset = 0usize;
        for sf in &schema.fields {
            if sf.modifier == FieldModifier::Discard {
                continue;
            }
            if fields.iter().any(|f| f.ie == sf.ie) {
                return Err(SchemaError::DuplicateField(sf.ie));
            }
            fields.push(LayoutField {
                ie: sf.ie,
                length: sf.length as usize,
                offset,
                priv_offset: None,
                modifier: sf.modifier,
            });
            offset += sf.length as usize;
        }
        let record_len = offset;

        let mut priv_len = 0usize;
        for f in fields.iter_mut() {
            let len = private_data_len(f.ie);
            if len > 0 {
                f.priv_offset = Some(record_len + priv_len);
                priv_len += len;
            }
        }

        let layout = RecordLayout { template_id: schema.template_id, fields, record_len, priv_len };
        layout.check_companions()?;
        Ok(layout)
    }

    // Companion elements are meaningless without the field they mirror.
    fn check_companions(&self) -> Result<()> {
        for f in &self.fields {
            let fwd = f.ie.forward();
            if fwd.pen != PEN_METER {
                continue;
            }
            let required = match fwd.id {
                ext::FRONT_PAYLOAD_LEN | ext::FRONT_PAYLOAD_PKT_COUNT => {
                    IeInfo { id: ext::FRONT_PAYLOAD, pen: f.ie.pen }
                }
                _ => continue,
            };
            if self.field(required).is_none() {
                return Err(SchemaError::MissingCompanion { ie: f.ie, required: "front payload" });
            }
        }
        Ok(())
    }

    /// Look up a field by information element.
    pub fn field(&self, ie: IeInfo) -> Option<&LayoutField> {
        self.fields.iter().find(|f| f.ie == ie)
    }

    pub fn fields(&self) -> &[LayoutField] {
        &self.fields
    }

    /// Length of the emitted record in bytes.
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Length of the private scratch past the record.
    pub fn priv_len(&self) -> usize {
        self.priv_len
    }

    /// Full bucket buffer length: record plus scratch.
    pub fn total_len(&self) -> usize {
        self.record_len + self.priv_len
    }
}

/// Scratch bytes a field needs past the record, if any.
fn private_data_len(ie: IeInfo) -> usize {
    let fwd = ie.forward();
    if fwd.pen != PEN_METER {
        return 0;
    }
    match fwd.id {
        ext::FRONT_PAYLOAD | ext::TRANSPORT_OCTET_DELTA_COUNT => PAYLOAD_STATE_LEN,
        // dialog state is shared by both directions, keep it on the forward field
        ext::DPA_FORCED_EXPORT if !ie.is_reverse() => DPA_STATE_LEN,
        ext::MAX_PACKET_GAP => GAP_STATE_LEN,
        _ => 0,
    }
}
