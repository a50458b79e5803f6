//! Emitted flow records
//!
//! A [`FlowRecord`] is what leaves the aggregator: the record bytes of an
//! expired bucket (private scratch stripped), annotated with the template
//! id and the observation domain the flow was captured in. Field access
//! goes through the schema layout and is bounds checked.

use crate::ie::IeInfo;
use crate::schema::RecordLayout;

#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub template_id: u16,
    pub observation_domain: u32,
    data: Vec<u8>,
}

impl FlowRecord {
    pub(crate) fn new(
        template_id: u16,
        observation_domain: u32,
        mut data: Vec<u8>,
        record_len: usize,
    ) -> Self {
        data.truncate(record_len);
        FlowRecord { template_id, observation_domain, data }
    }

    /// The raw record bytes, network byte order, laid out per the schema.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of one field, or `None` when the layout does not carry it.
    pub fn field<'a>(&'a self, layout: &RecordLayout, ie: IeInfo) -> Option<&'a [u8]> {
        let f = layout.field(ie)?;
        self.data.get(f.offset..f.offset + f.length)
    }

    /// A 4-byte field as a host-order integer.
    pub fn field_u32(&self, layout: &RecordLayout, ie: IeInfo) -> Option<u32> {
        let bytes = self.field(layout, ie)?;
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    }

    /// An 8-byte field as a host-order integer.
    pub fn field_u64(&self, layout: &RecordLayout, ie: IeInfo) -> Option<u64> {
        let bytes = self.field(layout, ie)?;
        Some(u64::from_be_bytes(bytes.try_into().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::iana;
    use crate::schema::{RecordSchema, SchemaField};

    #[test]
    fn test_field_access() {
        let schema = RecordSchema::new(77)
            .with_field(SchemaField::keep(IeInfo::iana(iana::PROTOCOL_IDENTIFIER), 1))
            .with_field(SchemaField::keep(IeInfo::iana(iana::PACKET_DELTA_COUNT), 8));
        let layout = RecordLayout::build(&schema).unwrap();

        let mut data = vec![0u8; 9];
        data[0] = 6;
        data[1..9].copy_from_slice(&3u64.to_be_bytes());
        let record = FlowRecord::new(77, 9, data, 9);

        assert_eq!(record.field(&layout, IeInfo::iana(iana::PROTOCOL_IDENTIFIER)), Some(&[6u8][..]));
        assert_eq!(record.field_u64(&layout, IeInfo::iana(iana::PACKET_DELTA_COUNT)), Some(3));
        assert_eq!(record.field(&layout, IeInfo::iana(iana::SOURCE_IPV4_ADDRESS)), None);
    }

    #[test]
    fn test_scratch_stripped() {
        let record = FlowRecord::new(1, 1, vec![7u8; 20], 12);
        assert_eq!(record.data().len(), 12);
    }

    #[test]
    fn test_width_mismatch_is_none() {
        let schema = RecordSchema::new(1)
            .with_field(SchemaField::keep(IeInfo::iana(iana::PROTOCOL_IDENTIFIER), 1));
        let layout = RecordLayout::build(&schema).unwrap();
        let record = FlowRecord::new(1, 1, vec![6], 1);
        assert_eq!(record.field_u32(&layout, IeInfo::iana(iana::PROTOCOL_IDENTIFIER)), None);
    }
}
