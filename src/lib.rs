//! Schema-driven packet-to-flow aggregation
//!
//! `flowmeter` turns a stream of captured packets into IPFIX/NetFlow-style
//! flow records. A record schema is compiled once into a field plan; every
//! packet is then hashed over its key fields, matched against a bucket
//! store with spill chains, and folded in field by field (min/max
//! timestamps, counters, TCP flag OR, front payload capture, dialog-based
//! payload aggregation). Flows leave the table through an export queue when
//! their inactivity or hard deadline passes, or immediately when a payload
//! dialog turns around.
//!
//! # Example
//!
//! ```
//! use flowmeter::{
//!     AggregatorConfig, IeInfo, PacketAggregator, RecordSchema, SchemaField, iana,
//! };
//!
//! let schema = RecordSchema::new(256)
//!     .with_field(SchemaField::keep(IeInfo::iana(iana::SOURCE_IPV4_ADDRESS), 5))
//!     .with_field(SchemaField::keep(IeInfo::iana(iana::DESTINATION_IPV4_ADDRESS), 5))
//!     .with_field(SchemaField::keep(IeInfo::iana(iana::PROTOCOL_IDENTIFIER), 1))
//!     .with_field(SchemaField::keep(IeInfo::iana(iana::PACKET_DELTA_COUNT), 8));
//! let mut aggregator = PacketAggregator::new(&schema, AggregatorConfig::default()).unwrap();
//! // feed packets with aggregator.aggregate_packet(..), collect finished
//! // flows with aggregator.expire_flows(now, false)
//! ```

pub mod config;
pub mod error;
pub mod ie;
pub mod packet;
pub mod plan;
pub mod record;
pub mod schema;
pub mod table;

pub use config::AggregatorConfig;
pub use error::{Result, SchemaError, UnsupportedFieldError};
pub use ie::{ext, iana, IeInfo};
pub use packet::{LinkLayer, RawPacket, TransportProtocol};
pub use plan::FieldPlan;
pub use record::FlowRecord;
pub use schema::{FieldModifier, RecordLayout, RecordSchema, SchemaField};
pub use table::{AggregatorStats, PacketAggregator};

use std::sync::Arc;

use parking_lot::Mutex;

/// Thread-safe handle around a [`PacketAggregator`].
///
/// The packet path is single-writer by design; capture threads and the
/// expiry timer share the aggregator through one mutex with short critical
/// sections (one packet, or one queue drain).
pub struct SharedAggregator {
    inner: Arc<Mutex<PacketAggregator>>,
}

impl SharedAggregator {
    pub fn new(schema: &RecordSchema, config: AggregatorConfig) -> Result<Self> {
        Ok(SharedAggregator {
            inner: Arc::new(Mutex::new(PacketAggregator::new(schema, config)?)),
        })
    }

    /// Fold one packet in; a displaced flow comes back immediately.
    pub fn process(&self, p: &RawPacket) -> Option<FlowRecord> {
        self.inner.lock().aggregate_packet(p)
    }

    /// Emit every flow whose deadline passed by `now`.
    pub fn expire(&self, now: u32) -> Vec<FlowRecord> {
        self.inner.lock().expire_flows(now, false)
    }

    /// Empty the table, emitting everything (shutdown).
    pub fn drain(&self) -> Vec<FlowRecord> {
        self.inner.lock().expire_flows(0, true)
    }

    /// Swap in a new schema/configuration. The old table drains completely
    /// and its records are returned; a rejected schema leaves the running
    /// aggregator untouched.
    pub fn reconfigure(
        &self,
        schema: &RecordSchema,
        config: AggregatorConfig,
    ) -> Result<Vec<FlowRecord>> {
        let mut fresh = PacketAggregator::new(schema, config)?;
        let mut guard = self.inner.lock();
        let drained = guard.expire_flows(0, true);
        std::mem::swap(&mut *guard, &mut fresh);
        Ok(drained)
    }

    pub fn stats(&self) -> AggregatorStats {
        self.inner.lock().stats.clone()
    }

    pub fn snapshot(&self) -> String {
        self.inner.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Clone for SharedAggregator {
    fn clone(&self) -> Self {
        SharedAggregator { inner: Arc::clone(&self.inner) }
    }
}
