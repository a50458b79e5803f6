//! The packet-to-flow aggregation hash table
//!
//! [`PacketAggregator`] owns the slot array, the bucket arena and the
//! export queue. The packet path is: resolve variable field sources, build
//! the masked key scratch, hash the key, walk the slot's spill chain (and
//! the reverse chain for biflow), then either fold the packet into the
//! matched bucket or file a new one. Expiry drains the export queue head.

pub mod bucket;
pub mod export;

use slab::Slab;
use tracing::{debug, info};

use crate::config::AggregatorConfig;
use crate::error::Result;
use crate::packet::RawPacket;
use crate::plan::ops::{get_u32, put_u32};
use crate::plan::FieldPlan;
use crate::record::FlowRecord;
use crate::schema::{RecordLayout, RecordSchema};

use bucket::{Bucket, BucketKey};
use export::ExportQueue;

/// Aggregation counters.
#[derive(Debug, Clone, Default)]
pub struct AggregatorStats {
    pub records_received: u64,
    pub records_sent: u64,
    pub buckets_created: u64,
    pub expired: u64,
    /// Buckets forced out by a dialog turnaround or an overdue match.
    pub forced_exports: u64,
    /// Insertions that landed in an already occupied slot.
    pub multi_entry_slots: u64,
}

pub struct PacketAggregator {
    config: AggregatorConfig,
    plan: FieldPlan,
    slots: Vec<Option<BucketKey>>,
    arena: Slab<Bucket>,
    queue: ExportQueue,
    mask: u32,
    now: u32,
    pub stats: AggregatorStats,
}

impl PacketAggregator {
    pub fn new(schema: &RecordSchema, config: AggregatorConfig) -> Result<Self> {
        config.validate()?;
        let plan = FieldPlan::compile(schema, config.biflow)?;
        let size = config.table_size();
        info!(
            template_id = schema.template_id,
            hash_bits = config.hash_bits,
            biflow = config.biflow,
            record_len = plan.record_len(),
            "packet aggregator initialized"
        );
        Ok(PacketAggregator {
            config,
            plan,
            slots: vec![None; size],
            arena: Slab::new(),
            queue: ExportQueue::new(),
            mask: (size - 1) as u32,
            now: 0,
            stats: AggregatorStats::default(),
        })
    }

    pub fn plan(&self) -> &FieldPlan {
        &self.plan
    }

    pub fn layout(&self) -> &RecordLayout {
        self.plan.layout()
    }

    /// Number of flows currently buffered.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Fold one packet into the table. Returns a record when the packet
    /// forced a flow out: either its own flow's dialog turned around, or it
    /// matched a bucket whose deadline had already passed. The displaced
    /// flow is emitted here instead of waiting for the expiry scan; the
    /// packet itself starts a replacement bucket.
    pub fn aggregate_packet(&mut self, p: &RawPacket) -> Option<FlowRecord> {
        self.stats.records_received += 1;
        self.now = p.sec;
        self.plan.update_sources(p);
        self.plan.apply_masks(p);
        let hash = self.plan.hash(p) & self.mask;

        let mut flow_found = false;
        let mut displaced: Option<BucketKey> = None;

        let mut cursor = self.slots[hash as usize];
        while let Some(key) = cursor {
            if self.plan.equal_flow(&self.arena[key].data, p) {
                if self.arena[key].expired(p.sec) {
                    // the packet outlived the bucket, force it out and
                    // start a fresh flow
                    self.detach(key);
                    displaced = Some(key);
                } else if self.plan.aggregate_into(&mut self.arena[key].data, p, false) {
                    self.arena[key].force_expiry = true;
                    self.detach(key);
                    displaced = Some(key);
                } else {
                    self.refresh(key);
                    flow_found = true;
                }
                break;
            }
            cursor = self.arena[key].chain_next;
        }

        if self.plan.biflow && !flow_found && displaced.is_none() {
            let rev_hash = self.plan.hash_rev(p) & self.mask;
            let mut cursor = self.slots[rev_hash as usize];
            while let Some(key) = cursor {
                if self.plan.equal_flow_rev(&self.arena[key].data, p) {
                    if self.arena[key].expired(p.sec) {
                        self.detach(key);
                        displaced = Some(key);
                    } else if self.plan.aggregate_into(&mut self.arena[key].data, p, true) {
                        self.arena[key].force_expiry = true;
                        self.detach(key);
                        displaced = Some(key);
                    } else {
                        self.refresh(key);
                        flow_found = true;
                    }
                    break;
                }
                cursor = self.arena[key].chain_next;
            }
        }

        if !flow_found {
            self.create_bucket(p, hash, displaced);
        }

        displaced.map(|key| {
            self.stats.forced_exports += 1;
            self.emit(key)
        })
    }

    // New bucket at the head of its slot chain and the tail of the export
    // queue. A flow displaced by a dialog turnaround hands its dialog flow
    // count on; an overdue match starts a fresh dialog at zero.
    fn create_bucket(&mut self, p: &RawPacket, hash: u32, displaced: Option<BucketKey>) {
        let mut data = self.plan.build_record(p);
        if let (Some(old), Some(off)) = (displaced, self.plan.dpa_flow_count_offset) {
            if self.arena[old].force_expiry {
                let count = get_u32(&self.arena[old].data, off);
                put_u32(&mut data, off, count + 1);
            }
        }
        let key = self.arena.insert(Bucket::new(
            data,
            p.observation_domain,
            hash,
            self.now,
            self.config.min_buffer_time,
            self.config.max_buffer_time,
        ));

        let first = self.slots[hash as usize];
        self.arena[key].chain_next = first;
        if let Some(f) = first {
            self.arena[f].chain_prev = Some(key);
            self.stats.multi_entry_slots += 1;
        }
        self.slots[hash as usize] = Some(key);
        self.arena[key].in_table = true;
        self.queue.push_tail(&mut self.arena, key);
        self.stats.buckets_created += 1;
    }

    // Unlink a bucket from its spill chain and the export queue; the bucket
    // stays in the arena until emitted.
    fn detach(&mut self, key: BucketKey) {
        let (prev, next, hash) = {
            let b = &self.arena[key];
            (b.chain_prev, b.chain_next, b.hash)
        };
        match prev {
            Some(p) => self.arena[p].chain_next = next,
            None => self.slots[hash as usize] = next,
        }
        if let Some(n) = next {
            self.arena[n].chain_prev = prev;
        }
        let b = &mut self.arena[key];
        b.chain_prev = None;
        b.chain_next = None;
        b.in_table = false;
        self.queue.unlink(&mut self.arena, key);
    }

    // Deadline refresh after a successful aggregation; a bucket whose idle
    // deadline is now past its queue ordering moves to the tail.
    fn refresh(&mut self, key: BucketKey) {
        let b = &mut self.arena[key];
        b.refresh(self.now, self.config.min_buffer_time);
        if b.hard_expire_time > b.expire_time {
            self.queue.move_to_tail(&mut self.arena, key);
        }
    }

    fn emit(&mut self, key: BucketKey) -> FlowRecord {
        let b = self.arena.remove(key);
        self.stats.records_sent += 1;
        FlowRecord::new(
            self.layout().template_id,
            b.observation_domain,
            b.data,
            self.plan.record_len(),
        )
    }

    /// Emit every flow whose deadline has passed; with `drain_all` the
    /// whole table empties (shutdown, reconfiguration).
    pub fn expire_flows(&mut self, now: u32, drain_all: bool) -> Vec<FlowRecord> {
        let mut records = Vec::new();
        while let Some(head) = self.queue.head() {
            if !drain_all && !self.arena[head].expired(now) {
                break;
            }
            self.detach(head);
            self.stats.expired += 1;
            records.push(self.emit(head));
        }
        if !records.is_empty() {
            debug!(count = records.len(), remaining = self.arena.len(), "expired flows");
        }
        records
    }

    /// Occupancy report: one line per non-empty slot with its chain length.
    pub fn snapshot(&self) -> String {
        use std::fmt::Write;

        let mut out = String::from("slot\tbuckets\n");
        let mut chained = 0usize;
        for (i, slot) in self.slots.iter().enumerate() {
            let mut count = 0usize;
            let mut cursor = *slot;
            while let Some(key) = cursor {
                count += 1;
                cursor = self.arena[key].chain_next;
            }
            if count > 0 {
                let _ = writeln!(out, "{}\t{}", i, count);
            }
            if count > 1 {
                chained += count - 1;
            }
        }
        let _ = writeln!(out, "total\t{}\tchained\t{}", self.arena.len(), chained);
        out
    }
}
