//! Export queue
//!
//! FIFO over the bucket arena, ordered by bucket creation time. A bucket
//! whose inactivity deadline is refreshed past its queue position is moved
//! to the tail (lazy resort); the expiry scan only ever inspects the head.
//! All operations are O(1) via the buckets' own queue links.

use slab::Slab;

use super::bucket::{Bucket, BucketKey};

#[derive(Debug, Default)]
pub struct ExportQueue {
    head: Option<BucketKey>,
    tail: Option<BucketKey>,
    len: usize,
}

impl ExportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<BucketKey> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_tail(&mut self, arena: &mut Slab<Bucket>, key: BucketKey) {
        arena[key].queue_prev = self.tail;
        arena[key].queue_next = None;
        match self.tail {
            Some(tail) => arena[tail].queue_next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
    }

    /// Remove a bucket from the queue. Calling this for a bucket that is
    /// not queued is a programming error and panics.
    pub fn unlink(&mut self, arena: &mut Slab<Bucket>, key: BucketKey) {
        let (prev, next) = {
            let b = &arena[key];
            (b.queue_prev, b.queue_next)
        };
        if prev.is_none() && next.is_none() && self.head != Some(key) {
            panic!("bucket {} is not in the export queue", key);
        }
        match prev {
            Some(p) => arena[p].queue_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena[n].queue_prev = prev,
            None => self.tail = prev,
        }
        arena[key].queue_prev = None;
        arena[key].queue_next = None;
        self.len -= 1;
    }

    pub fn move_to_tail(&mut self, arena: &mut Slab<Bucket>, key: BucketKey) {
        self.unlink(arena, key);
        self.push_tail(arena, key);
    }
}
