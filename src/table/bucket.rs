//! Flow buckets
//!
//! One bucket buffers one flow under construction. Buckets live in a slab
//! arena and link to each other by arena key: each bucket sits in exactly
//! one hash slot spill chain and at one position in the export queue.

/// Arena key of a bucket.
pub type BucketKey = usize;

#[derive(Debug)]
pub struct Bucket {
    /// Record bytes followed by the private scratch area.
    pub data: Vec<u8>,
    /// Expires when no packet arrives before this time.
    pub expire_time: u32,
    /// Expires at this time regardless of activity.
    pub hard_expire_time: u32,
    /// Must be exported immediately (dialog turnaround).
    pub force_expiry: bool,
    /// Currently linked into a hash slot chain.
    pub in_table: bool,
    /// Slot index the bucket was filed under, kept for O(1) removal.
    pub hash: u32,
    pub observation_domain: u32,
    pub chain_prev: Option<BucketKey>,
    pub chain_next: Option<BucketKey>,
    pub queue_prev: Option<BucketKey>,
    pub queue_next: Option<BucketKey>,
}

impl Bucket {
    pub fn new(
        data: Vec<u8>,
        observation_domain: u32,
        hash: u32,
        now: u32,
        min_buffer_time: u32,
        max_buffer_time: u32,
    ) -> Self {
        Bucket {
            data,
            expire_time: now + min_buffer_time,
            hard_expire_time: now + max_buffer_time,
            force_expiry: false,
            in_table: false,
            hash,
            observation_domain,
            chain_prev: None,
            chain_next: None,
            queue_prev: None,
            queue_next: None,
        }
    }

    /// Push the inactivity deadline out; the hard deadline never moves.
    pub fn refresh(&mut self, now: u32, min_buffer_time: u32) {
        self.expire_time = now + min_buffer_time;
    }

    /// True once either deadline has passed.
    pub fn expired(&self, now: u32) -> bool {
        self.expire_time < now || self.hard_expire_time < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines() {
        let mut b = Bucket::new(vec![0; 8], 1, 42, 100, 60, 600);
        assert_eq!(b.expire_time, 160);
        assert_eq!(b.hard_expire_time, 700);
        assert!(!b.expired(160));
        assert!(b.expired(161));

        b.refresh(200, 60);
        assert_eq!(b.expire_time, 260);
        assert_eq!(b.hard_expire_time, 700);
        assert!(b.expired(701));
    }
}
