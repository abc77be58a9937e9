use std::collections::HashMap;

/// Pool configuration for retained byte buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScratchPoolOpts {
    /// Maximum capacity bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained buffers per size class.
    pub max_buffers_per_bucket: usize,
}

impl Default for ScratchPoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 256 * 1024 * 1024,
            max_buffers_per_bucket: 8,
        }
    }
}

/// Smallest size class; smaller buffers are never retained.
pub const MIN_CLASS_BYTES: usize = 1024;

/// Counters describing pool behavior since creation or the last [`ScratchPool::clear`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScratchPoolStats {
    /// Buffers currently held.
    pub retained_buffers: usize,
    /// Capacity bytes currently held.
    pub retained_bytes: usize,
    /// Fresh allocations made by [`ScratchPool::take`].
    pub allocations: u64,
    /// Requests served from a retained buffer.
    pub reuses: u64,
    /// Buffers dropped on release because a cap was hit.
    pub dropped_on_release: u64,
}

/// Bounded pool of byte buffers keyed by power-of-two capacity class.
///
/// Worker-side only. Buffers moved into the worker (consumed inputs) are recycled here and handed
/// out again as output rasters.
#[derive(Debug)]
pub struct ScratchPool {
    opts: ScratchPoolOpts,
    stats: ScratchPoolStats,
    buckets: HashMap<usize, Vec<Vec<u8>>>,
}

/// Class that guarantees room for `len` bytes.
fn class_for_request(len: usize) -> usize {
    len.max(MIN_CLASS_BYTES).next_power_of_two()
}

/// Largest class a buffer of `capacity` can serve.
fn class_for_capacity(capacity: usize) -> Option<usize> {
    if capacity < MIN_CLASS_BYTES {
        return None;
    }
    Some(1usize << (usize::BITS - 1 - capacity.leading_zeros()))
}

impl ScratchPool {
    /// Create an empty pool.
    pub fn new(opts: ScratchPoolOpts) -> Self {
        Self {
            opts,
            stats: ScratchPoolStats::default(),
            buckets: HashMap::new(),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> ScratchPoolStats {
        self.stats.clone()
    }

    /// A zero-filled buffer of exactly `len` bytes, reused when possible.
    pub fn take(&mut self, len: usize) -> Vec<u8> {
        let class = class_for_request(len);
        if let Some(mut buf) = self.buckets.get_mut(&class).and_then(Vec::pop) {
            self.stats.retained_buffers = self.stats.retained_buffers.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(buf.capacity());
            self.stats.reuses = self.stats.reuses.saturating_add(1);
            buf.clear();
            buf.resize(len, 0);
            return buf;
        }

        self.stats.allocations = self.stats.allocations.saturating_add(1);
        let mut buf = Vec::with_capacity(class);
        buf.resize(len, 0);
        buf
    }

    /// Hand a buffer back for later reuse. Dropped if it is too small or a cap is hit.
    pub fn release(&mut self, buf: Vec<u8>) {
        let capacity = buf.capacity();
        let Some(class) = class_for_capacity(capacity) else {
            return;
        };
        if self.opts.max_pool_bytes == 0
            || self.opts.max_buffers_per_bucket == 0
            || self.stats.retained_bytes.saturating_add(capacity) > self.opts.max_pool_bytes
        {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        let bucket = self.buckets.entry(class).or_default();
        if bucket.len() >= self.opts.max_buffers_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        bucket.push(buf);
        self.stats.retained_buffers = self.stats.retained_buffers.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(capacity);
    }

    /// Drop every retained buffer and reset the counters.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.stats = ScratchPoolStats::default();
    }
}
