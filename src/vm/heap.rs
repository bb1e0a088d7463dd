//! Memory manager behind `-mem-manager-allocate` / `-mem-manager-deallocate`.
//!
//! The code generator treats the allocator as an external collaborator and
//! only relies on its two entry points. The simulator binds them to a
//! [`MemoryManager`]; [`FirstFitHeap`] is the bundled implementation. It
//! also polices accesses so that reads and writes of freed records fault
//! instead of silently succeeding.

use std::collections::BTreeMap;

use super::Fault;

/// Allocation counters of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub live_records: usize,
    pub live_bytes: u32,
    pub peak_live_records: usize,
}

impl HeapStats {
    pub fn leaked(&self) -> usize {
        self.live_records
    }
}

pub trait MemoryManager {
    fn allocate(&mut self, size: u32) -> Result<u32, Fault>;
    fn deallocate(&mut self, address: u32) -> Result<(), Fault>;
    /// Fault unless `width` bytes at `address` lie inside one live allocation.
    fn check_access(&self, address: u32, width: u32) -> Result<(), Fault>;
    /// Whether `address` falls in the managed region at all.
    fn manages(&self, address: u32) -> bool;
    fn stats(&self) -> HeapStats;
}

const ALIGNMENT: u32 = 4;

/// First-fit allocator over `[base, limit)` with coalescing free list.
#[derive(Debug)]
pub struct FirstFitHeap {
    base: u32,
    limit: u32,
    live: BTreeMap<u32, u32>,
    /// Free blocks by address.
    free: BTreeMap<u32, u32>,
    stats: HeapStats,
}

impl FirstFitHeap {
    pub fn new(base: u32, limit: u32) -> Self {
        let mut free = BTreeMap::new();
        if limit > base {
            free.insert(base, limit - base);
        }
        Self {
            base,
            limit,
            live: BTreeMap::new(),
            free,
            stats: HeapStats::default(),
        }
    }
}

impl MemoryManager for FirstFitHeap {
    fn allocate(&mut self, size: u32) -> Result<u32, Fault> {
        let rounded = size.max(1).div_ceil(ALIGNMENT) * ALIGNMENT;
        let Some((&address, &available)) = self.free.iter().find(|(_, &s)| s >= rounded) else {
            return Err(Fault::OutOfMemory(size));
        };
        self.free.remove(&address);
        if available > rounded {
            self.free.insert(address + rounded, available - rounded);
        }
        self.live.insert(address, rounded);

        self.stats.allocations += 1;
        self.stats.live_records += 1;
        self.stats.live_bytes += rounded;
        self.stats.peak_live_records = self.stats.peak_live_records.max(self.stats.live_records);
        log::trace!("allocate {} bytes at {}", size, address);
        Ok(address)
    }

    fn deallocate(&mut self, address: u32) -> Result<(), Fault> {
        let size = self
            .live
            .remove(&address)
            .ok_or(Fault::InvalidFree(address))?;

        let mut start = address;
        let mut len = size;
        if let Some((&prev, &prev_len)) = self.free.range(..address).next_back() {
            if prev + prev_len == address {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(address + size)) {
            len += next_len;
        }
        self.free.insert(start, len);

        self.stats.deallocations += 1;
        self.stats.live_records -= 1;
        self.stats.live_bytes -= size;
        log::trace!("deallocate {} ({} bytes)", address, size);
        Ok(())
    }

    fn check_access(&self, address: u32, width: u32) -> Result<(), Fault> {
        match self.live.range(..=address).next_back() {
            Some((&start, &size)) if address + width <= start + size => Ok(()),
            _ => Err(Fault::UseAfterFree(address)),
        }
    }

    fn manages(&self, address: u32) -> bool {
        address >= self.base && address < self.limit
    }

    fn stats(&self) -> HeapStats {
        self.stats
    }
}
