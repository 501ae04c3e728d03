// C9 RollbackLog: a two-tier (memory + disk) pre-image log for one lock's
// writes. Grounded in
// `examples/original_source/molap/server/Source/Olap/RollbackStorage.cpp`
// (a paged buffer that spills whole pages to disk once its in-memory
// budget — `maximumMemoryRollbackSize` there — is exhausted). Disk I/O
// itself is out of scope (persistence Non-goal); the `Spill` trait keeps
// the disk half a pluggable port so tests can fake it in memory.

use crate::error::{Error, Result};
use crate::key::Key;

#[derive(Clone, Debug, PartialEq)]
pub enum PriorValue {
    Present(f64),
    Absent,
}

#[derive(Clone, Debug)]
pub struct RollbackEntry {
    pub path: Key,
    pub prior: PriorValue,
}

fn entry_weight(path: &Key) -> u64 {
    path.dims() as u64 * 4 + 9
}

/// The disk half of the two-tier log. A real implementation backs this
/// with per-lock files (`RollbackStorage`'s `computePageFileName`); tests
/// use an in-memory fake.
pub trait Spill: Send + Sync {
    fn write_page(&mut self, page_no: usize, entries: &[RollbackEntry]) -> Result<()>;
    fn read_page(&mut self, page_no: usize) -> Result<Vec<RollbackEntry>>;
}

/// Creates the disk half for one lock's rollback log, lazily, the first
/// time it spills (`RollbackStorage::computePageFileName` keys a page file
/// off the lock id in the original).
pub trait SpillFactory: Send + Sync {
    fn create(&self, lock_id: u32) -> Box<dyn Spill>;
}

/// Append-only pre-image log for one lock.
/// `step_index` marks the logical entry count at the start of each
/// user-visible write, so `rollback(n)` knows where to stop.
pub struct RollbackLog {
    memory: Vec<RollbackEntry>,
    memory_bytes: u64,
    max_memory_bytes: u64,
    page_entry_counts: Vec<usize>,
    page_bytes: Vec<u64>,
    max_disk_bytes: u64,
    disk_bytes: u64,
    step_index: Vec<usize>,
}

impl RollbackLog {
    pub fn new(max_memory_bytes: u64, max_disk_bytes: u64) -> Self {
        Self {
            memory: Vec::new(),
            memory_bytes: 0,
            max_memory_bytes,
            page_entry_counts: Vec::new(),
            page_bytes: Vec::new(),
            max_disk_bytes,
            disk_bytes: 0,
            step_index: Vec::new(),
        }
    }

    fn total_len(&self) -> usize {
        self.page_entry_counts.iter().sum::<usize>() + self.memory.len()
    }

    /// Marks the start of a new user-visible write.
    pub fn begin_step(&mut self) {
        self.step_index.push(self.total_len());
    }

    /// Records one cell's pre-image. Capacity is checked before the write;
    /// exceeding the combined memory+disk budget fails with
    /// `CubeLockNoCapacity`.
    pub fn record(&mut self, path: Key, prior: PriorValue, spill: &mut dyn Spill) -> Result<()> {
        let weight = entry_weight(&path);
        if self.memory_bytes + self.disk_bytes + weight > self.max_memory_bytes + self.max_disk_bytes
        {
            return Err(Error::CubeLockNoCapacity);
        }
        if !self.memory.is_empty() && self.memory_bytes + weight > self.max_memory_bytes {
            self.flush(spill)?;
        }
        self.memory_bytes += weight;
        self.memory.push(RollbackEntry { path, prior });
        Ok(())
    }

    fn flush(&mut self, spill: &mut dyn Spill) -> Result<()> {
        let page_no = self.page_entry_counts.len();
        spill.write_page(page_no, &self.memory)?;
        self.page_entry_counts.push(self.memory.len());
        self.page_bytes.push(self.memory_bytes);
        self.disk_bytes += self.memory_bytes;
        self.memory.clear();
        self.memory_bytes = 0;
        Ok(())
    }

    /// Replays rows from the tail back to the `n`-th step boundary, newest
    /// first, handing each `(path, prior)` to `apply` so the caller can
    /// restore the cell. Disk pages are read back
    /// newest-first; a page only partially consumed by the target depth is
    /// rewritten in place with its unconsumed prefix.
    pub fn rollback(
        &mut self,
        n_steps: usize,
        spill: &mut dyn Spill,
        mut apply: impl FnMut(&Key, &PriorValue),
    ) -> Result<()> {
        let total = self.total_len();
        let boundary = self.step_index.len().saturating_sub(n_steps);
        let target = self.step_index.get(boundary).copied().unwrap_or(0);
        let mut remaining = total.saturating_sub(target);

        while remaining > 0 {
            if let Some(entry) = self.memory.pop() {
                self.memory_bytes -= entry_weight(&entry.path);
                apply(&entry.path, &entry.prior);
                remaining -= 1;
                continue;
            }

            let Some(page_no) = self.page_entry_counts.len().checked_sub(1) else {
                break;
            };
            let mut page = spill.read_page(page_no)?;
            let take = remaining.min(page.len());
            let tail = page.split_off(page.len() - take);
            for entry in tail.iter().rev() {
                apply(&entry.path, &entry.prior);
            }
            remaining -= take;

            if page.is_empty() {
                self.page_entry_counts.pop();
                self.disk_bytes -= self.page_bytes.pop().unwrap_or(0);
            } else {
                let new_bytes: u64 = page.iter().map(|e| entry_weight(&e.path)).sum();
                let consumed = self.page_bytes[page_no] - new_bytes;
                spill.write_page(page_no, &page)?;
                self.page_entry_counts[page_no] = page.len();
                self.page_bytes[page_no] = new_bytes;
                self.disk_bytes -= consumed;
            }
        }

        self.step_index.truncate(boundary);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.memory_bytes = 0;
        self.page_entry_counts.clear();
        self.page_bytes.clear();
        self.disk_bytes = 0;
        self.step_index.clear();
    }

    pub fn len(&self) -> usize {
        self.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }
}
