//! Allocates synthetic fixed-range ids for network pilot ids.
//!
//! The network identifies pilots by an arbitrary numeric CID, which cannot be
//! used as an aircraft address. Each CID gets a synthetic id from a configured
//! range; the mapping is a bijection at every instant.
//!
//! Lookups read a copy-on-write snapshot holding both directions, so they never
//! wait on an allocation. Allocations are serialized by a mutex and publish a new
//! snapshot when they succeed.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::snapshot::SnapshotCell;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Every id in the range is claimed
    #[error("Identifier range {start:#08X}..={end:#08X} is exhausted")]
    Exhausted { start: u32, end: u32 },

    #[error("Invalid external id {0}")]
    InvalidExternalId(i64),

    #[error("Invalid identifier range {start:#08X}..={end:#08X}")]
    InvalidRange { start: u32, end: u32 },
}

/// Both directions of the mapping, always published together
#[derive(Debug, Default, Clone)]
struct Mappings {
    forward: HashMap<i64, u32>,
    reverse: HashMap<u32, i64>,
}

struct WriteState {
    /// Last id handed to each external id, kept after removal so the id comes back
    preferred: LruCache<i64, u32>,
    cursor: u32,
}

pub struct IdentifierAllocator {
    start: u32,
    end: u32,
    mappings: SnapshotCell<Mappings>,
    write: Mutex<WriteState>,
}

impl IdentifierAllocator {
    /// Allocator over `start..=end`, remembering at most `preferred_capacity`
    /// previous assignments.
    pub fn new(start: u32, end: u32, preferred_capacity: usize) -> Result<Self, AllocationError> {
        if start > end {
            return Err(AllocationError::InvalidRange { start, end });
        }
        let capacity = NonZeroUsize::new(preferred_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            start,
            end,
            mappings: SnapshotCell::default(),
            write: Mutex::new(WriteState {
                preferred: LruCache::new(capacity),
                cursor: start,
            }),
        })
    }

    pub fn range(&self) -> (u32, u32) {
        (self.start, self.end)
    }

    /// Synthetic id for `external_id`, allocating one on first sighting.
    pub fn create_or_fetch(&self, external_id: i64) -> Result<u32, AllocationError> {
        if external_id <= 0 {
            return Err(AllocationError::InvalidExternalId(external_id));
        }

        if let Some(id) = self.lookup(external_id) {
            return Ok(id);
        }

        let mut write = self.write.lock();

        // another caller may have allocated while we waited
        let current = self.mappings.load();
        if let Some(id) = current.forward.get(&external_id) {
            return Ok(*id);
        }

        let preferred = write
            .preferred
            .get(&external_id)
            .copied()
            .filter(|id| self.contains(*id) && !current.reverse.contains_key(id));

        let id = match preferred {
            Some(id) => id,
            None => match self.scan_from(write.cursor, &current.reverse) {
                Some(id) => {
                    write.cursor = self.successor(id);
                    id
                }
                None => {
                    metrics::counter!("vatsim.allocator.exhausted_total").increment(1);
                    warn!(
                        external_id,
                        start = self.start,
                        end = self.end,
                        "Identifier range exhausted"
                    );
                    return Err(AllocationError::Exhausted {
                        start: self.start,
                        end: self.end,
                    });
                }
            },
        };

        let mut next = Mappings::clone(&current);
        next.forward.insert(external_id, id);
        next.reverse.insert(id, external_id);
        let claimed = next.forward.len();
        self.mappings.store(next);
        write.preferred.put(external_id, id);

        metrics::gauge!("vatsim.allocator.claimed").set(claimed as f64);
        debug!(external_id, id = %format_args!("{:06X}", id), "Allocated identifier");
        Ok(id)
    }

    /// Releases the id held by `external_id`. Returns the released id, if any.
    ///
    /// The assignment stays in preferred memory so the same id is handed back
    /// when the pilot returns and nobody else has taken it.
    pub fn remove(&self, external_id: i64) -> Option<u32> {
        let _write = self.write.lock();

        let current = self.mappings.load();
        let id = *current.forward.get(&external_id)?;

        let mut next = Mappings::clone(&current);
        next.forward.remove(&external_id);
        next.reverse.remove(&id);
        let claimed = next.forward.len();
        self.mappings.store(next);

        metrics::gauge!("vatsim.allocator.claimed").set(claimed as f64);
        Some(id)
    }

    pub fn lookup(&self, external_id: i64) -> Option<u32> {
        self.mappings.load().forward.get(&external_id).copied()
    }

    pub fn external_id_for(&self, id: u32) -> Option<i64> {
        self.mappings.load().reverse.get(&id).copied()
    }

    pub fn claimed_count(&self) -> usize {
        self.mappings.load().forward.len()
    }

    fn contains(&self, id: u32) -> bool {
        (self.start..=self.end).contains(&id)
    }

    fn successor(&self, id: u32) -> u32 {
        if id >= self.end { self.start } else { id + 1 }
    }

    /// First unclaimed id at or after `from`, wrapping once around the range.
    fn scan_from(&self, from: u32, claimed: &HashMap<u32, i64>) -> Option<u32> {
        let first = if self.contains(from) { from } else { self.start };
        let mut candidate = first;
        loop {
            if !claimed.contains_key(&candidate) {
                return Some(candidate);
            }
            candidate = self.successor(candidate);
            if candidate == first {
                return None;
            }
        }
    }
}

impl std::fmt::Debug for IdentifierAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierAllocator")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("claimed", &self.claimed_count())
            .finish()
    }
}
