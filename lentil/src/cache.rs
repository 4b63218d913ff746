use crate::align::PairAlignment;
use crate::config::{AlignParams, ComparisonSpace};
use crate::error::Result;

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Cache key: which samples, which space, and a stable hash of the
/// parameters
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub sample_a: Box<str>,
    pub sample_b: Box<str>,
    pub space: ComparisonSpace,
    pub params_hash: u64,
}

impl PairKey {
    pub fn new(
        sample_a: &str,
        sample_b: &str,
        space: ComparisonSpace,
        params: &AlignParams,
    ) -> Self {
        Self {
            sample_a: sample_a.into(),
            sample_b: sample_b.into(),
            space,
            params_hash: params.stable_hash(),
        }
    }

    pub fn involves(&self, sample: &str) -> bool {
        self.sample_a.as_ref() == sample || self.sample_b.as_ref() == sample
    }
}

type Slot = Arc<Mutex<Option<Arc<PairAlignment>>>>;

/// Memoized pairwise alignments
///
/// Each key owns a slot with its own lock. The first worker to reach an
/// empty slot computes while holding only that slot's lock; others
/// asking for the same key wait and then read the stored value, and
/// other keys proceed in parallel. A slot is filled once, and only by a
/// successful computation.
#[derive(Default)]
pub struct PairCache {
    slots: DashMap<PairKey, Slot>,
    computations: AtomicUsize,
}

impl PairCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, or the result of `compute` stored under
    /// `key` if it succeeds
    pub fn get_or_compute<F>(&self, key: PairKey, compute: F) -> Result<Arc<PairAlignment>>
    where
        F: FnOnce() -> Result<PairAlignment>,
    {
        let slot: Slot = self.slots.entry(key.clone()).or_default().clone();

        // a panic inside `compute` cannot leave a partial value behind,
        // so a poisoned slot is still consistent
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(hit) = guard.as_ref() {
            return Ok(hit.clone());
        }

        match compute() {
            Ok(value) => {
                let value = Arc::new(value);
                self.computations.fetch_add(1, Ordering::Relaxed);
                *guard = Some(value.clone());
                Ok(value)
            }
            Err(err) => {
                drop(guard);
                drop(slot);
                self.drop_empty_slot(&key);
                Err(err)
            }
        }
    }

    /// Remove the slot of `key` if it is still empty and nobody else
    /// holds it; clones of a slot are only taken under the map's shard
    /// lock, which `remove_if` holds
    fn drop_empty_slot(&self, key: &PairKey) {
        self.slots.remove_if(key, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().map(|g| g.is_none()).unwrap_or(false)
        });
    }

    pub fn get(&self, key: &PairKey) -> Option<Arc<PairAlignment>> {
        let slot = self.slots.get(key)?.clone();
        let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Number of stored alignments
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .map(|g| g.is_some())
                    .unwrap_or_else(|e| e.into_inner().is_some())
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many alignments were actually computed (cache misses that
    /// succeeded)
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    /// Drop every stored alignment
    pub fn invalidate(&self) {
        self.slots.clear();
    }

    /// Drop the alignments that involve `sample`
    pub fn invalidate_sample(&self, sample: &str) {
        self.slots.retain(|key, _| !key.involves(sample));
    }
}
