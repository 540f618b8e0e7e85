//!
//! Bounded plan cache, keyed by the canonical query signature. Least
//! recently used entry is evicted when full; entries expire after a
//! time-to-live. Cached plans are deep-cloned on get so callers never
//! mutate a cached value.

use crate::plan::QueryPlan;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Default capacity.
pub const DEFAULT_CAPACITY: usize = 128;

/// Default time-to-live: ten minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct CachedPlan {
    plan: QueryPlan,
    /// Logical access time; bumped on every get.
    last_used: u64,
    created: Instant,
}

struct CacheState {
    map: FxHashMap<String, CachedPlan>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// The plan cache. One lock serializes get/set/evict.
pub struct PlanCache {
    capacity: usize,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Default for PlanCache {
    fn default() -> Self {
        PlanCache::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl PlanCache {
    pub fn new(capacity: usize, ttl: Duration) -> PlanCache {
        PlanCache {
            capacity: capacity.max(1),
            ttl,
            state: Mutex::new(CacheState {
                map: FxHashMap::default(),
                tick: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Fetch a deep clone of the cached plan, bumping its access time.
    /// Expired entries are dropped on the way.
    pub fn get(&self, signature: &str) -> Option<QueryPlan> {
        let mut st = self.state.lock();
        st.tick += 1;
        let tick = st.tick;
        let expired = match st.map.get(signature) {
            None => {
                st.misses += 1;
                return None;
            }
            Some(e) => e.created.elapsed() > self.ttl,
        };
        if expired {
            st.map.remove(signature);
            st.misses += 1;
            return None;
        }
        st.hits += 1;
        let e = st.map.get_mut(signature).expect("checked above");
        e.last_used = tick;
        Some(e.plan.clone())
    }

    /// Insert ( or refresh ) a plan, evicting the oldest-access entry
    /// when at capacity.
    pub fn set(&self, signature: &str, plan: QueryPlan) {
        let mut st = self.state.lock();
        st.tick += 1;
        let tick = st.tick;
        if !st.map.contains_key(signature) && st.map.len() >= self.capacity {
            if let Some(oldest) = st
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                st.map.remove(&oldest);
            }
        }
        st.map.insert(
            signature.to_string(),
            CachedPlan {
                plan,
                last_used: tick,
                created: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// ( hits, misses ) since start.
    pub fn stats(&self) -> (u64, u64) {
        let st = self.state.lock();
        (st.hits, st.misses)
    }
}
